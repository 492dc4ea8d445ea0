//! Opaque node payloads.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::tree::NodeId;

type Payload = Arc<dyn Any + Send + Sync>;

/// Opaque value held by a node.
///
/// Cloning a `Value` shares the payload. [`Value::new`] payloads also know how
/// to deep-copy themselves, which `duplicate` uses; [`Value::shared`] payloads
/// are always shared by reference.
#[derive(Clone)]
pub struct Value {
	payload: Payload,
	type_name: &'static str,
	copy: Option<fn(&Payload) -> Option<Payload>>,
}

fn copy_payload<T: Any + Send + Sync + Clone>(payload: &Payload) -> Option<Payload> {
	let value = payload.downcast_ref::<T>()?.clone();
	Some(Arc::new(value))
}

impl Value {
	/// Wraps a clonable payload.
	pub fn new<T: Any + Send + Sync + Clone>(value: T) -> Self {
		Self {
			payload: Arc::new(value),
			type_name: std::any::type_name::<T>(),
			copy: Some(copy_payload::<T>),
		}
	}

	/// Wraps a shared payload that is never deep-copied.
	pub fn shared<T: Any + Send + Sync>(value: Arc<T>) -> Self {
		Self {
			payload: value,
			type_name: std::any::type_name::<T>(),
			copy: None,
		}
	}

	/// [`TypeId`] of the payload.
	pub fn type_id(&self) -> TypeId {
		(*self.payload).type_id()
	}

	/// Type name of the payload, for diagnostics.
	pub fn type_name(&self) -> &'static str {
		self.type_name
	}

	pub fn is<T: Any>(&self) -> bool {
		self.payload.is::<T>()
	}

	pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
		self.payload.downcast_ref::<T>()
	}

	/// Returns the payload as a typed `Arc`, sharing it.
	pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
		Arc::clone(&self.payload).downcast::<T>().ok()
	}

	/// Identity comparison: true when both values share one payload.
	pub fn ptr_eq(&self, other: &Value) -> bool {
		Arc::ptr_eq(&self.payload, &other.payload)
	}

	/// Copies the payload when it is copyable, otherwise shares it.
	pub fn deep_copy(&self) -> Value {
		match self.copy.and_then(|copy| copy(&self.payload)) {
			Some(payload) => Value { payload, ..self.clone() },
			None => self.clone(),
		}
	}

	pub(crate) fn is_node_handle(&self) -> bool {
		self.is::<NodeId>()
	}
}

impl fmt::Debug for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if let Some(v) = self.downcast_ref::<i64>() {
			return write!(f, "Value({v})");
		}
		if let Some(v) = self.downcast_ref::<u64>() {
			return write!(f, "Value({v})");
		}
		if let Some(v) = self.downcast_ref::<f64>() {
			return write!(f, "Value({v})");
		}
		if let Some(v) = self.downcast_ref::<bool>() {
			return write!(f, "Value({v})");
		}
		if let Some(v) = self.downcast_ref::<String>() {
			return write!(f, "Value({v:?})");
		}
		write!(f, "Value(<{}>)", self.type_name)
	}
}

macro_rules! impl_from_scalar {
	($($ty:ty),* $(,)?) => {
		$(
			impl From<$ty> for Value {
				fn from(v: $ty) -> Self {
					Value::new(v)
				}
			}
		)*
	};
}

impl_from_scalar!(bool, i64, u64, f64, String);

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::new(v.to_owned())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn deep_copy_clones_copyable_payloads() {
		let v = Value::new(vec![1u8, 2, 3]);
		let copy = v.deep_copy();
		assert!(!copy.ptr_eq(&v));
		assert_eq!(copy.downcast_ref::<Vec<u8>>(), Some(&vec![1, 2, 3]));
	}

	#[test]
	fn shared_payloads_are_shared_on_copy() {
		struct Opaque;
		let v = Value::shared(Arc::new(Opaque));
		assert!(v.deep_copy().ptr_eq(&v));
		assert!(v.is::<Opaque>());
	}

	#[test]
	fn typed_access() {
		let v = Value::from(100i64);
		assert_eq!(v.downcast_ref::<i64>(), Some(&100));
		assert_eq!(v.downcast_ref::<u64>(), None);
		assert_eq!(*v.downcast_arc::<i64>().unwrap(), 100);
		assert_eq!(v.type_id(), TypeId::of::<i64>());
		assert_eq!(format!("{v:?}"), "Value(100)");
	}
}
