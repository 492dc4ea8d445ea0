//! Loading structured documents into the tree.
//!
//! Objects become children, arrays become children named by index, scalars
//! become values and `null` clears a value. Keys are normalized like
//! namespaces, so `"Cache.Size"` nests two levels deep. The reserved key
//! [`VALUE_KEY`] assigns the value of the node that holds it.

use serde_json::Value as Json;
use tracing::trace;

use crate::error::Result;
use crate::namespace::Namespace;
use crate::registry::Registry;
use crate::tree::NodeId;
use crate::value::Value;

/// Key assigning a node's own value inside an object.
pub const VALUE_KEY: &str = "__value";

fn scalar(json: &Json) -> Option<Value> {
	match json {
		Json::Bool(b) => Some(Value::from(*b)),
		Json::Number(n) => n
			.as_i64()
			.map(Value::from)
			.or_else(|| n.as_u64().map(Value::from))
			.or_else(|| n.as_f64().map(Value::from)),
		Json::String(s) => Some(Value::from(s.as_str())),
		Json::Null | Json::Array(_) | Json::Object(_) => None,
	}
}

impl Registry {
	/// Applies `document` below `node`. Every value goes through
	/// [`Registry::set_value`], so guards and listeners apply.
	///
	/// Returns the number of values written or cleared.
	pub fn decode_into(&self, node: NodeId, document: &Json) -> Result<usize> {
		let _guard = self.read();
		self.decode_node(node, document)
	}

	/// Applies `document` at `namespace`, creating it if needed.
	pub fn decode_namespace(&self, namespace: &str, document: &Json) -> Result<usize> {
		let node = self.get_or_create(namespace)?;
		self.decode_into(node, document)
	}

	fn decode_node(&self, node: NodeId, json: &Json) -> Result<usize> {
		match json {
			Json::Object(map) => {
				let mut written = 0;
				for (key, child) in map {
					if key == VALUE_KEY {
						written += self.decode_value(node, child)?;
						continue;
					}
					let path = Namespace::parse(key);
					if path.is_root() {
						trace!(key = %key, "registry.decode_skip_key");
						continue;
					}
					let target = self.find_child(node, &path.to_string(), true)?;
					written += self.decode_node(target, child)?;
				}
				Ok(written)
			}
			Json::Array(items) => {
				let mut written = 0;
				for (i, item) in items.iter().enumerate() {
					let target = self.find_child(node, &i.to_string(), true)?;
					written += self.decode_node(target, item)?;
				}
				Ok(written)
			}
			_ => self.decode_value(node, json),
		}
	}

	fn decode_value(&self, node: NodeId, json: &Json) -> Result<usize> {
		match json {
			Json::Null => {
				self.poll_value(node)?;
				Ok(1)
			}
			Json::Array(_) | Json::Object(_) => self.decode_node(node, json),
			_ => match scalar(json) {
				Some(value) => {
					self.set_value(node, value)?;
					Ok(1)
				}
				None => Ok(0),
			},
		}
	}
}
