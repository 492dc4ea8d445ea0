//! Per-node resolver chains.
//!
//! Resolvers map a requested name or type to a [`Value`]. A node may carry
//! any number of them; lookups query them from highest to lowest
//! [`Priority`], insertion order breaking ties, and the first hit wins.
//! Results are never merged across resolvers.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::error::Result;
use crate::registry::Registry;
use crate::tree::NodeId;
use crate::value::Value;

mod binding;

pub use binding::{BindingResolver, NamedProvider, Supplier, TypedProvider};

/// Resolver ordering, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
	Lowest,
	Low,
	#[default]
	Normal,
	High,
	Highest,
}

/// Identity of a requested type.
#[derive(Debug, Clone, Copy)]
pub struct TypeKey {
	pub id: TypeId,
	pub name: &'static str,
}

impl TypeKey {
	pub fn of<T: Any>() -> Self {
		Self {
			id: TypeId::of::<T>(),
			name: std::any::type_name::<T>(),
		}
	}
}

impl PartialEq for TypeKey {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

impl fmt::Display for TypeKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name)
	}
}

/// Pluggable lookup strategy attached to a node.
pub trait Resolver: Send + Sync {
	fn priority(&self) -> Priority {
		Priority::Normal
	}

	/// Resolves a name. `Ok(None)` passes the request to the next resolver.
	fn resolve_name(&self, key: &str) -> Result<Option<Value>>;

	/// Resolves a type. Defaults to no answer.
	fn resolve_type(&self, ty: TypeKey) -> Result<Option<Value>> {
		let _ = ty;
		Ok(None)
	}
}

#[derive(Clone)]
pub(crate) struct ResolverEntry {
	pub(crate) seq: u64,
	pub(crate) resolver: Arc<dyn Resolver>,
}

/// Orders a chain by descending priority, then insertion.
fn ordered(mut chain: Vec<ResolverEntry>) -> Vec<Arc<dyn Resolver>> {
	chain.sort_by(|a, b| b.resolver.priority().cmp(&a.resolver.priority()).then(a.seq.cmp(&b.seq)));
	chain.into_iter().map(|e| e.resolver).collect()
}

impl Registry {
	/// Attaches a resolver to the node.
	pub fn add_resolver(&self, node: NodeId, resolver: Arc<dyn Resolver>) -> Result<()> {
		let _guard = self.lock.write()?;
		let mut tree = self.tree.write();
		let idx = tree.index(node)?;
		tree.add_resolver(idx, resolver);
		Ok(())
	}

	/// Snapshot of the node's chain in query order. Resolvers run against the
	/// snapshot, outside the tree lock.
	fn chain(&self, node: NodeId) -> Result<Vec<Arc<dyn Resolver>>> {
		self.inspect(node, |tree, idx| ordered(tree.node(idx).resolvers.clone()))
	}

	pub fn resolve_by_name(&self, node: NodeId, key: &str) -> Result<Option<Value>> {
		let _guard = self.lock.read();
		for resolver in self.chain(node)? {
			if let Some(value) = resolver.resolve_name(key)? {
				trace!(key, "registry.resolved_name");
				return Ok(Some(value));
			}
		}
		Ok(None)
	}

	pub fn resolve_by_type(&self, node: NodeId, ty: TypeKey) -> Result<Option<Value>> {
		let _guard = self.lock.read();
		for resolver in self.chain(node)? {
			if let Some(value) = resolver.resolve_type(ty)? {
				trace!(ty = ty.name, "registry.resolved_type");
				return Ok(Some(value));
			}
		}
		Ok(None)
	}

	/// Typed lookup. A hit of the wrong type counts as a miss.
	pub fn resolve<T: Any + Send + Sync>(&self, node: NodeId) -> Result<Option<Arc<T>>> {
		Ok(self.resolve_by_type(node, TypeKey::of::<T>())?.and_then(|v| v.downcast_arc::<T>()))
	}
}
