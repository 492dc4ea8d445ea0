//! The registry: one node tree behind one reentrant reader/writer lock.
//!
//! # Role
//!
//! [`Registry`] is the entry point every consumer uses. It owns the arena
//! [`Tree`], the [`RegistryLock`] that makes multi-step operations atomic,
//! and the worker pool that runs non-synchronized listeners.
//!
//! # Locking
//!
//! - Lookup, [`Registry::get_or_create`], value operations and listener
//!   registration take the read lock.
//! - Destroy, move, copy, trim, flag changes, resolver attachment and
//!   privatization take the write lock.
//! - The tree itself sits behind a second, inner lock that is only held for
//!   the data access of one step and never while callbacks run, so listeners,
//!   suppliers and teardowns may call back into the registry.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use amelia_worker::WorkerPool;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace};

use crate::config::RegistryConfig;
use crate::error::{BoxError, RegistryError, Result};
use crate::events::{EventKind, Invocation, ListenerFlags, ListenerId, NodeEvent};
use crate::flags::NodeFlags;
use crate::lock::{LockGuard, RegistryLock};
use crate::namespace::{Namespace, split_local_path};
use crate::tree::{MergePolicy, NodeId, Tree};
use crate::value::Value;

mod dispatch;
#[cfg(test)]
mod tests;

/// One-time startup hook run by [`Registry::initialize`].
pub type InitHook = Box<dyn FnOnce(&Registry) -> Result<(), BoxError> + Send>;

/// Hierarchical namespace registry.
pub struct Registry {
	pub(crate) config: RegistryConfig,
	pub(crate) lock: RegistryLock,
	pub(crate) tree: RwLock<Tree>,
	workers: WorkerPool,
	initialized: AtomicBool,
	init_hooks: Mutex<Vec<InitHook>>,
}

impl Default for Registry {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for Registry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Registry")
			.field("config", &self.config)
			.field("nodes", &self.tree.read().len())
			.field("initialized", &self.is_initialized())
			.finish()
	}
}

impl Registry {
	/// Creates an empty registry with default configuration.
	pub fn new() -> Self {
		Self::with_config(RegistryConfig::default())
	}

	pub fn with_config(config: RegistryConfig) -> Self {
		Self {
			config,
			lock: RegistryLock::new(),
			tree: RwLock::new(Tree::new()),
			workers: WorkerPool::new(),
			initialized: AtomicBool::new(false),
			init_hooks: Mutex::new(Vec::new()),
		}
	}

	pub fn config(&self) -> &RegistryConfig {
		&self.config
	}

	/// Pool running non-synchronized listeners.
	pub fn workers(&self) -> &WorkerPool {
		&self.workers
	}

	/// Takes the registry read lock for a consistent multi-call snapshot.
	pub fn read(&self) -> LockGuard<'_> {
		self.lock.read()
	}

	/// Takes the registry write lock. Fails if this thread holds only the
	/// read lock.
	pub fn write(&self) -> Result<LockGuard<'_>> {
		self.lock.write()
	}

	pub fn root(&self) -> NodeId {
		let tree = self.tree.read();
		tree.id(tree.root())
	}

	/// Number of live nodes, detached subtrees included.
	pub fn len(&self) -> usize {
		self.tree.read().len()
	}

	/// True when only the root exists.
	pub fn is_empty(&self) -> bool {
		self.len() <= 1
	}

	/// Runs one tree mutation and then its listeners.
	pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut Tree, &mut Vec<Invocation>) -> Result<R>) -> Result<R> {
		let mut plan = Vec::new();
		let out = f(&mut self.tree.write(), &mut plan);
		// Steps applied before a failure still notify.
		self.dispatch(plan)?;
		out
	}

	pub(crate) fn inspect<R>(&self, node: NodeId, f: impl FnOnce(&Tree, usize) -> R) -> Result<R> {
		let tree = self.tree.read();
		let idx = tree.index(node)?;
		Ok(f(&tree, idx))
	}

	/// Looks up a namespace without creating anything.
	pub fn get(&self, namespace: &str) -> Option<NodeId> {
		let ns = Namespace::parse(namespace);
		let _guard = self.lock.read();
		let tree = self.tree.read();
		let segments: Vec<&str> = ns.segments().iter().map(String::as_str).collect();
		tree.lookup(tree.root(), &segments).map(|idx| tree.id(idx))
	}

	/// Looks up a namespace, creating missing nodes.
	pub fn get_or_create(&self, namespace: &str) -> Result<NodeId> {
		let ns = Namespace::parse(namespace);
		let _guard = self.lock.read();
		let segments: Vec<&str> = ns.segments().iter().map(String::as_str).collect();
		{
			let tree = self.tree.read();
			if let Some(idx) = tree.lookup(tree.root(), &segments) {
				return Ok(tree.id(idx));
			}
		}
		self.mutate(|tree, out| {
			let idx = tree.find(tree.root(), &segments, true, out)?;
			Ok(tree.id(idx))
		})
	}

	/// Resolves a node-relative path one segment at a time, case-insensitively.
	///
	/// Unlike the namespace entry points, `path` is not normalized: every
	/// segment must already be a valid local name.
	pub fn find_child(&self, node: NodeId, path: &str, create: bool) -> Result<NodeId> {
		let segments = split_local_path(path)?;
		let _guard = self.lock.read();
		if !create {
			let tree = self.tree.read();
			let idx = tree.index(node)?;
			let found = tree.find_existing(idx, &segments)?;
			return Ok(tree.id(found));
		}
		self.mutate(|tree, out| {
			let idx = tree.index(node)?;
			let found = tree.find(idx, &segments, true, out)?;
			Ok(tree.id(found))
		})
	}

	/// True once the node has been destroyed.
	pub fn is_disposed(&self, node: NodeId) -> bool {
		!self.tree.read().contains(node)
	}

	pub fn local_name(&self, node: NodeId) -> Result<String> {
		self.inspect(node, |tree, idx| tree.node(idx).name.clone())
	}

	pub fn namespace_of(&self, node: NodeId) -> Result<Namespace> {
		let _guard = self.lock.read();
		self.inspect(node, |tree, idx| tree.namespace(idx))
	}

	pub fn parent_of(&self, node: NodeId) -> Result<Option<NodeId>> {
		self.inspect(node, |tree, idx| tree.node(idx).parent.map(|p| tree.id(p)))
	}

	/// Children in insertion order.
	pub fn children_of(&self, node: NodeId) -> Result<Vec<NodeId>> {
		self.inspect(node, |tree, idx| tree.node(idx).children.iter().map(|&c| tree.id(c)).collect())
	}

	/// Locally set flags.
	pub fn flags_of(&self, node: NodeId) -> Result<NodeFlags> {
		self.inspect(node, |tree, idx| tree.node(idx).flags)
	}

	/// Locally set and inherited flags.
	pub fn effective_flags(&self, node: NodeId) -> Result<NodeFlags> {
		let _guard = self.lock.read();
		self.inspect(node, |tree, idx| tree.effective_flags(idx))
	}

	pub fn has_flag(&self, node: NodeId, flag: NodeFlags) -> Result<bool> {
		let _guard = self.lock.read();
		self.inspect(node, |tree, idx| tree.has_flag(idx, flag))
	}

	pub fn set_flags(&self, node: NodeId, flags: NodeFlags) -> Result<()> {
		let _guard = self.lock.write()?;
		self.mutate(|tree, out| {
			let idx = tree.index(node)?;
			tree.set_flags(idx, flags, out)
		})
	}

	pub fn clear_flags(&self, node: NodeId, flags: NodeFlags) -> Result<()> {
		let _guard = self.lock.write()?;
		self.mutate(|tree, out| {
			let idx = tree.index(node)?;
			tree.clear_flags(idx, flags, out)
		})
	}

	pub fn is_dirty(&self, node: NodeId) -> Result<bool> {
		self.inspect(node, |tree, idx| tree.node(idx).flags.contains(NodeFlags::DIRTY))
	}

	/// Clears `DIRTY` on the subtree, typically after it was persisted.
	pub fn clear_dirty(&self, node: NodeId) -> Result<()> {
		let _guard = self.lock.write()?;
		let mut tree = self.tree.write();
		let idx = tree.index(node)?;
		tree.clear_dirty(idx);
		Ok(())
	}

	/// Destroys the node and its subtree. Fails for the root and for
	/// read-only subtrees.
	pub fn destroy(&self, node: NodeId) -> Result<()> {
		let _guard = self.lock.write()?;
		self.mutate(|tree, out| {
			let idx = tree.index(node)?;
			tree.destroy(idx, out)
		})
	}

	/// Moves the node to `target`, a full namespace whose last segment
	/// becomes the node's new local name.
	pub fn move_to(&self, node: NodeId, target: &str, policy: MergePolicy) -> Result<NodeId> {
		let target = Namespace::parse(target);
		let Some(name) = target.last() else {
			return Err(RegistryError::RootImmutable { action: "replaced" });
		};
		let parent_ns = target.parent().unwrap_or_default();
		let _guard = self.lock.write()?;
		self.mutate(|tree, out| {
			let idx = tree.index(node)?;
			if idx == tree.root() {
				return Err(RegistryError::RootImmutable { action: "moved" });
			}
			let segments: Vec<&str> = parent_ns.segments().iter().map(String::as_str).collect();
			if tree.is_within(tree.deepest(tree.root(), &segments), idx) {
				return Err(RegistryError::MoveIntoSelf { namespace: tree.label(idx) });
			}
			let parent = tree.find(tree.root(), &segments, true, out)?;
			let placed = tree.relocate(idx, parent, name, policy, out)?;
			Ok(tree.id(placed))
		})
	}

	/// Moves `child` under `target`, keeping its local name.
	pub fn move_child(&self, child: NodeId, target: NodeId, policy: MergePolicy) -> Result<NodeId> {
		let _guard = self.lock.write()?;
		self.mutate(|tree, out| {
			let idx = tree.index(child)?;
			let parent = tree.index(target)?;
			let name = tree.node(idx).name.clone();
			let placed = tree.relocate(idx, parent, &name, policy, out)?;
			Ok(tree.id(placed))
		})
	}

	/// Deep-copies `other` under `parent`.
	pub fn copy_child(&self, parent: NodeId, other: NodeId, policy: MergePolicy) -> Result<NodeId> {
		let _guard = self.lock.write()?;
		self.mutate(|tree, out| {
			let parent = tree.index(parent)?;
			let src = tree.index(other)?;
			let placed = tree.copy_child(parent, src, policy, out)?;
			Ok(tree.id(placed))
		})
	}

	/// Deep clone of the subtree: flags, listeners, resolvers and values, but
	/// no parent link and no ownership. The copy is detached from the tree
	/// until attached with [`Self::move_child`] or destroyed.
	pub fn duplicate(&self, node: NodeId) -> Result<NodeId> {
		let _guard = self.lock.write()?;
		let mut tree = self.tree.write();
		let idx = tree.index(node)?;
		let copy = tree.duplicate(idx);
		Ok(tree.id(copy))
	}

	/// Prunes value-less branches below `node`. Returns the number of nodes
	/// removed.
	pub fn trim_children(&self, node: NodeId) -> Result<usize> {
		let _guard = self.lock.write()?;
		let removed = self.mutate(|tree, out| {
			let idx = tree.index(node)?;
			Ok(tree.trim(idx, out))
		})?;
		if removed > 0 {
			debug!(removed, "registry.trim");
		}
		Ok(removed)
	}

	pub fn is_trimmable(&self, node: NodeId) -> Result<bool> {
		let _guard = self.lock.read();
		self.inspect(node, |tree, idx| tree.is_trimmable(idx))
	}

	pub fn get_value(&self, node: NodeId) -> Result<Option<Value>> {
		let _guard = self.lock.read();
		self.inspect(node, |tree, idx| tree.node(idx).value.clone())
	}

	pub fn has_value(&self, node: NodeId) -> Result<bool> {
		self.inspect(node, |tree, idx| tree.node(idx).value.is_some())
	}

	/// Stores a value and returns the previous one.
	pub fn set_value(&self, node: NodeId, value: impl Into<Value>) -> Result<Option<Value>> {
		let value = value.into();
		let _guard = self.lock.read();
		self.mutate(|tree, out| {
			let idx = tree.index(node)?;
			tree.set_value(idx, Some(value), out)
		})
	}

	/// Atomically returns and clears the value.
	pub fn poll_value(&self, node: NodeId) -> Result<Option<Value>> {
		let _guard = self.lock.read();
		self.mutate(|tree, out| {
			let idx = tree.index(node)?;
			tree.set_value(idx, None, out)
		})
	}

	/// Applies `f` to the current value and stores the result when it differs
	/// by identity. Returns the value held afterwards.
	///
	/// `f` runs outside the inner lock. The result is stored only if the value
	/// `f` saw is still current; otherwise `f` runs again on the newer value.
	pub fn get_or_compute<F>(&self, node: NodeId, mut f: F) -> Result<Option<Value>>
	where
		F: FnMut(Option<&Value>) -> Option<Value>,
	{
		let _guard = self.lock.read();
		loop {
			let current = self.inspect(node, |tree, idx| tree.node(idx).value.clone())?;
			let computed = f(current.as_ref());
			if same_value(current.as_ref(), computed.as_ref()) {
				return Ok(computed);
			}
			let stored = self.mutate(|tree, out| {
				let idx = tree.index(node)?;
				if !same_value(tree.node(idx).value.as_ref(), current.as_ref()) {
					return Ok(false);
				}
				tree.set_value(idx, computed.clone(), out)?;
				Ok(true)
			})?;
			if stored {
				return Ok(computed);
			}
			trace!(?node, "registry.compute_retry");
		}
	}

	/// Registers a listener and returns its handle.
	pub fn add_listener<F>(&self, node: NodeId, kind: EventKind, flags: ListenerFlags, callback: F) -> Result<ListenerId>
	where
		F: Fn(&NodeEvent) -> Result<(), BoxError> + Send + Sync + 'static,
	{
		let _guard = self.lock.read();
		let mut tree = self.tree.write();
		let idx = tree.index(node)?;
		Ok(tree.add_listener(idx, kind, flags, std::sync::Arc::new(callback)))
	}

	/// Removes a listener. Returns false if it was already gone.
	pub fn remove_listener(&self, id: ListenerId) -> bool {
		let _guard = self.lock.read();
		self.tree.write().remove_listener(id)
	}

	pub fn is_initialized(&self) -> bool {
		self.initialized.load(Ordering::Acquire)
	}

	/// Queues a hook for [`Self::initialize`]. Ignorable error once the
	/// registry is initialized.
	pub fn add_init_hook<F>(&self, hook: F) -> Result<()>
	where
		F: FnOnce(&Registry) -> Result<(), BoxError> + Send + 'static,
	{
		let mut hooks = self.init_hooks.lock();
		if self.is_initialized() {
			return Err(RegistryError::AlreadyInitialized);
		}
		hooks.push(Box::new(hook));
		Ok(())
	}

	/// One-time startup, run after configuration has been loaded.
	///
	/// Trims dead branches (unless disabled in config), then runs init hooks
	/// in registration order. A second call returns the ignorable
	/// [`RegistryError::AlreadyInitialized`].
	pub fn initialize(&self) -> Result<()> {
		let _guard = self.lock.write()?;
		if self.initialized.swap(true, Ordering::AcqRel) {
			return Err(RegistryError::AlreadyInitialized);
		}
		if self.config.trim_on_initialize {
			self.trim_children(self.root())?;
		}
		let hooks = std::mem::take(&mut *self.init_hooks.lock());
		for hook in hooks {
			hook(self).map_err(RegistryError::InitHook)?;
		}
		info!(nodes = self.len(), "registry.initialized");
		Ok(())
	}
}

fn same_value(a: Option<&Value>, b: Option<&Value>) -> bool {
	match (a, b) {
		(Some(a), Some(b)) => a.ptr_eq(b),
		(None, None) => true,
		_ => false,
	}
}
