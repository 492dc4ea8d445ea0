//! Exclusive ownership ("privatization") of subtrees.
//!
//! # Role
//!
//! A node can be claimed by one live [`OwnerHandle`]. While claimed, neither
//! the node nor anything below it can be claimed by anyone else. Ownership
//! records never hold the owner alive on their own behalf: a record is live
//! only while its owner is not destroyed and has not released the epoch the
//! record was taken in.
//!
//! # Invariants
//!
//! - At most one live record exists along any root-to-leaf path.
//! - Claiming a node destroys every live owner found in its subtree. Owner
//!   teardown runs outside the tree lock and failures are logged, not
//!   propagated.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{BoxError, RegistryError, Result};
use crate::registry::Registry;
use crate::tree::{NodeId, Tree};


static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

type Teardown = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

struct OwnerCell {
	id: u64,
	label: String,
	epoch: AtomicU64,
	destroyed: AtomicBool,
	teardown: Mutex<Option<Teardown>>,
}

/// Shared handle to an ownership-capable party.
///
/// Clones refer to the same owner.
#[derive(Clone)]
pub struct OwnerHandle {
	cell: Arc<OwnerCell>,
}

impl fmt::Debug for OwnerHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("OwnerHandle")
			.field("id", &self.cell.id)
			.field("label", &self.cell.label)
			.field("epoch", &self.epoch())
			.field("destroyed", &self.is_destroyed())
			.finish()
	}
}

impl PartialEq for OwnerHandle {
	fn eq(&self, other: &Self) -> bool {
		self.cell.id == other.cell.id
	}
}

impl Eq for OwnerHandle {}

impl OwnerHandle {
	pub fn new(label: impl Into<String>) -> Self {
		Self::build(label.into(), None)
	}

	/// Owner whose destruction runs `teardown` exactly once.
	pub fn with_teardown<F>(label: impl Into<String>, teardown: F) -> Self
	where
		F: FnOnce() -> Result<(), BoxError> + Send + 'static,
	{
		Self::build(label.into(), Some(Box::new(teardown)))
	}

	fn build(label: String, teardown: Option<Teardown>) -> Self {
		Self {
			cell: Arc::new(OwnerCell {
				id: NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed),
				label,
				epoch: AtomicU64::new(0),
				destroyed: AtomicBool::new(false),
				teardown: Mutex::new(teardown),
			}),
		}
	}

	pub fn id(&self) -> u64 {
		self.cell.id
	}

	pub fn label(&self) -> &str {
		&self.cell.label
	}

	pub fn epoch(&self) -> u64 {
		self.cell.epoch.load(Ordering::Acquire)
	}

	pub fn is_destroyed(&self) -> bool {
		self.cell.destroyed.load(Ordering::Acquire)
	}

	/// Gives up every claim taken so far without destroying the owner.
	pub fn release(&self) {
		self.cell.epoch.fetch_add(1, Ordering::AcqRel);
	}

	/// Destroys the owner: all its claims lapse and its teardown runs.
	///
	/// Later calls are no-ops returning `Ok`.
	pub fn destroy(&self) -> Result<(), BoxError> {
		if self.cell.destroyed.swap(true, Ordering::AcqRel) {
			return Ok(());
		}
		self.release();
		let teardown = self.cell.teardown.lock().take();
		match teardown {
			Some(f) => f(),
			None => Ok(()),
		}
	}
}

/// Claim on a node, valid for one owner epoch.
#[derive(Debug, Clone)]
pub(crate) struct OwnershipRecord {
	owner: OwnerHandle,
	epoch: u64,
}

impl OwnershipRecord {
	pub(crate) fn new(owner: OwnerHandle) -> Self {
		let epoch = owner.epoch();
		Self { owner, epoch }
	}

	pub(crate) fn is_live(&self) -> bool {
		!self.owner.is_destroyed() && self.owner.epoch() == self.epoch
	}

	pub(crate) fn owner(&self) -> &OwnerHandle {
		&self.owner
	}
}

impl Tree {
	/// Nearest live owner on the path from `idx` up to the top of its tree.
	pub(crate) fn live_owner(&self, idx: usize) -> Option<&OwnerHandle> {
		self.lineage(idx)
			.into_iter()
			.rev()
			.filter_map(|i| self.node(i).owner.as_ref())
			.find(|r| r.is_live())
			.map(OwnershipRecord::owner)
	}

	/// Takes every ownership record in the subtree and returns the live owners.
	fn take_subtree_owners(&mut self, idx: usize) -> Vec<OwnerHandle> {
		let mut owners: Vec<OwnerHandle> = Vec::new();
		for i in self.subtree(idx) {
			if let Some(record) = self.node_mut(i).owner.take()
				&& record.is_live()
				&& !owners.contains(record.owner())
			{
				owners.push(record.owner);
			}
		}
		owners
	}
}

impl Registry {
	/// Claims `node` for `owner`, destroying every other owner holding
	/// something below it.
	pub fn privatize_node(&self, node: NodeId, owner: &OwnerHandle) -> Result<()> {
		if owner.is_destroyed() {
			return Err(RegistryError::OwnerDestroyed(owner.label().to_owned()));
		}
		let _guard = self.lock.write()?;
		let (displaced, label) = {
			let mut tree = self.tree.write();
			let idx = tree.index(node)?;
			if tree.live_owner(idx).is_some() {
				return Err(RegistryError::AlreadyPrivatized { namespace: tree.label(idx) });
			}
			(tree.take_subtree_owners(idx), tree.label(idx))
		};

		for other in displaced.iter().filter(|o| *o != owner) {
			debug!(namespace = %label, owner = other.label(), "registry.owner_displaced");
			if let Err(err) = other.destroy() {
				warn!(namespace = %label, owner = other.label(), error = %err, "registry.owner_teardown_failed");
			}
		}

		let mut tree = self.tree.write();
		let idx = tree.index(node)?;
		tree.node_mut(idx).owner = Some(OwnershipRecord::new(owner.clone()));
		debug!(namespace = %label, owner = owner.label(), "registry.privatized");
		Ok(())
	}

	/// Claims a namespace, creating it if needed.
	///
	/// The system namespace, everything below it, and namespaces shallower
	/// than the configured minimum depth are refused.
	pub fn privatize(&self, namespace: &str, owner: &OwnerHandle) -> Result<NodeId> {
		let ns = crate::namespace::Namespace::parse(namespace);
		if ns.starts_with(&self.config.system_namespace()) {
			return Err(RegistryError::ProtectedNamespace { namespace: ns.to_string() });
		}
		if ns.depth() < self.config.min_privatize_depth {
			return Err(RegistryError::TooShallow {
				namespace: ns.to_string(),
				min: self.config.min_privatize_depth,
			});
		}
		let _guard = self.lock.write()?;
		let node = self.get_or_create(&ns.to_string())?;
		self.privatize_node(node, owner)?;
		Ok(node)
	}

	/// Drops `owner`'s claim on `node`.
	pub fn unprivatize(&self, node: NodeId, owner: &OwnerHandle) -> Result<()> {
		let _guard = self.lock.write()?;
		let mut tree = self.tree.write();
		let idx = tree.index(node)?;
		let held = tree.node(idx).owner.as_ref().is_some_and(|r| r.is_live() && r.owner() == owner);
		if !held {
			return Err(RegistryError::NotOwner {
				namespace: tree.label(idx),
				owner: owner.label().to_owned(),
			});
		}
		tree.node_mut(idx).owner = None;
		Ok(())
	}

	/// True if the node or an ancestor holds a live claim.
	pub fn is_privatized(&self, node: NodeId) -> Result<bool> {
		let _guard = self.lock.read();
		self.inspect(node, |tree, idx| tree.live_owner(idx).is_some())
	}

	/// True if the nearest live claim on the node belongs to `owner`.
	pub fn is_privatized_to(&self, node: NodeId, owner: &OwnerHandle) -> Result<bool> {
		let _guard = self.lock.read();
		self.inspect(node, |tree, idx| tree.live_owner(idx) == Some(owner))
	}

	/// Live owner of the node or its nearest claimed ancestor.
	pub fn owner_of(&self, node: NodeId) -> Result<Option<OwnerHandle>> {
		let _guard = self.lock.read();
		self.inspect(node, |tree, idx| tree.live_owner(idx).cloned())
	}
}
