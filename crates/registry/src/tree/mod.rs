//! Arena-backed node tree.
//!
//! # Role
//!
//! Pure data structure behind [`crate::Registry`]. Nodes live in a [`Slab`]
//! and refer to each other by slot index; the parent owns its children and
//! the child only stores the parent's index. Public handles are [`NodeId`]s
//! (slot index plus generation), so a handle outlives its node safely and is
//! reported as disposed afterwards.
//!
//! Nothing here locks or runs callbacks. Mutations record listener
//! [`Invocation`]s into a caller-provided buffer; the registry runs them once
//! the tree lock is released.
//!
//! # Invariants
//!
//! - No two children of one parent share a case-insensitive local name.
//! - Guards (`READ_ONLY`, `NO_OVERRIDE`, name validity) are checked before
//!   the first mutation of an operation.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use slab::Slab;

use crate::error::{RegistryError, Result};
use crate::events::{Callback, Emitted, EventKind, Invocation, ListenerFlags, ListenerId, ListenerRecord, NodeEvent};
use crate::flags::NodeFlags;
use crate::namespace::Namespace;
use crate::ownership::OwnershipRecord;
use crate::resolver::{Resolver, ResolverEntry};
use crate::value::Value;


/// Handle to a registry node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
	index: u32,
	generation: u32,
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}v{}", self.index, self.generation)
	}
}

/// What to do when the destination already has a child of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
	/// Destroy the existing child and put the incoming one in its place.
	Overwrite,
	/// Merge recursively; replacing a value on a `NO_OVERRIDE` node fails.
	#[default]
	Merge,
	/// Refuse with [`RegistryError::ChildExists`].
	Fail,
}

pub(crate) struct NodeData {
	generation: u32,
	pub(crate) name: String,
	pub(crate) parent: Option<usize>,
	pub(crate) children: Vec<usize>,
	pub(crate) flags: NodeFlags,
	pub(crate) value: Option<Value>,
	pub(crate) listeners: Vec<ListenerRecord>,
	pub(crate) resolvers: Vec<ResolverEntry>,
	pub(crate) owner: Option<OwnershipRecord>,
}

impl NodeData {
	fn new(generation: u32, name: String, parent: Option<usize>) -> Self {
		Self {
			generation,
			name,
			parent,
			children: Vec::new(),
			flags: NodeFlags::empty(),
			value: None,
			listeners: Vec::new(),
			resolvers: Vec::new(),
			owner: None,
		}
	}
}

pub(crate) struct Tree {
	nodes: Slab<NodeData>,
	root: usize,
	generation: u32,
	next_listener: u64,
	next_resolver: u64,
	listener_nodes: FxHashMap<ListenerId, usize>,
}

impl Default for Tree {
	fn default() -> Self {
		Self::new()
	}
}

impl Tree {
	pub(crate) fn new() -> Self {
		let mut nodes = Slab::new();
		let root = nodes.insert(NodeData::new(1, String::new(), None));
		Self {
			nodes,
			root,
			generation: 1,
			next_listener: 1,
			next_resolver: 1,
			listener_nodes: FxHashMap::default(),
		}
	}

	pub(crate) fn root(&self) -> usize {
		self.root
	}

	pub(crate) fn len(&self) -> usize {
		self.nodes.len()
	}

	/// Resolves a handle, failing with `Disposed` for destroyed nodes.
	pub(crate) fn index(&self, id: NodeId) -> Result<usize> {
		match self.nodes.get(id.index as usize) {
			Some(node) if node.generation == id.generation => Ok(id.index as usize),
			_ => Err(RegistryError::Disposed(id)),
		}
	}

	pub(crate) fn contains(&self, id: NodeId) -> bool {
		self.index(id).is_ok()
	}

	pub(crate) fn id(&self, idx: usize) -> NodeId {
		NodeId {
			index: idx as u32,
			generation: self.nodes[idx].generation,
		}
	}

	pub(crate) fn node(&self, idx: usize) -> &NodeData {
		&self.nodes[idx]
	}

	pub(crate) fn node_mut(&mut self, idx: usize) -> &mut NodeData {
		&mut self.nodes[idx]
	}

	/// Indexes from the top of the node's tree down to the node itself.
	pub(crate) fn lineage(&self, idx: usize) -> Vec<usize> {
		let mut chain = vec![idx];
		let mut cur = self.nodes[idx].parent;
		while let Some(p) = cur {
			chain.push(p);
			cur = self.nodes[p].parent;
		}
		chain.reverse();
		chain
	}

	pub(crate) fn namespace(&self, idx: usize) -> Namespace {
		let names: Vec<&str> = self
			.lineage(idx)
			.into_iter()
			.map(|i| self.nodes[i].name.as_str())
			.filter(|n| !n.is_empty())
			.collect();
		Namespace::from_segments(names)
	}

	/// Namespace rendered for messages.
	pub(crate) fn label(&self, idx: usize) -> String {
		if idx == self.root {
			return "<root>".to_owned();
		}
		let names: Vec<&str> = self.lineage(idx).into_iter().map(|i| self.nodes[i].name.as_str()).filter(|n| !n.is_empty()).collect();
		names.join(".")
	}

	/// True if `idx` is `ancestor` or lies below it.
	pub(crate) fn is_within(&self, idx: usize, ancestor: usize) -> bool {
		let mut cur = Some(idx);
		while let Some(i) = cur {
			if i == ancestor {
				return true;
			}
			cur = self.nodes[i].parent;
		}
		false
	}

	pub(crate) fn child_named(&self, idx: usize, name: &str) -> Option<usize> {
		self.nodes[idx].children.iter().copied().find(|&c| self.nodes[c].name.eq_ignore_ascii_case(name))
	}

	/// Post-order list of `idx` and all its descendants.
	pub(crate) fn subtree(&self, idx: usize) -> Vec<usize> {
		let mut out = Vec::new();
		let mut stack = vec![(idx, false)];
		while let Some((i, expanded)) = stack.pop() {
			if expanded {
				out.push(i);
				continue;
			}
			stack.push((i, true));
			for &c in self.nodes[i].children.iter().rev() {
				stack.push((c, false));
			}
		}
		out
	}

	/// Effective flag check with inheritance.
	pub(crate) fn has_flag(&self, idx: usize, flag: NodeFlags) -> bool {
		let mut cur = Some(idx);
		while let Some(i) = cur {
			let node = &self.nodes[i];
			if node.flags.contains(flag) {
				return true;
			}
			if node.flags.contains(NodeFlags::NO_FLAG_RECURSION) {
				return false;
			}
			cur = node.parent;
		}
		false
	}

	pub(crate) fn effective_flags(&self, idx: usize) -> NodeFlags {
		NodeFlags::all().iter().filter(|f| self.has_flag(idx, *f)).fold(NodeFlags::empty(), |acc, f| acc | f)
	}

	fn ensure_writable(&self, idx: usize) -> Result<()> {
		if self.has_flag(idx, NodeFlags::READ_ONLY) {
			return Err(RegistryError::ReadOnly { namespace: self.label(idx) });
		}
		Ok(())
	}

	/// Fails if `idx` or anything below it is effectively read-only.
	fn ensure_subtree_writable(&self, idx: usize) -> Result<()> {
		self.ensure_writable(idx)?;
		for i in self.subtree(idx) {
			if self.nodes[i].flags.contains(NodeFlags::READ_ONLY) {
				return Err(RegistryError::ReadOnly { namespace: self.label(i) });
			}
		}
		Ok(())
	}

	fn alloc(&mut self, name: &str, parent: Option<usize>) -> usize {
		self.generation = self.generation.wrapping_add(1);
		self.nodes.insert(NodeData::new(self.generation, name.to_owned(), parent))
	}

	fn mark_dirty(&mut self, idx: usize) {
		self.nodes[idx].flags.insert(NodeFlags::DIRTY);
	}

	fn link(&mut self, parent: usize, child: usize, out: &mut Vec<Invocation>) {
		self.nodes[child].parent = Some(parent);
		self.nodes[parent].children.push(child);
		self.mark_dirty(parent);
		let name = self.nodes[child].name.clone();
		self.emit(parent, Emitted::child(EventKind::ChildAdd, &name), out);
	}

	fn unlink(&mut self, child: usize, out: &mut Vec<Invocation>) {
		let Some(parent) = self.nodes[child].parent.take() else {
			return;
		};
		self.nodes[parent].children.retain(|&c| c != child);
		self.mark_dirty(parent);
		let name = self.nodes[child].name.clone();
		self.emit(parent, Emitted::child(EventKind::ChildRemove, &name), out);
	}

	/// Frees `idx` and its descendants without any checks or events.
	fn release(&mut self, idx: usize) {
		for i in self.subtree(idx) {
			let node = self.nodes.remove(i);
			for l in &node.listeners {
				self.listener_nodes.remove(&l.id);
			}
		}
	}

	/// Walks `segments` below `idx`, creating missing nodes when `create` is set.
	pub(crate) fn find(&mut self, idx: usize, segments: &[&str], create: bool, out: &mut Vec<Invocation>) -> Result<usize> {
		let mut cur = idx;
		for seg in segments {
			cur = match self.child_named(cur, seg) {
				Some(child) => child,
				None if !create => return self.find_existing(cur, &[*seg]),
				None => {
					self.ensure_writable(cur)?;
					let child = self.alloc(seg, None);
					self.link(cur, child, out);
					tracing::trace!(parent = %self.label(cur), child = %seg, "registry.node_created");
					child
				}
			};
		}
		Ok(cur)
	}

	/// Read-only variant of [`Self::find`].
	pub(crate) fn lookup(&self, idx: usize, segments: &[&str]) -> Option<usize> {
		segments.iter().try_fold(idx, |cur, seg| self.child_named(cur, seg))
	}

	/// Like [`Self::lookup`] but reports the first missing namespace.
	pub(crate) fn find_existing(&self, idx: usize, segments: &[&str]) -> Result<usize> {
		let mut cur = idx;
		for seg in segments {
			cur = self
				.child_named(cur, seg)
				.ok_or_else(|| RegistryError::NotFound(self.namespace(cur).join(seg).to_string()))?;
		}
		Ok(cur)
	}

	/// Deepest node that already exists along `segments` below `idx`.
	pub(crate) fn deepest(&self, idx: usize, segments: &[&str]) -> usize {
		let mut cur = idx;
		for seg in segments {
			match self.child_named(cur, seg) {
				Some(child) => cur = child,
				None => break,
			}
		}
		cur
	}

	pub(crate) fn destroy(&mut self, idx: usize, out: &mut Vec<Invocation>) -> Result<()> {
		if idx == self.root {
			return Err(RegistryError::RootImmutable { action: "destroyed" });
		}
		self.ensure_subtree_writable(idx)?;
		tracing::debug!(node = %self.label(idx), "registry.destroy");
		self.unlink(idx, out);
		self.release(idx);
		Ok(())
	}

	pub(crate) fn is_trimmable(&self, idx: usize) -> bool {
		let node = &self.nodes[idx];
		node.value.is_none() && node.children.iter().all(|&c| self.is_trimmable(c))
	}

	/// Destroys trimmable children, recursing into the rest. Read-only
	/// children are left alone. Returns the number of nodes removed.
	pub(crate) fn trim(&mut self, idx: usize, out: &mut Vec<Invocation>) -> usize {
		let mut removed = 0;
		for child in self.nodes[idx].children.clone() {
			if self.is_trimmable(child) {
				if self.ensure_subtree_writable(child).is_err() {
					continue;
				}
				removed += self.subtree(child).len();
				self.unlink(child, out);
				self.release(child);
			} else {
				removed += self.trim(child, out);
			}
		}
		removed
	}

	/// Deep copy of the subtree at `idx`, detached from any parent.
	pub(crate) fn duplicate(&mut self, idx: usize) -> usize {
		let name = self.nodes[idx].name.clone();
		let copy = self.alloc(&name, None);
		let (flags, value, listeners, resolvers) = {
			let src = &self.nodes[idx];
			(
				src.flags - NodeFlags::DISPOSED,
				src.value.as_ref().map(Value::deep_copy),
				src.listeners.clone(),
				src.resolvers.clone(),
			)
		};

		let mut fresh = Vec::with_capacity(listeners.len());
		for mut l in listeners {
			l.id = self.next_listener_id();
			self.listener_nodes.insert(l.id, copy);
			fresh.push(l);
		}

		let node = &mut self.nodes[copy];
		node.flags = flags;
		node.value = value;
		node.listeners = fresh;
		node.resolvers = resolvers;

		for child in self.nodes[idx].children.clone() {
			let child_copy = self.duplicate(child);
			self.nodes[child_copy].parent = Some(copy);
			self.nodes[copy].children.push(child_copy);
		}
		copy
	}

	/// Checks that merging `src` into `dest` passes every guard.
	fn check_merge(&self, src: usize, dest: usize) -> Result<()> {
		let s = &self.nodes[src];
		if s.value.is_some() {
			self.ensure_writable(dest)?;
			if self.nodes[dest].value.is_some() && self.has_flag(dest, NodeFlags::NO_OVERRIDE) {
				return Err(RegistryError::NoOverride { namespace: self.label(dest) });
			}
		}
		for &c in &s.children {
			match self.child_named(dest, &self.nodes[c].name) {
				Some(d) => self.check_merge(c, d)?,
				None => self.ensure_writable(dest)?,
			}
		}
		Ok(())
	}

	/// Folds detached or detachable `src` into `dest`, consuming `src`.
	fn merge(&mut self, src: usize, dest: usize, out: &mut Vec<Invocation>) {
		let merged = self.nodes[src].flags & NodeFlags::MERGED;
		if !merged.is_empty() {
			let before = self.nodes[dest].flags;
			self.nodes[dest].flags |= merged;
			let changed = before ^ self.nodes[dest].flags;
			if !changed.is_empty() {
				self.emit(dest, Emitted::flags(changed), out);
			}
		}

		if let Some(v) = self.nodes[src].value.take() {
			self.replace_value(dest, Some(v), out);
		}

		let listeners = std::mem::take(&mut self.nodes[src].listeners);
		for l in &listeners {
			self.listener_nodes.insert(l.id, dest);
		}
		self.nodes[dest].listeners.extend(listeners);
		let resolvers = std::mem::take(&mut self.nodes[src].resolvers);
		self.nodes[dest].resolvers.extend(resolvers);

		for child in std::mem::take(&mut self.nodes[src].children) {
			self.nodes[child].parent = None;
			let name = self.nodes[child].name.clone();
			match self.child_named(dest, &name) {
				Some(d) => self.merge(child, d, out),
				None => self.link(dest, child, out),
			}
		}
		self.release(src);
	}

	/// Places detached node `child` under `parent` honoring `policy`.
	/// `parent` must not lie inside `child`.
	fn place(&mut self, parent: usize, child: usize, policy: MergePolicy, out: &mut Vec<Invocation>) -> Result<usize> {
		let name = self.nodes[child].name.clone();
		match self.child_named(parent, &name) {
			None => {
				self.ensure_writable(parent)?;
				self.link(parent, child, out);
				Ok(child)
			}
			Some(existing) => match policy {
				MergePolicy::Fail => Err(RegistryError::ChildExists {
					namespace: self.label(parent),
					name,
				}),
				MergePolicy::Overwrite => {
					self.ensure_subtree_writable(existing)?;
					self.unlink(existing, out);
					self.release(existing);
					self.link(parent, child, out);
					Ok(child)
				}
				MergePolicy::Merge => {
					self.check_merge(child, existing)?;
					self.merge(child, existing, out);
					Ok(existing)
				}
			},
		}
	}

	/// Copies `src` under `parent`. Returns the node now holding the copy.
	pub(crate) fn copy_child(&mut self, parent: usize, src: usize, policy: MergePolicy, out: &mut Vec<Invocation>) -> Result<usize> {
		let copy = self.duplicate(src);
		self.place(parent, copy, policy, out).inspect_err(|_| self.release(copy))
	}

	/// Moves `idx` under `parent` as `name`. Returns the node now holding it,
	/// which differs from `idx` when it was merged into an existing child.
	pub(crate) fn relocate(&mut self, idx: usize, parent: usize, name: &str, policy: MergePolicy, out: &mut Vec<Invocation>) -> Result<usize> {
		if idx == self.root {
			return Err(RegistryError::RootImmutable { action: "moved" });
		}
		if self.is_within(parent, idx) {
			return Err(RegistryError::MoveIntoSelf { namespace: self.label(idx) });
		}
		if self.nodes[idx].parent == Some(parent) && self.nodes[idx].name.eq_ignore_ascii_case(name) {
			return Ok(idx);
		}
		self.ensure_subtree_writable(idx)?;
		if let Some(old_parent) = self.nodes[idx].parent {
			self.ensure_writable(old_parent)?;
		}

		// Evaluate the destination against the renamed node before detaching.
		match self.child_named(parent, name) {
			None => self.ensure_writable(parent)?,
			Some(existing) => match policy {
				MergePolicy::Fail => {
					return Err(RegistryError::ChildExists {
						namespace: self.label(parent),
						name: name.to_owned(),
					});
				}
				MergePolicy::Overwrite => self.ensure_subtree_writable(existing)?,
				MergePolicy::Merge => {
					let saved = std::mem::replace(&mut self.nodes[idx].name, name.to_owned());
					let checked = self.check_merge(idx, existing);
					self.nodes[idx].name = saved;
					checked?;
				}
			},
		}

		tracing::debug!(node = %self.label(idx), to = %self.label(parent), name, "registry.move");
		self.unlink(idx, out);
		self.nodes[idx].name = name.to_owned();
		self.place(parent, idx, policy, out)
	}

	pub(crate) fn set_flags(&mut self, idx: usize, flags: NodeFlags, out: &mut Vec<Invocation>) -> Result<()> {
		if !NodeFlags::USER.contains(flags) {
			return Err(RegistryError::DisposedFlag);
		}
		let before = self.nodes[idx].flags;
		self.nodes[idx].flags |= flags;
		let changed = before ^ self.nodes[idx].flags;
		if !changed.is_empty() {
			self.emit(idx, Emitted::flags(changed), out);
		}
		Ok(())
	}

	pub(crate) fn clear_flags(&mut self, idx: usize, flags: NodeFlags, out: &mut Vec<Invocation>) -> Result<()> {
		if !NodeFlags::USER.contains(flags) {
			return Err(RegistryError::DisposedFlag);
		}
		let before = self.nodes[idx].flags;
		self.nodes[idx].flags.remove(flags);
		let changed = before ^ self.nodes[idx].flags;
		if !changed.is_empty() {
			self.emit(idx, Emitted::flags(changed), out);
		}
		Ok(())
	}

	/// Clears `DIRTY` on the whole subtree without raising events.
	pub(crate) fn clear_dirty(&mut self, idx: usize) {
		for i in self.subtree(idx) {
			self.nodes[i].flags.remove(NodeFlags::DIRTY);
		}
	}

	/// Guarded value write. `None` clears the value.
	pub(crate) fn set_value(&mut self, idx: usize, value: Option<Value>, out: &mut Vec<Invocation>) -> Result<Option<Value>> {
		if let Some(v) = &value
			&& v.is_node_handle()
		{
			return Err(RegistryError::NodeAsValue { namespace: self.label(idx) });
		}
		if value.is_none() && self.nodes[idx].value.is_none() {
			return Ok(None);
		}
		self.ensure_writable(idx)?;
		if value.is_some() && self.nodes[idx].value.is_some() && self.has_flag(idx, NodeFlags::NO_OVERRIDE) {
			return Err(RegistryError::NoOverride { namespace: self.label(idx) });
		}
		Ok(self.replace_value(idx, value, out))
	}

	fn replace_value(&mut self, idx: usize, value: Option<Value>, out: &mut Vec<Invocation>) -> Option<Value> {
		let old = std::mem::replace(&mut self.nodes[idx].value, value.clone());
		self.mark_dirty(idx);
		match (&old, &value) {
			(None, Some(_)) => self.emit(idx, Emitted::value(EventKind::ValueStore, None, value.clone()), out),
			(Some(_), None) => self.emit(idx, Emitted::value(EventKind::ValueRemove, old.clone(), None), out),
			_ => {}
		}
		self.emit(idx, Emitted::value(EventKind::ValueChange, old.clone(), value), out);
		old
	}

	fn next_listener_id(&mut self) -> ListenerId {
		let id = ListenerId(self.next_listener);
		self.next_listener += 1;
		id
	}

	pub(crate) fn add_listener(&mut self, idx: usize, kind: EventKind, flags: ListenerFlags, callback: Callback) -> ListenerId {
		let id = self.next_listener_id();
		self.nodes[idx].listeners.push(ListenerRecord { id, kind, flags, callback });
		self.listener_nodes.insert(id, idx);
		id
	}

	pub(crate) fn remove_listener(&mut self, id: ListenerId) -> bool {
		let Some(idx) = self.listener_nodes.remove(&id) else {
			return false;
		};
		let listeners = &mut self.nodes[idx].listeners;
		let before = listeners.len();
		listeners.retain(|l| l.id != id);
		listeners.len() != before
	}

	pub(crate) fn add_resolver(&mut self, idx: usize, resolver: Arc<dyn Resolver>) {
		let seq = self.next_resolver;
		self.next_resolver += 1;
		self.nodes[idx].resolvers.push(ResolverEntry { seq, resolver });
	}

	/// Plans listener calls for an event raised on `idx`: ancestors first,
	/// the node itself last. `FIRE_ONCE` listeners are consumed only when
	/// they are actually scheduled.
	fn emit(&mut self, idx: usize, emitted: Emitted, out: &mut Vec<Invocation>) {
		let chain = self.lineage(idx);
		if chain.iter().all(|&i| self.nodes[i].listeners.is_empty()) {
			return;
		}

		let mut event = NodeEvent::new(emitted.kind, self.id(idx), self.namespace(idx).to_string());
		event.child = emitted.child;
		event.old_value = emitted.old_value;
		event.new_value = emitted.new_value;
		event.flags = emitted.flags;

		for i in chain {
			let local = i == idx;
			let mut consumed = Vec::new();
			for l in &self.nodes[i].listeners {
				if l.kind != event.kind || (!local && l.flags.contains(ListenerFlags::NO_RECURSIVE)) {
					continue;
				}
				out.push(Invocation {
					listener: l.id,
					synchronized: l.flags.contains(ListenerFlags::SYNCHRONIZED),
					callback: Arc::clone(&l.callback),
					event: NodeEvent { local, ..event.clone() },
				});
				if l.flags.contains(ListenerFlags::FIRE_ONCE) {
					consumed.push(l.id);
				}
			}
			if !consumed.is_empty() {
				self.nodes[i].listeners.retain(|l| !consumed.contains(&l.id));
				for id in consumed {
					self.listener_nodes.remove(&id);
				}
			}
		}
	}
}
