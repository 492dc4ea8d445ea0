//! Listener records and event payloads.
//!
//! Dispatch order is root first: an event raised on node N is offered to
//! every ancestor (root down to N's parent, marked non-local) before N's own
//! listeners see it (marked local).

use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;
use crate::flags::NodeFlags;
use crate::tree::NodeId;
use crate::value::Value;

/// Event kinds a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
	/// A child was attached.
	ChildAdd,
	/// A child was detached or destroyed.
	ChildRemove,
	/// Local flags changed.
	FlagChange,
	/// Value went from absent to present.
	ValueStore,
	/// Value went from present to absent.
	ValueRemove,
	/// Value was replaced. Always fired alongside store/remove.
	ValueChange,
}

bitflags::bitflags! {
	/// Listener modifiers.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct ListenerFlags: u8 {
		/// Removed after its first actual invocation.
		const FIRE_ONCE = 1 << 0;
		/// Only fires for events raised on the node it is attached to.
		const NO_RECURSIVE = 1 << 1;
		/// Runs inline under the caller's lock; errors propagate to the caller.
		const SYNCHRONIZED = 1 << 2;
	}
}

/// Opaque listener handle, monotonic per registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Listener callback.
pub type Callback = Arc<dyn Fn(&NodeEvent) -> Result<(), BoxError> + Send + Sync>;

/// Payload delivered to listeners.
#[derive(Debug, Clone)]
pub struct NodeEvent {
	pub kind: EventKind,
	/// Node the event was raised on.
	pub node: NodeId,
	/// Namespace of [`Self::node`] at the time of the event.
	pub namespace: String,
	/// True only for listeners attached to [`Self::node`] itself.
	pub local: bool,
	/// Child name for child events.
	pub child: Option<String>,
	/// Previous value for value events.
	pub old_value: Option<Value>,
	/// New value for value events.
	pub new_value: Option<Value>,
	/// Bits that changed for flag events.
	pub flags: NodeFlags,
}

impl NodeEvent {
	pub(crate) fn new(kind: EventKind, node: NodeId, namespace: String) -> Self {
		Self {
			kind,
			node,
			namespace,
			local: true,
			child: None,
			old_value: None,
			new_value: None,
			flags: NodeFlags::empty(),
		}
	}
}

#[derive(Clone)]
pub(crate) struct ListenerRecord {
	pub(crate) id: ListenerId,
	pub(crate) kind: EventKind,
	pub(crate) flags: ListenerFlags,
	pub(crate) callback: Callback,
}

/// One planned listener call, captured while the tree is locked and run
/// after the tree lock is released.
pub(crate) struct Invocation {
	pub(crate) listener: ListenerId,
	pub(crate) synchronized: bool,
	pub(crate) callback: Callback,
	pub(crate) event: NodeEvent,
}

/// Partial event emitted by tree mutations.
pub(crate) struct Emitted {
	pub(crate) kind: EventKind,
	pub(crate) child: Option<String>,
	pub(crate) old_value: Option<Value>,
	pub(crate) new_value: Option<Value>,
	pub(crate) flags: NodeFlags,
}

impl Emitted {
	pub(crate) fn child(kind: EventKind, name: &str) -> Self {
		Self {
			kind,
			child: Some(name.to_owned()),
			old_value: None,
			new_value: None,
			flags: NodeFlags::empty(),
		}
	}

	pub(crate) fn value(kind: EventKind, old_value: Option<Value>, new_value: Option<Value>) -> Self {
		Self {
			kind,
			child: None,
			old_value,
			new_value,
			flags: NodeFlags::empty(),
		}
	}

	pub(crate) fn flags(changed: NodeFlags) -> Self {
		Self {
			kind: EventKind::FlagChange,
			child: None,
			old_value: None,
			new_value: None,
			flags: changed,
		}
	}
}
