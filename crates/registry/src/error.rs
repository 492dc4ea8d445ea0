use crate::events::ListenerId;
use crate::tree::NodeId;

/// Boxed error returned by user callbacks (listeners, suppliers, providers, teardowns).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the registry.
pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

/// Coarse classification of a [`RegistryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Policy violation: read-only or no-override nodes, protected namespaces,
	/// lock upgrades.
	Denied,
	/// The node, owner or binding has been destroyed.
	Disposed,
	/// Lookup without creation hit a missing segment.
	NotFound,
	/// A callback or resolver failed, or the input was malformed.
	Internal,
	/// Soft condition the caller may log and continue past.
	Ignorable,
}

/// Registry error.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
	#[error("node '{namespace}' is read-only")]
	ReadOnly { namespace: String },

	#[error("node '{namespace}' already holds a value and refuses overrides")]
	NoOverride { namespace: String },

	#[error("invalid local name {0:?} (expected [A-Za-z0-9*_]+)")]
	InvalidName(String),

	#[error("node handles cannot be stored as values (on '{namespace}'); use child operations")]
	NodeAsValue { namespace: String },

	#[error("the DISPOSED flag is managed by the registry and cannot be changed directly")]
	DisposedFlag,

	#[error("child '{name}' already exists under '{namespace}'")]
	ChildExists { namespace: String, name: String },

	#[error("cannot move '{namespace}' into its own subtree")]
	MoveIntoSelf { namespace: String },

	#[error("the root node cannot be {action}")]
	RootImmutable { action: &'static str },

	#[error("write lock requested while this thread holds the read lock")]
	LockUpgrade,

	#[error("namespace '{namespace}' is reserved for the system")]
	ProtectedNamespace { namespace: String },

	#[error("namespace '{namespace}' is too shallow to privatize (needs at least {min} segments)")]
	TooShallow { namespace: String, min: usize },

	#[error("node '{namespace}' is already privatized")]
	AlreadyPrivatized { namespace: String },

	#[error("owner '{owner}' does not hold '{namespace}'")]
	NotOwner { namespace: String, owner: String },

	#[error("node {0} has been destroyed")]
	Disposed(NodeId),

	#[error("owner '{0}' has been destroyed")]
	OwnerDestroyed(String),

	#[error("binding '{0}' has been destroyed")]
	BindingDestroyed(String),

	#[error("no node at '{0}'")]
	NotFound(String),

	#[error("listener {id} on '{namespace}' failed: {source}")]
	Listener {
		id: ListenerId,
		namespace: String,
		#[source]
		source: BoxError,
	},

	#[error("resolver failed for '{key}': {source}")]
	Resolver {
		key: String,
		#[source]
		source: BoxError,
	},

	#[error("init hook failed: {0}")]
	InitHook(#[source] BoxError),

	#[error("alias cycle detected while resolving '{0}'")]
	AliasCycle(String),

	#[error("invalid registry configuration: {0}")]
	Config(#[from] toml::de::Error),

	#[error("registry already initialized")]
	AlreadyInitialized,
}

impl RegistryError {
	/// Returns the taxonomy bucket for this error.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::ReadOnly { .. }
			| Self::NoOverride { .. }
			| Self::InvalidName(_)
			| Self::NodeAsValue { .. }
			| Self::DisposedFlag
			| Self::ChildExists { .. }
			| Self::MoveIntoSelf { .. }
			| Self::RootImmutable { .. }
			| Self::LockUpgrade
			| Self::ProtectedNamespace { .. }
			| Self::TooShallow { .. }
			| Self::AlreadyPrivatized { .. }
			| Self::NotOwner { .. } => ErrorKind::Denied,
			Self::Disposed(_) | Self::OwnerDestroyed(_) | Self::BindingDestroyed(_) => ErrorKind::Disposed,
			Self::NotFound(_) => ErrorKind::NotFound,
			Self::Listener { .. }
			| Self::Resolver { .. }
			| Self::InitHook(_)
			| Self::AliasCycle(_)
			| Self::Config(_) => ErrorKind::Internal,
			Self::AlreadyInitialized => ErrorKind::Ignorable,
		}
	}

	/// Returns true if callers may log this error and continue.
	pub fn is_ignorable(&self) -> bool {
		self.kind() == ErrorKind::Ignorable
	}
}
