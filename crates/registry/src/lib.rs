//! Hierarchical namespace registry.
//!
//! A single tree of named nodes addressed by `.`-separated namespaces
//! (`io.amelia.cache.size`). Nodes carry inheritable flags, an optional
//! opaque [`Value`], listeners, resolver chains and an optional exclusive
//! owner.
//!
//! # Modules
//!
//! - [`namespace`] - Namespace normalization and local-name validation
//! - [`flags`] - Node flags and inheritance rules
//! - [`value`] - Opaque node values
//! - [`events`] - Listener kinds, modifiers and event payloads
//! - [`lock`] - The registry-wide reentrant reader/writer lock
//! - [`ownership`] - Exclusive ownership of subtrees
//! - [`resolver`] - Priority-ordered resolver chains
//! - [`decode`] - Loading JSON documents into the tree
//! - [`config`] - Registry tunables
//!
//! # Example
//!
//! ```
//! use amelia_registry::{EventKind, ListenerFlags, Registry};
//!
//! let registry = Registry::new();
//! let size = registry.get_or_create("io.amelia.cache.size")?;
//! let amelia = registry.get("io.amelia").expect("created above");
//! registry.add_listener(amelia, EventKind::ValueChange, ListenerFlags::SYNCHRONIZED, |event| {
//! 	assert!(!event.local);
//! 	Ok(())
//! })?;
//! registry.set_value(size, 100i64)?;
//! # Ok::<(), amelia_registry::RegistryError>(())
//! ```

pub mod binding;
pub mod config;
pub mod decode;
pub mod error;
pub mod events;
pub mod flags;
pub mod lock;
pub mod namespace;
pub mod ownership;
mod registry;
pub mod resolver;
mod tree;
pub mod value;

#[cfg(test)]
mod tests;

pub use binding::Binding;
pub use config::RegistryConfig;
pub use error::{BoxError, ErrorKind, RegistryError, Result};
pub use events::{EventKind, ListenerFlags, ListenerId, NodeEvent};
pub use flags::NodeFlags;
pub use lock::{LockGuard, LockMode};
pub use namespace::Namespace;
pub use ownership::OwnerHandle;
pub use registry::{InitHook, Registry};
pub use resolver::{BindingResolver, Priority, Resolver, TypeKey};
pub use tree::{MergePolicy, NodeId};
pub use value::Value;
