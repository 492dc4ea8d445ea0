//! Public facade over one registry node.
//!
//! A [`Binding`] carries its own [`OwnerHandle`]. Privatizing through the
//! binding claims the node for that handle; when another party later claims
//! an ancestor, the binding's owner is destroyed and the binding refuses all
//! further operations. Dropping a binding releases every claim it held.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{BoxError, RegistryError, Result};
use crate::events::{EventKind, ListenerFlags, ListenerId, NodeEvent};
use crate::namespace::Namespace;
use crate::ownership::OwnerHandle;
use crate::registry::Registry;
use crate::resolver::Resolver;
use crate::tree::NodeId;
use crate::value::Value;

pub struct Binding {
	registry: Arc<Registry>,
	namespace: Namespace,
	node: NodeId,
	owner: OwnerHandle,
	destroyed: Arc<AtomicBool>,
}

impl std::fmt::Debug for Binding {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Binding")
			.field("namespace", &self.namespace.to_string())
			.field("node", &self.node)
			.field("destroyed", &self.is_destroyed())
			.finish()
	}
}

impl Drop for Binding {
	fn drop(&mut self) {
		self.owner.release();
	}
}

impl Binding {
	/// Binds `namespace`, creating it if needed.
	pub fn new(registry: Arc<Registry>, namespace: &str) -> Result<Self> {
		let namespace = Namespace::parse(namespace);
		let node = registry.get_or_create(&namespace.to_string())?;
		let destroyed = Arc::new(AtomicBool::new(false));
		let flag = Arc::clone(&destroyed);
		let owner = OwnerHandle::with_teardown(namespace.to_string(), move || {
			flag.store(true, Ordering::Release);
			Ok(())
		});
		Ok(Self {
			registry,
			namespace,
			node,
			owner,
			destroyed,
		})
	}

	pub fn namespace(&self) -> &Namespace {
		&self.namespace
	}

	pub fn node(&self) -> NodeId {
		self.node
	}

	pub fn owner(&self) -> &OwnerHandle {
		&self.owner
	}

	pub fn registry(&self) -> &Arc<Registry> {
		&self.registry
	}

	pub fn is_destroyed(&self) -> bool {
		self.destroyed.load(Ordering::Acquire)
	}

	fn ensure_live(&self) -> Result<()> {
		if self.is_destroyed() {
			return Err(RegistryError::BindingDestroyed(self.namespace.to_string()));
		}
		if self.registry.is_disposed(self.node) {
			return Err(RegistryError::Disposed(self.node));
		}
		Ok(())
	}

	/// Mutations are refused while someone else holds the node.
	fn ensure_writable(&self) -> Result<()> {
		self.ensure_live()?;
		if let Some(holder) = self.registry.owner_of(self.node)?
			&& holder != self.owner
		{
			return Err(RegistryError::NotOwner {
				namespace: self.namespace.to_string(),
				owner: self.owner.label().to_owned(),
			});
		}
		Ok(())
	}

	/// Binding for a child namespace, with its own owner.
	pub fn child(&self, name: &str) -> Result<Binding> {
		self.ensure_live()?;
		Binding::new(Arc::clone(&self.registry), &self.namespace.join(name).to_string())
	}

	pub fn get_value(&self) -> Result<Option<Value>> {
		self.ensure_live()?;
		self.registry.get_value(self.node)
	}

	pub fn set_value(&self, value: impl Into<Value>) -> Result<Option<Value>> {
		self.ensure_writable()?;
		self.registry.set_value(self.node, value)
	}

	pub fn poll_value(&self) -> Result<Option<Value>> {
		self.ensure_writable()?;
		self.registry.poll_value(self.node)
	}

	pub fn add_listener<F>(&self, kind: EventKind, flags: ListenerFlags, callback: F) -> Result<ListenerId>
	where
		F: Fn(&NodeEvent) -> Result<(), BoxError> + Send + Sync + 'static,
	{
		self.ensure_live()?;
		self.registry.add_listener(self.node, kind, flags, callback)
	}

	pub fn add_resolver(&self, resolver: Arc<dyn Resolver>) -> Result<()> {
		self.ensure_writable()?;
		self.registry.add_resolver(self.node, resolver)
	}

	pub fn resolve_by_name(&self, key: &str) -> Result<Option<Value>> {
		self.ensure_live()?;
		self.registry.resolve_by_name(self.node, key)
	}

	pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Option<Arc<T>>> {
		self.ensure_live()?;
		self.registry.resolve::<T>(self.node)
	}

	/// Claims the bound namespace for this binding.
	pub fn privatize(&self) -> Result<()> {
		self.ensure_live()?;
		self.registry.privatize(&self.namespace.to_string(), &self.owner)?;
		Ok(())
	}

	pub fn is_privatized(&self) -> Result<bool> {
		self.ensure_live()?;
		self.registry.is_privatized_to(self.node, &self.owner)
	}

	/// Destroys the bound node. The system namespace, its ancestors and
	/// everything below it are refused.
	pub fn destroy(&self) -> Result<()> {
		self.ensure_writable()?;
		let system = self.registry.config().system_namespace();
		if system.starts_with(&self.namespace) || self.namespace.starts_with(&system) {
			return Err(RegistryError::ProtectedNamespace {
				namespace: self.namespace.to_string(),
			});
		}
		self.registry.destroy(self.node)?;
		self.destroyed.store(true, Ordering::Release);
		self.owner.release();
		Ok(())
	}
}
