use amelia_worker::TaskClass;
use tracing::trace;

use super::Registry;
use crate::error::{RegistryError, Result};
use crate::events::Invocation;

impl Registry {
	/// Runs planned listener calls in order.
	///
	/// Synchronized listeners run on the caller's thread; the first failure
	/// stops dispatch and is returned. Everything else goes to the worker pool
	/// and only logs on failure.
	pub(crate) fn dispatch(&self, plan: Vec<Invocation>) -> Result<()> {
		for Invocation {
			listener,
			synchronized,
			callback,
			event,
		} in plan
		{
			trace!(listener = %listener, kind = ?event.kind, namespace = %event.namespace, local = event.local, "registry.dispatch");
			if synchronized {
				callback(&event).map_err(|source| RegistryError::Listener {
					id: listener,
					namespace: event.namespace.clone(),
					source,
				})?;
			} else {
				let label = format!("listener {listener} on '{}'", event.namespace);
				self.workers().submit(TaskClass::Listener, label, move || callback(&event));
			}
		}
		Ok(())
	}
}
