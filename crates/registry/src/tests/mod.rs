//! End-to-end flows across loading, initialization, bindings and resolvers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use crate::{Binding, BindingResolver, EventKind, ListenerFlags, NodeFlags, OwnerHandle, Priority, Registry, RegistryConfig, RegistryError, Value};

fn init_tracing() {
	let _ = tracing_subscriber::fmt::try_init();
}

#[test]
fn load_initialize_and_serve() {
	init_tracing();
	let config = RegistryConfig::from_toml_str("system_namespace = \"org.example.core\"\n").unwrap();
	let reg = Arc::new(Registry::with_config(config));

	reg.decode_namespace(
		"org.example.db",
		&json!({
			"pool": { "size": 8, "idle": null },
			"replicas": [],
			"unused": {},
		}),
	)
	.unwrap();
	reg.get_or_create("org.example.scratch.empty").unwrap();

	let db = reg.get("org.example.db").unwrap();
	let resolver = Arc::new(BindingResolver::new("org.example.db").with_priority(Priority::High));
	resolver.add_supplier("pool.handle", || Ok(Value::from("pooled-connection")));
	reg.add_resolver(db, resolver).unwrap();

	reg.initialize().unwrap();
	assert!(reg.get("org.example.scratch").is_none());
	assert!(reg.get("org.example.db.unused").is_none());
	assert!(reg.get("org.example.db.pool.size").is_some());

	let binding = Binding::new(Arc::clone(&reg), "org.example.db").unwrap();
	let handle = binding.resolve_by_name("org.example.db.pool.handle").unwrap().unwrap();
	assert_eq!(handle.downcast_ref::<String>().map(String::as_str), Some("pooled-connection"));
	binding.destroy().unwrap();
	assert!(reg.get("org.example.db").is_none());

	let core = Binding::new(Arc::clone(&reg), "org.example.core.scheduler").unwrap();
	assert!(matches!(core.destroy(), Err(RegistryError::ProtectedNamespace { .. })));
	assert!(matches!(core.privatize(), Err(RegistryError::ProtectedNamespace { .. })));
}

#[test]
fn locked_configuration_survives_reload() {
	init_tracing();
	let reg = Registry::new();
	reg.decode_namespace("app.settings", &json!({ "theme": "dark" })).unwrap();
	let settings = reg.get("app.settings").unwrap();
	reg.set_flags(settings, NodeFlags::NO_OVERRIDE).unwrap();

	let theme = reg.get("app.settings.theme").unwrap();
	let err = reg.decode_namespace("app.settings", &json!({ "theme": "light" })).unwrap_err();
	assert!(matches!(err, RegistryError::NoOverride { .. }));
	assert_eq!(reg.get_value(theme).unwrap().unwrap().downcast_ref::<String>().map(String::as_str), Some("dark"));
}

#[test]
fn privatized_subtree_notifies_and_cascades() {
	init_tracing();
	let reg = Arc::new(Registry::new());
	let changes = Arc::new(AtomicUsize::new(0));

	let plugin = Binding::new(Arc::clone(&reg), "org.example.plugins.demo").unwrap();
	plugin.privatize().unwrap();
	let counter = Arc::clone(&changes);
	plugin
		.add_listener(EventKind::ValueChange, ListenerFlags::SYNCHRONIZED, move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
			Ok(())
		})
		.unwrap();
	plugin.set_value(true).unwrap();
	assert_eq!(changes.load(Ordering::SeqCst), 1);

	let host = OwnerHandle::new("host");
	reg.privatize("org.example.plugins", &host).unwrap();
	assert!(plugin.is_destroyed());
	assert!(matches!(plugin.set_value(false), Err(RegistryError::BindingDestroyed(_))));

	let node = reg.get("org.example.plugins.demo").unwrap();
	assert!(reg.is_privatized_to(node, &host).unwrap());
}
