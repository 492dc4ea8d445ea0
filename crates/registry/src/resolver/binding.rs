//! The standard resolver: instances, lazy suppliers, aliases and providers.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

use super::{Priority, Resolver, TypeKey};
use crate::error::{BoxError, RegistryError, Result};
use crate::namespace::{Namespace, SEPARATOR};
use crate::value::Value;

/// Lazily builds a value on first request.
pub type Supplier = Arc<dyn Fn() -> Result<Value, BoxError> + Send + Sync>;

/// Factory answering names that match its pattern. Receives the normalized key.
pub type NamedProvider = Arc<dyn Fn(&str) -> Result<Option<Value>, BoxError> + Send + Sync>;

/// Factory answering one requested type.
pub type TypedProvider = Arc<dyn Fn(TypeKey) -> Result<Option<Value>, BoxError> + Send + Sync>;

const WILDCARD: &str = "*";

#[derive(Default)]
struct ResolverState {
	instances: FxHashMap<String, Value>,
	typed: FxHashMap<TypeId, Value>,
	suppliers: FxHashMap<String, Supplier>,
	typed_suppliers: FxHashMap<TypeId, Supplier>,
	namespace_aliases: FxHashMap<String, String>,
	type_aliases: FxHashMap<TypeId, TypeKey>,
	type_namespaces: FxHashMap<TypeId, String>,
	named_providers: Vec<(Vec<String>, NamedProvider)>,
	typed_providers: Vec<(TypeKey, TypedProvider)>,
}

/// Resolver scoped to a base namespace.
///
/// Name lookups follow namespace aliases, then check instances, then lazy
/// suppliers (memoized into instances), then the provider table in
/// registration order. Type lookups follow type aliases, then check typed
/// instances and suppliers, then a type-to-namespace alias, then typed
/// providers. Providers are never cached.
pub struct BindingResolver {
	base: Namespace,
	priority: Priority,
	state: RwLock<ResolverState>,
}

impl fmt::Debug for BindingResolver {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.state.read();
		f.debug_struct("BindingResolver")
			.field("base", &self.base.to_string())
			.field("priority", &self.priority)
			.field("instances", &state.instances.len())
			.field("suppliers", &state.suppliers.len())
			.field("providers", &(state.named_providers.len() + state.typed_providers.len()))
			.finish()
	}
}

impl BindingResolver {
	pub fn new(base: &str) -> Self {
		Self {
			base: Namespace::parse(base),
			priority: Priority::Normal,
			state: RwLock::new(ResolverState::default()),
		}
	}

	pub fn with_priority(mut self, priority: Priority) -> Self {
		self.priority = priority;
		self
	}

	pub fn base(&self) -> &Namespace {
		&self.base
	}

	/// Normalizes a key and strips the base namespace when present.
	fn key(&self, raw: &str) -> String {
		let ns = Namespace::parse(raw);
		if ns.depth() > self.base.depth()
			&& let Some(rest) = ns.strip_prefix(&self.base)
		{
			return rest.to_string();
		}
		ns.to_string()
	}

	pub fn add_instance(&self, name: &str, value: impl Into<Value>) {
		let key = self.key(name);
		self.state.write().instances.insert(key, value.into());
	}

	pub fn add_type_instance<T: Any + Send + Sync>(&self, value: Arc<T>) {
		self.state.write().typed.insert(TypeId::of::<T>(), Value::shared(value));
	}

	pub fn add_supplier<F>(&self, name: &str, supplier: F)
	where
		F: Fn() -> Result<Value, BoxError> + Send + Sync + 'static,
	{
		let key = self.key(name);
		self.state.write().suppliers.insert(key, Arc::new(supplier));
	}

	pub fn add_type_supplier<T, F>(&self, supplier: F)
	where
		T: Any + Send + Sync,
		F: Fn() -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
	{
		let supplier: Supplier = Arc::new(move || supplier().map(Value::shared));
		self.state.write().typed_suppliers.insert(TypeId::of::<T>(), supplier);
	}

	/// Makes `from` resolve as `to`.
	pub fn alias_namespace(&self, from: &str, to: &str) {
		let (from, to) = (self.key(from), self.key(to));
		self.state.write().namespace_aliases.insert(from, to);
	}

	/// Makes requests for `Src` resolve as requests for `Dst`.
	pub fn alias_type<Src: Any, Dst: Any>(&self) {
		self.state.write().type_aliases.insert(TypeId::of::<Src>(), TypeKey::of::<Dst>());
	}

	/// Makes requests for `T` resolve by name.
	pub fn alias_type_to_namespace<T: Any>(&self, namespace: &str) {
		let key = self.key(namespace);
		self.state.write().type_namespaces.insert(TypeId::of::<T>(), key);
	}

	/// Registers a named factory. `pattern` may end in a `*` segment matching
	/// any non-empty remainder.
	pub fn add_provider<F>(&self, pattern: &str, provider: F)
	where
		F: Fn(&str) -> Result<Option<Value>, BoxError> + Send + Sync + 'static,
	{
		let wildcard = pattern.trim_end_matches(SEPARATOR).rsplit(SEPARATOR).next() == Some(WILDCARD);
		let mut segments: Vec<String> = Namespace::parse(&self.key(pattern)).segments().to_vec();
		if wildcard {
			segments.push(WILDCARD.to_owned());
		}
		self.state.write().named_providers.push((segments, Arc::new(provider)));
	}

	/// Registers a factory for `T`. Results of another type are skipped.
	pub fn add_type_provider<T, F>(&self, provider: F)
	where
		T: Any,
		F: Fn(TypeKey) -> Result<Option<Value>, BoxError> + Send + Sync + 'static,
	{
		self.state.write().typed_providers.push((TypeKey::of::<T>(), Arc::new(provider)));
	}

	/// Follows namespace aliases, refusing cycles.
	fn follow_namespace(&self, key: String) -> Result<String> {
		let state = self.state.read();
		let mut visited = FxHashSet::default();
		let mut key = key;
		while let Some(next) = state.namespace_aliases.get(&key) {
			if !visited.insert(key.clone()) {
				return Err(RegistryError::AliasCycle(key));
			}
			key = next.clone();
		}
		Ok(key)
	}

	fn follow_type(&self, ty: TypeKey) -> Result<TypeKey> {
		let state = self.state.read();
		let mut visited = FxHashSet::default();
		let mut ty = ty;
		while let Some(next) = state.type_aliases.get(&ty.id) {
			if !visited.insert(ty.id) {
				return Err(RegistryError::AliasCycle(ty.name.to_owned()));
			}
			ty = *next;
		}
		Ok(ty)
	}

	fn lookup_name(&self, key: &str) -> Result<Option<Value>> {
		let supplier = {
			let state = self.state.read();
			if let Some(v) = state.instances.get(key) {
				return Ok(Some(v.clone()));
			}
			state.suppliers.get(key).cloned()
		};

		if let Some(supplier) = supplier {
			let value = supplier().map_err(|source| RegistryError::Resolver { key: key.to_owned(), source })?;
			let mut state = self.state.write();
			let stored = state.instances.entry(key.to_owned()).or_insert(value).clone();
			return Ok(Some(stored));
		}

		let providers: Vec<NamedProvider> = {
			let state = self.state.read();
			state
				.named_providers
				.iter()
				.filter(|(pattern, _)| pattern_matches(pattern, key))
				.map(|(_, p)| Arc::clone(p))
				.collect()
		};
		for provider in providers {
			if let Some(value) = provider(key).map_err(|source| RegistryError::Resolver { key: key.to_owned(), source })? {
				return Ok(Some(value));
			}
		}
		Ok(None)
	}
}

fn pattern_matches(pattern: &[String], key: &str) -> bool {
	let segments: Vec<&str> = key.split(SEPARATOR).filter(|s| !s.is_empty()).collect();
	match pattern.split_last() {
		Some((last, head)) if last == WILDCARD => segments.len() > head.len() && head.iter().zip(&segments).all(|(p, s)| p == s),
		_ => pattern.len() == segments.len() && pattern.iter().zip(&segments).all(|(p, s)| p == s),
	}
}

impl Resolver for BindingResolver {
	fn priority(&self) -> Priority {
		self.priority
	}

	fn resolve_name(&self, key: &str) -> Result<Option<Value>> {
		let key = self.follow_namespace(self.key(key))?;
		self.lookup_name(&key)
	}

	fn resolve_type(&self, ty: TypeKey) -> Result<Option<Value>> {
		let ty = self.follow_type(ty)?;
		let (supplier, namespace) = {
			let state = self.state.read();
			if let Some(v) = state.typed.get(&ty.id) {
				return Ok(Some(v.clone()));
			}
			(state.typed_suppliers.get(&ty.id).cloned(), state.type_namespaces.get(&ty.id).cloned())
		};

		if let Some(supplier) = supplier {
			let value = supplier().map_err(|source| RegistryError::Resolver {
				key: ty.name.to_owned(),
				source,
			})?;
			let mut state = self.state.write();
			let stored = state.typed.entry(ty.id).or_insert(value).clone();
			return Ok(Some(stored));
		}

		if let Some(namespace) = namespace
			&& let Some(value) = self.resolve_name(&namespace)?
		{
			return Ok(Some(value));
		}

		let providers: Vec<TypedProvider> = {
			let state = self.state.read();
			state.typed_providers.iter().filter(|(key, _)| *key == ty).map(|(_, p)| Arc::clone(p)).collect()
		};
		for provider in providers {
			let produced = provider(ty).map_err(|source| RegistryError::Resolver {
				key: ty.name.to_owned(),
				source,
			})?;
			match produced {
				Some(value) if value.type_id() == ty.id => return Ok(Some(value)),
				Some(value) => {
					warn!(requested = ty.name, produced = value.type_name(), "registry.provider_type_mismatch");
				}
				None => {}
			}
		}
		Ok(None)
	}
}
