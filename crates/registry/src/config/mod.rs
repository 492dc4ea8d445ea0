//! Registry configuration.
//!
//! Configuration is plain TOML; every key is optional and falls back to the
//! built-in default:
//!
//! ```toml
//! system_namespace = "io.amelia"
//! min_privatize_depth = 3
//! trim_on_initialize = true
//! ```

use serde::Deserialize;

use crate::error::Result;
use crate::namespace::Namespace;

/// Default protected system namespace.
pub const DEFAULT_SYSTEM_NAMESPACE: &str = "io.amelia";

/// Default minimum number of segments a namespace needs to be privatized.
pub const DEFAULT_MIN_PRIVATIZE_DEPTH: usize = 3;

/// Tunables for a [`crate::Registry`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
	/// Namespace whose subtree can be neither privatized nor destroyed
	/// through a binding.
	pub system_namespace: String,
	/// Minimum segment count for [`crate::Registry::privatize`].
	pub min_privatize_depth: usize,
	/// Prune value-less branches during [`crate::Registry::initialize`].
	pub trim_on_initialize: bool,
}

impl Default for RegistryConfig {
	fn default() -> Self {
		Self {
			system_namespace: DEFAULT_SYSTEM_NAMESPACE.to_owned(),
			min_privatize_depth: DEFAULT_MIN_PRIVATIZE_DEPTH,
			trim_on_initialize: true,
		}
	}
}

impl RegistryConfig {
	/// Parses a TOML document.
	pub fn from_toml_str(source: &str) -> Result<Self> {
		Ok(toml::from_str(source)?)
	}

	/// Normalized system namespace.
	pub fn system_namespace(&self) -> Namespace {
		Namespace::parse(&self.system_namespace)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::RegistryError;

	#[test]
	fn empty_document_yields_defaults() {
		assert_eq!(RegistryConfig::from_toml_str("").unwrap(), RegistryConfig::default());
	}

	#[test]
	fn overrides_are_applied() {
		let cfg = RegistryConfig::from_toml_str("system_namespace = \"Org.Example\"\nmin_privatize_depth = 2\n").unwrap();
		assert_eq!(cfg.system_namespace().to_string(), "org.example");
		assert_eq!(cfg.min_privatize_depth, 2);
		assert!(cfg.trim_on_initialize);
	}

	#[test]
	fn unknown_keys_are_rejected() {
		let err = RegistryConfig::from_toml_str("trim = false").unwrap_err();
		assert!(matches!(err, RegistryError::Config(_)));
	}
}
