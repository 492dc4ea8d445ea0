//! Namespace paths.
//!
//! Public entry points accept raw `.`-separated strings and normalize them
//! once: case-fold, drop anything outside `[a-z0-9_.]`, collapse repeated
//! separators and trim separators at either end. Everything below the entry
//! point works on normalized [`Namespace`] values.

use std::fmt;
use std::str::FromStr;

use crate::error::{RegistryError, Result};

/// Public namespace separator.
pub const SEPARATOR: char = '.';

/// A normalized, `.`-separated path into the registry tree.
///
/// The empty namespace addresses the root node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
	segments: Vec<String>,
}

impl Namespace {
	/// The root namespace.
	pub const fn root() -> Self {
		Self { segments: Vec::new() }
	}

	/// Normalizes and splits `raw`.
	pub fn parse(raw: &str) -> Self {
		let folded: String = raw
			.chars()
			.flat_map(char::to_lowercase)
			.filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == SEPARATOR)
			.collect();
		let segments = folded
			.split(SEPARATOR)
			.filter(|s| !s.is_empty())
			.map(str::to_owned)
			.collect();
		Self { segments }
	}

	/// Builds a namespace from individual segments, normalizing each.
	pub fn from_segments<I, S>(segments: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut out = Self::root();
		for seg in segments {
			out.segments.extend(Self::parse(seg.as_ref()).segments);
		}
		out
	}

	pub fn is_root(&self) -> bool {
		self.segments.is_empty()
	}

	/// Number of segments.
	pub fn depth(&self) -> usize {
		self.segments.len()
	}

	pub fn segments(&self) -> &[String] {
		&self.segments
	}

	/// The enclosing namespace, or `None` for the root.
	pub fn parent(&self) -> Option<Self> {
		let (_, head) = self.segments.split_last()?;
		Some(Self { segments: head.to_vec() })
	}

	/// Final segment, or `None` for the root.
	pub fn last(&self) -> Option<&str> {
		self.segments.last().map(String::as_str)
	}

	/// Appends `child` (itself normalized, possibly multi-segment).
	pub fn join(&self, child: &str) -> Self {
		let mut out = self.clone();
		out.segments.extend(Self::parse(child).segments);
		out
	}

	/// True if `prefix` is an ancestor of, or equal to, `self`.
	pub fn starts_with(&self, prefix: &Namespace) -> bool {
		self.segments.starts_with(&prefix.segments)
	}

	/// Returns the remainder after `prefix`, if `prefix` matches.
	pub fn strip_prefix(&self, prefix: &Namespace) -> Option<Self> {
		self.segments.strip_prefix(prefix.segments.as_slice()).map(|rest| Self { segments: rest.to_vec() })
	}
}

impl fmt::Display for Namespace {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, seg) in self.segments.iter().enumerate() {
			if i > 0 {
				write!(f, "{SEPARATOR}")?;
			}
			f.write_str(seg)?;
		}
		Ok(())
	}
}

impl FromStr for Namespace {
	type Err = std::convert::Infallible;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(Self::parse(s))
	}
}

impl From<&str> for Namespace {
	fn from(s: &str) -> Self {
		Self::parse(s)
	}
}

/// Checks a node-local name against `[A-Za-z0-9*_]+`.
pub fn validate_local_name(name: &str) -> Result<()> {
	let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '*' || c == '_');
	if valid { Ok(()) } else { Err(RegistryError::InvalidName(name.to_owned())) }
}

/// Splits a node-relative path on the separator, validating every segment
/// before anything is touched.
pub(crate) fn split_local_path(path: &str) -> Result<Vec<&str>> {
	let segments: Vec<&str> = path.split(SEPARATOR).filter(|s| !s.is_empty()).collect();
	for seg in &segments {
		validate_local_name(seg)?;
	}
	Ok(segments)
}
