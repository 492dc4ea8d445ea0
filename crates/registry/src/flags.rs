bitflags::bitflags! {
	/// Per-node flags.
	///
	/// A flag is effective on a node when set locally, or when an ancestor sets
	/// it and no node on the path (the node itself included) sets
	/// [`NodeFlags::NO_FLAG_RECURSION`].
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct NodeFlags: u8 {
		/// Structural and value mutations are refused.
		const READ_ONLY = 1 << 0;
		/// Persistence layers should skip this subtree.
		const NO_SAVE = 1 << 1;
		/// An existing value may not be replaced.
		const NO_OVERRIDE = 1 << 2;
		/// Stops inheritance of ancestor flags at this node.
		const NO_FLAG_RECURSION = 1 << 3;
		/// Reserved. Destroyed nodes leave the arena and are detected through
		/// their stale [`crate::NodeId`]; callers may never set or clear it.
		const DISPOSED = 1 << 4;
		/// The node or its children changed since the last clean.
		const DIRTY = 1 << 5;
	}
}

impl NodeFlags {
	/// Flags that callers may set and clear.
	pub(crate) const USER: Self = Self::all().difference(Self::DISPOSED);

	/// Flags carried over when one subtree is merged into another.
	pub(crate) const MERGED: Self = Self::READ_ONLY
		.union(Self::NO_SAVE)
		.union(Self::NO_OVERRIDE)
		.union(Self::NO_FLAG_RECURSION);
}
