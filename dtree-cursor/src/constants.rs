//! Tree-shape tunables named in spec §4.5/§4.6.

/// A cursor's node/nodetype/nodeIndex stack is bounded by this many
/// levels; exceeding it during a downward walk is cache poisoning, not a
/// recoverable condition (spec §7 "Fatal conditions").
pub const DTREE_MAX_LEVELS: usize = 32;

/// Split triggers: a node is oversize once it holds this many cells...
pub const DTREE_SPLIT_SIZE: u32 = 100;

/// ...or once its `CellsSize` reaches this many bytes, whichever comes
/// first. Neither value is pinned by the distilled spec; both are this
/// implementation's choice (see DESIGN.md), picked to keep a node inside
/// one MVKVS value comfortably while still being big enough that a
/// single-row insert/delete workload doesn't thrash the splitter.
pub const DTREE_SPLIT_SIZE_BYTES: u64 = 4096;

/// The throttle's "oversize node" signal (spec §4.6) fires at this
/// multiple of the split threshold.
pub const DTREE_SPLIT_OVERSIZE_MULTIPLIER: u32 = 2;
