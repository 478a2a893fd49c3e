//! Tunables named in spec §4.2, kept as named constants rather than
//! scattered literals so the read/write paths can cite them by name.

use std::time::Duration;

/// `MAX_DEFERRED_START_TS`: how far in the past a deferred transaction's
/// `StartTs` may be clamped to once its first read returns a `readTs`
/// older than this many milliseconds.
pub const MAX_DEFERRED_START_TS_MS: u64 = 10_000;

/// `MAX_READS_TO_TXCACHE`: once a transaction has installed this many
/// fresh reads into `TxCache`, subsequent reads stop being cached (still
/// served correctly, just not retained) to bound per-transaction memory.
pub const MAX_READS_TO_TXCACHE: usize = 10_000;

/// `GAIA_WRITE_ON_PREPARE_MAX_BYTES`: the largest first-write payload
/// eligible to ride piggy-backed on a Prepare message instead of being
/// flushed as its own Write RPC.
pub const GAIA_WRITE_ON_PREPARE_MAX_BYTES: usize = 4096;

/// Backoff between commit-time split retries (spec §4.5 "Commit-time
/// split dispatch").
pub const SPLIT_CLIENT_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// `DTREE_SPLIT_CLIENT_MAX_RETRIES`.
pub const DTREE_SPLIT_CLIENT_MAX_RETRIES: u32 = 8;
