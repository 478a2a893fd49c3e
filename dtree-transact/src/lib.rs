//! The distributed transaction object (spec §4.2): snapshot reads,
//! per-coid write/pending-op buffering, subtransaction levels, and the
//! two-phase (one-phase fast path) commit driver, plus the commit-time
//! split work list the cursor engine drains after a successful commit.

mod limits;
mod state;
mod transaction;
mod worklist;

pub use limits::{DTREE_SPLIT_CLIENT_MAX_RETRIES, SPLIT_CLIENT_RETRY_BACKOFF};
pub use state::{CacheEntry, TxState};
pub use transaction::{CommitOutcomeCode, NodeOrigin, Transaction};
pub use worklist::{SplitTask, WorkList};
