//! The DTree cursor engine (spec §4.5): seek/first/last/next/prev,
//! insert/delete over the distributed tree, plus the commit-time split
//! dispatcher and splitter throttle/rowid allocator (spec §4.6) that
//! back client-side insertion.

mod constants;
mod cursor;
mod search;
mod split;
mod state;
mod throttle;

pub use constants::{DTREE_MAX_LEVELS, DTREE_SPLIT_OVERSIZE_MULTIPLIER, DTREE_SPLIT_SIZE, DTREE_SPLIT_SIZE_BYTES};
pub use cursor::Cursor;
pub use search::{cell_search, is_extreme};
pub use split::SplitDispatcher;
pub use state::{CursorState, SeekResult};
pub use throttle::{
    RowidAllocator, Throttle, ThrottleSignal, THROTTLE_MAX_DELAY_MS, THROTTLE_QUEUE_DEPTH_THRESHOLD,
    THROTTLE_RETRY_MS_THRESHOLD,
};
