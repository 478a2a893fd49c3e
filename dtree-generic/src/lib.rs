//! Identifiers, timestamps, keys and collation shared across the DTree
//! crates. Unstable.

mod ids;
mod interval;
mod key;
mod timestamp;

pub use ids::{Cid, Coid, Oid, Tid};
pub use interval::{Bound, IntervalType};
pub use key::{
    CellType, Key, KeyCollator, KeyInfo, LexicographicComparator, PackedKeyComparator, SortOrder,
};
pub use timestamp::Timestamp;
