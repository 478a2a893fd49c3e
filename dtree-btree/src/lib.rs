//! The DTree supervalue node format: cells, fence keys, attributes and
//! copy-on-write value buffers. Unstable.

mod cell;
mod fence;
mod pending_op;
mod replay;
mod supervalue;
mod valbuf;

pub use cell::Cell;
pub use fence::{check_fences, check_schema_consistency, check_siblings, Fences, FenceViolation, SiblingViolation};
pub use pending_op::{PendingOp, PendingOpKind};
pub use replay::apply_pending_ops;
pub use supervalue::{attr, flags, SuperValue, MAX_ATTRS};
pub use valbuf::Valbuf;
