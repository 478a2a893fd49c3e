//! Fence-key and sibling invariants (spec §4.5.2, invariants I3/I4).

use std::cmp::Ordering;
use std::fmt;

use dtree_generic::{Coid, Key};

use crate::supervalue::SuperValue;

/// The inherited `(fencemin, fencemax]` bound a node's cells must fall
/// within.
pub struct Fences<'a> {
    pub min_exclusive: Option<&'a Key>,
    pub max_inclusive: Option<&'a Key>,
}

#[derive(Debug)]
pub struct FenceViolation {
    pub coid: Coid,
    pub index: usize,
}

impl fmt::Display for FenceViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "cell outside range (fencemin, fencemax] at {} index {}",
            self.coid, self.index
        )
    }
}

impl std::error::Error for FenceViolation {}

#[derive(Debug)]
pub enum SiblingViolation {
    BackpointerMismatch { left: Coid, right: Coid },
    HeightMismatch { left: Coid, right: Coid },
    FlagMismatch { left: Coid, right: Coid },
    KeyOrderViolation { left: Coid, right: Coid },
}

impl fmt::Display for SiblingViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BackpointerMismatch { left, right } => {
                write!(f, "{} -> {} RIGHTPTR has no matching LEFTPTR back-pointer", left, right)
            }
            Self::HeightMismatch { left, right } => {
                write!(f, "siblings {} and {} disagree on HEIGHT", left, right)
            }
            Self::FlagMismatch { left, right } => {
                write!(f, "siblings {} and {} disagree on LEAF/INTKEY flags", left, right)
            }
            Self::KeyOrderViolation { left, right } => {
                write!(f, "sibling {} keys are not all less than sibling {} keys", left, right)
            }
        }
    }
}

impl std::error::Error for SiblingViolation {}

/// Check (I3): every cell key `k` in `node` satisfies `fencemin < k <=
/// fencemax`.
pub fn check_fences(coid: Coid, node: &SuperValue, fences: Fences) -> Result<(), FenceViolation> {
    let collator = node.collator();

    for (i, cell) in node.cells().iter().enumerate() {
        if let Some(min) = fences.min_exclusive {
            if collator.compare_slice(&cell.key, min) != Ordering::Greater {
                return Err(FenceViolation { coid, index: i });
            }
        }

        if let Some(max) = fences.max_inclusive {
            if collator.compare_slice(&cell.key, max) == Ordering::Greater {
                return Err(FenceViolation { coid, index: i });
            }
        }
    }

    Ok(())
}

/// Check (I4): for a `RIGHTPTR`-linked sibling pair, the back-pointer
/// agrees, heights and flags match, and every key in `left` is less than
/// every key in `right`.
pub fn check_siblings(
    left_coid: Coid,
    left: &SuperValue,
    right_coid: Coid,
    right: &SuperValue,
) -> Result<(), SiblingViolation> {
    if left.rightptr() != right_coid.oid {
        return Err(SiblingViolation::BackpointerMismatch {
            left: left_coid,
            right: right_coid,
        });
    }

    if right.leftptr() != left_coid.oid {
        return Err(SiblingViolation::BackpointerMismatch {
            left: left_coid,
            right: right_coid,
        });
    }

    if left.height() != right.height() {
        return Err(SiblingViolation::HeightMismatch {
            left: left_coid,
            right: right_coid,
        });
    }

    if left.is_leaf() != right.is_leaf() || left.is_intkey() != right.is_intkey() {
        return Err(SiblingViolation::FlagMismatch {
            left: left_coid,
            right: right_coid,
        });
    }

    if let (Some(max_left), Some(min_right)) = (left.cells().last(), right.cells().first()) {
        let collator = left.collator();
        if collator.compare_slice(&max_left.key, &min_right.key) != Ordering::Less {
            return Err(SiblingViolation::KeyOrderViolation {
                left: left_coid,
                right: right_coid,
            });
        }
    }

    Ok(())
}

/// Fatal schema-mismatch check referenced in spec §7: `LEAF` flag
/// disagreeing with `CellType` is a checker failure, not a recoverable
/// error.
pub fn check_schema_consistency(node: &SuperValue) -> Result<(), String> {
    if node.ncells() > 0 && node.height() == 0 && !node.is_leaf() {
        return Err("HEIGHT = 0 but LEAF flag is not set".to_string());
    }
    Ok(())
}
