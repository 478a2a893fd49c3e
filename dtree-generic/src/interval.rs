//! Half-open / open / closed interval definitions for `listDelRange`
//! (spec §4.2, "Interval types").

use std::fmt;

/// Whether an interval bound is present at all.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Bound {
    /// Bounded by `cell1`/`cell2`, inclusive.
    Closed,
    /// Bounded by `cell1`/`cell2`, exclusive.
    Open,
    /// Unbounded (`-inf` on the left, `+inf` on the right).
    Infinite,
}

/// One of the nine interval shapes a `listDelRange` call may specify,
/// numbered exactly as spec.md enumerates them:
/// `0=(a,b) 1=(a,b] 2=(a,inf) 3=[a,b) 4=[a,b] 5=[a,inf)
/// 6=(-inf,b) 7=(-inf,b] 8=(-inf,inf)`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum IntervalType {
    OpenOpen = 0,
    OpenClosed = 1,
    OpenInfinite = 2,
    ClosedOpen = 3,
    ClosedClosed = 4,
    ClosedInfinite = 5,
    InfiniteOpen = 6,
    InfiniteClosed = 7,
    InfiniteInfinite = 8,
}

impl IntervalType {
    pub fn from_u8(value: u8) -> Option<Self> {
        let variant = match value {
            0 => Self::OpenOpen,
            1 => Self::OpenClosed,
            2 => Self::OpenInfinite,
            3 => Self::ClosedOpen,
            4 => Self::ClosedClosed,
            5 => Self::ClosedInfinite,
            6 => Self::InfiniteOpen,
            7 => Self::InfiniteClosed,
            8 => Self::InfiniteInfinite,
            _ => return None,
        };
        Some(variant)
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// The left-bound kind, decomposed as `intervalType / 3` per spec.md.
    pub fn left_bound(&self) -> Bound {
        match (self.as_u8()) / 3 {
            0 => Bound::Open,
            1 => Bound::Closed,
            _ => Bound::Infinite,
        }
    }

    /// The right-bound kind, decomposed as `intervalType % 3` per spec.md.
    pub fn right_bound(&self) -> Bound {
        match self.as_u8() % 3 {
            0 => Bound::Open,
            1 => Bound::Closed,
            _ => Bound::Infinite,
        }
    }
}

impl fmt::Display for IntervalType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decomposition_matches_spec_table() {
        let cases = [
            (0u8, Bound::Open, Bound::Open),
            (1, Bound::Open, Bound::Closed),
            (2, Bound::Open, Bound::Infinite),
            (3, Bound::Closed, Bound::Open),
            (4, Bound::Closed, Bound::Closed),
            (5, Bound::Closed, Bound::Infinite),
            (6, Bound::Infinite, Bound::Open),
            (7, Bound::Infinite, Bound::Closed),
            (8, Bound::Infinite, Bound::Infinite),
        ];

        for (code, left, right) in cases {
            let it = IntervalType::from_u8(code).unwrap();
            assert_eq!(it.left_bound(), left, "code {}", code);
            assert_eq!(it.right_bound(), right, "code {}", code);
        }
    }
}
