//! A 128-bit total order for snapshot timestamps and commit timestamps
//! (spec §3). Built from a millisecond wall-clock reading plus a tie-break
//! counter, so two timestamps taken in the same millisecond still order.

use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 128-bit timestamp: high 64 bits are milliseconds since the Unix epoch,
/// low 64 bits are a tie-break counter. `Illegal` (`u128::MAX`) is a
/// distinguished sentinel used by deferred-start transactions and abort
/// outcomes.
#[derive(Copy, Clone, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Timestamp(u128);

const ILLEGAL: u128 = u128::MAX;

impl Timestamp {
    pub fn illegal() -> Self {
        Self(ILLEGAL)
    }

    pub fn is_illegal(&self) -> bool {
        self.0 == ILLEGAL
    }

    pub fn from_millis(millis: u64, tie_break: u64) -> Self {
        Self(((millis as u128) << 64) | tie_break as u128)
    }

    pub fn millis(&self) -> u64 {
        (self.0 >> 64) as u64
    }

    /// `setNew`: take a fresh reading of the local clock.
    pub fn set_new() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self::from_millis(millis, 0)
    }

    /// `setOld(delta_ms)`: a timestamp `delta_ms` milliseconds in the past.
    pub fn set_old(delta_ms: u64) -> Self {
        let now = Self::set_new();
        Self::from_millis(now.millis().saturating_sub(delta_ms), 0)
    }

    /// `setIllegal`.
    pub fn set_illegal() -> Self {
        Self::illegal()
    }

    /// The smallest timestamp strictly greater than `self`. Two
    /// concurrent clients calling `add_epsilon` on the same input will
    /// produce the same output -- per the Open Question in spec.md §9,
    /// this implementation does NOT claim global uniqueness from
    /// `add_epsilon` alone; see `add_epsilon_biased` and `DESIGN.md` for
    /// how the commit path narrows (but does not eliminate) that
    /// collision.
    pub fn add_epsilon(&self) -> Self {
        assert!(!self.is_illegal(), "cannot add epsilon to an illegal timestamp");
        Self(self.0 + 1)
    }

    /// `add_epsilon`, folding in a caller-supplied bias so that two
    /// clients deciding the same `mincommitts` are unlikely to land on
    /// the same commit timestamp. `bias` is the deciding transaction's
    /// own `Tid::worker_hash()` (spec.md §9's open question on
    /// `addEpsilon` uniqueness): deterministic and free of a server
    /// round-trip, but still not a global-uniqueness guarantee -- two
    /// transactions whose `Tid`s hash to the same low bits can still
    /// collide.
    pub fn add_epsilon_biased(&self, bias: u64) -> Self {
        assert!(!self.is_illegal(), "cannot add epsilon to an illegal timestamp");
        Self(self.0 + 1 + bias as u128)
    }

    /// `age`: elapsed wall-clock time since this timestamp was taken.
    pub fn age(&self) -> Duration {
        let now = Self::set_new().millis();
        Duration::from_millis(now.saturating_sub(self.millis()))
    }

    /// `catchup`: sleep until wall-clock time is at least `self`. A no-op
    /// if `self` is already in the past. This never coordinates with
    /// other clients or servers -- per spec.md's Non-goals, global clock
    /// synchronization is assumed, not implemented here.
    pub async fn catchup(&self) {
        if self.is_illegal() {
            return;
        }

        let now = Self::set_new().millis();
        let target = self.millis();
        if target > now {
            tokio::time::sleep(Duration::from_millis(target - now)).await;
        }
    }

    pub fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        Timestamp::cmp(self, other)
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_illegal() {
            f.write_str("ts:illegal")
        } else {
            write!(f, "ts:{}", self.0)
        }
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_epsilon_is_strictly_greater() {
        let ts = Timestamp::from_millis(1000, 5);
        let eps = ts.add_epsilon();
        assert!(eps > ts);
    }

    #[test]
    fn add_epsilon_biased_breaks_ties_between_different_biases() {
        let ts = Timestamp::from_millis(1000, 5);
        let a = ts.add_epsilon_biased(7);
        let b = ts.add_epsilon_biased(11);
        assert!(a > ts);
        assert!(b > ts);
        assert_ne!(a, b);
    }

    #[test]
    fn illegal_is_distinguished() {
        assert!(Timestamp::set_illegal().is_illegal());
        assert!(!Timestamp::set_new().is_illegal());
    }

    #[test]
    fn ordering_is_by_millis_then_tiebreak() {
        let a = Timestamp::from_millis(10, 9);
        let b = Timestamp::from_millis(11, 0);
        assert!(a < b);
    }
}
