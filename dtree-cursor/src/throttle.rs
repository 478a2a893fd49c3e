//! Splitter throttle and rowid allocator (spec §4.6).
//!
//! Grounded in the same shared-singleton shape as `dtree_cache::NodeCache`
//! (a `Mutex`/`RwLock`-guarded map keyed by coid), since both are
//! process-wide state shared across every `Transaction` in the process
//! rather than anything owned by a single cursor.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dtree_client::MvkvsClient;
use dtree_error::DtResult;
use dtree_generic::{Cid, Coid};

use crate::constants::DTREE_SPLIT_OVERSIZE_MULTIPLIER;

pub const THROTTLE_QUEUE_DEPTH_THRESHOLD: usize = 50;
pub const THROTTLE_RETRY_MS_THRESHOLD: u64 = 500;
pub const THROTTLE_MAX_DELAY_MS: u32 = 1024;
const THROTTLE_BASE_DELAY_MS: u32 = 8;
const THROTTLE_SIGNAL_TTL: Duration = Duration::from_secs(5);

/// Which of the three load signals (spec §4.6) fired.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ThrottleSignal {
    QueueDepth = 0,
    RetryTime = 1,
    OversizeNode = 2,
}

#[derive(Copy, Clone)]
struct SignalState {
    delay_ms: u32,
    expires_at: Option<Instant>,
}

impl Default for SignalState {
    fn default() -> Self {
        Self {
            delay_ms: 0,
            expires_at: None,
        }
    }
}

/// Per-coid insert throttling. Clients consult `delay_for` before issuing
/// an insert; `trigger` (or one of the `note_*` convenience wrappers) is
/// called whenever one of the three load signals fires.
#[derive(Default)]
pub struct Throttle {
    state: Mutex<HashMap<Coid, [SignalState; 3]>>,
}

impl Throttle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Double `signal`'s delay for `coid` (off a floor of
    /// `THROTTLE_BASE_DELAY_MS`), capped at `THROTTLE_MAX_DELAY_MS`, and
    /// push its expiration out by `THROTTLE_SIGNAL_TTL`.
    pub fn trigger(&self, coid: Coid, signal: ThrottleSignal) {
        let mut state = self.state.lock().expect("throttle state poisoned");
        let entry = state.entry(coid).or_insert_with(Default::default);
        let slot = &mut entry[signal as usize];
        slot.delay_ms = if slot.delay_ms == 0 {
            THROTTLE_BASE_DELAY_MS
        } else {
            (slot.delay_ms * 2).min(THROTTLE_MAX_DELAY_MS)
        };
        slot.expires_at = Some(Instant::now() + THROTTLE_SIGNAL_TTL);
    }

    /// The delay a caller should wait before inserting into `coid`: the
    /// max over every signal whose expiration hasn't passed yet, zero if
    /// none are live.
    pub fn delay_for(&self, coid: Coid) -> Duration {
        let state = self.state.lock().expect("throttle state poisoned");
        let signals = match state.get(&coid) {
            Some(signals) => signals,
            None => return Duration::ZERO,
        };
        let now = Instant::now();
        let ms = signals
            .iter()
            .filter(|s| s.expires_at.map(|exp| exp > now).unwrap_or(false))
            .map(|s| s.delay_ms)
            .max()
            .unwrap_or(0);
        Duration::from_millis(ms as u64)
    }

    pub fn note_queue_depth(&self, coid: Coid, depth: usize) {
        if depth >= THROTTLE_QUEUE_DEPTH_THRESHOLD {
            self.trigger(coid, ThrottleSignal::QueueDepth);
        }
    }

    pub fn note_retry_elapsed(&self, coid: Coid, elapsed: Duration) {
        if elapsed.as_millis() as u64 >= THROTTLE_RETRY_MS_THRESHOLD {
            self.trigger(coid, ThrottleSignal::RetryTime);
        }
    }

    pub fn note_node_size(&self, coid: Coid, ncells: u32, cells_size: u64, split_size: u32, split_size_bytes: u64) {
        if ncells >= split_size * DTREE_SPLIT_OVERSIZE_MULTIPLIER
            || cells_size >= split_size_bytes * DTREE_SPLIT_OVERSIZE_MULTIPLIER as u64
        {
            self.trigger(coid, ThrottleSignal::OversizeNode);
        }
    }
}

/// `GetRowid` (spec §4.6): a process-local counter for ephemeral
/// containers, an RPC to the server owning `(cid, oid=0)` for persistent
/// ones.
#[derive(Default)]
pub struct RowidAllocator {
    local_counters: Mutex<HashMap<Cid, u64>>,
}

impl RowidAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_ephemeral(&self, cid: Cid, hint: Option<u64>) -> u64 {
        let mut counters = self.local_counters.lock().expect("rowid allocator poisoned");
        let counter = counters.entry(cid).or_insert_with(|| hint.unwrap_or(0));
        *counter += 1;
        *counter
    }

    /// Allocate the next rowid for `cid`, routing to the local counter or
    /// the server depending on whether `cid` is ephemeral.
    pub async fn next(&self, client: &dyn MvkvsClient, cid: Cid, hint: Option<u64>) -> DtResult<u64> {
        if cid.is_ephemeral() {
            Ok(self.next_ephemeral(cid, hint))
        } else {
            let reply = client.get_rowid(cid, hint).await?;
            Ok(reply.rowid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtree_generic::Oid;

    #[test]
    fn delay_doubles_and_caps() {
        let throttle = Throttle::new();
        let coid = Coid::new(Cid::new(1), Oid::from(2));
        assert_eq!(throttle.delay_for(coid), Duration::ZERO);

        throttle.trigger(coid, ThrottleSignal::RetryTime);
        assert_eq!(throttle.delay_for(coid).as_millis() as u32, THROTTLE_BASE_DELAY_MS);

        for _ in 0..20 {
            throttle.trigger(coid, ThrottleSignal::RetryTime);
        }
        assert_eq!(throttle.delay_for(coid).as_millis() as u32, THROTTLE_MAX_DELAY_MS);
    }

    #[test]
    fn delay_is_max_across_signals() {
        let throttle = Throttle::new();
        let coid = Coid::new(Cid::new(1), Oid::from(2));
        throttle.trigger(coid, ThrottleSignal::QueueDepth);
        throttle.trigger(coid, ThrottleSignal::RetryTime);
        throttle.trigger(coid, ThrottleSignal::RetryTime);
        let expected = THROTTLE_BASE_DELAY_MS * 2;
        assert_eq!(throttle.delay_for(coid).as_millis() as u32, expected);
    }
}
