//! The commit-time split work list (spec §4.5 "Commit-time split
//! dispatch", §9's design note): a queue owned by the transaction, drained
//! in FIFO order after a successful commit.

use dtree_generic::Coid;

/// Where the split was noticed: the coid that looked oversize, and the
/// byte/cell counts the server reported at the moment it decided a split
/// was needed (so the split algorithm doesn't need a fresh read just to
/// re-derive "is this still oversize").
#[derive(Clone, Debug)]
pub struct SplitTask {
    pub coid: Coid,
    pub ncells: u32,
    pub cells_size: u64,
}

/// A FIFO queue of split tasks enqueued during the transaction's
/// lifetime, drained once at commit.
#[derive(Default)]
pub struct WorkList {
    tasks: Vec<SplitTask>,
}

impl WorkList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, task: SplitTask) {
        self.tasks.push(task);
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drain every queued task in FIFO order, leaving the list empty.
    pub fn drain(&mut self) -> Vec<SplitTask> {
        std::mem::take(&mut self.tasks)
    }
}
