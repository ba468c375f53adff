//! At-most-one success per task.
//!
//! Every attempt carries an attempt id. The first successful attempt to
//! commit wins the task's slot; any later success (a timed-out original that
//! finally answered, or a parallel retry) is discarded. Sealing a slot closes
//! it for good once the task has settled.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SlotState {
    Open,
    Committed { attempt_id: String },
    Sealed,
}

/// Per-dispatch record of which attempt committed each task.
#[derive(Debug, Default)]
pub struct AttemptLedger {
    slots: DashMap<String, SlotState>,
    discarded: AtomicUsize,
}

impl AttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the slot for a task. Re-opening an existing slot is a no-op.
    pub fn open(&self, task_id: &str) {
        self.slots
            .entry(task_id.to_string())
            .or_insert(SlotState::Open);
    }

    /// Try to commit a successful attempt. Returns `false` (and counts a
    /// discarded duplicate) when the slot is already committed or sealed.
    pub fn try_commit(&self, task_id: &str, attempt_id: &str) -> bool {
        let mut slot = self
            .slots
            .entry(task_id.to_string())
            .or_insert(SlotState::Open);

        match &*slot {
            SlotState::Open => {
                *slot = SlotState::Committed {
                    attempt_id: attempt_id.to_string(),
                };
                true
            }
            SlotState::Committed { attempt_id: winner } => {
                self.discarded.fetch_add(1, Ordering::SeqCst);
                info!(
                    task_id = task_id,
                    attempt_id = attempt_id,
                    committed_attempt = winner.as_str(),
                    "Discarding duplicate success"
                );
                false
            }
            SlotState::Sealed => {
                self.discarded.fetch_add(1, Ordering::SeqCst);
                warn!(
                    task_id = task_id,
                    attempt_id = attempt_id,
                    "Discarding success for a settled task"
                );
                false
            }
        }
    }

    /// Close an open slot. If an attempt already committed, the slot keeps
    /// its winner and the winning attempt id is returned.
    pub fn seal(&self, task_id: &str) -> Option<String> {
        let mut slot = self
            .slots
            .entry(task_id.to_string())
            .or_insert(SlotState::Open);

        match &*slot {
            SlotState::Committed { attempt_id } => Some(attempt_id.clone()),
            _ => {
                *slot = SlotState::Sealed;
                None
            }
        }
    }

    /// Attempt id that committed for `task_id`, if any.
    pub fn committed(&self, task_id: &str) -> Option<String> {
        self.slots.get(task_id).and_then(|slot| match &*slot {
            SlotState::Committed { attempt_id } => Some(attempt_id.clone()),
            _ => None,
        })
    }

    /// Number of late successes discarded so far.
    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_commit_wins() {
        let ledger = AttemptLedger::new();
        ledger.open("t1");

        assert!(ledger.try_commit("t1", "t1#2"));
        assert!(!ledger.try_commit("t1", "t1#1"));
        assert_eq!(ledger.committed("t1").as_deref(), Some("t1#2"));
        assert_eq!(ledger.discarded(), 1);
    }

    #[test]
    fn test_seal_blocks_late_success() {
        let ledger = AttemptLedger::new();
        ledger.open("t1");

        assert_eq!(ledger.seal("t1"), None);
        assert!(!ledger.try_commit("t1", "t1#1"));
        assert_eq!(ledger.committed("t1"), None);
        assert_eq!(ledger.discarded(), 1);
    }

    #[test]
    fn test_seal_after_commit_reports_winner() {
        let ledger = AttemptLedger::new();
        ledger.open("t1");
        assert!(ledger.try_commit("t1", "t1#1"));
        assert_eq!(ledger.seal("t1").as_deref(), Some("t1#1"));
    }

    #[tokio::test]
    async fn test_concurrent_commits_have_one_winner() {
        let ledger = Arc::new(AttemptLedger::new());
        ledger.open("t1");

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.try_commit("t1", &format!("t1#{}", i)) })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(ledger.discarded(), 15);
    }
}
