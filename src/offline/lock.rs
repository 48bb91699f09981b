use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::model::ids::{BallotBoxId, EntityId};

type Key = (EntityId, EntityId);

/// Non-blocking per-ballot-box locks.
#[derive(Debug, Default, Clone)]
pub struct BallotBoxLocks {
    held: Arc<Mutex<HashSet<Key>>>,
}

impl BallotBoxLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock of `id`, or `None` if somebody holds it.
    pub fn try_acquire(&self, id: &BallotBoxId) -> Option<BallotBoxLockGuard> {
        let key = (id.election_event_id().clone(), id.ballot_box_id().clone());
        let mut held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        held.insert(key.clone()).then(|| BallotBoxLockGuard {
            held: self.held.clone(),
            key,
        })
    }
}

/// Releases the lock when dropped.
#[derive(Debug)]
pub struct BallotBoxLockGuard {
    held: Arc<Mutex<HashSet<Key>>>,
    key: Key,
}

impl Drop for BallotBoxLockGuard {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.key);
    }
}
