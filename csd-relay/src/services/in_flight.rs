//! Per-submission in-flight registry
//!
//! At most one attempt per `source_submission_id` runs at a time. Acquiring
//! never waits: a caller that finds the id taken skips or reports a
//! conflict instead of queueing behind the running attempt.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    ids: Arc<Mutex<HashSet<String>>>,
}

fn lock(ids: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    // The set stays consistent even if a holder panicked
    ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`; `None` if an attempt for it is already running
    pub fn try_acquire(&self, id: &str) -> Option<InFlightGuard> {
        if lock(&self.ids).insert(id.to_string()) {
            Some(InFlightGuard {
                ids: self.ids.clone(),
                id: id.to_string(),
            })
        } else {
            None
        }
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        lock(&self.ids).contains(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.ids).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases its id on drop
#[derive(Debug)]
pub struct InFlightGuard {
    ids: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl InFlightGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.ids).remove(&self.id);
    }
}
