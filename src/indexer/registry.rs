//! Single-flight registry of running site indexing tasks

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type RunMap = HashMap<i64, Arc<AtomicBool>>;

/// Tracks which sites have an active run, each with its cancel flag.
/// Acquiring a slot is an atomic check-and-set under one lock.
#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<Mutex<RunMap>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `site_id`, or `None` if a run already holds it
    pub fn try_acquire(&self, site_id: i64) -> Option<RunGuard> {
        let mut runs = self.runs.lock();
        if runs.contains_key(&site_id) {
            return None;
        }
        let cancel = Arc::new(AtomicBool::new(false));
        runs.insert(site_id, cancel.clone());
        Some(RunGuard {
            site_id,
            cancel,
            runs: self.runs.clone(),
        })
    }

    pub fn is_running(&self, site_id: i64) -> bool {
        self.runs.lock().contains_key(&site_id)
    }

    /// Site ids with an active run
    pub fn running(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.runs.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Request cancellation of a running site; false if it is not running
    pub fn cancel(&self, site_id: i64) -> bool {
        match self.runs.lock().get(&site_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Request cancellation of every running site, returning how many
    pub fn cancel_all(&self) -> usize {
        let runs = self.runs.lock();
        for flag in runs.values() {
            flag.store(true, Ordering::SeqCst);
        }
        runs.len()
    }
}

/// Ownership of a site's run slot; released on drop
pub struct RunGuard {
    site_id: i64,
    cancel: Arc<AtomicBool>,
    runs: Arc<Mutex<RunMap>>,
}

impl RunGuard {
    pub fn site_id(&self) -> i64 {
        self.site_id
    }

    pub fn cancel_flag(&self) -> &AtomicBool {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.runs.lock().remove(&self.site_id);
    }
}
