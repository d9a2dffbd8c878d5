//! Per-branch mutual exclusion.
//!
//! One mutex per branch name, created lazily. The registry lock is held only
//! long enough to find or insert the entry, so writers on different branches
//! never block each other.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::storage::BranchName;

/// Registry of branch locks.
#[derive(Debug, Default)]
pub struct BranchLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BranchLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `branch`, created on first use.
    ///
    /// ```ignore
    /// let lock = locks.lock_for(&branch);
    /// let _guard = lock.lock();
    /// ```
    pub fn lock_for(&self, branch: &BranchName) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(branch.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Locks for two different branches, ordered by branch name.
    ///
    /// Acquire them in the returned order; anyone holding two branch locks
    /// at once goes through here.
    pub fn lock_pair(&self, a: &BranchName, b: &BranchName) -> [Arc<Mutex<()>>; 2] {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        [self.lock_for(first), self.lock_for(second)]
    }

    /// Make sure an entry exists for `branch`.
    pub fn provision(&self, branch: &BranchName) {
        self.lock_for(branch);
    }

    /// Forget the entry for a deleted branch.
    ///
    /// Holders of the old lock keep it until they release it.
    pub fn remove(&self, branch: &BranchName) {
        self.locks.lock().remove(branch.as_str());
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
