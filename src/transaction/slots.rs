//! Branch-level transaction slots.
//!
//! A branch has at most one live slot. Each slot carries the token of the
//! transaction that opened it and a sliding deadline. An expired slot is
//! dropped the next time anyone looks at it.
//!
//! A handle whose slot has been dropped keeps working as long as nobody has
//! opened a newer slot on the branch; once a newer slot exists the stale
//! handle is rejected.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ulid::Ulid;

use crate::storage::BranchName;
use crate::transaction::error::{TransactionError, TransactionResult};

#[derive(Debug, Clone, Copy)]
struct Slot {
    token: Ulid,
    deadline: Instant,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Tracks the live transaction slot of every branch.
#[derive(Debug)]
pub struct TransactionSlots {
    slots: Mutex<HashMap<String, Slot>>,
    timeout: Duration,
}

impl TransactionSlots {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// drop the slot for `branch` if it has expired
    fn purge(slots: &mut HashMap<String, Slot>, branch: &str, now: Instant) {
        if slots.get(branch).is_some_and(|slot| slot.is_expired(now)) {
            slots.remove(branch);
        }
    }

    /// Register a new slot; fails if a live one exists.
    pub fn open(&self, branch: &BranchName) -> TransactionResult<(Ulid, Instant)> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        Self::purge(&mut slots, branch.as_str(), now);

        if slots.contains_key(branch.as_str()) {
            return Err(TransactionError::Concurrency {
                branch: branch.to_string(),
            });
        }

        let slot = Slot {
            token: Ulid::new(),
            deadline: now + self.timeout,
        };
        slots.insert(branch.as_str().to_string(), slot);
        Ok((slot.token, slot.deadline))
    }

    /// Whether `branch` has a live slot.
    pub fn is_live(&self, branch: &BranchName) -> bool {
        let mut slots = self.slots.lock();
        Self::purge(&mut slots, branch.as_str(), Instant::now());
        slots.contains_key(branch.as_str())
    }

    /// Liveness check for the holder of `token`.
    ///
    /// Returns the refreshed deadline when the slot is still ours, `None` when
    /// the branch has no slot at all, and `Expired` when another token holds it.
    pub fn check(&self, branch: &BranchName, token: Ulid) -> TransactionResult<Option<Instant>> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        Self::purge(&mut slots, branch.as_str(), now);

        match slots.get_mut(branch.as_str()) {
            None => Ok(None),
            Some(slot) if slot.token == token => {
                slot.deadline = now + self.timeout;
                Ok(Some(slot.deadline))
            }
            Some(_) => Err(TransactionError::Expired {
                branch: branch.to_string(),
            }),
        }
    }

    /// Whether `token` owns the live slot of `branch`. Does not refresh it.
    pub fn holds(&self, branch: &BranchName, token: Ulid) -> bool {
        let mut slots = self.slots.lock();
        Self::purge(&mut slots, branch.as_str(), Instant::now());
        slots.get(branch.as_str()).is_some_and(|slot| slot.token == token)
    }

    /// Clear the slot only if `token` still owns it.
    pub fn release(&self, branch: &BranchName, token: Ulid) -> bool {
        let mut slots = self.slots.lock();
        match slots.get(branch.as_str()) {
            Some(slot) if slot.token == token => {
                slots.remove(branch.as_str());
                true
            }
            _ => false,
        }
    }

    /// Clear the slot whoever owns it.
    pub fn close(&self, branch: &BranchName) -> bool {
        self.slots.lock().remove(branch.as_str()).is_some()
    }

    /// Branches with a live slot, sorted.
    pub fn open_branches(&self) -> Vec<String> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        slots.retain(|_, slot| !slot.is_expired(now));
        let mut branches: Vec<String> = slots.keys().cloned().collect();
        branches.sort();
        branches
    }
}
