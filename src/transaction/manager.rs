//! Transaction manager - coordinates branch writers.
//!
//! The TransactionManager is the shared core every write goes through.
//! It handles:
//! - Transaction creation and the per-branch slot registry
//! - The per-branch lock registry
//! - The single commit funnel used by direct writes and transactions
//! - Handing committed branches to the replicator

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};
use ulid::Ulid;

use crate::replication::Replicator;
use crate::storage::{Author, BranchName, CommitId, GitRepository, StorageResult, TreeId};
use crate::transaction::context::Transaction;
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::locks::BranchLocks;
use crate::transaction::slots::TransactionSlots;

/// Transaction manager - coordinates all branch writers.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<TransactionManagerInner>,
}

struct TransactionManagerInner {
    /// The underlying repository.
    repo: GitRepository,
    /// One lock per branch, guarding read-mutate-commit.
    locks: BranchLocks,
    /// At most one live transaction per branch.
    slots: TransactionSlots,
    replicator: Replicator,
}

impl TransactionManager {
    /// Default lifetime of an idle transaction.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new transaction manager for the given repository.
    pub fn new(repo: GitRepository, timeout: Duration, replicator: Replicator) -> Self {
        Self {
            inner: Arc::new(TransactionManagerInner {
                repo,
                locks: BranchLocks::new(),
                slots: TransactionSlots::new(timeout),
                replicator,
            }),
        }
    }

    /// Get a reference to the underlying repository.
    pub fn repo(&self) -> &GitRepository {
        &self.inner.repo
    }

    pub fn timeout(&self) -> Duration {
        self.inner.slots.timeout()
    }

    /// Begin a transaction on `branch`.
    ///
    /// Fails with a concurrency error while another live transaction holds
    /// the branch. A branch that does not exist yet starts from an empty tree.
    pub fn begin(&self, branch: &BranchName) -> TransactionResult<Transaction> {
        // a direct write holding the lock either lands before the snapshot or sees the slot
        let lock = self.inner.locks.lock_for(branch);
        let _guard = lock.lock();

        let (token, expires_at) = self.inner.slots.open(branch)?;

        let base_tree = match self
            .inner
            .repo
            .head_of(branch)
            .and_then(|head| self.inner.repo.tree_of(head))
        {
            Ok(tree) => tree,
            Err(e) => {
                self.inner.slots.release(branch, token);
                return Err(e.into());
            }
        };

        info!(branch = %branch, token = %token, "transaction opened");
        Ok(Transaction::new(self.clone(), branch.clone(), token, base_tree, expires_at))
    }

    /// Clear the branch's slot regardless of which transaction holds it.
    ///
    /// Outstanding handles keep working until someone opens a new transaction.
    pub fn close_transactions(&self, branch: &BranchName) -> bool {
        let closed = self.inner.slots.close(branch);
        if closed {
            info!(branch = %branch, "transactions closed");
        }
        closed
    }

    /// Whether a live transaction holds `branch`.
    pub fn is_open(&self, branch: &BranchName) -> bool {
        self.inner.slots.is_live(branch)
    }

    /// Branches with a live transaction.
    pub fn open_branches(&self) -> Vec<BranchName> {
        self.inner
            .slots
            .open_branches()
            .into_iter()
            .filter_map(|name| BranchName::new(name).ok())
            .collect()
    }

    // ==================== Crate-internal plumbing ====================

    pub(crate) fn check_slot(&self, branch: &BranchName, token: Ulid) -> TransactionResult<Option<Instant>> {
        self.inner.slots.check(branch, token)
    }

    pub(crate) fn holds_slot(&self, branch: &BranchName, token: Ulid) -> bool {
        self.inner.slots.holds(branch, token)
    }

    pub(crate) fn release_slot(&self, branch: &BranchName, token: Ulid) {
        self.inner.slots.release(branch, token);
    }

    pub(crate) fn locks(&self) -> &BranchLocks {
        &self.inner.locks
    }

    pub(crate) fn replicator(&self) -> &Replicator {
        &self.inner.replicator
    }

    /// Concurrency error while a live transaction holds `branch`.
    ///
    /// Callers hold the branch lock, so no transaction can open in between.
    pub(crate) fn ensure_no_transaction(&self, branch: &BranchName) -> TransactionResult<()> {
        if self.inner.slots.is_live(branch) {
            return Err(TransactionError::Concurrency {
                branch: branch.to_string(),
            });
        }
        Ok(())
    }

    /// Commit path for direct writes: rejected while a transaction is open.
    pub(crate) fn write_to_branch<F>(
        &self,
        branch: &BranchName,
        message: &str,
        author: &Author,
        build: F,
    ) -> TransactionResult<Option<CommitId>>
    where
        F: FnOnce(&GitRepository, Option<TreeId>) -> StorageResult<TreeId>,
    {
        self.commit_locked(branch, message, author, || self.ensure_no_transaction(branch), build)
    }

    /// Commit path for the transaction holding `token`.
    ///
    /// The slot is checked under the branch lock and released once the
    /// commit is in.
    pub(crate) fn commit_transaction<F>(
        &self,
        branch: &BranchName,
        token: Ulid,
        message: &str,
        author: &Author,
        build: F,
    ) -> TransactionResult<Option<CommitId>>
    where
        F: FnOnce(&GitRepository, Option<TreeId>) -> StorageResult<TreeId>,
    {
        let admit = || self.inner.slots.check(branch, token).map(|_| ());
        let commit = self.commit_locked(branch, message, author, admit, build)?;
        self.inner.slots.release(branch, token);
        Ok(commit)
    }

    /// The single commit path for a branch.
    ///
    /// Under the branch lock: run `admit`, read the head fresh, let `build`
    /// produce the new tree from the head's tree, commit it parented on the
    /// head and move the branch. Replication is queued after the lock is
    /// released.
    fn commit_locked<A, F>(
        &self,
        branch: &BranchName,
        message: &str,
        author: &Author,
        admit: A,
        build: F,
    ) -> TransactionResult<Option<CommitId>>
    where
        A: FnOnce() -> TransactionResult<()>,
        F: FnOnce(&GitRepository, Option<TreeId>) -> StorageResult<TreeId>,
    {
        let repo = &self.inner.repo;
        let commit = {
            let lock = self.inner.locks.lock_for(branch);
            let _guard = lock.lock();
            admit()?;

            let head = repo.head_of(branch)?;
            let head_tree = repo.tree_of(head)?;
            let tree = build(repo, head_tree)?;
            repo.commit_tree(branch, tree, head, message, author)?
        };

        match commit {
            Some(_) => self.inner.replicator.replicate(branch),
            None => debug!(branch = %branch, "nothing to commit"),
        }
        Ok(commit)
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("repo", &self.inner.repo)
            .field("open_branches", &self.inner.slots.open_branches())
            .finish()
    }
}
