//! Transaction handles.
//!
//! A transaction owns a private view of its branch: the tree the branch had
//! when the transaction began plus the edits made since. Nothing is visible
//! to readers until [`Transaction::commit`] succeeds.
//!
//! State machine:
//!
//! ```text
//!            commit()
//!   Open ───────────────► Committed
//!     │
//!     └─── abort() / drop ──► Aborted
//! ```

use std::fmt;
use std::time::Instant;

use tracing::{debug, info};
use ulid::Ulid;

use crate::storage::{Author, BranchName, CommitId, Document, DocumentKey, TreeEdits, TreeId};
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::manager::TransactionManager;

/// Lifecycle state of a transaction handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    Aborted,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Open => "open",
            TransactionState::Committed => "committed",
            TransactionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// A batched, branch-scoped transaction.
///
/// Dropping an open transaction aborts it.
pub struct Transaction {
    manager: TransactionManager,
    branch: BranchName,
    token: Ulid,
    base_tree: Option<TreeId>,
    edits: TreeEdits,
    state: TransactionState,
    expires_at: Instant,
}

impl Transaction {
    pub(crate) fn new(
        manager: TransactionManager,
        branch: BranchName,
        token: Ulid,
        base_tree: Option<TreeId>,
        expires_at: Instant,
    ) -> Self {
        Self {
            manager,
            branch,
            token,
            base_tree,
            edits: TreeEdits::new(),
            state: TransactionState::Open,
            expires_at,
        }
    }

    pub fn branch(&self) -> &BranchName {
        &self.branch
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// when the slot lapses unless another operation refreshes it
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether this handle is open and its slot is still the branch's live one.
    pub fn holds_slot(&self) -> bool {
        self.state == TransactionState::Open && self.manager.holds_slot(&self.branch, self.token)
    }

    /// number of pending document changes
    pub fn pending(&self) -> usize {
        self.edits.len()
    }

    fn ensure_open(&self) -> TransactionResult<()> {
        if self.state != TransactionState::Open {
            return Err(TransactionError::Closed { state: self.state });
        }
        Ok(())
    }

    /// check the branch slot and slide the deadline
    fn touch(&mut self) -> TransactionResult<()> {
        self.ensure_open()?;
        if let Some(deadline) = self.manager.check_slot(&self.branch, self.token)? {
            self.expires_at = deadline;
        }
        Ok(())
    }

    // ==================== Document Operations ====================

    /// Stage one document.
    pub fn add(&mut self, document: &Document) -> TransactionResult<()> {
        self.add_many(std::slice::from_ref(document))
    }

    /// Stage a batch of documents.
    ///
    /// Every key is validated and every blob written before any edit is
    /// applied, so a failing batch leaves the transaction unchanged.
    pub fn add_many(&mut self, documents: &[Document]) -> TransactionResult<()> {
        self.touch()?;

        let keys = documents
            .iter()
            .map(|doc| DocumentKey::new(doc.key.as_str()))
            .collect::<Result<Vec<_>, _>>()?;

        let repo = self.manager.repo();
        let blobs = documents
            .iter()
            .map(|doc| repo.write_blob(doc.content()))
            .collect::<Result<Vec<_>, _>>()?;

        for (key, blob) in keys.iter().zip(blobs) {
            self.edits.upsert(key, blob);
        }
        debug!(branch = %self.branch, count = documents.len(), "staged documents");
        Ok(())
    }

    /// Stage removal of one document; a missing key is not an error.
    pub fn delete(&mut self, key: &str) -> TransactionResult<()> {
        self.delete_many([key])
    }

    /// Stage removal of several documents.
    pub fn delete_many<I, S>(&mut self, keys: I) -> TransactionResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.touch()?;

        let keys = keys
            .into_iter()
            .map(|key| DocumentKey::new(key.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        for key in &keys {
            self.edits.remove(key);
        }
        debug!(branch = %self.branch, count = keys.len(), "staged removals");
        Ok(())
    }

    // ==================== Lifecycle ====================

    /// Commit the staged changes on top of the branch's current head.
    ///
    /// Returns `None` when the resulting tree equals the head's tree.
    pub fn commit(&mut self, message: &str, author: &Author) -> TransactionResult<Option<CommitId>> {
        self.ensure_open()?;

        let base = self.base_tree;
        let edits = &self.edits;
        let commit = self
            .manager
            .commit_transaction(&self.branch, self.token, message, author, |repo, _head_tree| {
                repo.build_tree(base, edits)
            })?;

        self.state = TransactionState::Committed;

        match commit {
            Some(id) => info!(branch = %self.branch, commit = %id, changes = self.edits.len(), "transaction committed"),
            None => info!(branch = %self.branch, "transaction committed without changes"),
        }
        Ok(commit)
    }

    /// Discard the staged changes. Calling this again is harmless.
    pub fn abort(&mut self) {
        if self.state != TransactionState::Open {
            return;
        }
        self.manager.release_slot(&self.branch, self.token);
        self.edits = TreeEdits::new();
        self.state = TransactionState::Aborted;
        info!(branch = %self.branch, "transaction aborted");
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.abort();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("branch", &self.branch)
            .field("token", &self.token)
            .field("state", &self.state)
            .field("pending", &self.edits.len())
            .finish()
    }
}
