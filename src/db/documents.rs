//! Branch-scoped document operations.
//!
//! Reads go straight to the branch head's tree without locking. Writes go
//! through the transaction manager's commit path so that direct saves and
//! transaction commits serialize on the same branch lock.

use serde::Serialize;
use tracing::info;

use crate::db::api::{DatabaseError, DatabaseResult};
use crate::storage::{
    Author, BranchName, CommitId, CommitInfo, DocumentKey, GitRepository, TagName, TreeEdits,
};
use crate::transaction::TransactionManager;

/// One page of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// index of the first item in the full listing
    pub start: usize,
    /// one past the index of the last item returned
    pub end: usize,
    /// number of direct children under the prefix
    pub total: usize,
}

/// Document and ref operations against a database's branches.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    manager: TransactionManager,
}

impl DocumentStore {
    pub(crate) fn new(manager: TransactionManager) -> Self {
        Self { manager }
    }

    fn repo(&self) -> &GitRepository {
        self.manager.repo()
    }

    // ==================== Reads ====================

    /// Read one document from the head of `branch`.
    ///
    /// A missing branch reads as an empty one.
    pub fn get(&self, branch: &str, key: &str) -> DatabaseResult<Option<String>> {
        let branch = BranchName::new(branch)?;
        let key = DocumentKey::new(key)?;

        match self.repo().head_of(&branch)? {
            Some(head) => Ok(self.repo().read_document(head, &key)?),
            None => Ok(None),
        }
    }

    /// Values of the documents directly under `prefix`, ordered by key.
    pub fn get_files(&self, branch: &str, prefix: &str) -> DatabaseResult<Vec<String>> {
        Ok(self
            .children(branch, prefix)?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    /// Like [`DocumentStore::get_files`], skipping `start` documents and
    /// returning at most `page_size`.
    pub fn get_files_paged(
        &self,
        branch: &str,
        prefix: &str,
        start: usize,
        page_size: usize,
    ) -> DatabaseResult<Page<String>> {
        if page_size == 0 {
            return Err(DatabaseError::Validation(
                "page size must be greater than zero".to_string(),
            ));
        }

        let children = self.children(branch, prefix)?;
        let total = children.len();
        let items: Vec<String> = children
            .into_iter()
            .skip(start)
            .take(page_size)
            .map(|(_, value)| value)
            .collect();

        Ok(Page {
            start,
            end: start + items.len(),
            total,
            items,
        })
    }

    fn children(&self, branch: &str, prefix: &str) -> DatabaseResult<Vec<(String, String)>> {
        let branch = BranchName::new(branch)?;
        match self.repo().head_of(&branch)? {
            Some(head) => Ok(self.repo().list_children(head, prefix)?),
            None => Ok(Vec::new()),
        }
    }

    // ==================== Writes ====================

    /// Store `value` under `key` on `branch`.
    ///
    /// An absent value is stored as empty content. Returns `None` when the
    /// branch already held exactly this content.
    pub fn save(
        &self,
        branch: &str,
        message: &str,
        key: &str,
        value: Option<&str>,
        author: &Author,
    ) -> DatabaseResult<Option<CommitId>> {
        let branch = BranchName::new(branch)?;
        let key = DocumentKey::new(key)?;

        let blob = self.repo().write_blob(value.unwrap_or("").as_bytes())?;
        let mut edits = TreeEdits::new();
        edits.upsert(&key, blob);

        self.write(&branch, message, author, edits)
    }

    /// Remove `key` from `branch`; a missing key is a no-op.
    pub fn delete(
        &self,
        branch: &str,
        key: &str,
        message: &str,
        author: &Author,
    ) -> DatabaseResult<Option<CommitId>> {
        let branch = BranchName::new(branch)?;
        let key = DocumentKey::new(key)?;

        let mut edits = TreeEdits::new();
        edits.remove(&key);

        self.write(&branch, message, author, edits)
    }

    fn write(
        &self,
        branch: &BranchName,
        message: &str,
        author: &Author,
        edits: TreeEdits,
    ) -> DatabaseResult<Option<CommitId>> {
        let commit = self
            .manager
            .write_to_branch(branch, message, author, |repo, head_tree| {
                repo.build_tree(head_tree, &edits)
            })?;
        Ok(commit)
    }

    // ==================== Branches & Tags ====================

    /// Create `name` at whatever `pointer` resolves to: a branch, a tag or a
    /// commit id.
    pub fn create_branch(&self, name: &str, pointer: &str) -> DatabaseResult<CommitId> {
        let branch = BranchName::new(name)?;
        let target = self.resolve(pointer)?;

        self.repo().create_branch(&branch, target)?;
        self.manager.locks().provision(&branch);

        info!(branch = %branch, pointer, commit = %target, "branch created");
        Ok(target)
    }

    pub fn delete_branch(&self, name: &str) -> DatabaseResult<()> {
        let branch = BranchName::new(name)?;
        self.repo().delete_branch(&branch)?;
        self.manager.locks().remove(&branch);

        info!(branch = %branch, "branch deleted");
        Ok(())
    }

    /// Tag whatever `reference` resolves to.
    pub fn tag(&self, name: &str, reference: &str) -> DatabaseResult<CommitId> {
        let tag = TagName::new(name)?;
        let target = self.resolve(reference)?;

        self.repo().create_tag(&tag, target)?;
        info!(tag = %tag, commit = %target, "tag created");
        Ok(target)
    }

    pub fn delete_tag(&self, name: &str) -> DatabaseResult<()> {
        let tag = TagName::new(name)?;
        self.repo().delete_tag(&tag)?;
        info!(tag = %tag, "tag deleted");
        Ok(())
    }

    pub fn list_branches(&self) -> DatabaseResult<Vec<String>> {
        Ok(self
            .repo()
            .list_branches()?
            .into_iter()
            .map(|b| b.as_str().to_string())
            .collect())
    }

    pub fn list_tags(&self) -> DatabaseResult<Vec<String>> {
        Ok(self
            .repo()
            .list_tags()?
            .into_iter()
            .map(|t| t.as_str().to_string())
            .collect())
    }

    /// Commit metadata for a branch, tag or commit id.
    pub fn resolve_commit(&self, reference: &str) -> DatabaseResult<CommitInfo> {
        let id = self.resolve(reference)?;
        Ok(self.repo().get_commit(id)?)
    }

    fn resolve(&self, reference: &str) -> DatabaseResult<CommitId> {
        self.repo()
            .resolve_reference(reference)?
            .ok_or_else(|| DatabaseError::Validation(format!("cannot resolve reference '{}'", reference)))
    }
}
