//!   Core Git repository wrapper.
//!
//!  This is the central component of the storage layer.  It wraps `git2::Repository`
//!   with thread-safe access and provides the operations that the rest of
//!  the system uses.
//!
//! All other storage modules use this for Git access.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{Repository, RepositoryInitOptions};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::storage::blob;
use crate::storage::commit::{self, CommitBuilder, CommitInfo};
use crate::storage::diff::{self, TreeDiff};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::merge::{self, MergeOutcome};
use crate::storage::refs::RefManager;
use crate::storage::tree::{TreeEdits, TreeHandle};
use crate::storage::types::{Author, BlobId, BranchName, CommitId, DocumentKey, TagName, TreeId};

/// The main Git repository wrapper.
///
/// This provides thread-safe access to all Git operations.
/// Clone this to share across threads - it uses Arc internally.
#[derive(Clone)]
pub struct GitRepository {
    inner: Arc<GitRepositoryInner>,
}

struct GitRepositoryInner {
    repo: Mutex<Repository>,
    path: PathBuf,
}

impl GitRepository {
    fn from_repo(repo: Repository, path: &Path) -> Self {
        Self {
            inner: Arc::new(GitRepositoryInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
            }),
        }
    }

    /// Open an existing repository.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open_bare(path)
            .or_else(|_| Repository::open(path))
            .map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;

        debug!(path = %path.display(), "opened repository");
        Ok(Self::from_repo(repo, path))
    }

    /// Initialize a new bare repository with an empty root commit on `master`.
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::init_with_author(path, &Author::system())
    }

    /// Like [`GitRepository::init`], with `author` signing the root commit.
    pub fn init_with_author(path: impl AsRef<Path>, author: &Author) -> StorageResult<Self> {
        let path = path.as_ref();
        let mut opts = RepositoryInitOptions::new();
        opts.bare(true).initial_head(BranchName::MASTER).mkpath(true);
        let repo = Repository::init_opts(path, &opts)?;

        let storage = Self::from_repo(repo, path);

        storage.with_repo(|repo| {
            let root = commit::create_root_commit(repo, author)?;
            RefManager::init_master_branch(repo, root)?;
            info!(path = %path.display(), commit = %root, "initialized repository");
            Ok(())
        })?;

        Ok(storage)
    }

    /// Open or initialize a repository.
    ///
    /// Existence of the directory is the existence check.
    pub fn open_or_init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    /// Bare-clone `url` into `path`.
    pub fn clone_bare(url: &str, path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = git2::build::RepoBuilder::new().bare(true).clone(url, path)?;
        let tracked = RefManager::track_remote_branches(&repo)?;

        info!(url, path = %path.display(), tracked, "cloned repository");
        Ok(Self::from_repo(repo, path))
    }

    /// Get the repository path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Execute a function with exclusive access to the repository.
    pub fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    // ==================== Read Operations ====================

    /// Head commit of a branch; `None` if the branch does not exist.
    pub fn head_of(&self, branch: &BranchName) -> StorageResult<Option<CommitId>> {
        self.with_repo(|repo| RefManager::try_resolve_branch(repo, branch))
    }

    /// Resolve a branch, tag or raw commit id.
    pub fn resolve_reference(&self, reference: &str) -> StorageResult<Option<CommitId>> {
        self.with_repo(|repo| RefManager::resolve_reference(repo, reference))
    }

    /// Get information about a commit.
    pub fn get_commit(&self, id: CommitId) -> StorageResult<CommitInfo> {
        self.with_repo(|repo| commit::get_commit(repo, id))
    }

    /// Tree of a commit; `None` in, `None` out.
    pub fn tree_of(&self, commit: Option<CommitId>) -> StorageResult<Option<TreeId>> {
        match commit {
            Some(id) => self.with_repo(|repo| Ok(Some(commit::get_tree_at_commit(repo, id)?.id()))),
            None => Ok(None),
        }
    }

    /// Read one document at a commit.
    pub fn read_document(&self, at: CommitId, key: &DocumentKey) -> StorageResult<Option<String>> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            // a key naming a subtree is a prefix, not a document
            match tree.blob_id(key) {
                Ok(Some(blob_id)) => Ok(Some(blob::read_blob_string(repo, blob_id)?)),
                Ok(None) | Err(StorageError::UnexpectedEntryType { .. }) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    /// Read the direct children of `prefix` at a commit as `(key, value)` pairs.
    pub fn list_children(&self, at: CommitId, prefix: &str) -> StorageResult<Vec<(String, String)>> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            tree.list_children(repo, prefix)?
                .into_iter()
                .map(|(key, blob_id)| Ok((key, blob::read_blob_string(repo, blob_id)?)))
                .collect()
        })
    }

    pub fn read_blob(&self, id: BlobId) -> StorageResult<Vec<u8>> {
        self.with_repo(|repo| blob::read_blob(repo, id))
    }

    pub fn read_blob_string(&self, id: BlobId) -> StorageResult<String> {
        self.with_repo(|repo| blob::read_blob_string(repo, id))
    }

    // ==================== Write Operations ====================

    pub fn write_blob(&self, content: &[u8]) -> StorageResult<BlobId> {
        self.with_repo(|repo| blob::write_blob(repo, content))
    }

    /// Apply edits to `base` (or to the empty tree) and write the result.
    pub fn build_tree(&self, base: Option<TreeId>, edits: &TreeEdits) -> StorageResult<TreeId> {
        self.with_repo(|repo| {
            let base = base
                .map(|id| repo.find_tree(id.raw()).map(TreeHandle::new))
                .transpose()?;
            edits.apply(repo, base.as_ref())
        })
    }

    /// Commit `tree` on top of `parent` and point `branch` at it.
    ///
    /// Returns `None` without writing anything when `tree` equals the
    /// parent's tree. A root commit (no parent) is always created.
    pub fn commit_tree(
        &self,
        branch: &BranchName,
        tree: TreeId,
        parent: Option<CommitId>,
        message: &str,
        author: &Author,
    ) -> StorageResult<Option<CommitId>> {
        self.with_repo(|repo| {
            if let Some(parent) = parent {
                if commit::get_commit(repo, parent)?.tree_id == tree {
                    debug!(branch = %branch, "tree unchanged, skipping commit");
                    return Ok(None);
                }
            }

            let id = CommitBuilder::new(repo)
                .tree(tree)
                .parent(parent)
                .message(message)
                .author(author.clone())
                .commit()?;
            RefManager::update_branch(repo, branch, id)?;

            debug!(branch = %branch, commit = %id, "created commit");
            Ok(Some(id))
        })
    }

    /// Point a branch at a commit, creating it if needed.
    pub fn update_branch(&self, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        self.with_repo(|repo| RefManager::update_branch(repo, branch, target))
    }

    // ==================== Branch & Tag Operations ====================

    /// Create a new branch at the given commit.
    pub fn create_branch(&self, branch: &BranchName, at: CommitId) -> StorageResult<()> {
        self.with_repo(|repo| RefManager::create_branch(repo, branch, at))
    }

    /// Delete a branch.
    pub fn delete_branch(&self, branch: &BranchName) -> StorageResult<()> {
        self.with_repo(|repo| RefManager::delete_branch(repo, branch))
    }

    /// Check if a branch exists.
    pub fn branch_exists(&self, branch: &BranchName) -> StorageResult<bool> {
        self.with_repo(|repo| Ok(RefManager::branch_exists(repo, branch)))
    }

    /// List all branches.
    pub fn list_branches(&self) -> StorageResult<Vec<BranchName>> {
        self.with_repo(RefManager::list_branches)
    }

    /// Every branch with its head commit.
    pub fn branch_heads(&self) -> StorageResult<Vec<(BranchName, CommitId)>> {
        self.with_repo(RefManager::branch_heads)
    }

    pub fn create_tag(&self, tag: &TagName, at: CommitId) -> StorageResult<()> {
        self.with_repo(|repo| RefManager::create_tag(repo, tag, at))
    }

    pub fn delete_tag(&self, tag: &TagName) -> StorageResult<()> {
        self.with_repo(|repo| RefManager::delete_tag(repo, tag))
    }

    pub fn list_tags(&self) -> StorageResult<Vec<TagName>> {
        self.with_repo(RefManager::list_tags)
    }

    // ==================== Merge, Diff & History ====================

    /// Three-way merge of `theirs` into `ours`.
    pub fn merge(&self, ours: CommitId, theirs: CommitId) -> StorageResult<MergeOutcome> {
        self.with_repo(|repo| merge::merge_commits(repo, ours, theirs))
    }

    /// Structural diff between two commits.
    pub fn diff(&self, old: CommitId, new: CommitId) -> StorageResult<TreeDiff> {
        let old_tree = self.tree_of(Some(old))?;
        let new_tree = self.tree_of(Some(new))?;
        self.diff_trees(old_tree, new_tree)
    }

    /// Structural diff between two trees; `None` is the empty tree.
    pub fn diff_trees(&self, old: Option<TreeId>, new: Option<TreeId>) -> StorageResult<TreeDiff> {
        self.with_repo(|repo| diff::diff_trees(self, repo, old, new))
    }

    /// Commits reachable from `to` but not from `from`, most recent first.
    pub fn log(&self, from: CommitId, to: CommitId) -> StorageResult<Vec<CommitInfo>> {
        self.with_repo(|repo| commit::history_between(repo, from, to))
    }

    /// Whether `ancestor` is `commit` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, ancestor: CommitId, commit: CommitId) -> StorageResult<bool> {
        self.with_repo(|repo| commit::is_ancestor_or_self(repo, ancestor, commit))
    }
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository")
            .field("path", &self.inner.path)
            .finish()
    }
}
