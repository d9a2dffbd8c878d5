//!  Commit creation and history traversal
//!
//!  commits are the atomic units of change in branchdb:
//! - every save, delete or transaction commit produces at most one commit
//! - commits have zero or one parent, merges are squashed
//! - log queries walk ancestry between two commits
//!
//! this module handles commit creation, lookup and history walking

use chrono::{DateTime, TimeZone, Utc};
use git2::{Repository, Revwalk, Sort};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::tree::{self, TreeHandle};
use crate::storage::types::{Author, CommitId, TreeId};

/// information about a commit
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: CommitId,
    pub tree_id: TreeId,
    pub parent_ids: Vec<CommitId>,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
    /// create CommitInfo from a git2::Commit
    pub(crate) fn from_git2(commit: &git2::Commit<'_>) -> Self {
        let author = commit.author();
        let time = commit.committer().when();
        let timestamp = Utc
            .timestamp_opt(time.seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            id: CommitId::new(commit.id()),
            tree_id: TreeId::new(commit.tree_id()),
            parent_ids: commit.parent_ids().map(CommitId::new).collect(),
            message: commit.message().unwrap_or("").to_string(),
            author_name: author.name().unwrap_or("Unknown").to_string(),
            author_email: author.email().unwrap_or("unknown@unknown").to_string(),
            timestamp,
        }
    }

    /// get the first (or only) parent
    pub fn first_parent(&self) -> Option<CommitId> {
        self.parent_ids.first().copied()
    }

    /// check if this is a root commit
    pub fn is_root(&self) -> bool {
        self.parent_ids.is_empty()
    }

    /// get a short summary of the commit (first line of message)
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }

    pub fn author(&self) -> Author {
        Author::new(self.author_name.clone(), self.author_email.clone())
    }
}

/// builder for creating commits with a fluent interface
///
/// Commits are written without touching any ref; moving a branch is a
/// separate step so callers can decide which ref the commit lands on.
pub struct CommitBuilder<'a> {
    repo: &'a Repository,
    tree_id: Option<TreeId>,
    parent: Option<CommitId>,
    message: String,
    author: Author,
}

impl<'a> CommitBuilder<'a> {
    /// create a new CommitBuilder
    pub fn new(repo: &'a Repository) -> Self {
        Self {
            repo,
            tree_id: None,
            parent: None,
            message: String::new(),
            author: Author::system(),
        }
    }

    /// set the tree for this commit
    pub fn tree(mut self, tree_id: TreeId) -> Self {
        self.tree_id = Some(tree_id);
        self
    }

    /// set the parent commit; `None` makes a root commit
    pub fn parent(mut self, parent: Option<CommitId>) -> Self {
        self.parent = parent;
        self
    }

    /// set the commit message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// set the author/committer
    pub fn author(mut self, author: Author) -> Self {
        self.author = author;
        self
    }

    /// create the commit and return its ID
    pub fn commit(self) -> StorageResult<CommitId> {
        let tree_id = self
            .tree_id
            .ok_or_else(|| StorageError::Internal("commit requires a tree".to_string()))?;

        let tree = self.repo.find_tree(tree_id.raw())?;
        let sig = self.author.to_git2_signature()?;

        let parent = match self.parent {
            Some(id) => Some(
                self.repo
                    .find_commit(id.raw())
                    .map_err(|_| StorageError::CommitNotFound(id.to_string()))?,
            ),
            None => None,
        };
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let oid = self
            .repo
            .commit(None, &sig, &sig, &self.message, &tree, &parents)?;

        Ok(CommitId::new(oid))
    }
}

/// get information about a commit
pub fn get_commit(repo: &Repository, id: CommitId) -> StorageResult<CommitInfo> {
    let commit = repo
        .find_commit(id.raw())
        .map_err(|_| StorageError::CommitNotFound(id.to_string()))?;

    Ok(CommitInfo::from_git2(&commit))
}

/// get the tree snapshot at a specific commit
pub fn get_tree_at_commit(repo: &Repository, commit_id: CommitId) -> StorageResult<TreeHandle<'_>> {
    let commit = repo
        .find_commit(commit_id.raw())
        .map_err(|_| StorageError::CommitNotFound(commit_id.to_string()))?;

    let tree = commit.tree()?;
    Ok(TreeHandle::new(tree))
}

/// create the empty root commit for a new repository
pub fn create_root_commit(repo: &Repository, author: &Author) -> StorageResult<CommitId> {
    let tree_id = tree::empty_tree(repo)?;

    CommitBuilder::new(repo)
        .tree(tree_id)
        .message(CommitMessage::initialize())
        .author(author.clone())
        .commit()
}

/// check whether `commit` has `ancestor` in its history (or is it)
pub fn is_ancestor_or_self(repo: &Repository, ancestor: CommitId, commit: CommitId) -> StorageResult<bool> {
    if ancestor == commit {
        return Ok(true);
    }
    Ok(repo.graph_descendant_of(commit.raw(), ancestor.raw())?)
}

/// iterate over commit history starting from a commit
pub struct HistoryIterator<'repo> {
    repo: &'repo Repository,
    revwalk: Revwalk<'repo>,
}

impl<'repo> HistoryIterator<'repo> {
    /// create a new history iterator, most recent first
    pub fn new(repo: &'repo Repository, start: CommitId) -> StorageResult<Self> {
        let mut revwalk = repo.revwalk()?;
        revwalk.push(start.raw())?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

        Ok(Self { repo, revwalk })
    }

    /// stop at `commit` and everything reachable from it
    pub fn hide(mut self, commit: CommitId) -> StorageResult<Self> {
        self.revwalk.hide(commit.raw())?;
        Ok(self)
    }
}

impl<'repo> Iterator for HistoryIterator<'repo> {
    type Item = StorageResult<CommitInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.revwalk.next()? {
            Ok(oid) => match self.repo.find_commit(oid) {
                Ok(commit) => Some(Ok(CommitInfo::from_git2(&commit))),
                Err(e) => Some(Err(StorageError::Git(e))),
            },
            Err(e) => Some(Err(StorageError::Git(e))),
        }
    }
}

/// commits reachable from `to` but not from `from`, most recent first
pub fn history_between(repo: &Repository, from: CommitId, to: CommitId) -> StorageResult<Vec<CommitInfo>> {
    if from == to {
        return Ok(Vec::new());
    }
    HistoryIterator::new(repo, to)?.hide(from)?.collect()
}

/// message formatting for commits the database writes itself
pub struct CommitMessage;

impl CommitMessage {
    pub fn initialize() -> String {
        "[branchdb] Initialize repository".to_string()
    }

    /// fallback message for a squash merge
    pub fn merge(source: &str, target: &str) -> String {
        format!("[MERGE] {} into {}", source, target)
    }

    /// fallback message for a squash rebase
    pub fn rebase(source: &str, target: &str) -> String {
        format!("[REBASE] {} onto {}", source, target)
    }

    /// use `message` unless it is blank
    pub fn or_default(message: &str, fallback: impl FnOnce() -> String) -> String {
        if message.trim().is_empty() {
            fallback()
        } else {
            message.to_string()
        }
    }
}
