//! Three-way tree merges.
//!
//! The merge base is found automatically. A merge either yields a clean tree
//! or the list of paths both sides changed incompatibly; nothing is written
//! to any ref here.

use git2::Repository;

use crate::storage::error::StorageResult;
use crate::storage::types::{BlobId, CommitId, TreeId};

/// one conflicting path and the blob each side holds there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConflict {
    pub path: String,
    pub ancestor: Option<BlobId>,
    pub ours: Option<BlobId>,
    pub theirs: Option<BlobId>,
}

impl PathConflict {
    /// one side removed the path while the other changed it
    pub fn is_removal(&self) -> bool {
        self.ours.is_none() || self.theirs.is_none()
    }
}

/// result of merging two commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Clean(TreeId),
    Conflicted(Vec<PathConflict>),
}

/// merge `theirs` into `ours`
pub fn merge_commits(repo: &Repository, ours: CommitId, theirs: CommitId) -> StorageResult<MergeOutcome> {
    let our_commit = repo.find_commit(ours.raw())?;
    let their_commit = repo.find_commit(theirs.raw())?;

    let mut index = repo.merge_commits(&our_commit, &their_commit, None)?;

    if index.has_conflicts() {
        let mut conflicts = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let path = [&conflict.our, &conflict.their, &conflict.ancestor]
                .into_iter()
                .flatten()
                .next()
                .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
                .unwrap_or_default();

            conflicts.push(PathConflict {
                path,
                ancestor: conflict.ancestor.as_ref().map(|e| BlobId::new(e.id)),
                ours: conflict.our.as_ref().map(|e| BlobId::new(e.id)),
                theirs: conflict.their.as_ref().map(|e| BlobId::new(e.id)),
            });
        }
        conflicts.sort_by(|a, b| a.path.cmp(&b.path));
        return Ok(MergeOutcome::Conflicted(conflicts));
    }

    let tree = index.write_tree_to(repo)?;
    Ok(MergeOutcome::Clean(TreeId::new(tree)))
}
