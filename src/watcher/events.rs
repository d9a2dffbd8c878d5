//! Change events emitted by the watcher.

use crate::storage::{BranchName, CommitId, TreeDiff};

/// What the watcher saw change between two ticks.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A branch appeared. `diff` is relative to the base branch, or to the
    /// empty tree when the base branch does not exist.
    BranchAdded {
        branch: BranchName,
        head: CommitId,
        diff: TreeDiff,
        has_deletions: bool,
    },

    /// A branch head moved.
    BranchChanged {
        branch: BranchName,
        old_head: CommitId,
        new_head: CommitId,
        diff: TreeDiff,
    },

    /// A branch disappeared; `head` is the last head observed.
    BranchRemoved { branch: BranchName, head: CommitId },
}

impl WatchEvent {
    pub fn branch(&self) -> &BranchName {
        match self {
            WatchEvent::BranchAdded { branch, .. }
            | WatchEvent::BranchChanged { branch, .. }
            | WatchEvent::BranchRemoved { branch, .. } => branch,
        }
    }

    /// short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::BranchAdded { .. } => "added",
            WatchEvent::BranchChanged { .. } => "changed",
            WatchEvent::BranchRemoved { .. } => "removed",
        }
    }

    pub fn diff(&self) -> Option<&TreeDiff> {
        match self {
            WatchEvent::BranchAdded { diff, .. } | WatchEvent::BranchChanged { diff, .. } => Some(diff),
            WatchEvent::BranchRemoved { .. } => None,
        }
    }
}
