//! Squash merge, squash rebase, diff and log between branches.
//!
//! Both merge and rebase collapse the source's changes into one commit with
//! a single parent. Conflicts are reported as data; nothing is written when
//! a merge conflicts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::api::{DatabaseError, DatabaseResult};
use crate::storage::{
    Author, BlobId, BranchName, CommitId, CommitInfo, CommitMessage, GitRepository, MergeOutcome,
    PathConflict, StorageError, TreeDiff,
};
use crate::transaction::TransactionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MergeStatus {
    Succeeded,
    Conflicts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConflictType {
    /// both sides changed the document
    Change,
    /// one side removed the document the other changed
    Remove,
}

/// One path the merge could not reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictInfo {
    pub conflict_type: ConflictType,
    pub path: String,
    /// content on the source branch; `None` if the source removed it
    pub source_id: Option<BlobId>,
    /// content on the target branch; `None` if the target removed it
    pub target_id: Option<BlobId>,
}

impl From<PathConflict> for ConflictInfo {
    // merges run with the target as "ours" and the source as "theirs"
    fn from(conflict: PathConflict) -> Self {
        let conflict_type = if conflict.is_removal() {
            ConflictType::Remove
        } else {
            ConflictType::Change
        };
        Self {
            conflict_type,
            path: conflict.path,
            source_id: conflict.theirs,
            target_id: conflict.ours,
        }
    }
}

/// Result of a merge or rebase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeInfo {
    pub message: String,
    pub source_branch: String,
    pub target_branch: String,
    /// the commit now at the updated branch; `None` when nothing changed
    pub commit: Option<CommitId>,
    pub status: MergeStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictInfo>,
}

impl MergeInfo {
    fn new(message: String, source: &BranchName, target: &BranchName) -> Self {
        Self {
            message,
            source_branch: source.to_string(),
            target_branch: target.to_string(),
            commit: None,
            status: MergeStatus::Succeeded,
            conflicts: Vec::new(),
        }
    }

    fn succeeded(mut self, commit: Option<CommitId>) -> Self {
        self.commit = commit;
        self
    }

    fn conflicted(mut self, conflicts: Vec<PathConflict>) -> Self {
        self.status = MergeStatus::Conflicts;
        self.conflicts = conflicts.into_iter().map(ConflictInfo::from).collect();
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == MergeStatus::Succeeded
    }
}

/// rebases report the same shape as merges
pub type RebaseInfo = MergeInfo;

/// A commit as shown by [`MergeCoordinator::log`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub id: CommitId,
    pub author: Author,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl From<CommitInfo> for LogEntry {
    fn from(info: CommitInfo) -> Self {
        Self {
            id: info.id,
            author: info.author(),
            timestamp: info.timestamp,
            message: info.message,
        }
    }
}

/// Coordinates merges and history queries between branches.
#[derive(Debug, Clone)]
pub struct MergeCoordinator {
    manager: TransactionManager,
}

impl MergeCoordinator {
    pub(crate) fn new(manager: TransactionManager) -> Self {
        Self { manager }
    }

    fn repo(&self) -> &GitRepository {
        self.manager.repo()
    }

    /// Squash the changes of `source` into `target`.
    ///
    /// On a clean merge that changes `target`, one commit parented on the
    /// previous target head is created and `source` is deleted.
    pub fn merge_branch(
        &self,
        source: &str,
        target: &str,
        author: &Author,
        message: &str,
    ) -> DatabaseResult<MergeInfo> {
        let (source, target) = self.branch_pair(source, target)?;

        let message = CommitMessage::or_default(message, || {
            CommitMessage::merge(source.as_str(), target.as_str())
        });
        let info = MergeInfo::new(message, &source, &target);

        // the source is deleted below, so it is locked as well
        let [first, second] = self.manager.locks().lock_pair(&source, &target);
        let first_guard = first.lock();
        let second_guard = second.lock();
        self.manager.ensure_no_transaction(&target)?;

        let source_head = self.head(&source)?;
        let target_head = self.head(&target)?;

        let tree = match self.repo().merge(target_head, source_head)? {
            MergeOutcome::Clean(tree) => tree,
            MergeOutcome::Conflicted(conflicts) => {
                warn!(source = %source, target = %target, conflicts = conflicts.len(), "merge has conflicts");
                return Ok(info.conflicted(conflicts));
            }
        };

        let commit = self
            .repo()
            .commit_tree(&target, tree, Some(target_head), &info.message, author)?;

        let Some(commit) = commit else {
            info!(source = %source, target = %target, "merge changes nothing");
            return Ok(info.succeeded(None));
        };

        self.repo().delete_branch(&source)?;
        drop(second_guard);
        drop(first_guard);

        self.manager.locks().remove(&source);
        self.manager.replicator().replicate(&target);

        info!(source = %source, target = %target, commit = %commit, "branch merged");
        Ok(info.succeeded(Some(commit)))
    }

    /// Replay the changes of `source` on top of `target` as one commit and
    /// move `source` there. `target` is left untouched.
    pub fn rebase_branch(
        &self,
        source: &str,
        target: &str,
        author: &Author,
        message: &str,
    ) -> DatabaseResult<RebaseInfo> {
        let (source, target) = self.branch_pair(source, target)?;

        let message = CommitMessage::or_default(message, || {
            CommitMessage::rebase(source.as_str(), target.as_str())
        });
        let info = RebaseInfo::new(message, &source, &target);

        let lock = self.manager.locks().lock_for(&source);
        let guard = lock.lock();
        self.manager.ensure_no_transaction(&source)?;

        let source_head = self.head(&source)?;
        let target_head = self.head(&target)?;

        let tree = match self.repo().merge(target_head, source_head)? {
            MergeOutcome::Clean(tree) => tree,
            MergeOutcome::Conflicted(conflicts) => {
                warn!(source = %source, target = %target, conflicts = conflicts.len(), "rebase has conflicts");
                return Ok(info.conflicted(conflicts));
            }
        };

        let source_tree = self.repo().tree_of(Some(source_head))?;
        if source_tree == Some(tree) && self.repo().is_ancestor_or_self(target_head, source_head)? {
            info!(source = %source, target = %target, "already based on target");
            return Ok(info.succeeded(None));
        }

        let target_tree = self.repo().tree_of(Some(target_head))?;
        let commit = if target_tree == Some(tree) {
            // nothing of the source's own survives: it becomes the target tip
            self.repo().update_branch(&source, target_head)?;
            target_head
        } else {
            self.repo()
                .commit_tree(&source, tree, Some(target_head), &info.message, author)?
                .ok_or_else(|| StorageError::Internal("rebase produced no commit".to_string()))?
        };
        drop(guard);

        self.manager.replicator().replicate(&source);

        info!(source = %source, target = %target, commit = %commit, "branch rebased");
        Ok(info.succeeded(Some(commit)))
    }

    /// Structural difference from `ref1` to `ref2`.
    pub fn diff(&self, ref1: &str, ref2: &str) -> DatabaseResult<TreeDiff> {
        let (from, to) = self.resolve_pair(ref1, ref2)?;
        Ok(self.repo().diff(from, to)?)
    }

    /// Commits reachable from `ref2` but not from `ref1`, newest first.
    pub fn log(&self, ref1: &str, ref2: &str) -> DatabaseResult<Vec<LogEntry>> {
        let (from, to) = self.resolve_pair(ref1, ref2)?;
        Ok(self
            .repo()
            .log(from, to)?
            .into_iter()
            .map(LogEntry::from)
            .collect())
    }

    // ==================== Helpers ====================

    fn branch_pair(&self, source: &str, target: &str) -> DatabaseResult<(BranchName, BranchName)> {
        let source = BranchName::new(source)?;
        let target = BranchName::new(target)?;
        if source == target {
            return Err(DatabaseError::Validation(format!(
                "cannot merge branch '{}' with itself",
                source
            )));
        }
        Ok((source, target))
    }

    fn head(&self, branch: &BranchName) -> DatabaseResult<CommitId> {
        self.repo()
            .head_of(branch)?
            .ok_or_else(|| DatabaseError::Validation(format!("branch '{}' does not exist", branch)))
    }

    fn resolve_pair(&self, ref1: &str, ref2: &str) -> DatabaseResult<(CommitId, CommitId)> {
        let first = self.repo().resolve_reference(ref1)?;
        let second = self.repo().resolve_reference(ref2)?;

        match (first, second) {
            (Some(a), Some(b)) => Ok((a, b)),
            (a, b) => {
                let unresolved: Vec<&str> = [(ref1, a), (ref2, b)]
                    .into_iter()
                    .filter(|(_, id)| id.is_none())
                    .map(|(name, _)| name)
                    .collect();
                Err(DatabaseError::Validation(format!(
                    "cannot resolve reference(s): {}",
                    unresolved.join(", ")
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::documents::DocumentStore;
    use crate::replication::Replicator;
    use crate::storage::DiffKind;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        docs: DocumentStore,
        merges: MergeCoordinator,
        manager: TransactionManager,
    }

    fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path().join("db")).unwrap();
        let manager = TransactionManager::new(repo, TransactionManager::DEFAULT_TIMEOUT, Replicator::disabled());
        Fixture {
            _dir: dir,
            docs: DocumentStore::new(manager.clone()),
            merges: MergeCoordinator::new(manager.clone()),
            manager,
        }
    }

    fn save(f: &Fixture, branch: &str, key: &str, value: &str) -> CommitId {
        f.docs
            .save(branch, "save", key, Some(value), &Author::system())
            .unwrap()
            .unwrap()
    }

    fn head(f: &Fixture, branch: &str) -> Option<CommitId> {
        f.manager.repo().head_of(&BranchName::new(branch).unwrap()).unwrap()
    }

    #[test]
    fn test_merge_squashes_and_deletes_source() {
        let f = setup();
        save(&f, "master", "base", "0");
        f.docs.create_branch("feature", "master").unwrap();
        save(&f, "feature", "a", "1");
        save(&f, "feature", "b", "2");
        let before = head(&f, "master").unwrap();

        let info = f.merges.merge_branch("feature", "master", &Author::system(), "").unwrap();
        assert!(info.is_success());
        assert_eq!(info.message, "[MERGE] feature into master");

        let commit = info.commit.unwrap();
        let created = f.manager.repo().get_commit(commit).unwrap();
        assert_eq!(created.parent_ids, vec![before]);
        assert_eq!(head(&f, "master"), Some(commit));

        assert_eq!(f.docs.get("master", "a").unwrap().as_deref(), Some("1"));
        assert_eq!(f.docs.get("master", "b").unwrap().as_deref(), Some("2"));
        assert_eq!(head(&f, "feature"), None);
    }

    #[test]
    fn test_merge_without_changes_keeps_source() {
        let f = setup();
        f.docs.create_branch("feature", "master").unwrap();

        let info = f.merges.merge_branch("feature", "master", &Author::system(), "noop").unwrap();
        assert_eq!(info.status, MergeStatus::Succeeded);
        assert_eq!(info.commit, None);
        assert!(head(&f, "feature").is_some());
    }

    #[test]
    fn test_merge_conflicts_touch_nothing() {
        let f = setup();
        save(&f, "master", "doc", "base");
        save(&f, "master", "gone", "x");
        f.docs.create_branch("feature", "master").unwrap();

        save(&f, "master", "doc", "master");
        f.docs.delete("master", "gone", "rm", &Author::system()).unwrap();
        save(&f, "feature", "doc", "feature");
        save(&f, "feature", "gone", "changed");
        let master_before = head(&f, "master");
        let feature_before = head(&f, "feature");

        let info = f.merges.merge_branch("feature", "master", &Author::system(), "m").unwrap();
        assert_eq!(info.status, MergeStatus::Conflicts);
        assert_eq!(info.commit, None);

        let summary: Vec<_> = info.conflicts.iter().map(|c| (c.path.as_str(), c.conflict_type)).collect();
        assert_eq!(summary, vec![("doc", ConflictType::Change), ("gone", ConflictType::Remove)]);

        let gone = &info.conflicts[1];
        assert!(gone.source_id.is_some());
        assert!(gone.target_id.is_none());

        assert_eq!(head(&f, "master"), master_before);
        assert_eq!(head(&f, "feature"), feature_before);
    }

    #[test]
    fn test_merge_rejected_while_target_transaction_open() {
        let f = setup();
        f.docs.create_branch("feature", "master").unwrap();
        let _tx = f.manager.begin(&BranchName::master()).unwrap();

        let err = f.merges.merge_branch("feature", "master", &Author::system(), "m").unwrap_err();
        assert!(err.is_concurrency());
    }

    #[test]
    fn test_merge_waits_for_source_writer() {
        let f = setup();
        f.docs.create_branch("feature", "master").unwrap();
        save(&f, "feature", "a", "1");

        let lock = f.manager.locks().lock_for(&BranchName::new("feature").unwrap());
        let guard = lock.lock();

        let merges = f.merges.clone();
        let handle = thread::spawn(move || merges.merge_branch("feature", "master", &Author::system(), "m"));
        thread::sleep(Duration::from_millis(50));
        assert!(head(&f, "feature").is_some());
        assert_eq!(f.docs.get("master", "a").unwrap(), None);

        drop(guard);
        let info = handle.join().unwrap().unwrap();
        assert!(info.is_success());
        assert_eq!(head(&f, "feature"), None);
        assert_eq!(f.docs.get("master", "a").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_merge_missing_branch_or_self() {
        let f = setup();
        assert!(f.merges.merge_branch("nope", "master", &Author::system(), "m").unwrap_err().is_validation());
        assert!(f.merges.merge_branch("master", "master", &Author::system(), "m").unwrap_err().is_validation());
    }

    #[test]
    fn test_rebase_moves_source_onto_target() {
        let f = setup();
        f.docs.create_branch("feature", "master").unwrap();
        save(&f, "feature", "f", "1");
        let target = save(&f, "master", "m", "1");

        let info = f.merges.rebase_branch("feature", "master", &Author::system(), "").unwrap();
        assert!(info.is_success());
        assert_eq!(info.message, "[REBASE] feature onto master");

        let commit = info.commit.unwrap();
        assert_eq!(f.manager.repo().get_commit(commit).unwrap().parent_ids, vec![target]);
        assert_eq!(head(&f, "feature"), Some(commit));
        assert_eq!(head(&f, "master"), Some(target));

        assert_eq!(f.docs.get("feature", "f").unwrap().as_deref(), Some("1"));
        assert_eq!(f.docs.get("feature", "m").unwrap().as_deref(), Some("1"));
        assert_eq!(f.docs.get("master", "f").unwrap(), None);

        // a second rebase has nothing to do
        let again = f.merges.rebase_branch("feature", "master", &Author::system(), "").unwrap();
        assert_eq!(again.commit, None);
        assert_eq!(head(&f, "feature"), Some(commit));
    }

    #[test]
    fn test_rebase_fast_forwards_when_source_adds_nothing() {
        let f = setup();
        f.docs.create_branch("feature", "master").unwrap();
        let target = save(&f, "master", "m", "1");

        let info = f.merges.rebase_branch("feature", "master", &Author::system(), "").unwrap();
        assert_eq!(info.commit, Some(target));
        assert_eq!(head(&f, "feature"), Some(target));
    }

    #[test]
    fn test_rebase_conflict() {
        let f = setup();
        save(&f, "master", "doc", "base");
        f.docs.create_branch("feature", "master").unwrap();
        save(&f, "master", "doc", "master");
        let feature = save(&f, "feature", "doc", "feature");

        let info = f.merges.rebase_branch("feature", "master", &Author::system(), "").unwrap();
        assert_eq!(info.status, MergeStatus::Conflicts);
        assert_eq!(info.conflicts.len(), 1);
        assert_eq!(head(&f, "feature"), Some(feature));
    }

    #[test]
    fn test_rebase_rejected_while_source_transaction_open() {
        let f = setup();
        f.docs.create_branch("feature", "master").unwrap();
        let _tx = f.manager.begin(&BranchName::new("feature").unwrap()).unwrap();

        let err = f.merges.rebase_branch("feature", "master", &Author::system(), "").unwrap_err();
        assert!(err.is_concurrency());
    }

    #[test]
    fn test_diff_and_log() {
        let f = setup();
        let c1 = save(&f, "master", "a", "1");
        let c2 = save(&f, "master", "b", "2");
        f.docs.tag("v1", &c1.to_string()).unwrap();

        let diff = f.merges.diff("v1", "master").unwrap();
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].kind, DiffKind::Added);
        assert_eq!(diff.added[0].path, "b");
        assert_eq!(diff.added[0].value.as_ref().unwrap().read_string().unwrap(), "2");

        let log = f.merges.log("v1", "master").unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].id, c2);
        assert_eq!(log[0].message, "save");
        assert_eq!(log[0].author, Author::system());

        assert!(f.merges.log("master", "master").unwrap().is_empty());
    }

    #[test]
    fn test_unresolved_references_are_named() {
        let f = setup();
        let err = f.merges.diff("missing-one", "missing-two").unwrap_err();
        assert!(err.is_validation());
        let text = err.to_string();
        assert!(text.contains("missing-one") && text.contains("missing-two"));

        let err = f.merges.log("master", "nope").unwrap_err();
        assert!(err.to_string().contains("nope"));
        assert!(!err.to_string().contains("master"));
    }

    #[test]
    fn test_log_entry_serializes() {
        let f = setup();
        save(&f, "master", "a", "1");
        let log = f.merges.log(&head(&f, "master").unwrap().to_string(), "master").unwrap();
        assert!(log.is_empty());

        let root = f.docs.resolve_commit("master").unwrap().first_parent().unwrap();
        let log = f.merges.log(&root.to_string(), "master").unwrap();
        let json = serde_json::to_value(&log[0]).unwrap();
        assert_eq!(json["author"]["name"], "branchdb");
        assert_eq!(json["id"].as_str().unwrap().len(), 40);
    }
}
