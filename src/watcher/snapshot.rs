//! Point-in-time views of every branch head.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::storage::{CommitId, GitRepository, StorageResult};

/// Branch name to head commit, captured at one instant.
///
/// Snapshots serialize to JSON so a watcher can resume from the last state it
/// observed instead of from the live repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSnapshot {
    heads: BTreeMap<String, CommitId>,
}

impl BranchSnapshot {
    /// read every branch head from the repository
    pub fn capture(repo: &GitRepository) -> StorageResult<Self> {
        let heads = repo
            .branch_heads()?
            .into_iter()
            .map(|(branch, head)| (branch.as_str().to_string(), head))
            .collect();
        Ok(Self { heads })
    }

    pub fn from_heads(heads: impl IntoIterator<Item = (String, CommitId)>) -> Self {
        Self {
            heads: heads.into_iter().collect(),
        }
    }

    pub fn get(&self, branch: &str) -> Option<CommitId> {
        self.heads.get(branch).copied()
    }

    pub fn contains(&self, branch: &str) -> bool {
        self.heads.contains_key(branch)
    }

    pub fn len(&self) -> usize {
        self.heads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// branches in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, CommitId)> {
        self.heads.iter().map(|(name, head)| (name.as_str(), *head))
    }

    pub fn to_json(&self) -> StorageResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> StorageResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BranchName;
    use tempfile::TempDir;

    #[test]
    fn test_capture() {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path().join("db")).unwrap();
        let master = repo.head_of(&BranchName::master()).unwrap().unwrap();
        repo.create_branch(&BranchName::new("feature").unwrap(), master).unwrap();

        let snapshot = BranchSnapshot::capture(&repo).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("master"), Some(master));
        assert_eq!(snapshot.get("feature"), Some(master));
        assert!(!snapshot.contains("missing"));

        let names: Vec<_> = snapshot.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["feature", "master"]);
    }

    #[test]
    fn test_json_persistence() {
        let id = CommitId::from_hex("4b825dc642cb6eb9a060e54bf8d69288fbee4904").unwrap();
        let snapshot = BranchSnapshot::from_heads([("master".to_string(), id)]);

        let json = snapshot.to_json().unwrap();
        assert!(json.contains("4b825dc642cb6eb9a060e54bf8d69288fbee4904"));
        assert_eq!(BranchSnapshot::from_json(&json).unwrap(), snapshot);

        assert!(BranchSnapshot::from_json("not json").is_err());
    }
}
