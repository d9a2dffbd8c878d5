//!  Branch and tag management.
//!
//!  Git refs are pointers to commits.  This module handles:
//! - the master branch created at initialization
//! - branch lifecycle (create, move, delete, list)
//! - lightweight tags
//! - resolving a caller-supplied reference to a commit
//!
//! References resolve in a fixed order: branch name, then tag name, then a
//! raw commit id.

use git2::{BranchType, ObjectType, Oid, Repository};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BranchName, CommitId, TagName};

/// Manages Git references (branches and tags).
pub struct RefManager;

impl RefManager {
    /// Resolve a branch, treating a missing branch as `None`.
    pub fn try_resolve_branch(repo: &Repository, branch: &BranchName) -> StorageResult<Option<CommitId>> {
        let reference = match repo.find_reference(&branch.as_ref_path()) {
            Ok(reference) => reference,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Git(e)),
        };

        let commit = reference.peel_to_commit()?;
        Ok(Some(CommitId::new(commit.id())))
    }

    /// Check if a branch exists.
    pub fn branch_exists(repo: &Repository, branch: &BranchName) -> bool {
        repo.find_reference(&branch.as_ref_path()).is_ok()
    }

    /// Create a new branch pointing to the given commit.
    pub fn create_branch(repo: &Repository, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        if Self::branch_exists(repo, branch) {
            return Err(StorageError::BranchAlreadyExists(branch.to_string()));
        }

        let commit = repo
            .find_commit(target.raw())
            .map_err(|_| StorageError::CommitNotFound(target.to_string()))?;
        repo.branch(branch.as_str(), &commit, false)?;

        Ok(())
    }

    /// Point a branch at a commit, creating the branch if needed.
    pub fn update_branch(repo: &Repository, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        repo.reference(
            &branch.as_ref_path(),
            target.raw(),
            true,
            &format!("update branch to {}", target.short()),
        )?;

        Ok(())
    }

    /// Delete a branch.
    pub fn delete_branch(repo: &Repository, branch: &BranchName) -> StorageResult<()> {
        let mut git_branch = repo
            .find_branch(branch.as_str(), BranchType::Local)
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        git_branch.delete()?;

        Ok(())
    }

    /// List all local branches, sorted by name.
    pub fn list_branches(repo: &Repository) -> StorageResult<Vec<BranchName>> {
        let branches = repo.branches(Some(BranchType::Local))?;

        let mut result = Vec::new();
        for branch_result in branches {
            let (branch, _) = branch_result?;
            if let Some(name) = branch.name()? {
                if let Ok(branch_name) = BranchName::new(name) {
                    result.push(branch_name);
                }
            }
        }

        result.sort();
        Ok(result)
    }

    /// Every branch with its head commit.
    pub fn branch_heads(repo: &Repository) -> StorageResult<Vec<(BranchName, CommitId)>> {
        let mut heads = Vec::new();
        for branch in Self::list_branches(repo)? {
            if let Some(head) = Self::try_resolve_branch(repo, &branch)? {
                heads.push((branch, head));
            }
        }
        Ok(heads)
    }

    /// Create a lightweight tag pointing to the given commit.
    pub fn create_tag(repo: &Repository, tag: &TagName, target: CommitId) -> StorageResult<()> {
        if repo.find_reference(&tag.as_ref_path()).is_ok() {
            return Err(StorageError::TagAlreadyExists(tag.to_string()));
        }

        let object = repo
            .find_object(target.raw(), Some(ObjectType::Commit))
            .map_err(|_| StorageError::CommitNotFound(target.to_string()))?;
        repo.tag_lightweight(tag.as_str(), &object, false)?;

        Ok(())
    }

    /// Delete a tag.
    pub fn delete_tag(repo: &Repository, tag: &TagName) -> StorageResult<()> {
        if repo.find_reference(&tag.as_ref_path()).is_err() {
            return Err(StorageError::RefNotFound(tag.to_string()));
        }
        repo.tag_delete(tag.as_str())?;
        Ok(())
    }

    /// List all tag names, sorted.
    pub fn list_tags(repo: &Repository) -> StorageResult<Vec<TagName>> {
        let names = repo.tag_names(None)?;
        let mut tags: Vec<TagName> = names
            .iter()
            .flatten()
            .filter_map(|name| TagName::new(name).ok())
            .collect();
        tags.sort();
        Ok(tags)
    }

    /// Resolve a reference: branch name, then tag name, then raw commit id.
    ///
    /// Returns `None` when nothing matches.
    pub fn resolve_reference(repo: &Repository, reference: &str) -> StorageResult<Option<CommitId>> {
        if reference.is_empty() {
            return Ok(None);
        }

        if let Ok(branch) = BranchName::new(reference) {
            if let Some(id) = Self::try_resolve_branch(repo, &branch)? {
                return Ok(Some(id));
            }
        }

        if let Ok(tag) = TagName::new(reference) {
            if let Ok(found) = repo.find_reference(&tag.as_ref_path()) {
                let commit = found.peel_to_commit()?;
                return Ok(Some(CommitId::new(commit.id())));
            }
        }

        // only full hex ids; abbreviated ids are ambiguous
        if reference.len() == 40 {
            if let Ok(oid) = Oid::from_str(reference) {
                if let Ok(commit) = repo.find_commit(oid) {
                    return Ok(Some(CommitId::new(commit.id())));
                }
            }
        }

        Ok(None)
    }

    /// Create a local branch for every remote-tracking branch that lacks one.
    ///
    /// A fresh clone only gets a local branch for the remote's HEAD.
    pub fn track_remote_branches(repo: &Repository) -> StorageResult<usize> {
        let mut created = 0;
        for entry in repo.branches(Some(BranchType::Remote))? {
            let (remote_branch, _) = entry?;
            let Some(full_name) = remote_branch.name()? else {
                continue;
            };
            let Some((_, name)) = full_name.split_once('/') else {
                continue;
            };
            if name == "HEAD" {
                continue;
            }
            let Ok(branch) = BranchName::new(name) else {
                continue;
            };
            if Self::branch_exists(repo, &branch) {
                continue;
            }

            let commit = remote_branch.get().peel_to_commit()?;
            repo.branch(branch.as_str(), &commit, false)?;
            created += 1;
        }
        Ok(created)
    }

    /// Initialize the master branch and point HEAD at it.
    ///
    /// This should be called after creating the root commit.
    pub fn init_master_branch(repo: &Repository, root_commit: CommitId) -> StorageResult<()> {
        let master = BranchName::master();

        if !Self::branch_exists(repo, &master) {
            Self::create_branch(repo, &master, root_commit)?;
        }

        repo.set_head(&master.as_ref_path())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::commit::create_root_commit;
    use crate::storage::types::Author;
    use tempfile::TempDir;

    fn setup_repo_with_commit() -> (TempDir, Repository, CommitId) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();

        let commit_id = create_root_commit(&repo, &Author::system()).unwrap();
        RefManager::init_master_branch(&repo, commit_id).unwrap();

        (dir, repo, commit_id)
    }

    fn second_commit(repo: &Repository, parent: CommitId) -> CommitId {
        crate::storage::commit::CommitBuilder::new(repo)
            .tree(crate::storage::tree::empty_tree(repo).unwrap())
            .parent(Some(parent))
            .message("Second commit")
            .commit()
            .unwrap()
    }

    #[test]
    fn test_master_branch() {
        let (_dir, repo, expected) = setup_repo_with_commit();
        let master = RefManager::try_resolve_branch(&repo, &BranchName::master()).unwrap();
        assert_eq!(master, Some(expected));
    }

    #[test]
    fn test_branch_lifecycle() {
        let (_dir, repo, base_commit) = setup_repo_with_commit();

        let branch = BranchName::new("feature").unwrap();

        // Create
        assert!(!RefManager::branch_exists(&repo, &branch));
        RefManager::create_branch(&repo, &branch, base_commit).unwrap();
        assert!(RefManager::branch_exists(&repo, &branch));

        // Resolve
        let resolved = RefManager::try_resolve_branch(&repo, &branch).unwrap();
        assert_eq!(resolved, Some(base_commit));

        // List
        let names: Vec<_> = RefManager::list_branches(&repo)
            .unwrap()
            .into_iter()
            .map(|b| b.as_str().to_string())
            .collect();
        assert_eq!(names, vec!["feature".to_string(), "master".to_string()]);

        // Delete
        RefManager::delete_branch(&repo, &branch).unwrap();
        assert!(!RefManager::branch_exists(&repo, &branch));
        assert_eq!(RefManager::try_resolve_branch(&repo, &branch).unwrap(), None);
    }

    #[test]
    fn test_duplicate_branch_error() {
        let (_dir, repo, base_commit) = setup_repo_with_commit();
        let branch = BranchName::new("feature").unwrap();

        RefManager::create_branch(&repo, &branch, base_commit).unwrap();
        let result = RefManager::create_branch(&repo, &branch, base_commit);

        assert!(matches!(result, Err(StorageError::BranchAlreadyExists(_))));
    }

    #[test]
    fn test_update_creates_missing_branch() {
        let (_dir, repo, base_commit) = setup_repo_with_commit();
        let branch = BranchName::new("fresh").unwrap();

        RefManager::update_branch(&repo, &branch, base_commit).unwrap();
        assert_eq!(RefManager::try_resolve_branch(&repo, &branch).unwrap(), Some(base_commit));
    }

    #[test]
    fn test_tags() {
        let (_dir, repo, root) = setup_repo_with_commit();
        let tag = TagName::new("v1").unwrap();

        RefManager::create_tag(&repo, &tag, root).unwrap();
        assert!(matches!(
            RefManager::create_tag(&repo, &tag, root),
            Err(StorageError::TagAlreadyExists(_))
        ));
        assert_eq!(RefManager::list_tags(&repo).unwrap(), vec![tag.clone()]);

        RefManager::delete_tag(&repo, &tag).unwrap();
        assert!(RefManager::list_tags(&repo).unwrap().is_empty());
        assert!(matches!(
            RefManager::delete_tag(&repo, &tag),
            Err(StorageError::RefNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_reference_precedence() {
        let (_dir, repo, root) = setup_repo_with_commit();
        let second = second_commit(&repo, root);

        // a tag and a branch with the same name: the branch wins
        RefManager::create_tag(&repo, &TagName::new("release").unwrap(), root).unwrap();
        assert_eq!(RefManager::resolve_reference(&repo, "release").unwrap(), Some(root));
        RefManager::create_branch(&repo, &BranchName::new("release").unwrap(), second).unwrap();
        assert_eq!(RefManager::resolve_reference(&repo, "release").unwrap(), Some(second));

        // raw commit id
        let hex = second.to_string();
        assert_eq!(RefManager::resolve_reference(&repo, &hex).unwrap(), Some(second));

        assert_eq!(RefManager::resolve_reference(&repo, "nothing").unwrap(), None);
        assert_eq!(RefManager::resolve_reference(&repo, "").unwrap(), None);
    }
}
