//!  Tree operations for branch contents.
//!
//! In Git, a tree is a directory. Here a branch's tree is its whole document
//! collection: every blob reachable by a slash-delimited path is a document.
//!
//! This module provides safe abstractions over Git's tree manipulation,
//! which is notoriously fiddly to get right.

use std::collections::BTreeMap;
use std::path::Path;

use git2::build::TreeUpdateBuilder;
use git2::{FileMode, ObjectType, Repository, Tree};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, DocumentKey, TreeId};

/// A read only handle to a git tree at a specific commit
///
/// think of it as a snapshot - it won't change even if new commits are made.
#[derive(Debug)]
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    /// create a TreeHandle from a git2::Tree
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    /// get the tree ID
    pub fn id(&self) -> TreeId {
        TreeId::new(self.tree.id())
    }

    /// get the underlying git2::Tree (for internal use)
    pub(crate) fn inner(&self) -> &Tree<'repo> {
        &self.tree
    }

    /// get the blob ID stored at a document key
    pub fn blob_id(&self, key: &DocumentKey) -> StorageResult<Option<BlobId>> {
        let entry = match self.tree.get_path(Path::new(key.as_str())) {
            Ok(entry) => entry,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Git(e)),
        };

        if entry.kind() != Some(ObjectType::Blob) {
            return Err(StorageError::UnexpectedEntryType {
                path: key.to_string(),
                expected: "blob (document)".to_string(),
                found: format!("{:?}", entry.kind()),
            });
        }
        Ok(Some(BlobId::new(entry.id())))
    }

    /// list the direct blob children of `prefix`
    ///
    /// Subtrees are skipped, so this never recurses. A prefix that does not
    /// exist, or that names a blob, has no children.
    pub fn list_children(
        &self,
        repo: &'repo Repository,
        prefix: &str,
    ) -> StorageResult<Vec<(String, BlobId)>> {
        let prefix = prefix.trim_matches('/');

        let subtree;
        let dir = if prefix.is_empty() {
            &self.tree
        } else {
            match self.tree.get_path(Path::new(prefix)) {
                Ok(entry) if entry.kind() == Some(ObjectType::Tree) => {
                    subtree = repo.find_tree(entry.id())?;
                    &subtree
                }
                Ok(_) => return Ok(Vec::new()),
                Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(StorageError::Git(e)),
            }
        };

        let children = dir
            .iter()
            .filter(|entry| entry.kind() == Some(ObjectType::Blob))
            .filter_map(|entry| {
                let name = entry.name()?;
                let path = if prefix.is_empty() {
                    name.to_string()
                } else {
                    format!("{}/{}", prefix, name)
                };
                Some((path, BlobId::new(entry.id())))
            })
            .collect();

        Ok(children)
    }
}

/// A pending set of changes against a baseline tree.
///
/// Later edits to the same key replace earlier ones, so the set always holds
/// the final intent per path. Nothing touches the object database until
/// [`TreeEdits::apply`] writes the new tree.
///
/// # Usage Pattern
///
/// ```ignore
/// let mut edits = TreeEdits::new();
/// edits.upsert(&key, blob_id);
/// edits.remove(&other_key);
/// let new_tree_id = edits.apply(repo, Some(&base))?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct TreeEdits {
    changes: BTreeMap<DocumentKey, Option<BlobId>>,
}

impl TreeEdits {
    pub fn new() -> Self {
        Self::default()
    }

    /// insert or replace the document at `key`
    pub fn upsert(&mut self, key: &DocumentKey, blob_id: BlobId) {
        self.changes.insert(key.clone(), Some(blob_id));
    }

    /// remove the document at `key`; a missing key is ignored when applied
    pub fn remove(&mut self, key: &DocumentKey) {
        self.changes.insert(key.clone(), None);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// the pending value for `key`: `Some(None)` means a pending removal
    pub fn get(&self, key: &DocumentKey) -> Option<Option<BlobId>> {
        self.changes.get(key).copied()
    }

    /// write the edited tree and return its ID
    ///
    /// `base` of `None` means the edits start from an empty tree.
    pub fn apply(&self, repo: &Repository, base: Option<&TreeHandle<'_>>) -> StorageResult<TreeId> {
        let empty;
        let baseline = match base {
            Some(handle) => handle.inner(),
            None => {
                empty = repo.find_tree(empty_tree(repo)?.raw())?;
                &empty
            }
        };

        let mut builder = TreeUpdateBuilder::new();
        for (key, change) in &self.changes {
            match change {
                Some(blob_id) => {
                    builder.upsert(key.as_str(), blob_id.raw(), FileMode::Blob);
                }
                // libgit2 refuses to remove a path that isn't there
                None if baseline.get_path(Path::new(key.as_str())).is_ok() => {
                    builder.remove(key.as_str());
                }
                None => {}
            }
        }

        let oid = builder.create_updated(repo, baseline)?;
        Ok(TreeId::new(oid))
    }
}

/// write the empty tree and return its ID
pub fn empty_tree(repo: &Repository) -> StorageResult<TreeId> {
    let builder = repo.treebuilder(None)?;
    Ok(TreeId::new(builder.write()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        (dir, repo)
    }

    fn key(s: &str) -> DocumentKey {
        DocumentKey::new(s).unwrap()
    }

    fn blob(repo: &Repository, content: &str) -> BlobId {
        BlobId::new(repo.blob(content.as_bytes()).unwrap())
    }

    fn handle(repo: &Repository, id: TreeId) -> TreeHandle<'_> {
        TreeHandle::new(repo.find_tree(id.raw()).unwrap())
    }

    #[test]
    fn test_upsert_nested_paths() {
        let (_dir, repo) = setup_repo();
        let mut edits = TreeEdits::new();
        edits.upsert(&key("users/1"), blob(&repo, "alice"));
        edits.upsert(&key("users/2"), blob(&repo, "bob"));
        edits.upsert(&key("top"), blob(&repo, "t"));

        let tree_id = edits.apply(&repo, None).unwrap();
        let tree = handle(&repo, tree_id);

        assert!(tree.blob_id(&key("users/1")).unwrap().is_some());
        assert!(tree.blob_id(&key("users/3")).unwrap().is_none());
        assert_eq!(tree.list_children(&repo, "users").unwrap().len(), 2);
    }

    #[test]
    fn test_blob_id_on_directory_fails() {
        let (_dir, repo) = setup_repo();
        let mut edits = TreeEdits::new();
        edits.upsert(&key("users/1"), blob(&repo, "alice"));
        let tree = handle(&repo, edits.apply(&repo, None).unwrap());

        let result = tree.blob_id(&key("users"));
        assert!(matches!(result, Err(StorageError::UnexpectedEntryType { .. })));
    }

    #[test]
    fn test_list_children_is_not_recursive() {
        let (_dir, repo) = setup_repo();
        let mut edits = TreeEdits::new();
        edits.upsert(&key("users/1"), blob(&repo, "alice"));
        edits.upsert(&key("users/2"), blob(&repo, "bob"));
        edits.upsert(&key("users/archive/3"), blob(&repo, "carol"));
        edits.upsert(&key("root"), blob(&repo, "r"));
        let tree = handle(&repo, edits.apply(&repo, None).unwrap());

        let children: Vec<String> = tree
            .list_children(&repo, "users")
            .unwrap()
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        assert_eq!(children, vec!["users/1".to_string(), "users/2".to_string()]);

        let root = tree.list_children(&repo, "").unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].0, "root");

        assert!(tree.list_children(&repo, "missing").unwrap().is_empty());
        assert!(tree.list_children(&repo, "root").unwrap().is_empty());
    }

    #[test]
    fn test_remove_and_missing_remove() {
        let (_dir, repo) = setup_repo();
        let mut edits = TreeEdits::new();
        edits.upsert(&key("a"), blob(&repo, "1"));
        edits.upsert(&key("b"), blob(&repo, "2"));
        let base_id = edits.apply(&repo, None).unwrap();
        let base = handle(&repo, base_id);

        let mut edits = TreeEdits::new();
        edits.remove(&key("a"));
        edits.remove(&key("never-existed"));
        let tree = handle(&repo, edits.apply(&repo, Some(&base)).unwrap());

        assert!(tree.blob_id(&key("a")).unwrap().is_none());
        assert!(tree.blob_id(&key("b")).unwrap().is_some());
    }

    #[test]
    fn test_later_edit_wins() {
        let (_dir, repo) = setup_repo();
        let mut edits = TreeEdits::new();
        edits.upsert(&key("a"), blob(&repo, "1"));
        edits.remove(&key("a"));
        assert_eq!(edits.len(), 1);
        assert_eq!(edits.get(&key("a")), Some(None));

        let tree_id = edits.apply(&repo, None).unwrap();
        assert_eq!(tree_id, empty_tree(&repo).unwrap());
    }

    #[test]
    fn test_unchanged_content_yields_same_tree() {
        let (_dir, repo) = setup_repo();
        let mut edits = TreeEdits::new();
        edits.upsert(&key("a"), blob(&repo, "1"));
        let first = edits.apply(&repo, None).unwrap();
        let base = handle(&repo, first);

        let mut again = TreeEdits::new();
        again.upsert(&key("a"), blob(&repo, "1"));
        let second = again.apply(&repo, Some(&base)).unwrap();

        assert_eq!(first, second);
    }
}
