//! Structural tree diffs.
//!
//! A diff is flattened into one item per changed document. Item content is
//! not read up front: each side carries a [`Content`] accessor that loads the
//! blob only when asked, so diffing large branches stays cheap for callers
//! that only need paths.

use std::fmt;

use git2::{Delta, DiffFindOptions, DiffOptions, Repository};

use crate::storage::error::StorageResult;
use crate::storage::repository::GitRepository;
use crate::storage::types::{BlobId, TreeId};

/// what happened to a document between two trees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// lazily loaded blob content
#[derive(Clone)]
pub struct Content {
    repo: GitRepository,
    id: BlobId,
}

impl Content {
    pub(crate) fn new(repo: GitRepository, id: BlobId) -> Self {
        Self { repo, id }
    }

    pub fn id(&self) -> BlobId {
        self.id
    }

    /// read the raw bytes
    pub fn read(&self) -> StorageResult<Vec<u8>> {
        self.repo.read_blob(self.id)
    }

    /// read the content as UTF-8 text
    pub fn read_string(&self) -> StorageResult<String> {
        self.repo.read_blob_string(self.id)
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content").field("id", &self.id).finish()
    }
}

/// a single changed document
#[derive(Debug, Clone)]
pub struct DiffItem {
    pub kind: DiffKind,
    /// path on the new side (the old path for deletions)
    pub path: String,
    /// previous path, set for renames only
    pub old_path: Option<String>,
    /// new content; absent for deletions
    pub value: Option<Content>,
    /// previous content; absent for additions
    pub old_value: Option<Content>,
}

/// changes between two trees, grouped by kind
#[derive(Debug, Clone, Default)]
pub struct TreeDiff {
    pub added: Vec<DiffItem>,
    pub modified: Vec<DiffItem>,
    pub deleted: Vec<DiffItem>,
    pub renamed: Vec<DiffItem>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len() + self.renamed.len()
    }

    pub fn has_deletions(&self) -> bool {
        !self.deleted.is_empty()
    }

    /// all items: added, modified, renamed, then deleted
    pub fn iter(&self) -> impl Iterator<Item = &DiffItem> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .chain(self.renamed.iter())
            .chain(self.deleted.iter())
    }

    fn push(&mut self, item: DiffItem) {
        match item.kind {
            DiffKind::Added => self.added.push(item),
            DiffKind::Modified => self.modified.push(item),
            DiffKind::Deleted => self.deleted.push(item),
            DiffKind::Renamed => self.renamed.push(item),
        }
    }
}

/// diff two trees; `None` on either side is the empty tree
///
/// `owner` is the handle the returned content accessors read through.
pub(crate) fn diff_trees(
    owner: &GitRepository,
    repo: &Repository,
    old: Option<TreeId>,
    new: Option<TreeId>,
) -> StorageResult<TreeDiff> {
    let old_tree = old.map(|id| repo.find_tree(id.raw())).transpose()?;
    let new_tree = new.map(|id| repo.find_tree(id.raw())).transpose()?;

    let mut opts = DiffOptions::new();
    let mut diff = repo.diff_tree_to_tree(old_tree.as_ref(), new_tree.as_ref(), Some(&mut opts))?;

    let mut find = DiffFindOptions::new();
    find.renames(true);
    diff.find_similar(Some(&mut find))?;

    let mut result = TreeDiff::default();
    for delta in diff.deltas() {
        let old_path = delta.old_file().path().map(|p| p.to_string_lossy().into_owned());
        let new_path = delta.new_file().path().map(|p| p.to_string_lossy().into_owned());
        let old_value = BlobId::from_delta(delta.old_file().id()).map(|id| Content::new(owner.clone(), id));
        let new_value = BlobId::from_delta(delta.new_file().id()).map(|id| Content::new(owner.clone(), id));

        let item = match delta.status() {
            Delta::Added | Delta::Copied => DiffItem {
                kind: DiffKind::Added,
                path: new_path.unwrap_or_default(),
                old_path: None,
                value: new_value,
                old_value: None,
            },
            Delta::Deleted => DiffItem {
                kind: DiffKind::Deleted,
                path: old_path.unwrap_or_default(),
                old_path: None,
                value: None,
                old_value,
            },
            Delta::Renamed => DiffItem {
                kind: DiffKind::Renamed,
                path: new_path.unwrap_or_default(),
                old_path,
                value: new_value,
                old_value,
            },
            Delta::Modified | Delta::Typechange => DiffItem {
                kind: DiffKind::Modified,
                path: new_path.or(old_path).unwrap_or_default(),
                old_path: None,
                value: new_value,
                old_value,
            },
            _ => continue,
        };
        result.push(item);
    }

    Ok(result)
}
