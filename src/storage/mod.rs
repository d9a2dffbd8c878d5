//! storage layer for branchdb
//!
//! this module provides a complete abstraction over git for document storage.
//! The upper layers (transactions, merge coordinator, watcher) use this API and
//! never touch git2 directly.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     GitRepository                           │
//! │  (documents, branches, tags, merge, diff, log)              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌──────────────┬──────┴───────┬──────────────┐
//!        ▼              ▼              ▼              ▼
//!  ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐
//!  │   tree    │  │   blob    │  │   refs    │  │merge/diff │
//!  │(documents)│  │ (values)  │  │(branches) │  │           │
//!  └───────────┘  └───────────┘  └───────────┘  └───────────┘
//!        │              │              │              │
//!        └──────────────┴──────┬───────┴──────────────┘
//!                              ▼
//!                        ┌─────────────┐
//!                        │   commit    │
//!                        │  (history)  │
//!                        └─────────────┘
//!  ```
//!
//! # Usage
//!
//! ```ignore
//! use branchdb::storage::{Author, BranchName, DocumentKey, GitRepository, TreeEdits};
//!
//! let repo = GitRepository::open_or_init("./my_database")?;
//! let master = BranchName::master();
//!
//! let head = repo.head_of(&master)?;
//! let mut edits = TreeEdits::new();
//! edits.upsert(&DocumentKey::new("users/1")?, repo.write_blob(b"alice")?);
//!
//! let tree = repo.build_tree(repo.tree_of(head)?, &edits)?;
//! let commit = repo.commit_tree(&master, tree, head, "add user", &Author::system())?;
//! ```

mod blob;
mod commit;
mod diff;
mod error;
mod merge;
mod refs;
mod repository;
mod tree;
mod types;

// Re-export public API
pub use commit::{CommitInfo, CommitMessage};
pub use diff::{Content, DiffItem, DiffKind, TreeDiff};
pub use error::{StorageError, StorageResult};
pub use merge::{MergeOutcome, PathConflict};
pub use repository::GitRepository;
pub use tree::TreeEdits;
pub use types::{
    Author, BlobId, BranchName, CommitId, Document, DocumentKey, InvalidNameError, TagName, TreeId,
};
