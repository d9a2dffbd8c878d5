//! branchdb - A Git-backed Document Database
//!
//! Every branch is an independent key/value collection stored as a git
//! tree. Keys are slash-delimited paths, every write is a commit, and
//! branches can be squash-merged or rebased into each other.
//!
//! # Example
//!
//! ```no_run
//! use branchdb::db::Database;
//! use branchdb::storage::{Author, Document};
//!
//! let db = Database::open("./my_database").unwrap();
//! let author = Author::new("alice", "alice@example.com");
//!
//! db.documents().save("master", "add user", "users/1", Some("alice"), &author).unwrap();
//! db.documents().create_branch("feature", "master").unwrap();
//!
//! let token = db.begin_transaction("feature").unwrap();
//! db.add_many(&token, &[Document::new("users/2", "bob"), Document::new("users/3", "carol")]).unwrap();
//! db.commit(&token, "add users", &author).unwrap();
//!
//! let merged = db.merges().merge_branch("feature", "master", &author, "").unwrap();
//! assert!(merged.is_success());
//! ```

pub mod db;
pub mod replication;
pub mod storage;
pub mod transaction;
pub mod watcher;

pub use db::{Database, DatabaseConfig, DatabaseError, DatabaseResult};
pub use storage::{Author, BranchName, CommitId, Document};
