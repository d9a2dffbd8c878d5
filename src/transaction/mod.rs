//! Transaction management for branchdb.
//!
//! Every write to a branch, direct or transactional, goes through the
//! [`TransactionManager`]. It owns three pieces of shared state:
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! │     (commit funnel, replication hand-off, introspection)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ Transaction │       │    Slot     │       │   Branch    │
//!  │  (handle)   │       │  Registry   │       │   Locks     │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use branchdb::storage::{Author, BranchName, Document};
//!
//! let mut tx = manager.begin(&BranchName::master())?;
//! tx.add_many(&[Document::new("users/1", "alice"), Document::new("users/2", "bob")])?;
//! tx.delete("users/0")?;
//! let commit = tx.commit("import users", &Author::system())?;
//! ```

mod context;
mod error;
mod locks;
mod manager;
mod slots;

pub use context::{Transaction, TransactionState};
pub use error::{TransactionError, TransactionResult};
pub use locks::BranchLocks;
pub use manager::TransactionManager;
