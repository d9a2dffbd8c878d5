//! High-level Database API.
//!
//! [`Database`] ties the storage, transaction and replication layers
//! together behind one handle. Document operations live on
//! [`DocumentStore`], branch-to-branch operations on [`MergeCoordinator`].

mod api;
mod config;
mod documents;
mod merge;

pub use api::{Database, DatabaseError, DatabaseResult};
pub use config::DatabaseConfig;
pub use documents::{DocumentStore, Page};
pub use merge::{ConflictInfo, ConflictType, LogEntry, MergeCoordinator, MergeInfo, MergeStatus, RebaseInfo};
