//! Best-effort replication of branches to a remote.
//!
//! Every successful write hands its branch to the [`Replicator`], which queues
//! a push for a background worker thread. The caller never waits for the push
//! and never sees its outcome: failures are logged and dropped. There is no
//! retry and no ordering guarantee across branches.
//!
//! # Architecture
//!
//! ```text
//!  writers ──replicate(branch)──► channel ──► worker thread ──push──► remote
//!                                             (own git handle)
//! ```

mod worker;

use std::path::{Path, PathBuf};
use std::thread;

use crossbeam::channel::{self, Sender};
use thiserror::Error;
use tracing::{debug, warn};

use crate::storage::{BranchName, StorageError, StorageResult};

pub use worker::push_branch;

/// Errors from a single push attempt.
///
/// These never leave the worker thread; they exist so the worker can log
/// something precise.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("push of {branch} rejected: {message}")]
    Rejected { branch: String, message: String },
}

/// Replication settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationConfig {
    /// remote name, or a URL used as an anonymous remote
    pub remote: String,
    pub enabled: bool,
}

impl ReplicationConfig {
    pub const DEFAULT_REMOTE: &'static str = "origin";

    /// replication turned on, pushing to `remote`
    pub fn to_remote(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            remote: Self::DEFAULT_REMOTE.to_string(),
            enabled: false,
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// a queued push
#[derive(Debug)]
pub(crate) struct ReplicationJob {
    pub(crate) branch: BranchName,
}

/// Fire-and-forget handle to the replication worker.
///
/// Cheap to clone. The worker drains whatever is queued and exits once the
/// last handle is dropped, so in-flight pushes are never cancelled.
#[derive(Clone, Debug)]
pub struct Replicator {
    sender: Option<Sender<ReplicationJob>>,
}

impl Replicator {
    /// a replicator that drops every request
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// start a worker pushing from the repository at `path`
    pub fn spawn(path: impl AsRef<Path>, config: &ReplicationConfig) -> StorageResult<Self> {
        if !config.enabled {
            return Ok(Self::disabled());
        }

        let (sender, receiver) = channel::unbounded::<ReplicationJob>();
        let path: PathBuf = path.as_ref().to_path_buf();
        let remote = config.remote.clone();

        thread::Builder::new()
            .name("branchdb-replication".to_string())
            .spawn(move || worker::run_replication_loop(&path, &remote, receiver))
            .map_err(StorageError::Io)?;

        debug!(remote = %config.remote, "replication worker started");
        Ok(Self {
            sender: Some(sender),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// queue a push of `branch`; never blocks, never fails
    pub fn replicate(&self, branch: &BranchName) {
        let Some(sender) = &self.sender else {
            return;
        };
        let job = ReplicationJob {
            branch: branch.clone(),
        };
        if sender.send(job).is_err() {
            warn!(branch = %branch, "replication worker is gone, dropping push");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_replicator_ignores_requests() {
        let replicator = Replicator::disabled();
        assert!(!replicator.is_enabled());
        replicator.replicate(&BranchName::master());
    }

    #[test]
    fn test_spawn_respects_enabled_flag() {
        let dir = tempfile::TempDir::new().unwrap();
        let replicator = Replicator::spawn(dir.path(), &ReplicationConfig::disabled()).unwrap();
        assert!(!replicator.is_enabled());
    }

    #[test]
    fn test_config_defaults() {
        let config = ReplicationConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.remote, "origin");
        assert!(ReplicationConfig::to_remote("backup").enabled);
    }
}
