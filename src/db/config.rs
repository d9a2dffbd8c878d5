//! Database configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::replication::ReplicationConfig;
use crate::storage::Author;
use crate::transaction::TransactionManager;

/// Database configuration options.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the bare repository directory.
    pub path: PathBuf,
    /// Initialize the repository when the directory does not exist.
    pub create_if_missing: bool,
    /// How long an idle transaction keeps its branch.
    pub transaction_timeout: Duration,
    /// Clone from this URL instead of initializing an empty repository.
    pub clone_from: Option<String>,
    /// Where committed branches are pushed.
    pub replication: ReplicationConfig,
    /// Signs commits the database makes on its own.
    pub signature: Author,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".branchdb"),
            create_if_missing: true,
            transaction_timeout: TransactionManager::DEFAULT_TIMEOUT,
            clone_from: None,
            replication: ReplicationConfig::default(),
            signature: Author::system(),
        }
    }
}

impl DatabaseConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set create_if_missing flag.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Clone from `url` when the database does not exist yet.
    pub fn clone_from(mut self, url: impl Into<String>) -> Self {
        self.clone_from = Some(url.into());
        self
    }

    pub fn replication(mut self, replication: ReplicationConfig) -> Self {
        self.replication = replication;
        self
    }

    pub fn signature(mut self, signature: Author) -> Self {
        self.signature = signature;
        self
    }

    /// Check the settings before anything touches the disk.
    pub fn validate(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("database path must not be empty".to_string());
        }
        if self.transaction_timeout.is_zero() {
            return Err("transaction timeout must be greater than zero".to_string());
        }
        if self.replication.enabled && self.replication.remote.trim().is_empty() {
            return Err("replication is enabled but no remote is set".to_string());
        }
        if matches!(&self.clone_from, Some(url) if url.trim().is_empty()) {
            return Err("clone url must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::new("/tmp/db");
        assert_eq!(config.path, PathBuf::from("/tmp/db"));
        assert!(config.create_if_missing);
        assert_eq!(config.transaction_timeout, Duration::from_secs(60));
        assert!(config.clone_from.is_none());
        assert!(!config.replication.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = DatabaseConfig::new("db")
            .create_if_missing(false)
            .transaction_timeout(Duration::from_secs(5))
            .clone_from("https://example.com/db.git")
            .replication(ReplicationConfig::to_remote("origin"))
            .signature(Author::new("svc", "svc@example.com"));

        assert!(!config.create_if_missing);
        assert_eq!(config.transaction_timeout, Duration::from_secs(5));
        assert_eq!(config.clone_from.as_deref(), Some("https://example.com/db.git"));
        assert!(config.replication.enabled);
        assert_eq!(config.signature.name, "svc");
    }

    #[test]
    fn test_validate() {
        assert!(DatabaseConfig::new("").validate().is_err());
        assert!(DatabaseConfig::new("db")
            .transaction_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(DatabaseConfig::new("db")
            .replication(ReplicationConfig::to_remote(" "))
            .validate()
            .is_err());
        assert!(DatabaseConfig::new("db").clone_from("").validate().is_err());
    }
}
