//! Database API - high-level interface for branchdb.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};
use ulid::Ulid;

use crate::db::config::DatabaseConfig;
use crate::db::documents::DocumentStore;
use crate::db::merge::MergeCoordinator;
use crate::replication::Replicator;
use crate::storage::{
    Author, BranchName, CommitId, Document, GitRepository, InvalidNameError, StorageError,
};
use crate::transaction::{Transaction, TransactionError, TransactionManager, TransactionState};
use crate::watcher::{BranchSnapshot, Watcher, WatcherConfig};

/// Result type for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("transaction does not exist or has timed out: {0}")]
    TokenNotFound(String),

    #[error("database not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<InvalidNameError> for DatabaseError {
    fn from(err: InvalidNameError) -> Self {
        DatabaseError::Validation(err.to_string())
    }
}

impl DatabaseError {
    /// Bad input from the caller: empty keys, bad names, unresolved refs.
    pub fn is_validation(&self) -> bool {
        match self {
            DatabaseError::Validation(_) => true,
            DatabaseError::Transaction(e) => e.is_validation(),
            DatabaseError::Storage(e) => e.is_invalid_input(),
            _ => false,
        }
    }

    /// Another transaction holds the branch.
    pub fn is_concurrency(&self) -> bool {
        matches!(self, DatabaseError::Transaction(e) if e.is_concurrency())
    }

    /// The transaction was superseded after its slot lapsed.
    pub fn is_expired(&self) -> bool {
        matches!(self, DatabaseError::Transaction(e) if e.is_expired())
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            DatabaseError::NotFound(_) | DatabaseError::TokenNotFound(_) => true,
            DatabaseError::Storage(e) => e.is_not_found(),
            DatabaseError::Transaction(TransactionError::Storage(e)) => e.is_not_found(),
            _ => false,
        }
    }
}

type SharedTransaction = Arc<Mutex<Transaction>>;

/// The main database handle.
///
/// One handle serves any number of threads. Transactions opened through
/// [`Database::begin_transaction`] are addressed by token and owned by this
/// instance.
pub struct Database {
    config: DatabaseConfig,
    manager: TransactionManager,
    documents: DocumentStore,
    merges: MergeCoordinator,
    transactions: Mutex<HashMap<String, SharedTransaction>>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        Self::open_with_config(DatabaseConfig::new(path.as_ref()))
    }

    /// Open or create a database with custom configuration.
    ///
    /// A missing directory is cloned from `clone_from` when set, otherwise
    /// initialized with an empty root commit on `master`.
    pub fn open_with_config(config: DatabaseConfig) -> DatabaseResult<Self> {
        config.validate().map_err(DatabaseError::InvalidConfig)?;

        let repo = if config.path.exists() {
            GitRepository::open(&config.path)?
        } else if let Some(url) = &config.clone_from {
            GitRepository::clone_bare(url, &config.path)?
        } else if config.create_if_missing {
            GitRepository::init_with_author(&config.path, &config.signature)?
        } else {
            return Err(DatabaseError::NotFound(config.path.clone()));
        };

        let replicator = Replicator::spawn(&config.path, &config.replication)?;
        let manager = TransactionManager::new(repo, config.transaction_timeout, replicator);

        for branch in manager.repo().list_branches()? {
            manager.locks().provision(&branch);
        }

        info!(path = %config.path.display(), "database opened");
        Ok(Self {
            documents: DocumentStore::new(manager.clone()),
            merges: MergeCoordinator::new(manager.clone()),
            manager,
            config,
            transactions: Mutex::new(HashMap::new()),
        })
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Get the configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn repo(&self) -> &GitRepository {
        self.manager.repo()
    }

    /// Document reads and writes, branches and tags.
    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    /// Merge, rebase, diff and log.
    pub fn merges(&self) -> &MergeCoordinator {
        &self.merges
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.manager
    }

    /// Start a watcher over this database's repository.
    pub fn watch(&self, config: WatcherConfig, seed: Option<BranchSnapshot>) -> DatabaseResult<Watcher> {
        Ok(Watcher::start(&self.config.path, config, seed)?)
    }

    // ==================== Transactions by token ====================

    /// Open a transaction on `branch` and return its token.
    pub fn begin_transaction(&self, branch: &str) -> DatabaseResult<String> {
        let branch = BranchName::new(branch)?;
        self.evict_stale();
        let tx = self.manager.begin(&branch)?;

        let token = Ulid::new().to_string();
        self.transactions
            .lock()
            .insert(token.clone(), Arc::new(Mutex::new(tx)));

        debug!(branch = %branch, token = %token, "transaction token issued");
        Ok(token)
    }

    pub fn add(&self, token: &str, document: &Document) -> DatabaseResult<()> {
        self.with_transaction(token, |tx| tx.add(document))
    }

    pub fn add_many(&self, token: &str, documents: &[Document]) -> DatabaseResult<()> {
        self.with_transaction(token, |tx| tx.add_many(documents))
    }

    pub fn delete(&self, token: &str, key: &str) -> DatabaseResult<()> {
        self.with_transaction(token, |tx| tx.delete(key))
    }

    pub fn delete_many(&self, token: &str, keys: &[&str]) -> DatabaseResult<()> {
        self.with_transaction(token, |tx| tx.delete_many(keys.iter().copied()))
    }

    /// Commit the transaction behind `token`; the token is spent afterwards.
    pub fn commit(&self, token: &str, message: &str, author: &Author) -> DatabaseResult<Option<CommitId>> {
        self.with_transaction(token, |tx| tx.commit(message, author))
    }

    /// Abort the transaction behind `token`.
    pub fn abort(&self, token: &str) -> DatabaseResult<()> {
        let tx = self
            .transactions
            .lock()
            .remove(token)
            .ok_or_else(|| DatabaseError::TokenNotFound(token.to_string()))?;
        tx.lock().abort();
        Ok(())
    }

    /// Clear `branch`'s transaction slot, whoever holds it.
    pub fn close_transactions(&self, branch: &str) -> DatabaseResult<bool> {
        let branch = BranchName::new(branch)?;
        Ok(self.manager.close_transactions(&branch))
    }

    /// Number of tokens that still refer to an open transaction.
    pub fn pending_transactions(&self) -> usize {
        self.evict_stale();
        self.transactions.lock().len()
    }

    /// Drop tokens whose transaction no longer holds its branch slot.
    fn evict_stale(&self) {
        let evicted = {
            let mut transactions = self.transactions.lock();
            let mut evicted = Vec::new();
            transactions.retain(|_, tx| {
                // a handle someone is using right now is not stale
                let keep = tx.try_lock().map_or(true, |guard| guard.holds_slot());
                if !keep {
                    evicted.push(Arc::clone(tx));
                }
                keep
            });
            evicted
        };

        if evicted.is_empty() {
            return;
        }
        debug!(count = evicted.len(), "evicted stale transaction tokens");
        for tx in evicted {
            tx.lock().abort();
        }
    }

    fn with_transaction<T, F>(&self, token: &str, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&mut Transaction) -> Result<T, TransactionError>,
    {
        self.evict_stale();
        let tx = self
            .transactions
            .lock()
            .get(token)
            .cloned()
            .ok_or_else(|| DatabaseError::TokenNotFound(token.to_string()))?;

        let mut guard = tx.lock();
        let result = f(&mut *guard);
        if guard.state() != TransactionState::Open {
            self.transactions.lock().remove(token);
        }
        Ok(result?)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.config.path)
            .field("tokens", &self.transactions.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn open() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_open_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");

        let db = Database::open(&path).unwrap();
        assert_eq!(db.documents().list_branches().unwrap(), vec!["master"]);
        let root = db.documents().resolve_commit("master").unwrap();
        assert!(root.is_root());
        drop(db);

        let db = Database::open(&path).unwrap();
        assert_eq!(db.documents().resolve_commit("master").unwrap().id, root.id);
    }

    #[test]
    fn test_missing_database_without_create() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig::new(dir.path().join("db")).create_if_missing(false);
        let err = Database::open_with_config(config).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(_)));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_invalid_config() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig::new(dir.path().join("db")).transaction_timeout(Duration::ZERO);
        assert!(matches!(
            Database::open_with_config(config),
            Err(DatabaseError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_signature_signs_root_commit() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig::new(dir.path().join("db")).signature(Author::new("ops", "ops@example.com"));
        let db = Database::open_with_config(config).unwrap();

        let root = db.documents().resolve_commit("master").unwrap();
        assert_eq!(root.author_name, "ops");
    }

    #[test]
    fn test_clone_on_startup() {
        let (dir, origin) = open();
        origin.documents().save("master", "seed", "a", Some("1"), &Author::system()).unwrap();

        let url = origin.path().to_string_lossy().into_owned();
        let config = DatabaseConfig::new(dir.path().join("clone")).clone_from(url);
        let clone = Database::open_with_config(config).unwrap();

        assert_eq!(clone.documents().get("master", "a").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_clone_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("no-such-origin").to_string_lossy().into_owned();
        let config = DatabaseConfig::new(dir.path().join("clone")).clone_from(missing);
        assert!(matches!(Database::open_with_config(config), Err(DatabaseError::Storage(_))));
    }

    #[test]
    fn test_transaction_by_token() {
        let (_dir, db) = open();
        let token = db.begin_transaction("master").unwrap();

        db.add_many(&token, &[Document::new("a", "1"), Document::new("b", "2")]).unwrap();
        db.add(&token, &Document::new("c", "3")).unwrap();
        db.delete_many(&token, &["b"]).unwrap();
        db.delete(&token, "missing").unwrap();
        assert_eq!(db.documents().get("master", "a").unwrap(), None);

        let commit = db.commit(&token, "batch", &Author::system()).unwrap();
        assert!(commit.is_some());
        assert_eq!(db.pending_transactions(), 0);

        assert_eq!(db.documents().get("master", "a").unwrap().as_deref(), Some("1"));
        assert_eq!(db.documents().get("master", "b").unwrap(), None);
        assert_eq!(db.documents().get("master", "c").unwrap().as_deref(), Some("3"));

        // spent tokens are gone
        assert!(matches!(
            db.add(&token, &Document::new("d", "4")),
            Err(DatabaseError::TokenNotFound(_))
        ));
    }

    #[test]
    fn test_transaction_exclusivity() {
        let (_dir, db) = open();
        let token = db.begin_transaction("master").unwrap();

        assert!(db.begin_transaction("master").unwrap_err().is_concurrency());
        assert!(db
            .documents()
            .save("master", "m", "a", Some("1"), &Author::system())
            .unwrap_err()
            .is_concurrency());

        db.abort(&token).unwrap();
        assert!(db.abort(&token).unwrap_err().is_not_found());
        db.begin_transaction("master").unwrap();
    }

    #[test]
    fn test_invalid_key_in_transaction_is_validation() {
        let (_dir, db) = open();
        let token = db.begin_transaction("master").unwrap();
        let err = db.add(&token, &Document::new("", "x")).unwrap_err();
        assert!(err.is_validation());

        // the handle stays usable
        db.add(&token, &Document::new("ok", "x")).unwrap();
        assert_eq!(db.pending_transactions(), 1);
    }

    fn open_with_timeout(timeout: Duration) -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig::new(dir.path().join("db")).transaction_timeout(timeout);
        let db = Database::open_with_config(config).unwrap();
        (dir, db)
    }

    #[test]
    fn test_stale_token_is_not_found() {
        let (_dir, db) = open_with_timeout(Duration::from_millis(20));

        let stale = db.begin_transaction("master").unwrap();
        std::thread::sleep(Duration::from_millis(40));
        let _fresh = db.begin_transaction("master").unwrap();

        let err = db.add(&stale, &Document::new("a", "1")).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            format!("transaction does not exist or has timed out: {}", stale)
        );
    }

    #[test]
    fn test_abandoned_tokens_are_evicted() {
        let (_dir, db) = open_with_timeout(Duration::from_millis(10));

        for _ in 0..50 {
            db.begin_transaction("master").unwrap();
            std::thread::sleep(Duration::from_millis(15));
        }
        assert_eq!(db.pending_transactions(), 0);
    }

    #[test]
    fn test_closed_token_is_evicted() {
        let (_dir, db) = open();
        let token = db.begin_transaction("master").unwrap();
        let live = db.begin_transaction("feature").unwrap();
        assert_eq!(db.pending_transactions(), 2);

        db.close_transactions("master").unwrap();
        assert_eq!(db.pending_transactions(), 1);
        assert!(db.commit(&token, "late", &Author::system()).unwrap_err().is_not_found());

        db.add(&live, &Document::new("a", "1")).unwrap();
        assert!(db.commit(&live, "live", &Author::system()).unwrap().is_some());
    }

    #[test]
    fn test_close_transactions() {
        let (_dir, db) = open();
        db.begin_transaction("master").unwrap();

        assert!(db.close_transactions("master").unwrap());
        assert!(!db.close_transactions("master").unwrap());
        db.documents().save("master", "m", "a", Some("1"), &Author::system()).unwrap();
    }

    #[test]
    fn test_error_classification() {
        assert!(DatabaseError::from(InvalidNameError::Empty).is_validation());
        assert!(DatabaseError::TokenNotFound("t".into()).is_not_found());
        assert!(DatabaseError::from(TransactionError::Concurrency {
            branch: "master".into()
        })
        .is_concurrency());
        assert!(DatabaseError::from(TransactionError::Expired {
            branch: "master".into()
        })
        .is_expired());
        assert!(DatabaseError::from(StorageError::RefNotFound("x".into())).is_not_found());
    }
}
