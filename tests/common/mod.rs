#![allow(dead_code)]

use std::time::{Duration, Instant};

use branchdb::{Author, Database, DatabaseConfig};
use tempfile::TempDir;

pub fn open() -> (TempDir, Database) {
    let dir = TempDir::new().expect("create temp dir");
    let db = Database::open(dir.path().join("db")).expect("open database");
    (dir, db)
}

pub fn open_with(dir: &TempDir, name: &str, configure: impl FnOnce(DatabaseConfig) -> DatabaseConfig) -> Database {
    let config = configure(DatabaseConfig::new(dir.path().join(name)));
    Database::open_with_config(config).expect("open database")
}

pub fn author() -> Author {
    Author::new("integration", "integration@example.com")
}

/// poll `check` until it returns true or `timeout` passes
pub fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    check()
}
