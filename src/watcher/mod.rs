//! Change data capture by polling branch heads.
//!
//! The watcher runs one background thread with its own repository handle. On
//! every tick it captures a [`BranchSnapshot`], compares it with the previous
//! one and emits a [`WatchEvent`] per added, changed or removed branch. Ticks
//! never overlap: the next one is scheduled a fixed interval after the
//! previous one finished. The watcher never takes writer locks.
//!
//! # Usage
//!
//! ```ignore
//! use branchdb::watcher::{Watcher, WatcherConfig, WatchEvent};
//!
//! let watcher = Watcher::start("./my_database", WatcherConfig::default(), None)?;
//! let events = watcher.subscribe();
//! for event in events.iter() {
//!     println!("{} {}", event.kind(), event.branch());
//! }
//! ```

mod events;
mod snapshot;

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::storage::{BranchName, CommitId, GitRepository, StorageError, StorageResult, TreeDiff};

pub use events::WatchEvent;
pub use snapshot::BranchSnapshot;

/// Watcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// pause between the end of one tick and the start of the next
    pub interval: Duration,
    /// branch that new branches are diffed against
    pub base_branch: BranchName,
}

impl WatcherConfig {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn base_branch(mut self, branch: BranchName) -> Self {
        self.base_branch = branch;
        self
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL,
            base_branch: BranchName::master(),
        }
    }
}

type Subscribers = Arc<Mutex<Vec<Sender<WatchEvent>>>>;

/// Handle to a running watcher thread.
///
/// Dropping the handle stops the thread after its current tick.
pub struct Watcher {
    snapshot: Arc<Mutex<BranchSnapshot>>,
    subscribers: Subscribers,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Start watching the repository at `path`.
    ///
    /// The first comparison is made against `seed`, or against the live
    /// repository when no seed is given.
    pub fn start(path: impl AsRef<Path>, config: WatcherConfig, seed: Option<BranchSnapshot>) -> StorageResult<Self> {
        let repo = GitRepository::open(path.as_ref())?;
        let initial = match seed {
            Some(snapshot) => snapshot,
            None => BranchSnapshot::capture(&repo)?,
        };

        let snapshot = Arc::new(Mutex::new(initial));
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);

        let state = Arc::clone(&snapshot);
        let subs = Arc::clone(&subscribers);
        let handle = thread::Builder::new()
            .name("branchdb-watcher".to_string())
            .spawn(move || run_watch_loop(repo, config, state, subs, shutdown_rx))
            .map_err(StorageError::Io)?;

        info!(path = %path.as_ref().display(), "watcher started");
        Ok(Self {
            snapshot,
            subscribers,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// A new event stream; events from earlier ticks are not replayed.
    pub fn subscribe(&self) -> Receiver<WatchEvent> {
        let (sender, receiver) = channel::unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// The snapshot the next tick will compare against.
    pub fn snapshot(&self) -> BranchSnapshot {
        self.snapshot.lock().clone()
    }

    /// Stop scheduling ticks and wait for the thread to finish.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("watcher thread panicked");
            }
            info!("watcher stopped");
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_watch_loop(
    repo: GitRepository,
    config: WatcherConfig,
    snapshot: Arc<Mutex<BranchSnapshot>>,
    subscribers: Subscribers,
    shutdown: Receiver<()>,
) {
    loop {
        match shutdown.recv_timeout(config.interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let previous = snapshot.lock().clone();
        let (next, events) = tick(&repo, &previous, &config.base_branch);
        *snapshot.lock() = next;

        if events.is_empty() {
            continue;
        }
        for event in &events {
            debug!(branch = %event.branch(), kind = event.kind(), "emitting event");
        }
        let mut subs = subscribers.lock();
        subs.retain(|sub| events.iter().all(|event| sub.send(event.clone()).is_ok()));
    }
}

/// Compare the repository against `previous`.
///
/// Returns the snapshot to keep for the next tick and the events to emit. A
/// branch whose diff fails keeps its previous entry so the next tick retries.
pub(crate) fn tick(
    repo: &GitRepository,
    previous: &BranchSnapshot,
    base_branch: &BranchName,
) -> (BranchSnapshot, Vec<WatchEvent>) {
    let current = match BranchSnapshot::capture(repo) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!(error = %e, "failed to capture branch snapshot");
            return (previous.clone(), Vec::new());
        }
    };
    debug!(branches = current.len(), "watcher tick");

    let mut kept = Vec::with_capacity(current.len());
    let mut events = Vec::new();

    for (name, head) in current.iter() {
        let Ok(branch) = BranchName::new(name) else {
            continue;
        };
        match previous.get(name) {
            Some(old_head) if old_head == head => kept.push((name.to_string(), head)),
            Some(old_head) => match repo.diff(old_head, head) {
                Ok(diff) => {
                    events.push(WatchEvent::BranchChanged {
                        branch,
                        old_head,
                        new_head: head,
                        diff,
                    });
                    kept.push((name.to_string(), head));
                }
                Err(e) => {
                    error!(branch = %name, error = %e, "failed to diff changed branch");
                    kept.push((name.to_string(), old_head));
                }
            },
            None => match diff_against_base(repo, base_branch, head) {
                Ok(diff) => {
                    let has_deletions = diff.has_deletions();
                    events.push(WatchEvent::BranchAdded {
                        branch,
                        head,
                        diff,
                        has_deletions,
                    });
                    kept.push((name.to_string(), head));
                }
                Err(e) => error!(branch = %name, error = %e, "failed to diff added branch"),
            },
        }
    }

    for (name, head) in previous.iter() {
        if current.contains(name) {
            continue;
        }
        if let Ok(branch) = BranchName::new(name) {
            events.push(WatchEvent::BranchRemoved { branch, head });
        }
    }

    (BranchSnapshot::from_heads(kept), events)
}

fn diff_against_base(
    repo: &GitRepository,
    base_branch: &BranchName,
    head: CommitId,
) -> StorageResult<TreeDiff> {
    let base_tree = repo.tree_of(repo.head_of(base_branch)?)?;
    let tree = repo.tree_of(Some(head))?;
    repo.diff_trees(base_tree, tree)
}
