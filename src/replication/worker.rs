//! The replication worker thread.
//!
//! Owns its own `git2::Repository` handle so pushes never contend with the
//! writers' handle.

use std::cell::RefCell;
use std::path::Path;

use crossbeam::channel::Receiver;
use git2::Repository;
use tracing::{debug, error, warn};

use crate::replication::{ReplicationError, ReplicationJob};
use crate::storage::BranchName;

/// Process push jobs until every sender is dropped.
pub(crate) fn run_replication_loop(path: &Path, remote: &str, jobs: Receiver<ReplicationJob>) {
    let repo = match Repository::open(path) {
        Ok(repo) => repo,
        Err(e) => {
            error!(path = %path.display(), error = %e, "replication worker could not open repository");
            return;
        }
    };

    for job in jobs {
        match push_branch(&repo, remote, &job.branch) {
            Ok(()) => debug!(branch = %job.branch, remote, "replicated branch"),
            Err(e) => warn!(branch = %job.branch, remote, error = %e, "replication failed"),
        }
    }

    debug!("replication worker stopped");
}

/// Force-push `branch` to `remote`.
///
/// `remote` is a configured remote name, or a URL used anonymously.
pub fn push_branch(repo: &Repository, remote: &str, branch: &BranchName) -> Result<(), ReplicationError> {
    let mut remote = match repo.find_remote(remote) {
        Ok(found) => found,
        Err(_) => repo.remote_anonymous(remote)?,
    };

    let refspec = format!("+{0}:{0}", branch.as_ref_path());
    let push_error: RefCell<Option<String>> = RefCell::new(None);
    {
        let cfg = repo.config().ok();
        let mut callbacks = git2::RemoteCallbacks::new();
        callbacks.credentials(move |url, username_from_url, allowed| {
            if allowed.is_ssh_key() {
                if let Some(user) = username_from_url {
                    return git2::Cred::ssh_key_from_agent(user);
                }
            }
            if allowed.is_user_pass_plaintext() {
                if let Some(cfg) = &cfg {
                    if let Ok(cred) = git2::Cred::credential_helper(cfg, url, username_from_url) {
                        return Ok(cred);
                    }
                }
            }
            git2::Cred::default()
        });
        callbacks.push_update_reference(|_ref_name, status| {
            if let Some(msg) = status {
                *push_error.borrow_mut() = Some(msg.to_string());
            }
            Ok(())
        });

        let mut push_options = git2::PushOptions::new();
        push_options.remote_callbacks(callbacks);
        remote.push(&[refspec.as_str()], Some(&mut push_options))?;
    }

    if let Some(message) = push_error.into_inner() {
        return Err(ReplicationError::Rejected {
            branch: branch.to_string(),
            message,
        });
    }

    Ok(())
}
