//! Per-session ownership set and the claim protocol.
//!
//! A session may only touch paths it created during its lifetime. The set
//! is keyed by canonical client paths, is exact-path only (owning `/d` says
//! nothing about `/d/f` and vice versa), and never shrinks: removing or
//! renaming a path leaves its old key in the set.
//!
//! Claims are checked with a second existence probe after the mutating call
//! rather than from the call's own result. A concurrent external change to
//! the root between the two can make the set disagree with disk.

use std::collections::HashSet;
use std::fs::{File, Metadata};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use protocol::messages::OpenFlags;
use tracing::debug;

use super::{DirectoryItem, FilesystemGateway, FsError, PathConfiner};

/// Whether `make_directory` claims the directory it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectoryPolicy {
    /// Directories are created without a precondition and stay unowned.
    Unclaimed,
    /// The new directory must be claimable and is claimed once created.
    #[default]
    ClaimOnCreate,
}

impl DirectoryPolicy {
    /// Maps the `claim_new_directories` setting to a policy.
    pub fn from_claim_setting(claim: bool) -> Self {
        if claim {
            DirectoryPolicy::ClaimOnCreate
        } else {
            DirectoryPolicy::Unclaimed
        }
    }
}

/// Gates gateway calls on the session's ownership set.
#[derive(Debug)]
pub struct SessionOwnershipTracker {
    gateway: FilesystemGateway,
    policy: DirectoryPolicy,
    owned: Mutex<HashSet<String>>,
}

impl SessionOwnershipTracker {
    /// Creates a tracker with an empty ownership set.
    pub fn new(gateway: FilesystemGateway, policy: DirectoryPolicy) -> Self {
        Self {
            gateway,
            policy,
            owned: Mutex::new(HashSet::new()),
        }
    }

    pub fn gateway(&self) -> &FilesystemGateway {
        &self.gateway
    }

    pub fn confiner(&self) -> &PathConfiner {
        self.gateway.confiner()
    }

    fn owned(&self) -> MutexGuard<'_, HashSet<String>> {
        self.owned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if the session owns the path.
    pub fn is_owned(&self, path: &str) -> Result<bool, FsError> {
        let key = self.confiner().canonical(path)?;
        Ok(self.owned().contains(&key))
    }

    /// Returns true if the path is owned or does not exist yet.
    pub fn may_claim(&self, path: &str) -> Result<bool, FsError> {
        if self.is_owned(path)? {
            return Ok(true);
        }
        Ok(!self.gateway.exists(path)?)
    }

    /// Adds the path to the set if it is owned already or now exists.
    ///
    /// The lock is held across the existence probe so that two claims of
    /// the same path within one session cannot interleave.
    pub fn try_claim(&self, path: &str) -> Result<(), FsError> {
        let key = self.confiner().canonical(path)?;
        let mut owned = self.owned();
        if owned.contains(&key) {
            return Ok(());
        }
        if !self.gateway.exists(path)? {
            debug!(path = %key, "claim refused, path does not exist");
            return Err(FsError::NotOwned(key));
        }
        debug!(path = %key, "claimed");
        owned.insert(key);
        Ok(())
    }

    /// Snapshot of the owned keys, sorted.
    pub fn owned_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.owned().iter().cloned().collect();
        paths.sort();
        paths
    }

    fn require_owned(&self, path: &str) -> Result<(), FsError> {
        if self.is_owned(path)? {
            Ok(())
        } else {
            Err(denied(path))
        }
    }

    fn require_claimable(&self, path: &str) -> Result<(), FsError> {
        if self.may_claim(path)? {
            Ok(())
        } else {
            debug!(path = %path, "denied, exists and not owned");
            Err(FsError::NotOwned(path.to_string()))
        }
    }

    /// Opens a file.
    ///
    /// An owned path opens with any flags. An unowned path opens only when
    /// the request carries `create` and the path is claimable; the new file
    /// is claimed before the handle is returned and dropped if the claim
    /// fails.
    pub fn open_file(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<File, FsError> {
        if self.is_owned(path)? {
            return self.gateway.open_file(path, flags, mode);
        }

        if !flags.create {
            return Err(denied(path));
        }
        self.require_claimable(path)?;

        let file = self.gateway.open_file(path, flags, mode)?;
        self.try_claim(path)?;
        Ok(file)
    }

    pub fn stat(&self, path: &str) -> Result<Metadata, FsError> {
        self.require_owned(path)?;
        self.gateway.stat(path)
    }

    pub fn remove_file(&self, path: &str) -> Result<(), FsError> {
        self.require_owned(path)?;
        self.gateway.remove_file(path)
    }

    pub fn remove_empty_directory(&self, path: &str) -> Result<(), FsError> {
        self.require_owned(path)?;
        self.gateway.remove_empty_directory(path)
    }

    /// Creates a directory according to the directory policy.
    pub fn make_directory(&self, path: &str, mode: u32) -> Result<(), FsError> {
        match self.policy {
            DirectoryPolicy::Unclaimed => self.gateway.make_directory(path, mode),
            DirectoryPolicy::ClaimOnCreate => {
                self.require_claimable(path)?;
                self.gateway.make_directory(path, mode)?;
                self.try_claim(path)
            }
        }
    }

    /// Renames an owned source to a claimable destination.
    ///
    /// Neither key changes here: the destination is not claimed and the
    /// source stays in the set.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        self.require_owned(from)?;
        self.require_claimable(to)?;
        self.gateway.rename(from, to)
    }

    /// Hard-links the owned `path` at the claimable `target`.
    pub fn link(&self, path: &str, target: &str) -> Result<(), FsError> {
        self.require_owned(path)?;
        self.require_claimable(target)?;
        self.gateway.link(path, target)
    }

    /// Creates a symlink at the claimable `path` pointing at the owned `target`.
    pub fn symlink(&self, target: &str, path: &str) -> Result<(), FsError> {
        self.require_owned(target)?;
        self.require_claimable(path)?;
        self.gateway.symlink(target, path)
    }

    /// Lists an owned directory, keeping only owned children.
    pub fn read_directory(&self, path: &str) -> Result<Vec<DirectoryItem>, FsError> {
        self.require_owned(path)?;
        let dir = self.confiner().canonical(path)?;
        let items = self.gateway.read_directory(path)?;

        let owned = self.owned();
        Ok(items
            .into_iter()
            .filter(|item| owned.contains(&child_key(&dir, &item.name)))
            .collect())
    }

    pub fn read_link(&self, path: &str) -> Result<PathBuf, FsError> {
        self.require_owned(path)?;
        self.gateway.read_link(path)
    }
}

fn denied(path: &str) -> FsError {
    debug!(path = %path, "denied, not owned");
    FsError::NotOwned(path.to_string())
}

fn child_key(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}
