//! Verb dispatcher for file-transfer requests.
//!
//! This module provides the `OperationDispatcher` struct that maps each
//! decoded [`FileRequest`] onto ownership-checked calls of the session's
//! [`SessionOwnershipTracker`], adding the protocol rules that ownership
//! alone does not express (rename never overwrites, read and write need
//! their flag, new link and rename endpoints are claimed).

use std::fs::{File, Metadata};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::UNIX_EPOCH;

use protocol::messages::{FileEntry, FileEntryType, FileRequest, OpenFlags, Verb};
use tracing::debug;

use crate::files::{FsError, SessionOwnershipTracker};

/// What a dispatched verb produced.
#[derive(Debug)]
pub enum Outcome {
    /// A file opened by a read or write verb.
    Opened(File),
    /// The verb completed with nothing to return.
    Done,
    /// Entries for list, stat and readlink.
    Entries(Vec<FileEntry>),
}

/// Dispatches verbs for one session.
#[derive(Debug)]
pub struct OperationDispatcher {
    tracker: SessionOwnershipTracker,
    file_mode: u32,
    dir_mode: u32,
}

impl OperationDispatcher {
    /// Creates a dispatcher over a fresh tracker.
    ///
    /// `file_mode` and `dir_mode` are used for every file and directory the
    /// session creates; modes carried by requests are ignored.
    pub fn new(tracker: SessionOwnershipTracker, file_mode: u32, dir_mode: u32) -> Self {
        Self {
            tracker,
            file_mode,
            dir_mode,
        }
    }

    pub fn tracker(&self) -> &SessionOwnershipTracker {
        &self.tracker
    }

    /// Runs one request.
    pub fn dispatch(&self, req: &FileRequest) -> Result<Outcome, FsError> {
        debug!(verb = %req.verb, path = %req.path, target = ?req.target, "dispatch");

        match &req.verb {
            Verb::Read => self.handle_read(req),
            Verb::Write => self.handle_write(req),
            Verb::SetAttributes => self.handle_set_attributes(req),
            Verb::Rename => self.handle_rename(req),
            Verb::RemoveDirectory => self
                .tracker
                .remove_empty_directory(&req.path)
                .map(|_| Outcome::Done),
            Verb::RemoveFile => self.tracker.remove_file(&req.path).map(|_| Outcome::Done),
            Verb::MakeDirectory => self
                .tracker
                .make_directory(&req.path, self.dir_mode)
                .map(|_| Outcome::Done),
            Verb::HardLink => self.handle_link(req),
            Verb::Symlink => self.handle_symlink(req),
            Verb::List => self.handle_list(req),
            Verb::Stat => self.handle_stat(req),
            Verb::ReadLink => self.handle_read_link(req),
            Verb::Other(name) => Err(FsError::Unsupported(name.clone())),
        }
    }

    fn handle_read(&self, req: &FileRequest) -> Result<Outcome, FsError> {
        if !req.flags.read {
            return Err(FsError::InvalidArgument("read without read flag".to_string()));
        }
        let file = self.tracker.open_file(&req.path, req.flags, self.file_mode)?;
        Ok(Outcome::Opened(file))
    }

    fn handle_write(&self, req: &FileRequest) -> Result<Outcome, FsError> {
        if !req.flags.write {
            return Err(FsError::InvalidArgument("write without write flag".to_string()));
        }
        if let Some(requested) = req.attrs.permissions {
            debug!(
                requested = format_args!("{:o}", requested),
                applied = format_args!("{:o}", self.file_mode),
                "ignoring requested permissions"
            );
        }
        let file = self.tracker.open_file(&req.path, req.flags, self.file_mode)?;
        Ok(Outcome::Opened(file))
    }

    /// Only size is honored; other attributes are accepted and dropped.
    fn handle_set_attributes(&self, req: &FileRequest) -> Result<Outcome, FsError> {
        let file = self
            .tracker
            .open_file(&req.path, OpenFlags::write_existing(), self.file_mode)?;
        if let Some(size) = req.attrs.size {
            file.set_len(size)?;
        }
        Ok(Outcome::Done)
    }

    /// Rename refuses any existing destination, owned or not, before the
    /// ownership gate runs. On success the destination is claimed; the
    /// source key stays in the set.
    fn handle_rename(&self, req: &FileRequest) -> Result<Outcome, FsError> {
        let target = required_target(req)?;
        if self.tracker.gateway().exists(target)? {
            return Err(FsError::AlreadyExists(target.to_string()));
        }
        self.tracker.rename(&req.path, target)?;
        self.tracker.try_claim(target)?;
        Ok(Outcome::Done)
    }

    fn handle_link(&self, req: &FileRequest) -> Result<Outcome, FsError> {
        let target = required_target(req)?;
        self.tracker.link(&req.path, target)?;
        self.tracker.try_claim(target)?;
        Ok(Outcome::Done)
    }

    /// `path` is what the link points at, `target` is the new link name.
    fn handle_symlink(&self, req: &FileRequest) -> Result<Outcome, FsError> {
        let link = required_target(req)?;
        self.tracker.symlink(&req.path, link)?;
        self.tracker.try_claim(link)?;
        Ok(Outcome::Done)
    }

    fn handle_list(&self, req: &FileRequest) -> Result<Outcome, FsError> {
        let entries = self
            .tracker
            .read_directory(&req.path)?
            .iter()
            .map(|item| file_entry(item.name.clone(), &item.metadata))
            .collect();
        Ok(Outcome::Entries(entries))
    }

    fn handle_stat(&self, req: &FileRequest) -> Result<Outcome, FsError> {
        let metadata = self.tracker.stat(&req.path)?;
        let canonical = self.tracker.confiner().canonical(&req.path)?;
        Ok(Outcome::Entries(vec![file_entry(
            base_name(&canonical),
            &metadata,
        )]))
    }

    /// Resolves the link, then stats what it points at. The single entry
    /// carries the resolved client path as its name.
    fn handle_read_link(&self, req: &FileRequest) -> Result<Outcome, FsError> {
        let body = self.tracker.read_link(&req.path)?;
        let confiner = self.tracker.confiner();

        let resolved = if body.is_absolute() {
            confiner.to_client(&body)?
        } else {
            let canonical = confiner.canonical(&req.path)?;
            let parent = Path::new(&canonical).parent().unwrap_or(Path::new("/"));
            let joined = parent.join(&body);
            let joined = joined
                .to_str()
                .ok_or_else(|| FsError::InvalidArgument("link target is not UTF-8".to_string()))?;
            confiner.canonical(joined)?
        };

        let metadata = self.tracker.stat(&resolved)?;
        Ok(Outcome::Entries(vec![file_entry(resolved, &metadata)]))
    }
}

fn required_target(req: &FileRequest) -> Result<&str, FsError> {
    req.target
        .as_deref()
        .ok_or_else(|| FsError::InvalidArgument(format!("{} needs a second path", req.verb)))
}

fn base_name(canonical: &str) -> String {
    match canonical.rsplit_once('/') {
        Some((_, "")) | None => "/".to_string(),
        Some((_, name)) => name.to_string(),
    }
}

/// Converts host metadata to a wire entry.
pub fn file_entry(name: String, metadata: &Metadata) -> FileEntry {
    let file_type = metadata.file_type();
    let entry_type = if file_type.is_symlink() {
        FileEntryType::Symlink
    } else if file_type.is_dir() {
        FileEntryType::Directory
    } else if file_type.is_file() {
        FileEntryType::File
    } else {
        FileEntryType::Other
    };

    let modified = metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    FileEntry {
        name,
        entry_type,
        size: metadata.len(),
        mode: metadata.mode(),
        modified,
    }
}
