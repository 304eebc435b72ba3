//! Host filesystem calls on confined paths.
//!
//! Every method takes client paths, confines them, and performs exactly one
//! host operation. Host errors come back unchanged; the only interpretation
//! done here is `exists` (not found is `false`) and
//! `remove_empty_directory` (missing is success, non-directory is invalid).

use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::PathBuf;
use std::sync::Arc;

use protocol::messages::OpenFlags;
use tracing::debug;

use super::{FsError, PathConfiner};

/// A directory child as seen by the gateway.
#[derive(Debug)]
pub struct DirectoryItem {
    /// File name of the child.
    pub name: String,
    /// Metadata of the child itself (symlinks are not followed).
    pub metadata: Metadata,
}

/// Translates generic file operations onto the host filesystem.
#[derive(Debug, Clone)]
pub struct FilesystemGateway {
    confiner: Arc<PathConfiner>,
}

impl FilesystemGateway {
    /// Creates a gateway over the given confiner.
    pub fn new(confiner: Arc<PathConfiner>) -> Self {
        Self { confiner }
    }

    /// Returns the confiner used for every path.
    pub fn confiner(&self) -> &PathConfiner {
        &self.confiner
    }

    /// Opens a file with generic flags.
    ///
    /// Read and write together open read-write; otherwise the single
    /// direction requested is used, defaulting to read. `mode` applies only
    /// when the file is created.
    pub fn open_file(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<File, FsError> {
        let host = self.confiner.resolve(path)?;
        debug!(op = "open", path = %path, ?flags, mode = format_args!("{:o}", mode));

        let writable = flags.write || flags.append;
        if flags.create && !writable {
            // Host open refuses create on a read-only handle, so the file
            // is created first and then reopened for reading.
            let mut create = OpenOptions::new();
            create.write(true).mode(mode);
            if flags.exclusive {
                create.create_new(true);
            } else {
                create.create(true);
            }
            drop(create.open(&host)?);
            return Ok(OpenOptions::new().read(true).open(host)?);
        }

        let mut options = OpenOptions::new();
        options
            .read(flags.read || !writable)
            .write(flags.write)
            .append(flags.append)
            .truncate(flags.truncate)
            .mode(mode);
        if flags.create && flags.exclusive {
            options.create_new(true);
        } else if flags.create {
            options.create(true);
        }

        Ok(options.open(host)?)
    }

    /// Reports whether a path exists, without following a final symlink.
    pub fn exists(&self, path: &str) -> Result<bool, FsError> {
        let host = self.confiner.resolve(path)?;
        match fs::symlink_metadata(host) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Renames `from` to `to`.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let from_host = self.confiner.resolve(from)?;
        let to_host = self.confiner.resolve(to)?;
        debug!(op = "rename", from = %from, to = %to);

        Ok(fs::rename(from_host, to_host)?)
    }

    /// Removes an empty directory.
    ///
    /// A missing path counts as already removed.
    pub fn remove_empty_directory(&self, path: &str) -> Result<(), FsError> {
        let host = self.confiner.resolve(path)?;
        debug!(op = "rmdir", path = %path);

        let metadata = match fs::symlink_metadata(&host) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if !metadata.is_dir() {
            return Err(FsError::InvalidArgument(format!("not a directory: {}", path)));
        }

        Ok(fs::remove_dir(host)?)
    }

    /// Unlinks a file. Directories are refused by the host.
    pub fn remove_file(&self, path: &str) -> Result<(), FsError> {
        let host = self.confiner.resolve(path)?;
        debug!(op = "remove", path = %path);

        Ok(fs::remove_file(host)?)
    }

    /// Creates a single directory with the given mode.
    pub fn make_directory(&self, path: &str, mode: u32) -> Result<(), FsError> {
        let host = self.confiner.resolve(path)?;
        debug!(op = "mkdir", path = %path, mode = format_args!("{:o}", mode));

        Ok(fs::DirBuilder::new().mode(mode).create(host)?)
    }

    /// Stats a path, following symlinks.
    pub fn stat(&self, path: &str) -> Result<Metadata, FsError> {
        let host = self.confiner.resolve(path)?;
        debug!(op = "stat", path = %path);

        Ok(fs::metadata(host)?)
    }

    /// Creates a hard link at `target` to the existing `path`.
    pub fn link(&self, path: &str, target: &str) -> Result<(), FsError> {
        let existing = self.confiner.resolve(path)?;
        let new_link = self.confiner.resolve(target)?;
        debug!(op = "link", path = %path, target = %target);

        Ok(fs::hard_link(existing, new_link)?)
    }

    /// Creates a symlink at `path` pointing to `target`.
    ///
    /// The link body is the confined host path of `target`, so following the
    /// link never leaves the root.
    pub fn symlink(&self, target: &str, path: &str) -> Result<(), FsError> {
        let pointee = self.confiner.resolve(target)?;
        let link = self.confiner.resolve(path)?;
        debug!(op = "symlink", target = %target, path = %path);

        Ok(std::os::unix::fs::symlink(pointee, link)?)
    }

    /// Lists the children of a directory, sorted by name.
    pub fn read_directory(&self, path: &str) -> Result<Vec<DirectoryItem>, FsError> {
        let host = self.confiner.resolve(path)?;
        debug!(op = "readdir", path = %path);

        let mut items = Vec::new();
        for entry in fs::read_dir(host)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            items.push(DirectoryItem {
                name: entry.file_name().to_string_lossy().into_owned(),
                metadata,
            });
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(items)
    }

    /// Reads the body of a symlink.
    pub fn read_link(&self, path: &str) -> Result<PathBuf, FsError> {
        let host = self.confiner.resolve(path)?;
        debug!(op = "readlink", path = %path);

        Ok(fs::read_link(host)?)
    }
}
