//! Path confinement against the data root.
//!
//! Client paths are always interpreted relative to the root, whether or not
//! they start with `/`. `.` and `..` are resolved lexically and `..` stops at
//! the root, so `../../etc/passwd` maps to `<root>/etc/passwd`. After joining,
//! the result must still carry the root as a literal byte prefix.

use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

use super::FsError;

/// Maps client paths into a fixed root directory.
#[derive(Debug, Clone)]
pub struct PathConfiner {
    root: PathBuf,
}

impl PathConfiner {
    /// Creates a confiner for an absolute root directory.
    ///
    /// The root is normalized lexically but not resolved on disk; callers
    /// that want symlinks in the root itself resolved should canonicalize it
    /// first.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, FsError> {
        let root = root.as_ref();
        if !root.is_absolute() {
            return Err(FsError::InvalidArgument(format!(
                "data root must be absolute: {}",
                root.display()
            )));
        }

        let mut normalized = PathBuf::from("/");
        for component in root.components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::ParentDir => {
                    normalized.pop();
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }

        Ok(Self { root: normalized })
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalizes a client path to its root-relative canonical form.
    ///
    /// The result always starts with `/`; the root itself is `/`. This string
    /// is the key used for ownership tracking.
    pub fn canonical(&self, client_path: &str) -> Result<String, FsError> {
        if client_path.contains('\0') {
            return Err(FsError::Confinement(client_path.escape_debug().to_string()));
        }

        let mut parts: Vec<&str> = Vec::new();
        for part in client_path.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                name => parts.push(name),
            }
        }

        Ok(format!("/{}", parts.join("/")))
    }

    /// Resolves a client path to an absolute host path under the root.
    pub fn resolve(&self, client_path: &str) -> Result<PathBuf, FsError> {
        let canonical = self.canonical(client_path)?;
        let relative = canonical.trim_start_matches('/');
        let resolved = if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        };

        if !self.contains(&resolved) {
            return Err(FsError::Confinement(canonical));
        }

        Ok(resolved)
    }

    /// Maps an absolute host path back to its canonical client form.
    ///
    /// Fails for any path outside the root.
    pub fn to_client(&self, host_path: &Path) -> Result<String, FsError> {
        let outside = || FsError::Confinement(host_path.display().to_string());

        if !host_path.is_absolute() {
            return Err(outside());
        }

        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
        for component in host_path.components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::ParentDir => {
                    parts.pop();
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        let normalized: PathBuf = std::iter::once(std::ffi::OsStr::new("/"))
            .chain(parts)
            .collect();

        if !self.contains(&normalized) {
            return Err(outside());
        }

        let relative = normalized.strip_prefix(&self.root).map_err(|_| outside())?;
        let relative = relative.to_str().ok_or_else(outside)?;
        self.canonical(relative)
    }

    /// Literal prefix test on the raw bytes, respecting the `/` boundary so
    /// that `/srv2` is not inside `/srv`.
    fn contains(&self, path: &Path) -> bool {
        let root = self.root.as_os_str().as_bytes();
        let candidate = path.as_os_str().as_bytes();

        if !candidate.starts_with(root) {
            return false;
        }
        root == b"/" || candidate.len() == root.len() || candidate[root.len()] == b'/'
    }
}
