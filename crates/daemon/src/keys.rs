//! Host key loading and first-run generation.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use protocol::{scan_key_blocks, HostIdentity, ProtocolError};
use thiserror::Error;
use tracing::info;

/// Path value that selects stdin as the key source.
pub const STDIN_KEY_PATH: &str = "-";

const PRIVATE_KEY_MODE: u32 = 0o400;
const PUBLIC_KEY_MODE: u32 = 0o444;

/// Errors raised while loading or creating the host key.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Reading or writing a key file failed.
    #[error("key file {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Only one half of the key pair exists on disk.
    #[error("key at {present} found but {missing} is missing")]
    IncompletePair {
        /// The file that exists.
        present: PathBuf,
        /// The file that does not.
        missing: PathBuf,
    },

    /// The private key is readable by others.
    #[error("key at {path} has too permissive permissions {mode:o}")]
    TooPermissive {
        /// Private key path.
        path: PathBuf,
        /// Observed permission bits.
        mode: u32,
    },

    /// The key material is invalid.
    #[error(transparent)]
    Key(#[from] ProtocolError),
}

/// Returns the public key path for a private key path (`<path>.pub`).
pub fn public_key_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}

/// Loads the host key from `path`, generating it on first run.
///
/// A `path` of `-` reads PEM text from stdin instead. Otherwise both
/// `path` and `path.pub` must exist, or neither; in the latter case a new
/// pair is written with modes 0400 and 0444.
pub fn load_or_create_host_key(path: &Path) -> Result<HostIdentity, KeyError> {
    if path.as_os_str() == STDIN_KEY_PATH {
        let stdin = io::stdin();
        return read_host_key(stdin.lock());
    }

    let public_path = public_key_path(path);
    let private_exists = exists(path)?;
    let public_exists = exists(&public_path)?;

    match (private_exists, public_exists) {
        (false, false) => return generate_host_key(path, &public_path),
        (true, false) => {
            return Err(KeyError::IncompletePair {
                present: path.to_path_buf(),
                missing: public_path,
            })
        }
        (false, true) => {
            return Err(KeyError::IncompletePair {
                present: public_path,
                missing: path.to_path_buf(),
            })
        }
        (true, true) => {}
    }

    let metadata = fs::metadata(path).map_err(|source| io_error(path, source))?;
    let mode = metadata.permissions().mode() & 0o7777;
    if mode != 0o600 && mode != 0o400 {
        return Err(KeyError::TooPermissive {
            path: path.to_path_buf(),
            mode,
        });
    }

    let private_pem = fs::read_to_string(path).map_err(|source| io_error(path, source))?;
    let public_pem =
        fs::read_to_string(&public_path).map_err(|source| io_error(&public_path, source))?;

    let identity = HostIdentity::from_pem(&private_pem, Some(&public_pem))?;
    info!(path = %path.display(), fingerprint = %identity.fingerprint(), "loaded host key");
    Ok(identity)
}

/// Reads a host key from PEM text, ignoring anything outside the key blocks.
pub fn read_host_key<R: BufRead>(reader: R) -> Result<HostIdentity, KeyError> {
    let blocks = scan_key_blocks(reader)?;
    let identity = HostIdentity::from_pem(&blocks.private_pem, blocks.public_pem.as_deref())?;
    info!(fingerprint = %identity.fingerprint(), "loaded host key from stdin");
    Ok(identity)
}

fn generate_host_key(path: &Path, public_path: &Path) -> Result<HostIdentity, KeyError> {
    let identity = HostIdentity::generate();
    let pem = identity.to_pem()?;

    write_key_file(path, &pem.private_pem, PRIVATE_KEY_MODE)?;
    write_key_file(public_path, &pem.public_pem, PUBLIC_KEY_MODE)?;

    info!(
        path = %path.display(),
        fingerprint = %identity.fingerprint(),
        "generated new host key"
    );
    Ok(identity)
}

fn write_key_file(path: &Path, contents: &str, mode: u32) -> Result<(), KeyError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
        .map_err(|source| io_error(path, source))?;
    file.write_all(contents.as_bytes())
        .map_err(|source| io_error(path, source))?;

    // The process umask may have narrowed the creation mode.
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|source| io_error(path, source))
}

fn exists(path: &Path) -> Result<bool, KeyError> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(io_error(path, source)),
    }
}

fn io_error(path: &Path, source: io::Error) -> KeyError {
    KeyError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn mode(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_public_key_path() {
        assert_eq!(
            public_key_path(Path::new("/etc/filedrop/id_ed25519")),
            PathBuf::from("/etc/filedrop/id_ed25519.pub")
        );
    }

    #[test]
    fn test_first_run_generates_pair() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("id_ed25519");

        let identity = load_or_create_host_key(&path).unwrap();
        assert_eq!(mode(&path), 0o400);
        assert_eq!(mode(&public_key_path(&path)), 0o444);

        let reloaded = load_or_create_host_key(&path).unwrap();
        assert_eq!(identity.fingerprint(), reloaded.fingerprint());
    }

    #[test]
    fn test_missing_half_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key");
        fs::write(public_key_path(&path), "x").unwrap();

        let err = load_or_create_host_key(&path).unwrap_err();
        assert!(matches!(err, KeyError::IncompletePair { .. }));

        let other = dir.path().join("other");
        fs::write(&other, "x").unwrap();
        let err = load_or_create_host_key(&other).unwrap_err();
        assert!(matches!(err, KeyError::IncompletePair { .. }));
    }

    #[test]
    fn test_permissive_private_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key");
        load_or_create_host_key(&path).unwrap();

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        let err = load_or_create_host_key(&path).unwrap_err();
        assert!(matches!(err, KeyError::TooPermissive { mode: 0o644, .. }));

        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        assert!(load_or_create_host_key(&path).is_ok());
    }

    #[test]
    fn test_mismatched_pair_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key");
        load_or_create_host_key(&path).unwrap();

        let public_path = public_key_path(&path);
        fs::set_permissions(&public_path, fs::Permissions::from_mode(0o644)).unwrap();
        let stranger = HostIdentity::generate().to_pem().unwrap();
        fs::write(&public_path, stranger.public_pem).unwrap();

        let err = load_or_create_host_key(&path).unwrap_err();
        assert!(matches!(err, KeyError::Key(ProtocolError::KeyMismatch)));
    }

    #[test]
    fn test_read_from_pem_stream() {
        let identity = HostIdentity::generate();
        let pem = identity.to_pem().unwrap();
        let input = format!("comment\n{}\n{}", pem.public_pem, pem.private_pem);

        let loaded = read_host_key(Cursor::new(input)).unwrap();
        assert_eq!(loaded.fingerprint(), identity.fingerprint());
    }

    #[test]
    fn test_read_from_empty_stream_fails() {
        let err = read_host_key(Cursor::new("")).unwrap_err();
        assert!(matches!(err, KeyError::Key(ProtocolError::MalformedPem(_))));
    }
}
