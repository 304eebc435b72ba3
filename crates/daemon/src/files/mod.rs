//! Confined, ownership-checked filesystem access.
//!
//! Three layers, each wrapping the next:
//!
//! - [`PathConfiner`] maps client paths into the data root.
//! - [`FilesystemGateway`] performs host filesystem calls on confined paths.
//! - [`SessionOwnershipTracker`] lets a session touch only what it created.
//!
//! # Security
//!
//! Confinement is lexical. Symlinks inside the root are not resolved before
//! the ownership check, so ownership keys are the normalized client paths.

pub mod confine;
pub mod gateway;
pub mod ownership;

use std::io;

use protocol::StatusCode;
use thiserror::Error;

pub use confine::PathConfiner;
pub use gateway::{DirectoryItem, FilesystemGateway};
pub use ownership::{DirectoryPolicy, SessionOwnershipTracker};

/// Errors produced by the file layers.
#[derive(Debug, Error)]
pub enum FsError {
    /// The path cannot be mapped inside the data root.
    #[error("path escapes the data root: {0}")]
    Confinement(String),

    /// The session does not own the path.
    #[error("path is not owned by this session: {0}")]
    NotOwned(String),

    /// The request is malformed for the operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The destination of a rename already exists.
    #[error("destination already exists: {0}")]
    AlreadyExists(String),

    /// The verb is not implemented.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Host filesystem error, passed through unchanged.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FsError {
    /// Maps the error to the status code reported to the client.
    ///
    /// Ownership and confinement failures both become `PermissionDenied`, so
    /// a session cannot tell an unowned path from a missing one.
    pub fn status_code(&self) -> StatusCode {
        match self {
            FsError::Confinement(_) | FsError::NotOwned(_) => StatusCode::PermissionDenied,
            FsError::AlreadyExists(_) => StatusCode::FileAlreadyExists,
            FsError::InvalidArgument(_) | FsError::Unsupported(_) => StatusCode::Failure,
            FsError::Io(err) => match err.kind() {
                io::ErrorKind::NotFound => StatusCode::NoSuchFile,
                io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
                io::ErrorKind::AlreadyExists => StatusCode::FileAlreadyExists,
                io::ErrorKind::UnexpectedEof => StatusCode::Eof,
                _ => StatusCode::Failure,
            },
        }
    }

    /// Message safe to send to the client.
    ///
    /// Never includes host paths.
    pub fn client_message(&self) -> String {
        match self {
            FsError::Confinement(_) | FsError::NotOwned(_) => "permission denied".to_string(),
            FsError::AlreadyExists(_) => "file already exists".to_string(),
            FsError::InvalidArgument(reason) => format!("invalid argument: {}", reason),
            FsError::Unsupported(verb) => format!("unsupported operation: {}", verb),
            FsError::Io(err) => err.kind().to_string(),
        }
    }
}
