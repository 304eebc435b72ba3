//! # File-drop Daemon Library
//!
//! A single-user file upload server. Clients log in with one configured
//! username and password, then drive a file-transfer session confined to a
//! data root. Each session may only read or change the paths it created
//! itself.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        DropServer                           │
//! │       accept loop, auth, subsystem, idle shutdown           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SecureChannel          │  FileTransferSession (per conn)   │
//! │  Noise XX + records     │  handles, request loop            │
//! ├─────────────────────────┼───────────────────────────────────┤
//! │                         │  OperationDispatcher              │
//! │                         ├───────────────────────────────────┤
//! │                         │  SessionOwnershipTracker          │
//! │                         ├───────────────────────────────────┤
//! │                         │  FilesystemGateway + PathConfiner │
//! └─────────────────────────┴───────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use filedrop_daemon::{DropServer, ServerConfig};
//! use protocol::{Credential, HostIdentity};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::new(
//!         Credential::from_password("alice", "hunter22"),
//!         HostIdentity::generate(),
//!         "/srv/drop",
//!     );
//!     let server = DropServer::new(config)?;
//!     server.serve_tcp("0.0.0.0:2022").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: TOML configuration and defaults
//! - [`files`]: Path confinement, filesystem access, ownership
//! - [`dispatcher`]: Verb handling on top of ownership
//! - [`session`]: Per-connection request loop and handle table
//! - [`transport`]: Encrypted message channel
//! - [`server`]: Connection supervisor and lifecycle
//! - [`client`]: Client for scripting and tests
//! - [`keys`]: Host key loading and generation
//! - [`systemd`]: Socket activation and readiness notification

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod files;
pub mod keys;
pub mod server;
pub mod session;
pub mod systemd;
pub mod transport;

// Re-export protocol for convenience
pub use protocol;

pub use client::{ClientError, DropClient};
pub use config::Config;
pub use dispatcher::{OperationDispatcher, Outcome};
pub use files::{
    DirectoryPolicy, FilesystemGateway, FsError, PathConfiner, SessionOwnershipTracker,
};
pub use keys::{load_or_create_host_key, KeyError};
pub use server::{
    memory_pair, Acceptor, DropServer, MemoryAcceptor, MemoryConnector, ServerConfig,
    ServerError, ServerEvent, ServerState,
};
pub use session::FileTransferSession;
pub use transport::{SecureChannel, TransportError};
