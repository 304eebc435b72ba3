//! # File-drop Protocol Library
//!
//! Wire definitions and cryptographic primitives shared by the file-drop
//! server and its clients.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Application Messages           │  MessagePack-encoded
//! ├─────────────────────────────────────────┤
//! │           Noise Encryption              │  ChaCha20-Poly1305
//! ├─────────────────────────────────────────┤
//! │              Framing                    │  Length-prefixed
//! ├─────────────────────────────────────────┤
//! │                 TCP                     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Envelope, Frame, FrameCodec, HostIdentity, Message};
//! use protocol::messages::{FileRequest, Operation, Request, Verb};
//!
//! let identity = HostIdentity::generate();
//! println!("host key: {}", identity.fingerprint());
//!
//! let message = Message::Request(Request {
//!     id: 1,
//!     op: Operation::File(FileRequest::new(Verb::Stat, "/upload.bin")),
//! });
//! let bytes = Envelope::new(1, message).to_msgpack().unwrap();
//! let frame_bytes = FrameCodec::new().encode(&Frame::new(bytes)).unwrap();
//! assert!(frame_bytes.starts_with(b"FDRP"));
//! ```
//!
//! ## Modules
//!
//! - [`crypto`]: Host identity keys and credential digests
//! - [`pem`]: PEM block scanner for streamed key input
//! - [`messages`]: Protocol message definitions
//! - [`framing`]: Frame codec
//! - [`noise`]: Noise XX handshake and encryption
//! - [`error`]: Error types

pub mod crypto;
pub mod error;
pub mod framing;
pub mod messages;
pub mod noise;
pub mod pem;

pub use crypto::{compute_digest, Credential, HostIdentity, PemKeyPair, DIGEST_LENGTH};
pub use error::{ProtocolError, Result};
pub use framing::{Frame, FrameCodec, FRAME_HEADER_SIZE, FRAME_MAGIC, MAX_FRAME_SIZE};
pub use messages::{Envelope, Message, StatusCode, PROTOCOL_VERSION};
pub use noise::{
    noise_public_key, HandshakePhase, NoiseSession, Role, MAX_NOISE_MESSAGE_SIZE,
    MAX_PLAINTEXT_SIZE, NOISE_OVERHEAD,
};
pub use pem::{scan_key_blocks, KeyBlocks, PemScanner, ScanState};
