//! Protocol message definitions for the file-drop service.
//!
//! A connection moves through three stages, each with its own messages:
//!
//! 1. Password authentication (`AuthRequest` / `AuthResult`).
//! 2. Channel and subsystem negotiation (`ChannelOpen`, `ChannelRequest`).
//! 3. File-transfer requests (`Request` / `Response`).
//!
//! All messages are serialized using MessagePack inside an [`Envelope`].

use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// The only channel type a server accepts.
pub const SESSION_CHANNEL: &str = "session";

/// Channel request type used to start a subsystem.
pub const SUBSYSTEM_REQUEST: &str = "subsystem";

/// Name of the file-transfer subsystem.
pub const FILE_TRANSFER_SUBSYSTEM: &str = "sftp";

/// Largest payload a single `ReadAt` returns.
pub const MAX_READ_LEN: u32 = 32 * 1024;

/// Envelope wrapper for all protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// Sequence number, incremented per message by each sender.
    pub sequence: u64,
    /// The actual message payload.
    pub payload: Message,
}

impl Envelope {
    /// Create a new envelope with the current protocol version.
    pub fn new(sequence: u64, payload: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            payload,
        }
    }

    /// Serialize the envelope to MessagePack bytes.
    ///
    /// Structs are written as maps keyed by field name; the tagged enums
    /// with struct variants cannot be decoded from the compact array form.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// Deserialize an envelope from MessagePack bytes.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Top-level message enum containing all message types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    // Authentication
    /// Password login attempt.
    AuthRequest(AuthRequest),
    /// Outcome of a login attempt.
    AuthResult(AuthResult),

    // Channel negotiation
    /// Request to open a channel.
    ChannelOpen(ChannelOpen),
    /// Answer to a channel open.
    ChannelOpenResult(ChannelOpenResult),
    /// Request on an open channel (subsystem, shell, exec, ...).
    ChannelRequest(ChannelRequest),
    /// Answer to a channel request.
    ChannelRequestResult(ChannelRequestResult),

    // File transfer
    /// A file-transfer request.
    Request(Request),
    /// The answer to a file-transfer request.
    Response(Response),

    /// Either side is about to close the connection.
    Disconnect(Disconnect),
}

/// Password login attempt.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Claimed username.
    pub username: String,
    /// Plaintext password, protected by the channel encryption.
    pub password: String,
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Outcome of a login attempt.
///
/// A rejection never says whether the username or the password was wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether the login succeeded.
    pub accepted: bool,
    /// Attempts left before the server hangs up.
    pub remaining_attempts: u32,
}

/// Request to open a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOpen {
    /// Channel type, only `"session"` is accepted.
    pub channel_type: String,
}

/// Answer to a channel open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOpenResult {
    /// Whether the channel was opened.
    pub accepted: bool,
    /// Rejection reason.
    pub reason: Option<String>,
}

/// Request on an open channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRequest {
    /// Request type such as `"subsystem"`, `"shell"` or `"exec"`.
    pub request_type: String,
    /// Subsystem name or command, depending on the request type.
    pub name: Option<String>,
}

impl ChannelRequest {
    /// Builds a request for the file-transfer subsystem.
    pub fn file_transfer() -> Self {
        Self {
            request_type: SUBSYSTEM_REQUEST.to_string(),
            name: Some(FILE_TRANSFER_SUBSYSTEM.to_string()),
        }
    }

    /// Returns whether this request asks for the file-transfer subsystem.
    pub fn is_file_transfer(&self) -> bool {
        self.request_type == SUBSYSTEM_REQUEST
            && self.name.as_deref() == Some(FILE_TRANSFER_SUBSYSTEM)
    }
}

/// Answer to a channel request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRequestResult {
    /// Whether the request was granted.
    pub accepted: bool,
}

/// Connection is closing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disconnect {
    /// Human-readable reason.
    pub reason: String,
}

/// A file-transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Client-chosen identifier echoed in the response.
    pub id: u32,
    /// The operation to perform.
    pub op: Operation,
}

/// File-transfer operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args")]
pub enum Operation {
    /// A path-level verb (open, rename, list, ...).
    File(FileRequest),
    /// Read from an open handle.
    ReadAt {
        /// Handle returned by a read or write verb.
        handle: String,
        /// Byte offset.
        offset: u64,
        /// Maximum number of bytes to return.
        len: u32,
    },
    /// Write to an open handle.
    WriteAt {
        /// Handle returned by a write verb.
        handle: String,
        /// Byte offset.
        offset: u64,
        /// Bytes to write.
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    /// Release an open handle.
    Close {
        /// Handle to release.
        handle: String,
    },
}

/// A path-level request.
///
/// Mirrors the decoded request of a file-transfer protocol: a verb, a primary
/// path, an optional second path, open flags and optional attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRequest {
    /// What to do.
    pub verb: Verb,
    /// Primary path. For `Symlink` this is the link target.
    pub path: String,
    /// Second path. Rename destination, hard link name, or symlink name.
    pub target: Option<String>,
    /// Open flags for `Read` and `Write`.
    pub flags: OpenFlags,
    /// Attributes for `Write` and `SetAttributes`.
    pub attrs: FileAttributes,
}

impl FileRequest {
    /// Builds a request with no second path, flags, or attributes.
    pub fn new(verb: Verb, path: impl Into<String>) -> Self {
        Self {
            verb,
            path: path.into(),
            target: None,
            flags: OpenFlags::default(),
            attrs: FileAttributes::default(),
        }
    }

    /// Sets the second path.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Sets the open flags.
    pub fn with_flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the attributes.
    pub fn with_attrs(mut self, attrs: FileAttributes) -> Self {
        self.attrs = attrs;
        self
    }
}

/// Path-level verbs.
///
/// Encoded as a string on the wire. Names this build does not know decode
/// to [`Verb::Other`] so the server can answer them instead of dropping the
/// connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Verb {
    /// Open for reading.
    Read,
    /// Open for writing, optionally creating.
    Write,
    /// Change attributes (only size is honored).
    SetAttributes,
    /// Rename without overwrite.
    Rename,
    /// Remove an empty directory.
    RemoveDirectory,
    /// Remove a file.
    RemoveFile,
    /// Create a directory.
    MakeDirectory,
    /// Create a hard link.
    HardLink,
    /// Create a symbolic link.
    Symlink,
    /// List a directory.
    List,
    /// Stat a path.
    Stat,
    /// Resolve a symbolic link.
    ReadLink,
    /// Any verb name not listed above.
    Other(String),
}

impl Verb {
    /// Returns the wire name of the verb.
    pub fn as_str(&self) -> &str {
        match self {
            Verb::Read => "read",
            Verb::Write => "write",
            Verb::SetAttributes => "setstat",
            Verb::Rename => "rename",
            Verb::RemoveDirectory => "rmdir",
            Verb::RemoveFile => "remove",
            Verb::MakeDirectory => "mkdir",
            Verb::HardLink => "link",
            Verb::Symlink => "symlink",
            Verb::List => "list",
            Verb::Stat => "stat",
            Verb::ReadLink => "readlink",
            Verb::Other(name) => name,
        }
    }
}

impl From<String> for Verb {
    fn from(name: String) -> Self {
        match name.as_str() {
            "read" => Verb::Read,
            "write" => Verb::Write,
            "setstat" => Verb::SetAttributes,
            "rename" => Verb::Rename,
            "rmdir" => Verb::RemoveDirectory,
            "remove" => Verb::RemoveFile,
            "mkdir" => Verb::MakeDirectory,
            "link" => Verb::HardLink,
            "symlink" => Verb::Symlink,
            "list" => Verb::List,
            "stat" => Verb::Stat,
            "readlink" => Verb::ReadLink,
            _ => Verb::Other(name),
        }
    }
}

impl From<Verb> for String {
    fn from(verb: Verb) -> Self {
        match verb {
            Verb::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generic open flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFlags {
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// Writes go to the end of the file.
    pub append: bool,
    /// Create the file if it does not exist.
    pub create: bool,
    /// With `create`, fail if the file exists.
    pub exclusive: bool,
    /// Truncate the file on open.
    pub truncate: bool,
}

impl OpenFlags {
    /// Read-only open.
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Write, create if missing, truncate if present.
    pub fn create_truncate() -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
            ..Self::default()
        }
    }

    /// Write to an existing file without truncating.
    pub fn write_existing() -> Self {
        Self {
            write: true,
            ..Self::default()
        }
    }
}

/// Optional file attributes carried by a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    /// File size, honored by `SetAttributes` as a truncate.
    pub size: Option<u64>,
    /// Requested permission bits. The server default mode wins.
    pub permissions: Option<u32>,
}

/// A file-transfer response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Identifier of the request being answered.
    pub id: u32,
    /// Response body.
    pub body: ResponseBody,
}

/// Response payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum ResponseBody {
    /// A new handle for a read or write verb.
    Handle {
        /// Opaque handle string.
        handle: String,
    },
    /// Bytes read from a handle.
    Data {
        /// The bytes.
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    /// Directory entries, or the single entry of stat and readlink.
    Name {
        /// The entries.
        entries: Vec<FileEntry>,
    },
    /// Completion status.
    Status {
        /// Status code.
        code: StatusCode,
        /// Human-readable message.
        message: String,
    },
}

impl ResponseBody {
    /// A successful status with an empty message.
    pub fn ok() -> Self {
        ResponseBody::Status {
            code: StatusCode::Ok,
            message: String::new(),
        }
    }
}

/// Status codes reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// Success.
    Ok,
    /// End of file on read.
    Eof,
    /// The path does not exist.
    NoSuchFile,
    /// Not allowed: not owned, outside the root, or refused by the host.
    PermissionDenied,
    /// Anything else.
    Failure,
    /// The destination already exists.
    FileAlreadyExists,
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StatusCode::Ok => "ok",
            StatusCode::Eof => "end of file",
            StatusCode::NoSuchFile => "no such file",
            StatusCode::PermissionDenied => "permission denied",
            StatusCode::Failure => "failure",
            StatusCode::FileAlreadyExists => "file already exists",
        };
        f.write_str(text)
    }
}

/// A single file or directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Entry name (not full path), or the link target for readlink.
    pub name: String,
    /// Entry type.
    pub entry_type: FileEntryType,
    /// Size in bytes.
    pub size: u64,
    /// Unix mode bits including the file type.
    pub mode: u32,
    /// Last modified timestamp (Unix epoch seconds).
    pub modified: u64,
}

/// Type of file entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileEntryType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Anything else (socket, fifo, device).
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) -> Message {
        let envelope = Envelope::new(7, msg);
        let bytes = envelope.to_msgpack().unwrap();
        let decoded = Envelope::from_msgpack(&bytes).unwrap();
        assert_eq!(decoded.version, PROTOCOL_VERSION);
        assert_eq!(decoded.sequence, 7);
        decoded.payload
    }

    #[test]
    fn test_file_request_roundtrip() {
        let msg = Message::Request(Request {
            id: 3,
            op: Operation::File(
                FileRequest::new(Verb::Rename, "/a.txt")
                    .with_target("/b.txt")
                    .with_attrs(FileAttributes {
                        size: Some(10),
                        permissions: None,
                    }),
            ),
        });
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn test_write_at_roundtrip() {
        let msg = Message::Request(Request {
            id: 9,
            op: Operation::WriteAt {
                handle: "h1".to_string(),
                offset: 4096,
                data: vec![0, 1, 2, 255],
            },
        });
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn test_name_response_roundtrip() {
        let msg = Message::Response(Response {
            id: 1,
            body: ResponseBody::Name {
                entries: vec![FileEntry {
                    name: "a.txt".to_string(),
                    entry_type: FileEntryType::File,
                    size: 5,
                    mode: 0o100660,
                    modified: 1704067200,
                }],
            },
        });
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn test_every_operation_roundtrips() {
        let ops = [
            Operation::File(FileRequest::new(Verb::Stat, "/x")),
            Operation::ReadAt {
                handle: "h".to_string(),
                offset: 0,
                len: MAX_READ_LEN,
            },
            Operation::WriteAt {
                handle: "h".to_string(),
                offset: 0,
                data: Vec::new(),
            },
            Operation::WriteAt {
                handle: "h".to_string(),
                offset: 1 << 40,
                data: vec![7; 60_000],
            },
            Operation::Close {
                handle: "h".to_string(),
            },
        ];
        for (id, op) in ops.into_iter().enumerate() {
            let msg = Message::Request(Request { id: id as u32, op });
            assert_eq!(roundtrip(msg.clone()), msg);
        }
    }

    #[test]
    fn test_every_response_body_roundtrips() {
        let bodies = [
            ResponseBody::Handle {
                handle: "0b7c".to_string(),
            },
            ResponseBody::Data {
                data: vec![1; MAX_READ_LEN as usize],
            },
            ResponseBody::Name {
                entries: Vec::new(),
            },
            ResponseBody::ok(),
            ResponseBody::Status {
                code: StatusCode::FileAlreadyExists,
                message: "file already exists".to_string(),
            },
        ];
        for (id, body) in bodies.into_iter().enumerate() {
            let msg = Message::Response(Response { id: id as u32, body });
            assert_eq!(roundtrip(msg.clone()), msg);
        }
    }

    #[test]
    fn test_unknown_verb_survives_decoding() {
        let msg = Message::Request(Request {
            id: 2,
            op: Operation::File(FileRequest::new(Verb::Other("chown".to_string()), "/x")),
        });
        match roundtrip(msg) {
            Message::Request(Request {
                op: Operation::File(req),
                ..
            }) => assert_eq!(req.verb, Verb::Other("chown".to_string())),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_verb_names_are_stable() {
        for verb in [
            Verb::Read,
            Verb::Write,
            Verb::SetAttributes,
            Verb::Rename,
            Verb::RemoveDirectory,
            Verb::RemoveFile,
            Verb::MakeDirectory,
            Verb::HardLink,
            Verb::Symlink,
            Verb::List,
            Verb::Stat,
            Verb::ReadLink,
        ] {
            let name: String = verb.clone().into();
            assert_eq!(Verb::from(name), verb);
        }
    }

    #[test]
    fn test_channel_request_file_transfer() {
        assert!(ChannelRequest::file_transfer().is_file_transfer());

        let shell = ChannelRequest {
            request_type: "shell".to_string(),
            name: None,
        };
        assert!(!shell.is_file_transfer());

        let other_subsystem = ChannelRequest {
            request_type: SUBSYSTEM_REQUEST.to_string(),
            name: Some("netconf".to_string()),
        };
        assert!(!other_subsystem.is_file_transfer());
    }

    #[test]
    fn test_auth_request_debug_redacts_password() {
        let request = AuthRequest {
            username: "alice".to_string(),
            password: "hunter22".to_string(),
        };
        let debug = format!("{:?}", request);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter22"));
    }

    #[test]
    fn test_open_flag_presets() {
        let flags = OpenFlags::create_truncate();
        assert!(flags.write && flags.create && flags.truncate);
        assert!(!flags.read && !flags.exclusive && !flags.append);
        assert!(OpenFlags::read_only().read);
    }

    #[test]
    fn test_malformed_bytes_fail_to_decode() {
        assert!(Envelope::from_msgpack(&[0xc1, 0x00]).is_err());
    }
}
