//! Client for the file-drop server.
//!
//! Drives the same handshake, login and subsystem sequence as a regular
//! client and exposes each file verb as an async method. Used by the
//! integration tests and handy for scripting uploads.

use protocol::messages::{
    AuthRequest, AuthResult, ChannelOpen, ChannelRequest, Disconnect, FileAttributes, FileEntry,
    FileRequest, OpenFlags, Operation, Request, ResponseBody, Verb, MAX_READ_LEN,
    SESSION_CHANNEL,
};
use protocol::{HostIdentity, Message, StatusCode};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::transport::{SecureChannel, TransportError};

/// Errors returned by [`DropClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a non-OK status.
    #[error("{code}: {message}")]
    Status { code: StatusCode, message: String },

    /// The server answered with something the call did not expect.
    #[error("unexpected reply: {0}")]
    Unexpected(String),

    /// The server closed the connection.
    #[error("server closed the connection")]
    Closed,
}

impl ClientError {
    /// The status code, when the server reported one.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// A connected client.
#[derive(Debug)]
pub struct DropClient<S> {
    channel: SecureChannel<S>,
    next_id: u32,
}

impl<S> DropClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Runs the handshake with an ephemeral client key.
    pub async fn connect(stream: S) -> ClientResult<Self> {
        let identity = HostIdentity::generate();
        let channel = SecureChannel::connect(stream, &identity).await?;
        Ok(Self {
            channel,
            next_id: 1,
        })
    }

    /// The server's static key as seen in the handshake.
    pub fn server_key(&self) -> Option<[u8; 32]> {
        self.channel.remote_static()
    }

    /// Sends one login attempt and returns the server's verdict.
    pub async fn authenticate(&mut self, username: &str, password: &str) -> ClientResult<AuthResult> {
        self.channel
            .send(Message::AuthRequest(AuthRequest {
                username: username.to_string(),
                password: password.to_string(),
            }))
            .await?;
        match self.recv().await? {
            Message::AuthResult(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    /// Opens a channel of the given type. Returns whether it was accepted.
    pub async fn open_channel(&mut self, channel_type: &str) -> ClientResult<bool> {
        self.channel
            .send(Message::ChannelOpen(ChannelOpen {
                channel_type: channel_type.to_string(),
            }))
            .await?;
        match self.recv().await? {
            Message::ChannelOpenResult(result) => Ok(result.accepted),
            other => Err(unexpected(other)),
        }
    }

    /// Sends a channel request. Returns whether it was granted.
    pub async fn channel_request(&mut self, request: ChannelRequest) -> ClientResult<bool> {
        self.channel.send(Message::ChannelRequest(request)).await?;
        match self.recv().await? {
            Message::ChannelRequestResult(result) => Ok(result.accepted),
            other => Err(unexpected(other)),
        }
    }

    /// Opens a session channel and starts the file-transfer subsystem.
    pub async fn open_subsystem(&mut self) -> ClientResult<()> {
        if !self.open_channel(SESSION_CHANNEL).await? {
            return Err(ClientError::Unexpected("session channel rejected".into()));
        }
        if !self.channel_request(ChannelRequest::file_transfer()).await? {
            return Err(ClientError::Unexpected("subsystem rejected".into()));
        }
        Ok(())
    }

    /// Sends one request and waits for its response body.
    pub async fn request(&mut self, op: Operation) -> ClientResult<ResponseBody> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        self.channel.send(Message::Request(Request { id, op })).await?;
        match self.recv().await? {
            Message::Response(response) if response.id == id => Ok(response.body),
            other => Err(unexpected(other)),
        }
    }

    /// Uploads `data` to `path`, creating or truncating it.
    pub async fn write_file(&mut self, path: &str, data: &[u8]) -> ClientResult<()> {
        let handle = self
            .open(FileRequest::new(Verb::Write, path).with_flags(OpenFlags::create_truncate()))
            .await?;

        let mut offset = 0u64;
        for chunk in data.chunks(MAX_READ_LEN as usize) {
            let body = self
                .request(Operation::WriteAt {
                    handle: handle.clone(),
                    offset,
                    data: chunk.to_vec(),
                })
                .await?;
            expect_ok(body)?;
            offset += chunk.len() as u64;
        }

        self.close(handle).await
    }

    /// Downloads the whole of `path`.
    pub async fn read_file(&mut self, path: &str) -> ClientResult<Vec<u8>> {
        let handle = self
            .open(FileRequest::new(Verb::Read, path).with_flags(OpenFlags::read_only()))
            .await?;

        let mut contents = Vec::new();
        loop {
            let body = self
                .request(Operation::ReadAt {
                    handle: handle.clone(),
                    offset: contents.len() as u64,
                    len: MAX_READ_LEN,
                })
                .await?;
            match body {
                ResponseBody::Data { data } => contents.extend_from_slice(&data),
                ResponseBody::Status {
                    code: StatusCode::Eof,
                    ..
                } => break,
                other => return Err(status_or_unexpected(other)),
            }
        }

        self.close(handle).await?;
        Ok(contents)
    }

    /// Truncates or extends `path` to `size` bytes.
    pub async fn set_size(&mut self, path: &str, size: u64) -> ClientResult<()> {
        let req = FileRequest::new(Verb::SetAttributes, path).with_attrs(FileAttributes {
            size: Some(size),
            permissions: None,
        });
        self.simple(req).await
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> ClientResult<()> {
        self.simple(FileRequest::new(Verb::Rename, from).with_target(to))
            .await
    }

    pub async fn remove_dir(&mut self, path: &str) -> ClientResult<()> {
        self.simple(FileRequest::new(Verb::RemoveDirectory, path))
            .await
    }

    pub async fn remove_file(&mut self, path: &str) -> ClientResult<()> {
        self.simple(FileRequest::new(Verb::RemoveFile, path)).await
    }

    pub async fn make_dir(&mut self, path: &str) -> ClientResult<()> {
        self.simple(FileRequest::new(Verb::MakeDirectory, path))
            .await
    }

    /// Creates `link` as a hard link to `existing`.
    pub async fn hard_link(&mut self, existing: &str, link: &str) -> ClientResult<()> {
        self.simple(FileRequest::new(Verb::HardLink, existing).with_target(link))
            .await
    }

    /// Creates `link` as a symbolic link pointing at `target`.
    pub async fn symlink(&mut self, target: &str, link: &str) -> ClientResult<()> {
        self.simple(FileRequest::new(Verb::Symlink, target).with_target(link))
            .await
    }

    pub async fn list_dir(&mut self, path: &str) -> ClientResult<Vec<FileEntry>> {
        self.entries(FileRequest::new(Verb::List, path)).await
    }

    pub async fn stat(&mut self, path: &str) -> ClientResult<FileEntry> {
        self.single_entry(FileRequest::new(Verb::Stat, path)).await
    }

    /// Returns the entry a link resolves to; its name is the client path.
    pub async fn read_link(&mut self, path: &str) -> ClientResult<FileEntry> {
        self.single_entry(FileRequest::new(Verb::ReadLink, path))
            .await
    }

    /// Sends a raw path-level request and returns the reply.
    pub async fn file_request(&mut self, req: FileRequest) -> ClientResult<ResponseBody> {
        self.request(Operation::File(req)).await
    }

    /// Says goodbye and shuts down the write half.
    pub async fn disconnect(mut self) -> ClientResult<()> {
        self.channel
            .send(Message::Disconnect(Disconnect {
                reason: "client done".to_string(),
            }))
            .await?;
        self.channel.shutdown().await?;
        Ok(())
    }

    /// Waits for the next message, `None` once the server has hung up.
    pub async fn next_message(&mut self) -> ClientResult<Option<Message>> {
        Ok(self.channel.recv().await?)
    }

    async fn open(&mut self, req: FileRequest) -> ClientResult<String> {
        match self.file_request(req).await? {
            ResponseBody::Handle { handle } => Ok(handle),
            other => Err(status_or_unexpected(other)),
        }
    }

    async fn close(&mut self, handle: String) -> ClientResult<()> {
        let body = self.request(Operation::Close { handle }).await?;
        expect_ok(body)
    }

    async fn simple(&mut self, req: FileRequest) -> ClientResult<()> {
        let body = self.file_request(req).await?;
        expect_ok(body)
    }

    async fn entries(&mut self, req: FileRequest) -> ClientResult<Vec<FileEntry>> {
        match self.file_request(req).await? {
            ResponseBody::Name { entries } => Ok(entries),
            other => Err(status_or_unexpected(other)),
        }
    }

    async fn single_entry(&mut self, req: FileRequest) -> ClientResult<FileEntry> {
        let mut entries = self.entries(req).await?;
        match entries.len() {
            1 => Ok(entries.remove(0)),
            n => Err(ClientError::Unexpected(format!("{} entries", n))),
        }
    }

    async fn recv(&mut self) -> ClientResult<Message> {
        self.channel.recv().await?.ok_or(ClientError::Closed)
    }
}

fn expect_ok(body: ResponseBody) -> ClientResult<()> {
    match body {
        ResponseBody::Status {
            code: StatusCode::Ok,
            ..
        } => Ok(()),
        other => Err(status_or_unexpected(other)),
    }
}

fn status_or_unexpected(body: ResponseBody) -> ClientError {
    match body {
        ResponseBody::Status { code, message } => ClientError::Status { code, message },
        other => ClientError::Unexpected(format!("{:?}", other)),
    }
}

fn unexpected(message: Message) -> ClientError {
    match message {
        Message::Disconnect(d) => ClientError::Unexpected(format!("disconnected: {}", d.reason)),
        other => ClientError::Unexpected(format!("{:?}", other)),
    }
}
