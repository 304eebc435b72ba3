//! File-transfer session.
//!
//! One session runs per authenticated connection once the file-transfer
//! subsystem is up. It owns the connection's dispatcher (and with it the
//! ownership set) and a table of open handles. Requests are handled one at
//! a time in arrival order; blocking filesystem work runs on the blocking
//! pool.

use std::collections::HashMap;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use protocol::messages::{
    FileRequest, Operation, Request, Response, ResponseBody, Verb, MAX_READ_LEN,
};
use protocol::{Message, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dispatcher::{OperationDispatcher, Outcome};
use crate::files::FsError;
use crate::transport::{SecureChannel, TransportError};

/// Handle identifier handed to the client.
pub type HandleId = String;

/// Default cap on handles one session may hold open at once.
pub const MAX_OPEN_HANDLES: usize = 256;

/// Per-connection request processor.
#[derive(Debug)]
pub struct FileTransferSession {
    dispatcher: Arc<OperationDispatcher>,
    handles: HashMap<HandleId, Arc<File>>,
    handle_limit: usize,
}

impl FileTransferSession {
    /// Creates a session with no open handles.
    pub fn new(dispatcher: OperationDispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            handles: HashMap::new(),
            handle_limit: MAX_OPEN_HANDLES,
        }
    }

    /// Sets the cap on open handles.
    pub fn with_handle_limit(mut self, limit: usize) -> Self {
        self.handle_limit = limit;
        self
    }

    pub fn dispatcher(&self) -> &OperationDispatcher {
        &self.dispatcher
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Processes requests until the peer closes, disconnects, or `shutdown`
    /// fires. A request already being handled runs to completion.
    pub async fn run<S>(
        mut self,
        channel: &mut SecureChannel<S>,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("session stopping on shutdown");
                    break;
                }
                message = channel.recv() => message?,
            };

            match message {
                None => {
                    debug!("peer closed the session");
                    break;
                }
                Some(Message::Request(request)) => {
                    let response = self.handle(request).await;
                    channel.send(Message::Response(response)).await?;
                }
                Some(Message::Disconnect(disconnect)) => {
                    debug!(reason = %disconnect.reason, "peer disconnected");
                    break;
                }
                Some(other) => {
                    warn!(message = ?other, "ignoring unexpected message in session");
                }
            }
        }

        debug!(open_handles = self.handles.len(), "session finished");
        Ok(())
    }

    /// Handles a single request.
    pub async fn handle(&mut self, request: Request) -> Response {
        let body = match request.op {
            Operation::File(req) => self.handle_file(req).await,
            Operation::ReadAt {
                handle,
                offset,
                len,
            } => self.handle_read_at(&handle, offset, len).await,
            Operation::WriteAt {
                handle,
                offset,
                data,
            } => self.handle_write_at(&handle, offset, data).await,
            Operation::Close { handle } => self.handle_close(&handle),
        };

        Response {
            id: request.id,
            body,
        }
    }

    async fn handle_file(&mut self, req: FileRequest) -> ResponseBody {
        let opens = matches!(req.verb, Verb::Read | Verb::Write);
        if opens && self.handles.len() >= self.handle_limit {
            debug!(open_handles = self.handles.len(), "open refused, handle limit reached");
            return ResponseBody::Status {
                code: StatusCode::Failure,
                message: "too many open handles".to_string(),
            };
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let result = tokio::task::spawn_blocking(move || dispatcher.dispatch(&req)).await;

        match result {
            Ok(Ok(Outcome::Opened(file))) => {
                let handle = Uuid::new_v4().to_string();
                self.handles.insert(handle.clone(), Arc::new(file));
                ResponseBody::Handle { handle }
            }
            Ok(Ok(Outcome::Done)) => ResponseBody::ok(),
            Ok(Ok(Outcome::Entries(entries))) => ResponseBody::Name { entries },
            Ok(Err(err)) => failure(&err),
            Err(err) => internal_failure(err),
        }
    }

    async fn handle_read_at(&self, handle: &str, offset: u64, len: u32) -> ResponseBody {
        let Some(file) = self.handles.get(handle).cloned() else {
            return unknown_handle(handle);
        };
        let len = len.min(MAX_READ_LEN) as usize;

        let result = tokio::task::spawn_blocking(move || {
            let mut buffer = vec![0u8; len];
            let n = file.read_at(&mut buffer, offset)?;
            buffer.truncate(n);
            Ok::<_, std::io::Error>(buffer)
        })
        .await;

        match result {
            Ok(Ok(data)) if data.is_empty() && len > 0 => ResponseBody::Status {
                code: StatusCode::Eof,
                message: StatusCode::Eof.to_string(),
            },
            Ok(Ok(data)) => ResponseBody::Data { data },
            Ok(Err(err)) => failure(&FsError::from(err)),
            Err(err) => internal_failure(err),
        }
    }

    async fn handle_write_at(&self, handle: &str, offset: u64, data: Vec<u8>) -> ResponseBody {
        let Some(file) = self.handles.get(handle).cloned() else {
            return unknown_handle(handle);
        };

        let result =
            tokio::task::spawn_blocking(move || file.write_all_at(&data, offset)).await;

        match result {
            Ok(Ok(())) => ResponseBody::ok(),
            Ok(Err(err)) => failure(&FsError::from(err)),
            Err(err) => internal_failure(err),
        }
    }

    fn handle_close(&mut self, handle: &str) -> ResponseBody {
        match self.handles.remove(handle) {
            Some(_) => ResponseBody::ok(),
            None => unknown_handle(handle),
        }
    }
}

fn failure(err: &FsError) -> ResponseBody {
    debug!(error = %err, "request failed");
    ResponseBody::Status {
        code: err.status_code(),
        message: err.client_message(),
    }
}

fn unknown_handle(handle: &str) -> ResponseBody {
    debug!(handle = %handle, "unknown handle");
    ResponseBody::Status {
        code: StatusCode::Failure,
        message: "invalid handle".to_string(),
    }
}

fn internal_failure(err: tokio::task::JoinError) -> ResponseBody {
    warn!(error = %err, "blocking file task failed");
    ResponseBody::Status {
        code: StatusCode::Failure,
        message: "internal error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::{DirectoryPolicy, FilesystemGateway, PathConfiner, SessionOwnershipTracker};
    use protocol::messages::OpenFlags;
    use std::fs;
    use tempfile::TempDir;

    fn session() -> (TempDir, FileTransferSession) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let gateway = FilesystemGateway::new(Arc::new(PathConfiner::new(root).unwrap()));
        let tracker = SessionOwnershipTracker::new(gateway, DirectoryPolicy::ClaimOnCreate);
        (
            dir,
            FileTransferSession::new(OperationDispatcher::new(tracker, 0o600, 0o700)),
        )
    }

    async fn request(session: &mut FileTransferSession, id: u32, op: Operation) -> ResponseBody {
        let response = session.handle(Request { id, op }).await;
        assert_eq!(response.id, id);
        response.body
    }

    async fn open(session: &mut FileTransferSession, verb: Verb, path: &str, flags: OpenFlags) -> String {
        let op = Operation::File(FileRequest::new(verb, path).with_flags(flags));
        match request(session, 1, op).await {
            ResponseBody::Handle { handle } => handle,
            other => panic!("expected handle, got {:?}", other),
        }
    }

    fn code(body: &ResponseBody) -> StatusCode {
        match body {
            ResponseBody::Status { code, .. } => *code,
            other => panic!("expected status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_write_then_read_back() {
        let (dir, mut session) = session();

        let handle = open(&mut session, Verb::Write, "/up.bin", OpenFlags::create_truncate()).await;
        let body = request(
            &mut session,
            2,
            Operation::WriteAt {
                handle: handle.clone(),
                offset: 0,
                data: b"payload".to_vec(),
            },
        )
        .await;
        assert_eq!(code(&body), StatusCode::Ok);
        assert_eq!(session.open_handles(), 1);

        let body = request(&mut session, 3, Operation::Close { handle }).await;
        assert_eq!(code(&body), StatusCode::Ok);
        assert_eq!(session.open_handles(), 0);
        assert_eq!(fs::read(dir.path().join("up.bin")).unwrap(), b"payload");

        let handle = open(&mut session, Verb::Read, "/up.bin", OpenFlags::read_only()).await;
        let body = request(
            &mut session,
            4,
            Operation::ReadAt {
                handle: handle.clone(),
                offset: 3,
                len: 100,
            },
        )
        .await;
        assert_eq!(body, ResponseBody::Data { data: b"load".to_vec() });

        let body = request(
            &mut session,
            5,
            Operation::ReadAt {
                handle,
                offset: 7,
                len: 100,
            },
        )
        .await;
        assert_eq!(code(&body), StatusCode::Eof);
    }

    #[tokio::test]
    async fn test_read_is_capped() {
        let (_dir, mut session) = session();
        let handle = open(&mut session, Verb::Write, "/big", OpenFlags::create_truncate()).await;
        request(
            &mut session,
            2,
            Operation::WriteAt {
                handle: handle.clone(),
                offset: 0,
                data: vec![7u8; 100_000],
            },
        )
        .await;

        let handle = open(&mut session, Verb::Read, "/big", OpenFlags::read_only()).await;
        match request(
            &mut session,
            3,
            Operation::ReadAt {
                handle,
                offset: 0,
                len: u32::MAX,
            },
        )
        .await
        {
            ResponseBody::Data { data } => assert_eq!(data.len(), MAX_READ_LEN as usize),
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let (_dir, mut session) = session();
        for op in [
            Operation::ReadAt {
                handle: "nope".to_string(),
                offset: 0,
                len: 1,
            },
            Operation::WriteAt {
                handle: "nope".to_string(),
                offset: 0,
                data: vec![1],
            },
            Operation::Close {
                handle: "nope".to_string(),
            },
        ] {
            assert_eq!(code(&request(&mut session, 9, op).await), StatusCode::Failure);
        }
    }

    #[tokio::test]
    async fn test_handle_limit() {
        let (dir, session) = session();
        let mut session = session.with_handle_limit(2);
        let first = open(&mut session, Verb::Write, "/a", OpenFlags::create_truncate()).await;
        open(&mut session, Verb::Read, "/a", OpenFlags::read_only()).await;

        let op = Operation::File(
            FileRequest::new(Verb::Write, "/b").with_flags(OpenFlags::create_truncate()),
        );
        assert_eq!(code(&request(&mut session, 2, op).await), StatusCode::Failure);
        assert!(!dir.path().join("b").exists());
        assert_eq!(session.open_handles(), 2);

        // Path-level verbs are not counted.
        let op = Operation::File(FileRequest::new(Verb::Stat, "/a"));
        assert!(matches!(
            request(&mut session, 3, op).await,
            ResponseBody::Name { .. }
        ));

        request(&mut session, 4, Operation::Close { handle: first }).await;
        open(&mut session, Verb::Write, "/b", OpenFlags::create_truncate()).await;
        assert_eq!(session.open_handles(), 2);
    }

    #[tokio::test]
    async fn test_write_on_read_handle_fails() {
        let (_dir, mut session) = session();
        open(&mut session, Verb::Write, "/f", OpenFlags::create_truncate()).await;
        let handle = open(&mut session, Verb::Read, "/f", OpenFlags::read_only()).await;

        let body = request(
            &mut session,
            2,
            Operation::WriteAt {
                handle,
                offset: 0,
                data: b"x".to_vec(),
            },
        )
        .await;
        assert_eq!(code(&body), StatusCode::Failure);
    }

    #[tokio::test]
    async fn test_denied_open_reports_permission_denied() {
        let (dir, mut session) = session();
        fs::write(dir.path().join("secret.txt"), b"s").unwrap();

        let op = Operation::File(
            FileRequest::new(Verb::Read, "/secret.txt").with_flags(OpenFlags::read_only()),
        );
        let body = request(&mut session, 1, op).await;
        match body {
            ResponseBody::Status { code, message } => {
                assert_eq!(code, StatusCode::PermissionDenied);
                assert!(!message.contains("secret"));
            }
            other => panic!("expected status, got {:?}", other),
        }
    }
}
