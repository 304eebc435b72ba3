//! Encrypted message channel over a byte stream.
//!
//! The channel runs a Noise XX handshake over framed messages, then carries
//! MessagePack envelopes as encrypted records. A record is one frame whose
//! payload is a sequence of `len (u16 BE) | ciphertext` chunks, each chunk
//! holding at most one Noise message worth of plaintext.

use std::io;
use std::time::Duration;

use protocol::messages::Envelope;
use protocol::{
    Frame, FrameCodec, HostIdentity, Message, NoiseSession, ProtocolError, FRAME_HEADER_SIZE,
    MAX_PLAINTEXT_SIZE, PROTOCOL_VERSION,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Errors raised by the secure channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Framing, handshake or encryption failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The underlying stream failed.
    #[error("transport i/o error: {0}")]
    Io(#[from] io::Error),

    /// The handshake or login did not finish in time.
    #[error("login timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The peer sent an envelope with another protocol version.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// A record could not be split into chunks.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// The peer closed the stream mid-exchange.
    #[error("connection closed by peer")]
    Closed,
}

/// An established, encrypted channel.
pub struct SecureChannel<S> {
    stream: S,
    noise: NoiseSession,
    codec: FrameCodec,
    next_sequence: u64,
}

impl<S> std::fmt::Debug for SecureChannel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("noise", &self.noise)
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Runs the responder side of the handshake.
    pub async fn accept(stream: S, identity: &HostIdentity) -> Result<Self, TransportError> {
        let mut channel = Self {
            stream,
            noise: NoiseSession::new_responder(identity)?,
            codec: FrameCodec::new(),
            next_sequence: 0,
        };

        // -> e
        let msg1 = channel.read_frame().await?.ok_or(TransportError::Closed)?;
        channel.noise.read_handshake_message(&msg1)?;

        // <- e, ee, s, es
        let msg2 = channel.noise.write_handshake_message(&[])?;
        channel.write_frame(&msg2).await?;

        // -> s, se
        let msg3 = channel.read_frame().await?.ok_or(TransportError::Closed)?;
        channel.noise.read_handshake_message(&msg3)?;

        channel.noise.into_transport()?;
        trace!("responder handshake complete");
        Ok(channel)
    }

    /// Runs the initiator side of the handshake.
    pub async fn connect(stream: S, identity: &HostIdentity) -> Result<Self, TransportError> {
        let mut channel = Self {
            stream,
            noise: NoiseSession::new_initiator(identity)?,
            codec: FrameCodec::new(),
            next_sequence: 0,
        };

        let msg1 = channel.noise.write_handshake_message(&[])?;
        channel.write_frame(&msg1).await?;

        let msg2 = channel.read_frame().await?.ok_or(TransportError::Closed)?;
        channel.noise.read_handshake_message(&msg2)?;

        let msg3 = channel.noise.write_handshake_message(&[])?;
        channel.write_frame(&msg3).await?;

        channel.noise.into_transport()?;
        trace!("initiator handshake complete");
        Ok(channel)
    }

    /// The peer's static Noise key.
    pub fn remote_static(&self) -> Option<[u8; 32]> {
        self.noise.remote_static()
    }

    /// Encrypts and sends one message.
    pub async fn send(&mut self, message: Message) -> Result<(), TransportError> {
        let envelope = Envelope::new(self.next_sequence, message);
        self.next_sequence += 1;
        let plaintext = envelope.to_msgpack().map_err(ProtocolError::from)?;

        let mut record = Vec::with_capacity(plaintext.len() + 64);
        let mut chunks = plaintext.chunks(MAX_PLAINTEXT_SIZE).peekable();
        if chunks.peek().is_none() {
            self.push_chunk(&mut record, &[])?;
        }
        for chunk in chunks {
            self.push_chunk(&mut record, chunk)?;
        }

        self.write_frame(&record).await
    }

    /// Receives and decrypts one message.
    ///
    /// Returns `None` when the peer closed the stream between records.
    pub async fn recv(&mut self) -> Result<Option<Message>, TransportError> {
        let Some(record) = self.read_frame().await? else {
            return Ok(None);
        };

        let mut plaintext = Vec::with_capacity(record.len());
        let mut rest = record.as_slice();
        while !rest.is_empty() {
            let (len, tail) = match rest {
                [hi, lo, tail @ ..] => (u16::from_be_bytes([*hi, *lo]) as usize, tail),
                _ => return Err(TransportError::MalformedRecord("truncated chunk length".into())),
            };
            if tail.len() < len {
                return Err(TransportError::MalformedRecord(format!(
                    "chunk of {} bytes exceeds remaining {}",
                    len,
                    tail.len()
                )));
            }
            let (ciphertext, tail) = tail.split_at(len);
            plaintext.extend_from_slice(&self.noise.decrypt(ciphertext)?);
            rest = tail;
        }

        let envelope = Envelope::from_msgpack(&plaintext).map_err(ProtocolError::from)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(TransportError::UnsupportedVersion(envelope.version));
        }
        Ok(Some(envelope.payload))
    }

    /// Flushes and shuts down the write half.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    fn push_chunk(&mut self, record: &mut Vec<u8>, chunk: &[u8]) -> Result<(), TransportError> {
        let ciphertext = self.noise.encrypt(chunk)?;
        let len = u16::try_from(ciphertext.len())
            .map_err(|_| TransportError::MalformedRecord("chunk exceeds u16 length".into()))?;
        record.extend_from_slice(&len.to_be_bytes());
        record.extend_from_slice(&ciphertext);
        Ok(())
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let bytes = self.codec.encode(&Frame::new(payload.to_vec()))?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads one frame. A clean end of stream before the first header byte
    /// yields `None`; anywhere else it is an error.
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        let first = self.stream.read(&mut header[..1]).await?;
        if first == 0 {
            return Ok(None);
        }
        self.read_exact_or_closed(&mut header[1..]).await?;

        let len = self.codec.parse_header(&header)?;
        let mut payload = vec![0u8; len];
        self.read_exact_or_closed(&mut payload).await?;
        Ok(Some(payload))
    }

    async fn read_exact_or_closed(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        match self.stream.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Err(TransportError::Closed),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::messages::{Disconnect, Operation, Request};
    use protocol::noise_public_key;
    use tokio::io::{duplex, DuplexStream};

    async fn pair(server: &HostIdentity) -> (SecureChannel<DuplexStream>, SecureChannel<DuplexStream>) {
        let (a, b) = duplex(64 * 1024);
        let client_identity = HostIdentity::generate();
        let (server, client) = tokio::join!(
            SecureChannel::accept(a, server),
            SecureChannel::connect(b, &client_identity)
        );
        (server.unwrap(), client.unwrap())
    }

    #[tokio::test]
    async fn test_message_exchange() {
        let identity = HostIdentity::generate();
        let (mut server, mut client) = pair(&identity).await;

        client
            .send(Message::Disconnect(Disconnect {
                reason: "bye".to_string(),
            }))
            .await
            .unwrap();

        match server.recv().await.unwrap() {
            Some(Message::Disconnect(d)) => assert_eq!(d.reason, "bye"),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_large_message_is_chunked() {
        let identity = HostIdentity::generate();
        let (mut server, mut client) = pair(&identity).await;
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

        let message = Message::Request(Request {
            id: 7,
            op: Operation::WriteAt {
                handle: "h".to_string(),
                offset: 0,
                data: data.clone(),
            },
        });
        let send = client.send(message);
        let recv = server.recv();
        let (sent, received) = tokio::join!(send, recv);
        sent.unwrap();

        match received.unwrap() {
            Some(Message::Request(Request {
                op: Operation::WriteAt { data: got, .. },
                ..
            })) => assert_eq!(got, data),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_sees_server_static_key() {
        let identity = HostIdentity::generate();
        let (_server, client) = pair(&identity).await;

        let expected = noise_public_key(&identity).unwrap();
        assert_eq!(client.remote_static(), Some(expected));
    }

    #[tokio::test]
    async fn test_clean_close_yields_none() {
        let identity = HostIdentity::generate();
        let (mut server, mut client) = pair(&identity).await;

        client.shutdown().await.unwrap();
        drop(client);
        assert!(server.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_garbage_handshake_is_rejected() {
        let identity = HostIdentity::generate();
        let (a, mut b) = duplex(1024);

        b.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await.unwrap();
        let err = SecureChannel::accept(a, &identity).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::InvalidFrameMagic { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_during_handshake() {
        let identity = HostIdentity::generate();
        let (a, b) = duplex(1024);
        drop(b);

        let err = SecureChannel::accept(a, &identity).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
