//! Noise protocol handshake and transport encryption.
//!
//! Every connection starts with a Noise XX handshake. The server acts as the
//! responder and uses a static key derived from its host identity, so a
//! client can pin the server by the static key it observes. After the three
//! handshake messages the session switches to transport mode and every
//! record is sealed with ChaCha20-Poly1305.
//!
//! ## Noise XX Pattern
//! ```text
//! -> e
//! <- e, ee, s, es
//! -> s, se
//! ```

use snow::{Builder, HandshakeState, TransportState};

use crate::crypto::HostIdentity;
use crate::error::{ProtocolError, Result};

/// The Noise protocol pattern used for handshakes.
///
/// We use Noise_XX_25519_ChaChaPoly_BLAKE2s:
/// - XX: Mutual static keys with identity hiding
/// - 25519: Curve25519 for DH key exchange
/// - ChaChaPoly: ChaCha20-Poly1305 for AEAD
/// - BLAKE2s: BLAKE2s for hashing
const NOISE_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_BLAKE2s";

/// Maximum size for a Noise protocol message.
///
/// This includes handshake messages and encrypted transport payloads.
pub const MAX_NOISE_MESSAGE_SIZE: usize = 65535;

/// Overhead added by Noise encryption (Poly1305 tag).
pub const NOISE_OVERHEAD: usize = 16;

/// Largest plaintext that fits in a single transport message.
pub const MAX_PLAINTEXT_SIZE: usize = MAX_NOISE_MESSAGE_SIZE - NOISE_OVERHEAD;

/// State of the Noise handshake process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Initiator: Ready to send first message (-> e)
    InitiatorStart,
    /// Initiator: Waiting for response (<- e, ee, s, es)
    InitiatorWaitingForResponse,
    /// Initiator: Ready to send final message (-> s, se)
    InitiatorSendFinal,
    /// Responder: Waiting for first message (-> e)
    ResponderStart,
    /// Responder: Ready to send response (<- e, ee, s, es)
    ResponderSendResponse,
    /// Responder: Waiting for final message (-> s, se)
    ResponderWaitingForFinal,
    /// Handshake complete, ready for transport
    Complete,
}

/// Role in the Noise handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates the handshake (client)
    Initiator,
    /// Responds to the handshake (server)
    Responder,
}

/// A Noise protocol session for secure communication.
///
/// ## Usage
///
/// ```ignore
/// let mut initiator = NoiseSession::new_initiator(&identity)?;
/// let msg1 = initiator.write_handshake_message(&[])?;
/// // Send msg1, receive msg2...
/// initiator.read_handshake_message(&msg2)?;
/// let msg3 = initiator.write_handshake_message(&[])?;
/// // Send msg3...
/// initiator.into_transport()?;
/// ```
pub struct NoiseSession {
    /// The handshake state (only present during handshake phase)
    handshake: Option<HandshakeState>,
    /// The transport state (only present after handshake completion)
    transport: Option<TransportState>,
    phase: HandshakePhase,
    role: Role,
    /// The remote static key, captured when the handshake completes
    remote_static: Option<[u8; 32]>,
    buffer: Vec<u8>,
}

impl NoiseSession {
    /// Creates a new Noise session as the initiator (client).
    pub fn new_initiator(identity: &HostIdentity) -> Result<Self> {
        let handshake = Self::builder()?
            .local_private_key(&identity.noise_static_key())
            .build_initiator()
            .map_err(|e| {
                ProtocolError::HandshakeFailed(format!("failed to build initiator: {}", e))
            })?;

        Ok(Self::with_state(handshake, Role::Initiator))
    }

    /// Creates a new Noise session as the responder (server).
    pub fn new_responder(identity: &HostIdentity) -> Result<Self> {
        let handshake = Self::builder()?
            .local_private_key(&identity.noise_static_key())
            .build_responder()
            .map_err(|e| {
                ProtocolError::HandshakeFailed(format!("failed to build responder: {}", e))
            })?;

        Ok(Self::with_state(handshake, Role::Responder))
    }

    fn builder() -> Result<Builder<'static>> {
        let params = NOISE_PATTERN.parse().map_err(|e| {
            ProtocolError::HandshakeFailed(format!("invalid noise pattern: {}", e))
        })?;
        Ok(Builder::new(params))
    }

    fn with_state(handshake: HandshakeState, role: Role) -> Self {
        let phase = match role {
            Role::Initiator => HandshakePhase::InitiatorStart,
            Role::Responder => HandshakePhase::ResponderStart,
        };

        Self {
            handshake: Some(handshake),
            transport: None,
            phase,
            role,
            remote_static: None,
            buffer: vec![0u8; MAX_NOISE_MESSAGE_SIZE],
        }
    }

    /// Returns the current handshake phase.
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Returns the role in the handshake.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns whether the handshake is complete.
    pub fn is_handshake_complete(&self) -> bool {
        self.phase == HandshakePhase::Complete
    }

    /// Returns whether the session can encrypt and decrypt records.
    pub fn is_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Returns the remote peer's static X25519 public key.
    ///
    /// Available once the handshake has delivered the peer's static key.
    pub fn remote_static(&self) -> Option<[u8; 32]> {
        if let Some(key) = self.remote_static {
            return Some(key);
        }
        let remote = self.handshake.as_ref()?.get_remote_static()?;
        let mut key = [0u8; 32];
        key.copy_from_slice(remote);
        Some(key)
    }

    /// Writes a handshake message.
    ///
    /// Returns the handshake message to send to the peer.
    pub fn write_handshake_message(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let handshake = self
            .handshake
            .as_mut()
            .ok_or(ProtocolError::HandshakeIncomplete)?;

        let next = match (self.role, self.phase) {
            (Role::Initiator, HandshakePhase::InitiatorStart) => {
                HandshakePhase::InitiatorWaitingForResponse
            }
            (Role::Initiator, HandshakePhase::InitiatorSendFinal) => HandshakePhase::Complete,
            (Role::Responder, HandshakePhase::ResponderSendResponse) => {
                HandshakePhase::ResponderWaitingForFinal
            }
            _ => {
                return Err(ProtocolError::HandshakeFailed(format!(
                    "cannot write in current phase: {:?}",
                    self.phase
                )));
            }
        };

        let len = handshake.write_message(payload, &mut self.buffer)?;
        self.phase = next;

        Ok(self.buffer[..len].to_vec())
    }

    /// Reads a handshake message from the peer.
    ///
    /// Returns any payload included in the handshake message.
    pub fn read_handshake_message(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        let handshake = self
            .handshake
            .as_mut()
            .ok_or(ProtocolError::HandshakeIncomplete)?;

        let next = match (self.role, self.phase) {
            (Role::Initiator, HandshakePhase::InitiatorWaitingForResponse) => {
                HandshakePhase::InitiatorSendFinal
            }
            (Role::Responder, HandshakePhase::ResponderStart) => {
                HandshakePhase::ResponderSendResponse
            }
            (Role::Responder, HandshakePhase::ResponderWaitingForFinal) => {
                HandshakePhase::Complete
            }
            _ => {
                return Err(ProtocolError::HandshakeFailed(format!(
                    "cannot read in current phase: {:?}",
                    self.phase
                )));
            }
        };

        let len = handshake.read_message(message, &mut self.buffer)?;
        self.phase = next;

        Ok(self.buffer[..len].to_vec())
    }

    /// Transitions from handshake to transport mode.
    pub fn into_transport(&mut self) -> Result<()> {
        if self.phase != HandshakePhase::Complete {
            return Err(ProtocolError::HandshakeIncomplete);
        }

        self.remote_static = self.remote_static();
        if self.remote_static.is_none() {
            return Err(ProtocolError::HandshakeFailed(
                "remote static key not available".to_string(),
            ));
        }

        let handshake = self
            .handshake
            .take()
            .ok_or(ProtocolError::HandshakeIncomplete)?;
        self.transport = Some(handshake.into_transport_mode()?);

        Ok(())
    }

    /// Encrypts a plaintext message for transport.
    ///
    /// Returns the ciphertext which includes the authentication tag.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(ProtocolError::HandshakeIncomplete)?;

        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(ProtocolError::Encryption(format!(
                "plaintext too large: {} bytes exceeds maximum of {} bytes",
                plaintext.len(),
                MAX_PLAINTEXT_SIZE
            )));
        }

        let len = transport.write_message(plaintext, &mut self.buffer)?;
        Ok(self.buffer[..len].to_vec())
    }

    /// Decrypts a ciphertext message from transport.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(ProtocolError::HandshakeIncomplete)?;

        if ciphertext.len() > MAX_NOISE_MESSAGE_SIZE {
            return Err(ProtocolError::Decryption(format!(
                "ciphertext too large: {} bytes exceeds maximum of {} bytes",
                ciphertext.len(),
                MAX_NOISE_MESSAGE_SIZE
            )));
        }

        let len = transport.read_message(ciphertext, &mut self.buffer)?;
        Ok(self.buffer[..len].to_vec())
    }
}

impl std::fmt::Debug for NoiseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseSession")
            .field("phase", &self.phase)
            .field("role", &self.role)
            .field("is_transport", &self.transport.is_some())
            .finish()
    }
}

/// Derives the X25519 public key matching an identity's Noise static key.
///
/// Clients use this to compare the server's observed static key against a
/// pinned host identity.
pub fn noise_public_key(identity: &HostIdentity) -> Result<[u8; 32]> {
    // snow does not expose public key derivation, so run the first half of a
    // handshake against a scratch initiator and read the responder's key.
    let mut initiator = NoiseSession::new_initiator(&HostIdentity::generate())?;
    let mut responder = NoiseSession::new_responder(identity)?;
    let msg1 = initiator.write_handshake_message(&[])?;
    responder.read_handshake_message(&msg1)?;
    let msg2 = responder.write_handshake_message(&[])?;
    initiator.read_handshake_message(&msg2)?;

    initiator
        .remote_static()
        .ok_or_else(|| ProtocolError::HandshakeFailed("responder sent no static key".to_string()))
}
