//! Error types for the protocol crate.
//!
//! Transport-level failures (closed streams, timeouts) belong to the daemon's
//! channel; this enum only covers encoding, keys, handshake and framing.

use thiserror::Error;

/// Failures of the wire format and the cryptographic layer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Serialization errors
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // Cryptographic errors
    /// Encryption operation failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption operation failed.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Invalid or malformed key material.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The private and public halves of a key pair do not belong together.
    #[error("key mismatch: public key does not match private key")]
    KeyMismatch,

    /// PEM input could not be scanned into key blocks.
    #[error("malformed PEM input: {0}")]
    MalformedPem(String),

    // Handshake errors
    /// Noise protocol handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Attempted to use transport before handshake completion.
    #[error("handshake incomplete: cannot perform operation before handshake is finished")]
    HandshakeIncomplete,

    // Frame errors
    /// Frame exceeds maximum allowed size.
    #[error("frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Frame has invalid magic bytes.
    #[error("invalid frame magic: expected {expected:#010x}, got {got:#010x}")]
    InvalidFrameMagic {
        /// Expected magic value.
        expected: u32,
        /// Actual magic value received.
        got: u32,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Conversions from underlying crate errors

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        ProtocolError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        ProtocolError::Deserialization(err.to_string())
    }
}

impl From<snow::Error> for ProtocolError {
    fn from(err: snow::Error) -> Self {
        let msg = err.to_string();
        // Map snow errors to more specific protocol errors
        if msg.contains("decrypt") {
            ProtocolError::Decryption(msg)
        } else if msg.contains("handshake") || msg.contains("state") {
            ProtocolError::HandshakeFailed(msg)
        } else {
            ProtocolError::Encryption(msg)
        }
    }
}

impl From<ed25519_dalek::pkcs8::Error> for ProtocolError {
    fn from(err: ed25519_dalek::pkcs8::Error) -> Self {
        ProtocolError::InvalidKey(err.to_string())
    }
}

impl From<ed25519_dalek::pkcs8::spki::Error> for ProtocolError {
    fn from(err: ed25519_dalek::pkcs8::spki::Error) -> Self {
        ProtocolError::InvalidKey(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_pem_display() {
        let err = ProtocolError::MalformedPem("no private key block".to_string());
        assert_eq!(err.to_string(), "malformed PEM input: no private key block");
    }

    #[test]
    fn test_handshake_incomplete_error_display() {
        let err = ProtocolError::HandshakeIncomplete;
        assert_eq!(
            err.to_string(),
            "handshake incomplete: cannot perform operation before handshake is finished"
        );
    }

    #[test]
    fn test_frame_too_large_error_display() {
        let err = ProtocolError::FrameTooLarge {
            size: 20 * 1024 * 1024,
            max: 16 * 1024 * 1024,
        };
        assert_eq!(
            err.to_string(),
            "frame too large: 20971520 bytes exceeds maximum of 16777216 bytes"
        );
    }

    #[test]
    fn test_invalid_frame_magic_error_display() {
        let err = ProtocolError::InvalidFrameMagic {
            expected: 0x4644_5250,
            got: 0xDEAD_BEEF,
        };
        assert_eq!(
            err.to_string(),
            "invalid frame magic: expected 0x46445250, got 0xdeadbeef"
        );
    }

    #[test]
    fn test_from_rmp_serde_decode_error() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct TestStruct {
            field: String,
        }
        let msgpack_err = rmp_serde::from_slice::<TestStruct>(&[0x00]).unwrap_err();
        let protocol_err: ProtocolError = msgpack_err.into();
        assert!(matches!(protocol_err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn test_snow_decrypt_error_maps_to_decryption() {
        let err: ProtocolError = snow::Error::Decrypt.into();
        assert!(matches!(err, ProtocolError::Decryption(_)));
    }

    #[test]
    fn test_key_mismatch_display() {
        assert_eq!(
            ProtocolError::KeyMismatch.to_string(),
            "key mismatch: public key does not match private key"
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
