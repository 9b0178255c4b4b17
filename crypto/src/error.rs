//! Error types for identity and signature operations.

use thiserror::Error;

/// Errors that can occur while deriving, signing, or verifying identities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Public key bytes did not decode to a valid curve point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Signature bytes were malformed (wrong length or invalid recovery id).
    #[error("invalid signature encoding")]
    InvalidSignature,

    /// Signature recovery did not yield a valid public key.
    #[error("signature recovery failed")]
    RecoveryFailed,

    /// Address checksum did not match during decoding.
    #[error("invalid address checksum")]
    InvalidChecksum,

    /// Address failed to base58-decode.
    #[error("malformed address: {reason}")]
    MalformedAddress { reason: String },
}
