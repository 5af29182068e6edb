//! Error types for signature decoding and verification.

use thiserror::Error;

use crate::minisign::KeyId;

/// Errors produced while decoding key or signature material, or while
/// checking a signature against a key ring.
///
/// Format errors and trust errors are kept as separate variants so callers
/// can tell "the signature file is garbage" apart from "the signature does
/// not verify".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// The signature file could not be decoded into a minisign record
    #[error("Malformed signature file: {reason}")]
    MalformedSignatureFile { reason: String },

    /// A configured public key is not a base64 minisign key record
    #[error("Malformed public key: {reason}")]
    MalformedPublicKey { reason: String },

    /// The key ring is empty
    #[error("No public key configured")]
    MissingPublicKey,

    /// The signature uses an algorithm tag other than `Ed`
    #[error("Unsupported signature algorithm: {tag}")]
    UnsupportedAlgorithm { tag: String },

    /// A key id matched but the Ed25519 check failed
    #[error("Signature from key {key_id} is invalid")]
    InvalidSignature { key_id: KeyId },

    /// No key in the ring carries the signature's key id
    #[error("Data could not be verified by any configured key")]
    DataCouldNotBeVerified,
}

impl VerificationError {
    /// True for errors caused by undecodable input rather than a failed check.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            VerificationError::MalformedSignatureFile { .. }
                | VerificationError::MalformedPublicKey { .. }
        )
    }

    /// True for errors where well-formed input failed the trust policy.
    pub fn is_trust_error(&self) -> bool {
        !self.is_format_error()
    }
}

pub type VerificationResult<T> = Result<T, VerificationError>;
