//! Minisign key and signature records.
//!
//! Layouts (all offsets in bytes):
//!
//! ```text
//! public key record  (42): [0..2] "Ed" | [2..10] key id | [10..42] Ed25519 public key
//! signature record   (74): [0..2] "Ed" | [2..10] key id | [10..74] Ed25519 signature
//! ```
//!
//! A signature file is UTF-8 text whose second line carries the base64
//! encoded signature record. The remaining lines (comments, global
//! signature) are not interpreted.

use base64::{engine::general_purpose::STANDARD, Engine};
use std::fmt;

use crate::error::{VerificationError, VerificationResult};

/// Algorithm tag for plain (non-prehashed) Ed25519 signatures.
pub const SIGNATURE_ALGORITHM: [u8; 2] = *b"Ed";

pub const KEY_ID_LEN: usize = 8;
pub const PUBLIC_KEY_RECORD_LEN: usize = 42;
pub const SIGNATURE_RECORD_LEN: usize = 74;

const ALGORITHM_RANGE: std::ops::Range<usize> = 0..2;
const KEY_ID_RANGE: std::ops::Range<usize> = 2..10;

/// Opaque 8-byte key identifier, compared byte-wise.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId([u8; KEY_ID_LEN]);

impl KeyId {
    pub fn from_bytes(bytes: [u8; KEY_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self)
    }
}

fn key_id_at(raw: &[u8]) -> KeyId {
    let mut id = [0u8; KEY_ID_LEN];
    id.copy_from_slice(&raw[KEY_ID_RANGE]);
    KeyId(id)
}

fn algorithm_at(raw: &[u8]) -> [u8; 2] {
    let mut tag = [0u8; 2];
    tag.copy_from_slice(&raw[ALGORITHM_RANGE]);
    tag
}

/// Renders an algorithm tag for error messages.
pub(crate) fn tag_to_string(tag: [u8; 2]) -> String {
    String::from_utf8_lossy(&tag).into_owned()
}

/// A configured trust anchor: algorithm tag, key id, and Ed25519 key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKeyRecord {
    raw: [u8; PUBLIC_KEY_RECORD_LEN],
}

impl PublicKeyRecord {
    /// Builds a record from its 42 raw bytes.
    ///
    /// Rejects any other length and any algorithm tag other than `Ed`.
    pub fn from_bytes(bytes: &[u8]) -> VerificationResult<Self> {
        let raw: [u8; PUBLIC_KEY_RECORD_LEN] =
            bytes
                .try_into()
                .map_err(|_| VerificationError::MalformedPublicKey {
                    reason: format!(
                        "expected {} bytes, got {}",
                        PUBLIC_KEY_RECORD_LEN,
                        bytes.len()
                    ),
                })?;

        let tag = algorithm_at(&raw);
        if tag != SIGNATURE_ALGORITHM {
            return Err(VerificationError::MalformedPublicKey {
                reason: format!("unexpected algorithm tag '{}'", tag_to_string(tag)),
            });
        }

        Ok(Self { raw })
    }

    /// Decodes a standard base64 public key string (as found in minisign
    /// `.pub` files and in the client configuration).
    pub fn from_base64(encoded: &str) -> VerificationResult<Self> {
        let bytes =
            STANDARD
                .decode(encoded.trim())
                .map_err(|e| VerificationError::MalformedPublicKey {
                    reason: format!("invalid base64: {}", e),
                })?;
        Self::from_bytes(&bytes)
    }

    pub fn algorithm(&self) -> [u8; 2] {
        algorithm_at(&self.raw)
    }

    pub fn key_id(&self) -> KeyId {
        key_id_at(&self.raw)
    }

    pub fn public_key(&self) -> [u8; 32] {
        let mut key = [0u8; 32];
        key.copy_from_slice(&self.raw[10..PUBLIC_KEY_RECORD_LEN]);
        key
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

impl fmt::Debug for PublicKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKeyRecord")
            .field("key_id", &self.key_id())
            .finish()
    }
}

/// A decoded signature record. Its algorithm tag is carried as-is and
/// checked by the verifier, not here.
#[derive(Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    raw: [u8; SIGNATURE_RECORD_LEN],
}

impl SignatureRecord {
    pub fn from_bytes(bytes: &[u8]) -> VerificationResult<Self> {
        let raw: [u8; SIGNATURE_RECORD_LEN] =
            bytes
                .try_into()
                .map_err(|_| VerificationError::MalformedSignatureFile {
                    reason: format!(
                        "signature record must be {} bytes, got {}",
                        SIGNATURE_RECORD_LEN,
                        bytes.len()
                    ),
                })?;
        Ok(Self { raw })
    }

    pub fn algorithm(&self) -> [u8; 2] {
        algorithm_at(&self.raw)
    }

    pub fn key_id(&self) -> KeyId {
        key_id_at(&self.raw)
    }

    pub fn signature(&self) -> [u8; 64] {
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&self.raw[10..SIGNATURE_RECORD_LEN]);
        signature
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

impl fmt::Debug for SignatureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureRecord")
            .field("algorithm", &tag_to_string(self.algorithm()))
            .field("key_id", &self.key_id())
            .finish()
    }
}

/// Extracts the signature record from the raw bytes of a signature file.
///
/// Empty lines are skipped when counting, so the record is the second
/// non-empty line. A trailing carriage return is tolerated.
pub fn decode_signature_file(file: &[u8]) -> VerificationResult<SignatureRecord> {
    let text =
        std::str::from_utf8(file).map_err(|e| VerificationError::MalformedSignatureFile {
            reason: format!("not valid UTF-8: {}", e),
        })?;

    let line = text
        .split('\n')
        .filter(|line| !line.is_empty())
        .nth(1)
        .ok_or_else(|| VerificationError::MalformedSignatureFile {
            reason: "expected at least 2 lines".to_string(),
        })?;

    let decoded = STANDARD
        .decode(line.trim_end_matches('\r'))
        .map_err(|e| VerificationError::MalformedSignatureFile {
            reason: format!("invalid base64 on line 2: {}", e),
        })?;

    SignatureRecord::from_bytes(&decoded)
}
