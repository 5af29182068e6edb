//! Deterministic minisign signing for tests.

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signer, SigningKey};

use crate::minisign::{PublicKeyRecord, SIGNATURE_ALGORITHM};

/// Ed25519 signer that emits minisign-format key records and signature files.
pub struct TestSigner {
    signing_key: SigningKey,
    key_id: [u8; 8],
}

impl TestSigner {
    /// Builds a signer whose secret key is 32 copies of `seed`.
    pub fn from_seed(seed: u8, key_id: [u8; 8]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&[seed; 32]),
            key_id,
        }
    }

    /// The 42-byte public key record.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(42);
        raw.extend_from_slice(&SIGNATURE_ALGORITHM);
        raw.extend_from_slice(&self.key_id);
        raw.extend_from_slice(self.signing_key.verifying_key().as_bytes());
        raw
    }

    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.public_key_bytes())
    }

    pub fn public_key_record(&self) -> PublicKeyRecord {
        match PublicKeyRecord::from_bytes(&self.public_key_bytes()) {
            Ok(record) => record,
            Err(e) => panic!("test key record is malformed: {}", e),
        }
    }

    /// The 74-byte signature record over `message` with the given tag.
    pub fn signature_record_with_tag(&self, message: &[u8], tag: [u8; 2]) -> Vec<u8> {
        let signature = self.signing_key.sign(message);
        let mut raw = Vec::with_capacity(74);
        raw.extend_from_slice(&tag);
        raw.extend_from_slice(&self.key_id);
        raw.extend_from_slice(&signature.to_bytes());
        raw
    }

    pub fn signature_record(&self, message: &[u8]) -> Vec<u8> {
        self.signature_record_with_tag(message, SIGNATURE_ALGORITHM)
    }

    /// A complete minisign signature file over `message`.
    pub fn signature_file(&self, message: &[u8]) -> Vec<u8> {
        self.signature_file_with_tag(message, SIGNATURE_ALGORITHM)
    }

    pub fn signature_file_with_tag(&self, message: &[u8], tag: [u8; 2]) -> Vec<u8> {
        let record = self.signature_record_with_tag(message, tag);
        format!(
            "untrusted comment: signature from minisign secret key\n{}\ntrusted comment: timestamp:1600000000\tfile:discovery.json\n{}\n",
            STANDARD.encode(record),
            STANDARD.encode([0u8; 64]),
        )
        .into_bytes()
    }
}
