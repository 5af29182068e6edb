//! Signature verification against a key ring.
//!
//! # Policy
//!
//! Keys are tried in ring order. For each key:
//!
//! 1. The signature's algorithm tag must be `Ed`; otherwise the key is
//!    skipped as unsupported.
//! 2. The key ids must match byte for byte; otherwise the key is skipped
//!    without touching the curve arithmetic.
//! 3. On a key-id match the Ed25519 check decides the whole operation:
//!    a valid signature is accepted, an invalid one is rejected outright.
//!    Later keys are not consulted after a key-id match.
//!
//! Exhausting the ring without a key-id match is `DataCouldNotBeVerified`
//! (or `UnsupportedAlgorithm` when the tag was the reason every key was
//! skipped).

use ed25519_dalek::{Signature, VerifyingKey};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{VerificationError, VerificationResult};
use crate::keyring::KeyRing;
use crate::minisign::{
    decode_signature_file, tag_to_string, KeyId, PublicKeyRecord, SignatureRecord,
    SIGNATURE_ALGORITHM,
};

/// Raw Ed25519 detached-signature check.
pub trait Ed25519Verifier: Send + Sync {
    fn verify(&self, public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool;
}

/// `ed25519-dalek` backed verifier using strict verification, which rejects
/// small-order keys and non-canonical signatures the same way libsodium does.
#[derive(Debug, Clone, Copy, Default)]
pub struct DalekVerifier;

impl Ed25519Verifier for DalekVerifier {
    fn verify(&self, public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(public_key) else {
            return false;
        };
        let signature = Signature::from_bytes(signature);
        key.verify_strict(message, &signature).is_ok()
    }
}

/// Result of checking one candidate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Match,
    KeyIdMismatch,
    InvalidSignature,
    UnsupportedAlgorithm,
}

/// The acceptance gate for signed discovery data.
#[derive(Clone)]
pub struct SignatureVerifier {
    backend: Arc<dyn Ed25519Verifier>,
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self::new(Arc::new(DalekVerifier))
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(backend: Arc<dyn Ed25519Verifier>) -> Self {
        Self { backend }
    }

    /// Checks a single key against an already decoded signature.
    pub fn check_key(
        &self,
        data: &[u8],
        signature: &SignatureRecord,
        key: &PublicKeyRecord,
    ) -> VerificationOutcome {
        if signature.algorithm() != SIGNATURE_ALGORITHM {
            return VerificationOutcome::UnsupportedAlgorithm;
        }

        if key.key_id() != signature.key_id() {
            return VerificationOutcome::KeyIdMismatch;
        }

        if self
            .backend
            .verify(&key.public_key(), data, &signature.signature())
        {
            VerificationOutcome::Match
        } else {
            VerificationOutcome::InvalidSignature
        }
    }

    /// Verifies `data` against the signature file contents using `keys`.
    ///
    /// Returns the id of the key that produced the match.
    pub fn verify(
        &self,
        data: &[u8],
        signature_file: &[u8],
        keys: &KeyRing,
    ) -> VerificationResult<KeyId> {
        if keys.is_empty() {
            return Err(VerificationError::MissingPublicKey);
        }

        let signature = decode_signature_file(signature_file)?;
        let mut unsupported = false;

        for key in keys {
            match self.check_key(data, &signature, key) {
                VerificationOutcome::Match => {
                    debug!(key_id = %key.key_id(), "Signature verified");
                    return Ok(key.key_id());
                }
                VerificationOutcome::InvalidSignature => {
                    warn!(key_id = %key.key_id(), "Signature rejected by matching key");
                    return Err(VerificationError::InvalidSignature {
                        key_id: key.key_id(),
                    });
                }
                VerificationOutcome::KeyIdMismatch => {
                    debug!(
                        key_id = %key.key_id(),
                        signature_key_id = %signature.key_id(),
                        "Key id mismatch, trying next key"
                    );
                }
                VerificationOutcome::UnsupportedAlgorithm => {
                    unsupported = true;
                }
            }
        }

        if unsupported {
            return Err(VerificationError::UnsupportedAlgorithm {
                tag: tag_to_string(signature.algorithm()),
            });
        }

        debug!(
            signature_key_id = %signature.key_id(),
            keys = keys.len(),
            "No configured key matches signature"
        );
        Err(VerificationError::DataCouldNotBeVerified)
    }
}

/// Verifies `data` against a minisign signature file with the default
/// Ed25519 backend.
pub fn verify_signature(data: &[u8], signature_file: &[u8], keys: &KeyRing) -> VerificationResult<()> {
    SignatureVerifier::default()
        .verify(data, signature_file, keys)
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestSigner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MESSAGE: &[u8] = b"hello world";

    fn ring(signers: &[&TestSigner]) -> KeyRing {
        KeyRing::from_base64(signers.iter().map(|s| s.public_key_base64()))
    }

    /// Counts calls into the curve backend.
    #[derive(Default)]
    struct CountingVerifier {
        calls: AtomicUsize,
    }

    impl Ed25519Verifier for CountingVerifier {
        fn verify(&self, public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            DalekVerifier.verify(public_key, message, signature)
        }
    }

    #[test]
    fn test_valid_signature_round_trip() {
        let signer = TestSigner::from_seed(1, [1; 8]);
        let file = signer.signature_file(MESSAGE);

        assert!(verify_signature(MESSAGE, &file, &ring(&[&signer])).is_ok());
    }

    #[test]
    fn test_hello_world_single_byte_change_is_rejected() {
        let signer = TestSigner::from_seed(9, *b"eduVPN!!");
        let file = signer.signature_file(b"hello world");
        let keys = ring(&[&signer]);

        assert!(verify_signature(b"hello world", &file, &keys).is_ok());
        assert_eq!(
            verify_signature(b"hellp world", &file, &keys),
            Err(VerificationError::InvalidSignature {
                key_id: KeyId::from_bytes(*b"eduVPN!!")
            })
        );
    }

    #[test]
    fn test_correct_key_found_at_any_position() {
        let signer = TestSigner::from_seed(1, [1; 8]);
        let others: Vec<TestSigner> = (2..6).map(|i| TestSigner::from_seed(i, [i; 8])).collect();
        let file = signer.signature_file(MESSAGE);

        for position in 0..=others.len() {
            let mut keys: Vec<&TestSigner> = others.iter().collect();
            keys.insert(position, &signer);
            let result = SignatureVerifier::default().verify(MESSAGE, &file, &ring(&keys));
            assert_eq!(result, Ok(KeyId::from_bytes([1; 8])), "position {}", position);
        }
    }

    #[test]
    fn test_every_bit_flip_is_detected() {
        let signer = TestSigner::from_seed(4, [4; 8]);
        let file = signer.signature_file(MESSAGE);
        let keys = ring(&[&signer]);

        for byte in 0..MESSAGE.len() {
            for bit in 0..8 {
                let mut tampered = MESSAGE.to_vec();
                tampered[byte] ^= 1 << bit;
                assert!(matches!(
                    verify_signature(&tampered, &file, &keys),
                    Err(VerificationError::InvalidSignature { .. })
                ));
            }
        }
    }

    #[test]
    fn test_key_id_match_with_bad_signature_is_terminal() {
        // Key A shares B's key id but holds a different curve key.
        let key_a = TestSigner::from_seed(10, [7; 8]);
        let key_b = TestSigner::from_seed(11, [7; 8]);
        let file = key_b.signature_file(MESSAGE);

        assert!(verify_signature(MESSAGE, &file, &ring(&[&key_b])).is_ok());
        assert_eq!(
            verify_signature(MESSAGE, &file, &ring(&[&key_a, &key_b])),
            Err(VerificationError::InvalidSignature {
                key_id: KeyId::from_bytes([7; 8])
            })
        );
    }

    #[test]
    fn test_key_id_mismatch_skips_crypto() {
        let signer = TestSigner::from_seed(1, [1; 8]);
        let stranger = TestSigner::from_seed(2, [2; 8]);
        let backend = Arc::new(CountingVerifier::default());
        let verifier = SignatureVerifier::new(backend.clone());

        let result = verifier.verify(MESSAGE, &signer.signature_file(MESSAGE), &ring(&[&stranger]));

        assert_eq!(result, Err(VerificationError::DataCouldNotBeVerified));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_first_match_short_circuits() {
        let signer = TestSigner::from_seed(1, [1; 8]);
        let backend = Arc::new(CountingVerifier::default());
        let verifier = SignatureVerifier::new(backend.clone());

        let keys = ring(&[&signer, &signer, &signer]);
        assert!(verifier.verify(MESSAGE, &signer.signature_file(MESSAGE), &keys).is_ok());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_ring_is_missing_public_key() {
        let signer = TestSigner::from_seed(1, [1; 8]);
        assert_eq!(
            verify_signature(MESSAGE, &signer.signature_file(MESSAGE), &KeyRing::default()),
            Err(VerificationError::MissingPublicKey)
        );
    }

    #[test]
    fn test_empty_ring_fails_before_decoding() {
        assert_eq!(
            verify_signature(MESSAGE, b"garbage", &KeyRing::default()),
            Err(VerificationError::MissingPublicKey)
        );
    }

    #[test]
    fn test_malformed_signature_file_propagates() {
        let signer = TestSigner::from_seed(1, [1; 8]);
        let err = verify_signature(MESSAGE, b"one line only", &ring(&[&signer])).unwrap_err();
        assert!(err.is_format_error());
    }

    #[test]
    fn test_prehashed_tag_is_unsupported() {
        let signer = TestSigner::from_seed(1, [1; 8]);
        let file = signer.signature_file_with_tag(MESSAGE, *b"ED");

        let err = verify_signature(MESSAGE, &file, &ring(&[&signer])).unwrap_err();
        assert_eq!(
            err,
            VerificationError::UnsupportedAlgorithm {
                tag: "ED".to_string()
            }
        );
        assert!(err.is_trust_error());
    }

    #[test]
    fn test_check_key_outcomes() {
        let signer = TestSigner::from_seed(1, [1; 8]);
        let stranger = TestSigner::from_seed(2, [2; 8]);
        let imposter = TestSigner::from_seed(3, [1; 8]);
        let signature = decode_signature_file(&signer.signature_file(MESSAGE)).unwrap();
        let verifier = SignatureVerifier::default();

        assert_eq!(
            verifier.check_key(MESSAGE, &signature, &signer.public_key_record()),
            VerificationOutcome::Match
        );
        assert_eq!(
            verifier.check_key(MESSAGE, &signature, &stranger.public_key_record()),
            VerificationOutcome::KeyIdMismatch
        );
        assert_eq!(
            verifier.check_key(MESSAGE, &signature, &imposter.public_key_record()),
            VerificationOutcome::InvalidSignature
        );
    }

    #[test]
    fn test_dalek_rejects_foreign_signature_bytes() {
        let signer = TestSigner::from_seed(1, [1; 8]);
        let record = signer.public_key_record();
        assert!(!DalekVerifier.verify(&record.public_key(), MESSAGE, &[0u8; 64]));
    }
}
