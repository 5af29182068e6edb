//! Minisign signature verification for eduVPN discovery data.
//!
//! Discovery documents (server list, organization list) are published with
//! detached minisign signatures. This crate decodes the signature file
//! format, holds the configured trust anchors, and decides whether a blob
//! of data is signed by one of them.
//!
//! # Security Principles
//!
//! - Unverifiable data is never reported as verified
//! - Format errors and trust failures are distinct error kinds
//! - A key-id match with a bad signature ends verification immediately
//! - Everything here is pure computation; no I/O
//!
//! # Example
//!
//! ```no_run
//! use eduvpn_crypto::{verify_signature, KeyRing};
//!
//! let keys = KeyRing::from_base64(["RWRtBSX1alxyGX+Xn3LuZnWUT0w//B6EmTJvgaAxBMYzlQeI+jdrO6KF"]);
//! let data = std::fs::read("server_list.json").unwrap();
//! let signature = std::fs::read("server_list.json.minisig").unwrap();
//! verify_signature(&data, &signature, &keys).unwrap();
//! ```

pub mod error;
pub mod keyring;
pub mod minisign;
pub mod verifier;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::{VerificationError, VerificationResult};
pub use keyring::KeyRing;
pub use minisign::{
    decode_signature_file, KeyId, PublicKeyRecord, SignatureRecord, KEY_ID_LEN,
    PUBLIC_KEY_RECORD_LEN, SIGNATURE_ALGORITHM, SIGNATURE_RECORD_LEN,
};
pub use verifier::{
    verify_signature, DalekVerifier, Ed25519Verifier, SignatureVerifier, VerificationOutcome,
};
