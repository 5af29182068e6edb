//! Ordered set of trusted minisign public keys.

use tracing::warn;

use crate::error::VerificationResult;
use crate::minisign::{KeyId, PublicKeyRecord};

/// The trusted keys, in configuration order. Verification walks the ring
/// front to back, so order is significant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRing {
    keys: Vec<PublicKeyRecord>,
}

impl KeyRing {
    pub fn new(keys: Vec<PublicKeyRecord>) -> Self {
        Self { keys }
    }

    /// Loads keys from base64 strings, dropping entries that fail to decode
    /// into a valid 42-byte `Ed` record.
    ///
    /// An empty result is allowed here; verification against an empty ring
    /// fails with `MissingPublicKey`.
    pub fn from_base64<I, S>(encoded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = encoded
            .into_iter()
            .enumerate()
            .filter_map(
                |(index, entry)| match PublicKeyRecord::from_base64(entry.as_ref()) {
                    Ok(key) => Some(key),
                    Err(e) => {
                        warn!(index, error = %e, "Dropping unusable public key");
                        None
                    }
                },
            )
            .collect();

        Self { keys }
    }

    /// Like [`KeyRing::from_base64`] but fails on the first bad entry.
    pub fn try_from_base64<I, S>(encoded: I) -> VerificationResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = encoded
            .into_iter()
            .map(|entry| PublicKeyRecord::from_base64(entry.as_ref()))
            .collect::<VerificationResult<Vec<_>>>()?;
        Ok(Self { keys })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PublicKeyRecord> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key_ids(&self) -> Vec<KeyId> {
        self.keys.iter().map(PublicKeyRecord::key_id).collect()
    }
}

impl<'a> IntoIterator for &'a KeyRing {
    type Item = &'a PublicKeyRecord;
    type IntoIter = std::slice::Iter<'a, PublicKeyRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}
