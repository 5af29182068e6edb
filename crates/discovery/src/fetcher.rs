//! Verified retrieval of signed discovery documents.
//!
//! A fetch pairs a data URL with its detached signature URL. Whatever the
//! origin, the bytes handed back have just passed [`SignatureVerifier`]:
//! cached pairs are re-verified on every read, and network pairs reach the
//! cache only after verifying.
//!
//! [`DiscoveryFetcher::fetch_verified`] stops after verification so a
//! caller can apply its own acceptance rules before
//! [`DiscoveryFetcher::commit`] writes the pair to the cache.

use bytes::Bytes;
use eduvpn_crypto::{KeyId, KeyRing, SignatureVerifier};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{run_blocking, ResponseCache};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// Where a fetch attempt is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryOrigin {
    Cache,
    Network,
}

impl fmt::Display for DiscoveryOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryOrigin::Cache => write!(f, "cache"),
            DiscoveryOrigin::Network => write!(f, "network"),
        }
    }
}

impl FromStr for DiscoveryOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cache" => Ok(DiscoveryOrigin::Cache),
            "network" => Ok(DiscoveryOrigin::Network),
            other => Err(format!("unknown origin '{}', expected cache or network", other)),
        }
    }
}

/// A document that passed signature verification.
///
/// Network documents carry their (data, signature) responses until
/// [`DiscoveryFetcher::commit`] stores them.
#[derive(Debug, Clone)]
pub struct VerifiedDocument {
    pub body: Bytes,
    pub key_id: KeyId,
    pub origin: DiscoveryOrigin,
    pending: Option<[HttpResponse; 2]>,
}

impl VerifiedDocument {
    /// True when the pair still has to be written to the cache.
    pub fn needs_commit(&self) -> bool {
        self.pending.is_some()
    }
}

/// Fetches (data, signature) pairs and verifies them.
#[derive(Clone)]
pub struct DiscoveryFetcher {
    transport: Arc<dyn HttpTransport>,
    cache: Arc<ResponseCache>,
    verifier: SignatureVerifier,
}

impl fmt::Debug for DiscoveryFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryFetcher")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl DiscoveryFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, cache: Arc<ResponseCache>) -> Self {
        Self::with_verifier(transport, cache, SignatureVerifier::default())
    }

    pub fn with_verifier(
        transport: Arc<dyn HttpTransport>,
        cache: Arc<ResponseCache>,
        verifier: SignatureVerifier,
    ) -> Self {
        Self {
            transport,
            cache,
            verifier,
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    /// Returns verified bytes for `data_url`, anchored at `origin`, and
    /// caches a network pair.
    ///
    /// The cache origin never falls back to the network and the network
    /// origin never falls back to the cache; callers choose the retry.
    pub async fn fetch(
        &self,
        origin: DiscoveryOrigin,
        data_url: &Url,
        signature_url: &Url,
        keys: &KeyRing,
    ) -> DiscoveryResult<Bytes> {
        let document = self
            .fetch_verified(origin, data_url, signature_url, keys)
            .await?;
        self.commit(&document).await;
        Ok(document.body)
    }

    /// Fetches and verifies a pair without writing anything to the cache.
    pub async fn fetch_verified(
        &self,
        origin: DiscoveryOrigin,
        data_url: &Url,
        signature_url: &Url,
        keys: &KeyRing,
    ) -> DiscoveryResult<VerifiedDocument> {
        match origin {
            DiscoveryOrigin::Cache => self.fetch_cached(data_url, signature_url, keys).await,
            DiscoveryOrigin::Network => self.fetch_network(data_url, signature_url, keys).await,
        }
    }

    /// Stores a verified network pair in the cache. Cache documents are
    /// already stored and are left alone.
    ///
    /// Persistence failures are logged; the memory tier keeps the pair.
    pub async fn commit(&self, document: &VerifiedDocument) {
        let Some(pair) = document.pending.clone() else {
            return;
        };
        let url = pair[0].url.clone();

        match run_blocking(&self.cache, move |cache| cache.put_all(&pair)).await {
            Ok(Ok(())) => debug!(url = %url, "Cached verified discovery data"),
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "Failed to persist verified discovery data")
            }
            Err(e) => warn!(url = %url, error = %e, "Failed to cache verified discovery data"),
        }
    }

    async fn fetch_cached(
        &self,
        data_url: &Url,
        signature_url: &Url,
        keys: &KeyRing,
    ) -> DiscoveryResult<VerifiedDocument> {
        let (data_key, signature_key) = (data_url.clone(), signature_url.clone());
        let (data, signature) = run_blocking(&self.cache, move |cache| {
            cache.get_pair(&data_key, &signature_key)
        })
        .await?;

        let data = data.ok_or_else(|| DiscoveryError::DataNotFoundInCache {
            url: data_url.to_string(),
        })?;
        let signature = signature.ok_or_else(|| DiscoveryError::DataNotFoundInCache {
            url: signature_url.to_string(),
        })?;

        match self.verifier.verify(&data.body, &signature.body, keys) {
            Ok(key_id) => {
                debug!(url = %data_url, key_id = %key_id, "Cached discovery data verified");
                Ok(VerifiedDocument {
                    body: data.body.clone(),
                    key_id,
                    origin: DiscoveryOrigin::Cache,
                    pending: None,
                })
            }
            Err(e) => {
                warn!(url = %data_url, error = %e, "Cached discovery data rejected");
                Err(e.into())
            }
        }
    }

    async fn fetch_network(
        &self,
        data_url: &Url,
        signature_url: &Url,
        keys: &KeyRing,
    ) -> DiscoveryResult<VerifiedDocument> {
        let (data, signature) = tokio::try_join!(
            self.transport.get(HttpRequest::json(data_url.clone())),
            self.transport.get(HttpRequest::plain(signature_url.clone())),
        )?;
        let data = data.error_for_status()?;
        let signature = signature.error_for_status()?;

        let key_id = self
            .verifier
            .verify(&data.body, &signature.body, keys)
            .map_err(|e| {
                warn!(url = %data_url, error = %e, "Discovery data rejected");
                e
            })?;

        info!(
            url = %data_url,
            key_id = %key_id,
            bytes = data.body.len(),
            "Fetched and verified discovery data"
        );
        Ok(VerifiedDocument {
            body: data.body.clone(),
            key_id,
            origin: DiscoveryOrigin::Network,
            pending: Some([data, signature]),
        })
    }
}
