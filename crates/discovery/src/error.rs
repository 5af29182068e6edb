//! Error types for discovery fetching, caching, and server info retrieval.
//!
//! Three failure domains are kept apart:
//! - trust and format failures from signature verification
//!   ([`VerificationError`], carried unchanged inside [`DiscoveryError`])
//! - transport failures and cache misses, which a caller may retry with a
//!   different origin
//! - server info failures ([`ServerInfoError`]), which never share a type
//!   with the signed discovery pipeline

use eduvpn_core::ConfigError;
use eduvpn_crypto::VerificationError;
use std::path::PathBuf;
use thiserror::Error;

use crate::model::DiscoveryList;

/// Failures of a single HTTP GET.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server answered with a non-2xx status
    #[error("HTTP status {status} from {url}")]
    Status { url: String, status: u16 },

    /// Connection, TLS, or body read failure
    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// The request exceeded the configured timeout
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    /// The HTTP client could not be built or the request could not be sent
    #[error("HTTP client error: {reason}")]
    Client { reason: String },
}

/// Failures of the on-disk response cache tier.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading, writing, or removing an entry file failed
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An entry file does not decode as a cache entry
    #[error("Cache entry serialization error: {reason}")]
    Serialization { reason: String },

    /// The blocking task running cache I/O panicked or was cancelled
    #[error("Cache task failed: {reason}")]
    Task { reason: String },
}

/// Errors from fetching signed discovery data.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Signature decoding or trust failure, unchanged from the verifier
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// The cache holds no entry for the data or signature URL
    #[error("Discovery data not found in cache: {url}")]
    DataNotFoundInCache { url: String },

    /// Fetching the data or signature failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The response cache could not be read or cleared
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Verified bytes that do not parse as the expected document
    #[error("Malformed discovery data: {reason}")]
    MalformedDiscoveryData { reason: String },

    /// Verified data older than the highest version already accepted
    #[error("{list} version {received} is older than previously accepted version {previous}")]
    VersionRollback {
        list: DiscoveryList,
        previous: u64,
        received: u64,
    },

    /// The startup configuration failed validation
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl DiscoveryError {
    /// True when retrying, possibly with the other origin, can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DiscoveryError::Transport(_) | DiscoveryError::DataNotFoundInCache { .. }
        )
    }

    /// True for signature trust failures (not format errors).
    pub fn is_trust_failure(&self) -> bool {
        matches!(self, DiscoveryError::Verification(e) if e.is_trust_error())
    }
}

/// Errors from fetching a server's `info.json`.
#[derive(Debug, Error)]
pub enum ServerInfoError {
    /// The base URL cannot be joined with `info.json`
    #[error("Invalid server base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// Fetching `info.json` failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// `info.json` lacks the API v2 endpoints
    #[error("Malformed server info: {reason}")]
    MalformedServerInfo { reason: String },
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
