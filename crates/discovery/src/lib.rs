//! Signed discovery data retrieval for eduVPN clients.
//!
//! Discovery documents travel with detached minisign signatures. This crate
//! fetches a document and its signature (from the response cache or the
//! network), verifies the pair with [`eduvpn_crypto`], and only then hands
//! the bytes to the caller or stores them in the cache.
//!
//! # Architecture
//!
//! ```text
//! DiscoveryService ── parse, memo, rollback floor, events
//!   ├── DiscoveryFetcher ── cache | network, always verified
//!   │     ├── HttpTransport (reqwest / mock)
//!   │     └── ResponseCache (moka LRU + disk)
//!   └── ServerInfoFetcher ── info.json, TLS trust only
//! ```
//!
//! # Example
//!
//! ```no_run
//! use eduvpn_core::Config;
//! use eduvpn_discovery::{DiscoveryOrigin, DiscoveryService};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file("discovery.toml")?;
//! let service = DiscoveryService::from_config(&config)?;
//! let servers = match service.servers(DiscoveryOrigin::Network).await {
//!     Ok(servers) => servers,
//!     Err(e) if e.is_retryable() => service.servers(DiscoveryOrigin::Cache).await?,
//!     Err(e) => return Err(e.into()),
//! };
//! println!("{} servers", servers.len());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod fetcher;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod model;
pub mod server_info;
pub mod service;
pub mod transport;

pub use cache::{cache_key, CachedResponse, ResponseCache};
pub use error::{CacheError, DiscoveryError, DiscoveryResult, ServerInfoError, TransportError};
pub use fetcher::{DiscoveryFetcher, DiscoveryOrigin, VerifiedDocument};
#[cfg(any(test, feature = "test-support"))]
pub use mock::MockTransport;
pub use model::{
    discovery_version, DiscoveryList, InstituteAccessServer, LanguageMappedString, Organization,
    OrganizationList, SecureInternetServer, ServerList,
};
pub use server_info::{info_url, ServerInfo, ServerInfoFetcher};
pub use service::{DiscoveryEvent, DiscoveryService, SignedListUrls};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, ACCEPT_JSON};

/// Fetches and verifies one signed discovery document.
pub async fn fetch_discovery_data(
    fetcher: &DiscoveryFetcher,
    origin: DiscoveryOrigin,
    data_url: &url::Url,
    signature_url: &url::Url,
    keys: &eduvpn_crypto::KeyRing,
) -> DiscoveryResult<bytes::Bytes> {
    fetcher.fetch(origin, data_url, signature_url, keys).await
}

/// Fetches a server's `info.json` without caching.
pub async fn fetch_server_info(
    transport: std::sync::Arc<dyn HttpTransport>,
    base_url: &str,
) -> Result<ServerInfo, ServerInfoError> {
    ServerInfoFetcher::new(transport).fetch(base_url).await
}
