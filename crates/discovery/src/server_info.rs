//! Fetching a server's `info.json`.
//!
//! This document is not covered by the discovery signing keys; it is
//! trusted on the strength of the HTTPS connection alone. Its errors live in
//! [`ServerInfoError`] so they never mix with discovery trust failures.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{run_blocking, ResponseCache};
use crate::error::ServerInfoError;
use crate::transport::{HttpRequest, HttpTransport};

const INFO_DOCUMENT: &str = "info.json";
const API_V2_KEY: &str = "http://eduvpn.org/api#2";

/// Endpoints advertised by a VPN server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub api_base_url: Url,
}

#[derive(Deserialize)]
struct InfoDocument {
    api: ApiSection,
}

#[derive(Deserialize)]
struct ApiSection {
    #[serde(rename = "http://eduvpn.org/api#2")]
    v2: ApiV2,
}

#[derive(Deserialize)]
struct ApiV2 {
    authorization_endpoint: Url,
    token_endpoint: Url,
    api_base_uri: Url,
}

impl ServerInfo {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ServerInfoError> {
        let document: InfoDocument =
            serde_json::from_slice(bytes).map_err(|e| ServerInfoError::MalformedServerInfo {
                reason: format!("{} ({})", e, API_V2_KEY),
            })?;
        let api = document.api.v2;
        Ok(Self {
            authorization_endpoint: api.authorization_endpoint,
            token_endpoint: api.token_endpoint,
            api_base_url: api.api_base_uri,
        })
    }
}

/// Resolves `<base>/info.json`, keeping any path prefix on the base URL.
pub fn info_url(base_url: &str) -> Result<Url, ServerInfoError> {
    let invalid = |reason: String| ServerInfoError::InvalidBaseUrl {
        url: base_url.to_string(),
        reason,
    };

    let mut url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }

    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| invalid("URL cannot be a base".to_string()))?
        .pop_if_empty()
        .push(INFO_DOCUMENT);
    Ok(url)
}

/// Fetches `info.json` documents over the shared transport.
#[derive(Clone)]
pub struct ServerInfoFetcher {
    transport: Arc<dyn HttpTransport>,
    cache: Option<Arc<ResponseCache>>,
}

impl std::fmt::Debug for ServerInfoFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerInfoFetcher")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl ServerInfoFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            cache: None,
        }
    }

    /// Successful responses are written to `cache`; it is never read.
    pub fn with_cache(transport: Arc<dyn HttpTransport>, cache: Arc<ResponseCache>) -> Self {
        Self {
            transport,
            cache: Some(cache),
        }
    }

    pub async fn fetch(&self, base_url: &str) -> Result<ServerInfo, ServerInfoError> {
        let url = info_url(base_url)?;
        self.fetch_url(url).await
    }

    /// Fetches from separate API and authorization servers and merges the
    /// result: endpoints from the auth server, API base from the API server.
    pub async fn fetch_split(
        &self,
        api_base_url: &str,
        auth_base_url: &str,
    ) -> Result<ServerInfo, ServerInfoError> {
        if api_base_url == auth_base_url {
            return self.fetch(auth_base_url).await;
        }

        let api_url = info_url(api_base_url)?;
        let auth_url = info_url(auth_base_url)?;
        let (api, auth) = tokio::try_join!(self.fetch_url(api_url), self.fetch_url(auth_url))?;

        Ok(ServerInfo {
            authorization_endpoint: auth.authorization_endpoint,
            token_endpoint: auth.token_endpoint,
            api_base_url: api.api_base_url,
        })
    }

    async fn fetch_url(&self, url: Url) -> Result<ServerInfo, ServerInfoError> {
        let response = self
            .transport
            .get(HttpRequest::json(url.clone()))
            .await?
            .error_for_status()?;

        let info = ServerInfo::from_slice(&response.body)?;

        if let Some(cache) = &self.cache {
            let stored = run_blocking(cache, move |cache| cache.put(&response)).await;
            if let Err(e) = stored.and_then(|result| result) {
                warn!(url = %url, error = %e, "Failed to cache server info");
            }
        }

        debug!(url = %url, api_base = %info.api_base_url, "Fetched server info");
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::mock::MockTransport;
    use bytes::Bytes;

    fn info_json(host: &str) -> String {
        format!(
            r#"{{
                "api": {{
                    "http://eduvpn.org/api#2": {{
                        "authorization_endpoint": "https://{host}/oauth/authorize",
                        "token_endpoint": "https://{host}/oauth/token",
                        "api_base_uri": "https://{host}/api"
                    }}
                }},
                "v": "2.2.5"
            }}"#,
            host = host
        )
    }

    #[test]
    fn test_info_url_building() {
        assert_eq!(
            info_url("https://vpn.example.edu/").unwrap().as_str(),
            "https://vpn.example.edu/info.json"
        );
        assert_eq!(
            info_url("https://vpn.example.edu").unwrap().as_str(),
            "https://vpn.example.edu/info.json"
        );
        assert_eq!(
            info_url("https://vpn.example.edu/portal/").unwrap().as_str(),
            "https://vpn.example.edu/portal/info.json"
        );
    }

    #[test]
    fn test_info_url_rejects_bad_bases() {
        assert!(matches!(info_url("not a url"), Err(ServerInfoError::InvalidBaseUrl { .. })));
        assert!(matches!(
            info_url("ftp://vpn.example.edu/"),
            Err(ServerInfoError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn test_decode_info_document() {
        let info = ServerInfo::from_slice(info_json("vpn.example.edu").as_bytes()).unwrap();
        assert_eq!(info.api_base_url.as_str(), "https://vpn.example.edu/api");
        assert_eq!(
            info.authorization_endpoint.as_str(),
            "https://vpn.example.edu/oauth/authorize"
        );
    }

    #[test]
    fn test_missing_api_v2_is_malformed() {
        let doc = br#"{"api": {"http://eduvpn.org/api#1": {}}}"#;
        assert!(matches!(
            ServerInfo::from_slice(doc),
            Err(ServerInfoError::MalformedServerInfo { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_writes_through_to_cache() {
        let transport = Arc::new(MockTransport::new());
        transport.insert("https://vpn.example.edu/info.json", info_json("vpn.example.edu"));
        let cache = Arc::new(ResponseCache::in_memory(64 * 1024));
        let fetcher = ServerInfoFetcher::with_cache(transport.clone(), cache.clone());

        let info = fetcher.fetch("https://vpn.example.edu/").await.unwrap();

        assert_eq!(info.token_endpoint.as_str(), "https://vpn.example.edu/oauth/token");
        assert!(cache.contains(&Url::parse("https://vpn.example.edu/info.json").unwrap()));
        assert!(transport.requests()[0].accept_json);
    }

    #[tokio::test]
    async fn test_fetch_persists_to_disk_cache() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.insert("https://vpn.example.edu/info.json", info_json("vpn.example.edu"));
        let cache = Arc::new(ResponseCache::open(dir.path(), 64 * 1024).unwrap());

        ServerInfoFetcher::with_cache(transport, cache)
            .fetch("https://vpn.example.edu/")
            .await
            .unwrap();

        let reopened = ResponseCache::open(dir.path(), 64 * 1024).unwrap();
        let hit = reopened
            .get(&Url::parse("https://vpn.example.edu/info.json").unwrap())
            .unwrap();
        assert_eq!(hit.body, Bytes::from(info_json("vpn.example.edu")));
    }

    #[tokio::test]
    async fn test_fetch_split_merges_documents() {
        let transport = Arc::new(MockTransport::new());
        transport.insert("https://api.example.edu/info.json", info_json("api.example.edu"));
        transport.insert("https://auth.example.edu/info.json", info_json("auth.example.edu"));
        let fetcher = ServerInfoFetcher::new(transport.clone());

        let info = fetcher
            .fetch_split("https://api.example.edu/", "https://auth.example.edu/")
            .await
            .unwrap();

        assert_eq!(info.api_base_url.as_str(), "https://api.example.edu/api");
        assert_eq!(
            info.authorization_endpoint.as_str(),
            "https://auth.example.edu/oauth/authorize"
        );
        assert_eq!(info.token_endpoint.as_str(), "https://auth.example.edu/oauth/token");
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_split_same_base_fetches_once() {
        let transport = Arc::new(MockTransport::new());
        transport.insert("https://vpn.example.edu/info.json", info_json("vpn.example.edu"));
        let fetcher = ServerInfoFetcher::new(transport.clone());

        fetcher
            .fetch_split("https://vpn.example.edu/", "https://vpn.example.edu/")
            .await
            .unwrap();
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_http_error_surfaces_as_transport() {
        let transport = Arc::new(MockTransport::new());
        transport.insert_status("https://vpn.example.edu/info.json", 503);
        let cache = Arc::new(ResponseCache::in_memory(1024));
        let fetcher = ServerInfoFetcher::with_cache(transport, cache.clone());

        let err = fetcher.fetch("https://vpn.example.edu/").await.unwrap_err();
        assert!(matches!(
            err,
            ServerInfoError::Transport(TransportError::Status { status: 503, .. })
        ));
        assert!(cache.is_empty());
    }
}
