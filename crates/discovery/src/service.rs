//! Application-facing entry point for discovery data.
//!
//! `DiscoveryService` owns the key ring, the shared response cache, and
//! both fetchers. On top of the verified fetch it adds parsing, an
//! in-memory server list memo, protection against version rollback, and a
//! broadcast channel announcing every accepted refresh.
//!
//! A verified document is accepted under the service's state lock: the
//! rollback check, the cache write, the memo update, and the new version
//! floor happen together, so the cache never holds data the floor rejects.

use eduvpn_core::Config;
use eduvpn_crypto::KeyRing;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use url::Url;

use crate::cache::{run_blocking, ResponseCache};
use crate::error::{DiscoveryError, DiscoveryResult, ServerInfoError};
use crate::fetcher::{DiscoveryFetcher, DiscoveryOrigin, VerifiedDocument};
use crate::model::{discovery_version, DiscoveryList, OrganizationList, ServerList};
use crate::server_info::{ServerInfo, ServerInfoFetcher};
use crate::transport::{HttpTransport, ReqwestTransport};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Announced after a discovery list is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    ServersUpdated {
        version: Option<u64>,
        origin: DiscoveryOrigin,
    },
    OrganizationsUpdated {
        version: Option<u64>,
        origin: DiscoveryOrigin,
    },
}

/// Data and signature URLs for one signed list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedListUrls {
    pub data: Url,
    pub signature: Url,
}

#[derive(Debug, Default)]
struct ServiceState {
    servers: Option<Arc<ServerList>>,
    /// Highest accepted `v` per list
    versions: HashMap<DiscoveryList, u64>,
}

impl ServiceState {
    fn check_version(&self, list: DiscoveryList, bytes: &[u8]) -> DiscoveryResult<Option<u64>> {
        let received = discovery_version(bytes)?;
        let previous = self.versions.get(&list).copied();

        if let (Some(previous), Some(received)) = (previous, received) {
            if received < previous {
                warn!(%list, previous, received, "Rejecting discovery data rollback");
                return Err(DiscoveryError::VersionRollback {
                    list,
                    previous,
                    received,
                });
            }
        }
        Ok(received)
    }

    fn record_version(&mut self, list: DiscoveryList, version: Option<u64>) {
        if let Some(version) = version {
            let entry = self.versions.entry(list).or_insert(version);
            *entry = (*entry).max(version);
        }
    }
}

pub struct DiscoveryService {
    servers_urls: SignedListUrls,
    organizations_urls: SignedListUrls,
    keys: KeyRing,
    fetcher: DiscoveryFetcher,
    server_info: ServerInfoFetcher,
    state: RwLock<ServiceState>,
    events_tx: broadcast::Sender<DiscoveryEvent>,
}

impl std::fmt::Debug for DiscoveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryService")
            .field("servers", &self.servers_urls)
            .field("organizations", &self.organizations_urls)
            .field("keys", &self.keys.len())
            .finish_non_exhaustive()
    }
}

impl DiscoveryService {
    /// Builds the service from startup configuration: reqwest transport,
    /// disk backed cache, and the configured key ring.
    pub fn from_config(config: &Config) -> DiscoveryResult<Self> {
        config.validate()?;

        let transport = ReqwestTransport::new(&config.transport)?;
        let cache = ResponseCache::open(
            config.cache.resolved_directory(),
            config.cache.capacity_bytes,
        )?;
        let keys = KeyRing::from_base64(&config.discovery.signature_public_keys);
        if keys.is_empty() {
            warn!("No usable discovery public keys configured; every fetch will fail verification");
        }

        Ok(Self::new(
            SignedListUrls {
                data: config.discovery.server_list.clone(),
                signature: config.discovery.server_list_signature.clone(),
            },
            SignedListUrls {
                data: config.discovery.organization_list.clone(),
                signature: config.discovery.organization_list_signature.clone(),
            },
            keys,
            Arc::new(transport),
            Arc::new(cache),
        ))
    }

    pub fn new(
        servers_urls: SignedListUrls,
        organizations_urls: SignedListUrls,
        keys: KeyRing,
        transport: Arc<dyn HttpTransport>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            servers_urls,
            organizations_urls,
            keys,
            fetcher: DiscoveryFetcher::new(transport.clone(), cache.clone()),
            server_info: ServerInfoFetcher::with_cache(transport, cache),
            state: RwLock::new(ServiceState::default()),
            events_tx,
        }
    }

    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }

    pub fn fetcher(&self) -> &DiscoveryFetcher {
        &self.fetcher
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events_tx.subscribe()
    }

    /// Returns the server list. A cache-origin request is answered from the
    /// in-memory memo when one exists.
    pub async fn servers(&self, origin: DiscoveryOrigin) -> DiscoveryResult<Arc<ServerList>> {
        if origin == DiscoveryOrigin::Cache {
            if let Some(memo) = self.state.read().await.servers.as_ref() {
                return Ok(memo.clone());
            }
        }

        let document = self
            .fetcher
            .fetch_verified(
                origin,
                &self.servers_urls.data,
                &self.servers_urls.signature,
                &self.keys,
            )
            .await?;
        self.accept_servers(document).await
    }

    async fn accept_servers(&self, document: VerifiedDocument) -> DiscoveryResult<Arc<ServerList>> {
        let (list, version) = {
            let mut state = self.state.write().await;
            let version = state.check_version(DiscoveryList::Servers, &document.body)?;
            let list = Arc::new(ServerList::from_slice(&document.body)?);

            self.fetcher.commit(&document).await;
            state.servers = Some(list.clone());
            state.record_version(DiscoveryList::Servers, version);
            (list, version)
        };

        let origin = document.origin;
        info!(
            origin = %origin,
            version = ?version,
            servers = list.len(),
            "Server list updated"
        );
        let _ = self
            .events_tx
            .send(DiscoveryEvent::ServersUpdated { version, origin });
        Ok(list)
    }

    pub async fn organizations(&self, origin: DiscoveryOrigin) -> DiscoveryResult<OrganizationList> {
        let document = self
            .fetcher
            .fetch_verified(
                origin,
                &self.organizations_urls.data,
                &self.organizations_urls.signature,
                &self.keys,
            )
            .await?;

        let (list, version) = {
            let mut state = self.state.write().await;
            let version = state.check_version(DiscoveryList::Organizations, &document.body)?;
            let list = OrganizationList::from_slice(&document.body)?;

            self.fetcher.commit(&document).await;
            state.record_version(DiscoveryList::Organizations, version);
            (list, version)
        };

        info!(
            origin = %origin,
            version = ?version,
            organizations = list.organizations.len(),
            "Organization list updated"
        );
        let _ = self
            .events_tx
            .send(DiscoveryEvent::OrganizationsUpdated { version, origin });
        Ok(list)
    }

    pub async fn server_info(&self, base_url: &str) -> Result<ServerInfo, ServerInfoError> {
        self.server_info.fetch(base_url).await
    }

    pub async fn server_info_split(
        &self,
        api_base_url: &str,
        auth_base_url: &str,
    ) -> Result<ServerInfo, ServerInfoError> {
        self.server_info.fetch_split(api_base_url, auth_base_url).await
    }

    /// Highest version accepted so far for `list`.
    pub async fn accepted_version(&self, list: DiscoveryList) -> Option<u64> {
        self.state.read().await.versions.get(&list).copied()
    }

    /// Drops cached responses and the memo. Version floors are kept so a
    /// reset cannot be used to roll back to older data.
    pub async fn reset(&self) -> DiscoveryResult<()> {
        let mut state = self.state.write().await;
        state.servers = None;
        run_blocking(self.fetcher.cache(), |cache| cache.clear()).await??;
        info!("Discovery data reset");
        Ok(())
    }
}
