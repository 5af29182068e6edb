//! Integration tests for the signed discovery fetch pipeline.
//!
//! These exercise the fetcher, cache, and service together over the mock
//! transport, including:
//! - Re-verification of cached pairs on every read
//! - Join semantics of the concurrent data/signature requests
//! - Idempotent refreshes and cache persistence across restarts
//! - Origin selection with caller-driven fallback

use bytes::Bytes;
use eduvpn_crypto::test_support::TestSigner;
use eduvpn_crypto::{KeyRing, VerificationError};
use eduvpn_discovery::{
    DiscoveryError, DiscoveryFetcher, DiscoveryOrigin, DiscoveryService, HttpResponse,
    MockTransport, ResponseCache, SignedListUrls, TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const SERVERS: &str = "https://disco.example.org/v2/server_list.json";
const SERVERS_SIG: &str = "https://disco.example.org/v2/server_list.json.minisig";
const ORGS: &str = "https://disco.example.org/v2/organization_list.json";
const ORGS_SIG: &str = "https://disco.example.org/v2/organization_list.json.minisig";

const SERVER_LIST: &[u8] = br#"{
    "v": 1700000000,
    "server_list": [
        {"server_type": "institute_access", "base_url": "https://vpn.example.edu/", "display_name": "Example"},
        {"server_type": "secure_internet", "base_url": "https://nl.eduvpn.org/", "country_code": "NL"}
    ]
}"#;

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn signer() -> TestSigner {
    TestSigner::from_seed(42, *b"disco-01")
}

fn ring(signer: &TestSigner) -> KeyRing {
    KeyRing::from_base64([signer.public_key_base64()])
}

fn serve_servers(transport: &MockTransport, signer: &TestSigner) {
    transport.insert(SERVERS, SERVER_LIST);
    transport.insert(SERVERS_SIG, signer.signature_file(SERVER_LIST));
}

fn raw_response(target: &str, body: &[u8]) -> HttpResponse {
    HttpResponse {
        url: url(target),
        status: 200,
        content_type: None,
        body: Bytes::copy_from_slice(body),
    }
}

#[tokio::test]
async fn test_network_then_cache_round_trip() {
    let transport = Arc::new(MockTransport::new());
    let signer = signer();
    serve_servers(&transport, &signer);
    let fetcher = DiscoveryFetcher::new(transport.clone(), Arc::new(ResponseCache::in_memory(1 << 20)));

    let fresh = fetcher
        .fetch(DiscoveryOrigin::Network, &url(SERVERS), &url(SERVERS_SIG), &ring(&signer))
        .await
        .expect("network fetch should verify");
    let cached = fetcher
        .fetch(DiscoveryOrigin::Cache, &url(SERVERS), &url(SERVERS_SIG), &ring(&signer))
        .await
        .expect("cache fetch should verify");

    assert_eq!(fresh, cached);
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn test_tampered_cache_entry_is_rejected() {
    let signer = signer();
    let cache = Arc::new(ResponseCache::in_memory(1 << 20));
    cache
        .put_all(&[
            raw_response(SERVERS, br#"{"v": 1, "server_list": []}"#),
            raw_response(SERVERS_SIG, &signer.signature_file(SERVER_LIST)),
        ])
        .unwrap();
    let fetcher = DiscoveryFetcher::new(Arc::new(MockTransport::new()), cache);

    let err = fetcher
        .fetch(DiscoveryOrigin::Cache, &url(SERVERS), &url(SERVERS_SIG), &ring(&signer))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DiscoveryError::Verification(VerificationError::InvalidSignature { .. })
    ));
}

#[tokio::test]
async fn test_cache_signed_by_unknown_key_is_rejected() {
    let signer = signer();
    let stranger = TestSigner::from_seed(7, *b"stranger");
    let cache = Arc::new(ResponseCache::in_memory(1 << 20));
    cache
        .put_all(&[
            raw_response(SERVERS, SERVER_LIST),
            raw_response(SERVERS_SIG, &stranger.signature_file(SERVER_LIST)),
        ])
        .unwrap();
    let fetcher = DiscoveryFetcher::new(Arc::new(MockTransport::new()), cache);

    let err = fetcher
        .fetch(DiscoveryOrigin::Cache, &url(SERVERS), &url(SERVERS_SIG), &ring(&signer))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DiscoveryError::Verification(VerificationError::DataCouldNotBeVerified)
    ));
    assert!(err.is_trust_failure());
}

#[tokio::test]
async fn test_signature_failure_fails_join_before_slow_data_completes() {
    let transport = Arc::new(MockTransport::new());
    let signer = signer();
    transport.insert_delayed(SERVERS, SERVER_LIST, Duration::from_secs(30));
    transport.insert_error(
        SERVERS_SIG,
        TransportError::Timeout {
            url: SERVERS_SIG.to_string(),
        },
    );
    let fetcher = DiscoveryFetcher::new(transport.clone(), Arc::new(ResponseCache::in_memory(1 << 20)));

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        fetcher.fetch(DiscoveryOrigin::Network, &url(SERVERS), &url(SERVERS_SIG), &ring(&signer)),
    )
    .await
    .expect("join should short-circuit on the first failure");

    assert!(matches!(
        result,
        Err(DiscoveryError::Transport(TransportError::Timeout { .. }))
    ));
    assert!(fetcher.cache().is_empty());
}

#[tokio::test]
async fn test_data_status_error_caches_nothing() {
    let transport = Arc::new(MockTransport::new());
    let signer = signer();
    transport.insert_status(SERVERS, 500);
    transport.insert(SERVERS_SIG, signer.signature_file(SERVER_LIST));
    let fetcher = DiscoveryFetcher::new(transport, Arc::new(ResponseCache::in_memory(1 << 20)));

    let err = fetcher
        .fetch(DiscoveryOrigin::Network, &url(SERVERS), &url(SERVERS_SIG), &ring(&signer))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DiscoveryError::Transport(TransportError::Status { status: 500, .. })
    ));
    assert!(fetcher.cache().is_empty());
}

#[tokio::test]
async fn test_repeated_network_fetches_are_identical() {
    let transport = Arc::new(MockTransport::new());
    let signer = signer();
    serve_servers(&transport, &signer);
    let fetcher = DiscoveryFetcher::new(transport, Arc::new(ResponseCache::in_memory(1 << 20)));
    let keys = ring(&signer);
    let (data_url, sig_url) = (url(SERVERS), url(SERVERS_SIG));

    let (a, b) = tokio::join!(
        fetcher.fetch(DiscoveryOrigin::Network, &data_url, &sig_url, &keys),
        fetcher.fetch(DiscoveryOrigin::Network, &data_url, &sig_url, &keys),
    );
    let c = fetcher
        .fetch(DiscoveryOrigin::Network, &data_url, &sig_url, &keys)
        .await
        .unwrap();

    assert_eq!(a.unwrap(), c);
    assert_eq!(b.unwrap(), c);
    assert_eq!(fetcher.cache().len(), 2);

    let cached = fetcher
        .fetch(DiscoveryOrigin::Cache, &data_url, &sig_url, &keys)
        .await
        .unwrap();
    assert_eq!(cached, c);
}

#[tokio::test]
async fn test_verified_data_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let signer = signer();

    {
        let transport = Arc::new(MockTransport::new());
        serve_servers(&transport, &signer);
        let cache = Arc::new(ResponseCache::open(dir.path(), 1 << 20).unwrap());
        DiscoveryFetcher::new(transport, cache)
            .fetch(DiscoveryOrigin::Network, &url(SERVERS), &url(SERVERS_SIG), &ring(&signer))
            .await
            .unwrap();
    }

    let offline = Arc::new(MockTransport::new());
    let cache = Arc::new(ResponseCache::open(dir.path(), 1 << 20).unwrap());
    let fetcher = DiscoveryFetcher::new(offline.clone(), cache);

    let body = fetcher
        .fetch(DiscoveryOrigin::Cache, &url(SERVERS), &url(SERVERS_SIG), &ring(&signer))
        .await
        .unwrap();
    assert_eq!(body, Bytes::from_static(SERVER_LIST));
    assert!(offline.requests().is_empty());
}

#[tokio::test]
async fn test_caller_falls_back_to_cache_when_offline() {
    let transport = Arc::new(MockTransport::new());
    let signer = signer();
    serve_servers(&transport, &signer);
    let cache = Arc::new(ResponseCache::in_memory(1 << 20));
    let keys = ring(&signer);

    DiscoveryFetcher::new(transport, cache.clone())
        .fetch(DiscoveryOrigin::Network, &url(SERVERS), &url(SERVERS_SIG), &keys)
        .await
        .unwrap();

    // Every URL now answers 404
    let fetcher = DiscoveryFetcher::new(Arc::new(MockTransport::new()), cache);
    let err = fetcher
        .fetch(DiscoveryOrigin::Network, &url(SERVERS), &url(SERVERS_SIG), &keys)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let body = fetcher
        .fetch(DiscoveryOrigin::Cache, &url(SERVERS), &url(SERVERS_SIG), &keys)
        .await
        .unwrap();
    assert_eq!(body, Bytes::from_static(SERVER_LIST));
}

#[tokio::test]
async fn test_service_end_to_end() {
    let transport = Arc::new(MockTransport::new());
    let signer = signer();
    let stale_key = TestSigner::from_seed(3, *b"retired!");
    serve_servers(&transport, &signer);
    let orgs = br#"{"v": 1700000001, "organization_list": [
        {"org_id": "https://idp.example.edu", "display_name": {"en": "Example"}, "secure_internet_home": "https://nl.eduvpn.org/"}
    ]}"#;
    transport.insert(ORGS, &orgs[..]);
    transport.insert(ORGS_SIG, signer.signature_file(orgs));

    let service = DiscoveryService::new(
        SignedListUrls {
            data: url(SERVERS),
            signature: url(SERVERS_SIG),
        },
        SignedListUrls {
            data: url(ORGS),
            signature: url(ORGS_SIG),
        },
        KeyRing::from_base64([stale_key.public_key_base64(), signer.public_key_base64()]),
        transport,
        Arc::new(ResponseCache::in_memory(1 << 20)),
    );

    let servers = service.servers(DiscoveryOrigin::Network).await.unwrap();
    let organizations = service.organizations(DiscoveryOrigin::Network).await.unwrap();

    assert_eq!(servers.len(), 2);
    let home = servers
        .secure_internet_home(&organizations.organizations[0])
        .unwrap();
    assert_eq!(home.country_code, "NL");

    let cached_orgs = service.organizations(DiscoveryOrigin::Cache).await.unwrap();
    assert_eq!(cached_orgs, organizations);
}

#[tokio::test]
async fn test_rejected_rollback_is_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let signer = signer();
    let newer: &'static [u8] = br#"{"v": 10, "server_list": []}"#;
    let older: &'static [u8] = br#"{"v": 9, "server_list": []}"#;

    {
        let transport = Arc::new(MockTransport::new());
        transport.insert(SERVERS, newer);
        transport.insert(SERVERS_SIG, signer.signature_file(newer));
        let service = DiscoveryService::new(
            SignedListUrls {
                data: url(SERVERS),
                signature: url(SERVERS_SIG),
            },
            SignedListUrls {
                data: url(ORGS),
                signature: url(ORGS_SIG),
            },
            ring(&signer),
            transport.clone(),
            Arc::new(ResponseCache::open(dir.path(), 1 << 20).unwrap()),
        );
        service.servers(DiscoveryOrigin::Network).await.unwrap();

        transport.insert(SERVERS, older);
        transport.insert(SERVERS_SIG, signer.signature_file(older));
        let err = service.servers(DiscoveryOrigin::Network).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::VersionRollback { .. }));
    }

    let cache = Arc::new(ResponseCache::open(dir.path(), 1 << 20).unwrap());
    let body = DiscoveryFetcher::new(Arc::new(MockTransport::new()), cache)
        .fetch(DiscoveryOrigin::Cache, &url(SERVERS), &url(SERVERS_SIG), &ring(&signer))
        .await
        .unwrap();
    assert_eq!(body, Bytes::from_static(newer));
}
