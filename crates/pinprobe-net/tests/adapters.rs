mod common;

use common::{TestServer, BODY, WRONG_PIN};
use pinprobe_core::{PinningConfig, PinningConfigStore, StackName, TechniqueName};
use pinprobe_net::{
    EngineAdapter, EngineLifecycleManager, EngineOptions, EngineStatus, ErrorKind, HttpRequest, PlatformAdapter,
    PooledAdapter, RequestOutcome, StackAdapter,
};
use std::sync::Arc;

fn store_with(config: PinningConfig) -> Arc<PinningConfigStore> {
    Arc::new(PinningConfigStore::with_config(config))
}

fn assert_ok(outcome: &RequestOutcome) {
    assert_eq!(outcome.error, None, "unexpected failure");
    assert_eq!(outcome.status, Some(200));
    assert_eq!(outcome.body, BODY);
}

fn assert_pin_rejected(outcome: &RequestOutcome) {
    assert_eq!(outcome.status, None);
    assert_eq!(outcome.error_kind, Some(ErrorKind::PinMismatch));
    assert!(
        outcome.error.as_deref().unwrap_or_default().contains("SSL pinning mismatch"),
        "error was {:?}",
        outcome.error
    );
}

fn platform(server: &TestServer, config: PinningConfig) -> PlatformAdapter {
    PlatformAdapter::new(store_with(config), &server.trust()).unwrap()
}

fn pooled(server: &TestServer, config: PinningConfig) -> PooledAdapter {
    PooledAdapter::new(store_with(config), server.trust())
}

fn engine(server: &TestServer, config: PinningConfig) -> EngineAdapter {
    let store = store_with(config);
    let options = EngineOptions {
        trust: server.trust(),
        ..EngineOptions::default()
    };
    let manager = Arc::new(EngineLifecycleManager::new(store.clone(), options));
    EngineAdapter::new(store, manager)
}

fn request(server: &TestServer) -> HttpRequest {
    HttpRequest::new("GET", &server.url(), 5_000).unwrap()
}

#[tokio::test]
async fn test_platform_post_connect_accepts_matching_pin() {
    let server = TestServer::start().await;
    let config = PinningConfig::public_key([server.leaf_spki.clone()]);
    let outcome = platform(&server, config).perform_request(request(&server)).await;
    assert_ok(&outcome);
}

#[tokio::test]
async fn test_platform_post_connect_rejects_wrong_pin() {
    let server = TestServer::start().await;
    let outcome = platform(&server, PinningConfig::public_key([WRONG_PIN]))
        .perform_request(request(&server))
        .await;
    assert_pin_rejected(&outcome);
    assert!(outcome.error.unwrap().contains("postConnect"));
}

#[tokio::test]
async fn test_platform_trust_override_checks_pins_in_handshake() {
    let server = TestServer::start().await;
    let good = PinningConfig::public_key([server.leaf_spki.clone()])
        .with_override(StackName::Platform, TechniqueName::TrustManagerOverride)
        .unwrap();
    assert_ok(&platform(&server, good).perform_request(request(&server)).await);

    let bad = PinningConfig::public_key([WRONG_PIN])
        .with_override(StackName::Platform, TechniqueName::TrustManagerOverride)
        .unwrap();
    assert_pin_rejected(&platform(&server, bad).perform_request(request(&server)).await);
}

#[tokio::test]
async fn test_platform_cert_hash_mode() {
    let server = TestServer::start().await;
    let good = PinningConfig::cert_hash([server.leaf_cert.clone()]);
    assert_ok(&platform(&server, good).perform_request(request(&server)).await);

    // an SPKI digest is not a certificate digest
    let bad = PinningConfig::cert_hash([server.leaf_spki.clone()]);
    assert_pin_rejected(&platform(&server, bad).perform_request(request(&server)).await);
}

#[tokio::test]
async fn test_wrong_pins_ignored_when_disabled_or_technique_none() {
    let server = TestServer::start().await;
    let disabled = PinningConfig {
        enabled: false,
        ..PinningConfig::public_key([WRONG_PIN])
    };
    assert_ok(&platform(&server, disabled.clone()).perform_request(request(&server)).await);
    assert_ok(&pooled(&server, disabled).perform_request(request(&server)).await);

    let none = PinningConfig::public_key([WRONG_PIN]).with_default_technique(TechniqueName::None);
    assert_ok(&platform(&server, none.clone()).perform_request(request(&server)).await);
    assert_ok(&pooled(&server, none).perform_request(request(&server)).await);
}

#[tokio::test]
async fn test_pooled_native_pinner() {
    let server = TestServer::start().await;
    let good = PinningConfig::public_key([server.leaf_spki.clone()]);
    let adapter = pooled(&server, good);
    assert_ok(&adapter.perform_request(request(&server)).await);
    // cached client is reused
    assert_ok(&adapter.perform_request(request(&server)).await);

    let bad = PinningConfig::public_key([WRONG_PIN]);
    assert_pin_rejected(&pooled(&server, bad).perform_request(request(&server)).await);
}

#[tokio::test]
async fn test_pooled_empty_pin_list_is_a_pin_mismatch() {
    let server = TestServer::start().await;
    let config = PinningConfig::public_key(Vec::<String>::new());
    assert_pin_rejected(&pooled(&server, config.clone()).perform_request(request(&server)).await);
    assert_pin_rejected(&platform(&server, config).perform_request(request(&server)).await);
}

#[tokio::test]
async fn test_pooled_native_pinner_matches_intermediate() {
    let server = TestServer::start().await;
    let config = PinningConfig::public_key([server.ca_spki.clone()]);
    assert_ok(&pooled(&server, config).perform_request(request(&server)).await);
}

#[tokio::test]
async fn test_pooled_post_connect_and_cert_hash_fallback() {
    let server = TestServer::start().await;
    let post = PinningConfig::public_key([WRONG_PIN])
        .with_override(StackName::Pooled, TechniqueName::PostConnectVerify)
        .unwrap();
    assert_pin_rejected(&pooled(&server, post).perform_request(request(&server)).await);

    let cert = PinningConfig::cert_hash([server.leaf_cert.clone()]);
    assert_ok(&pooled(&server, cert).perform_request(request(&server)).await);

    let cert_bad = PinningConfig::cert_hash([WRONG_PIN]);
    assert_pin_rejected(&pooled(&server, cert_bad).perform_request(request(&server)).await);
}

#[tokio::test]
async fn test_engine_pin_registration() {
    let server = TestServer::start().await;
    let good = PinningConfig::public_key([server.leaf_spki.clone()])
        .with_override(StackName::Engine, TechniqueName::EnginePinRegistration)
        .unwrap();
    assert_ok(&engine(&server, good).perform_request(request(&server)).await);

    let bad = PinningConfig::public_key([WRONG_PIN])
        .with_override(StackName::Engine, TechniqueName::EnginePinRegistration)
        .unwrap();
    assert_pin_rejected(&engine(&server, bad).perform_request(request(&server)).await);
}

#[tokio::test]
async fn test_engine_without_technique_ignores_pins() {
    let server = TestServer::start().await;
    let outcome = engine(&server, PinningConfig::public_key([WRONG_PIN]))
        .perform_request(request(&server))
        .await;
    assert_ok(&outcome);
}

#[tokio::test]
async fn test_engine_rejects_cert_hash_mode() {
    let server = TestServer::start().await;
    let config = PinningConfig::cert_hash([server.leaf_cert.clone()])
        .with_override(StackName::Engine, TechniqueName::EnginePinRegistration)
        .unwrap();
    let outcome = engine(&server, config).perform_request(request(&server)).await;
    assert_eq!(outcome.status, None);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Config));
    assert!(outcome.error.unwrap().contains("certHash"));
}

#[tokio::test]
async fn test_engine_build_failure_fails_closed_until_fixed() {
    let server = TestServer::start().await;
    let store = store_with(
        PinningConfig::public_key(["sha256/not-base64!"])
            .with_override(StackName::Engine, TechniqueName::EnginePinRegistration)
            .unwrap(),
    );
    let options = EngineOptions {
        trust: server.trust(),
        ..EngineOptions::default()
    };
    let manager = Arc::new(EngineLifecycleManager::new(store.clone(), options));
    let adapter = EngineAdapter::new(store.clone(), manager.clone());

    for _ in 0..2 {
        let outcome = adapter.perform_request(request(&server)).await;
        assert_eq!(outcome.status, None);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Config));
        assert_eq!(manager.status().await, EngineStatus::Unbuilt);
        assert_eq!(manager.live_engines(), 0);
    }

    store.set(
        PinningConfig::public_key([server.leaf_spki.clone()])
            .with_override(StackName::Engine, TechniqueName::EnginePinRegistration)
            .unwrap(),
    );
    assert_ok(&adapter.perform_request(request(&server)).await);
    assert_eq!(manager.live_engines(), 1);
}

#[tokio::test]
async fn test_untrusted_chain_is_a_transport_failure() {
    let server = TestServer::start().await;
    // default roots do not include the test CA
    let adapter = PlatformAdapter::new(
        store_with(PinningConfig::default()),
        &pinprobe_net::TrustSettings::default(),
    )
    .unwrap();
    let outcome = adapter.perform_request(request(&server)).await;
    assert_eq!(outcome.status, None);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Transport));
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let adapter = PooledAdapter::new(store_with(PinningConfig::default()), Default::default());
    let request = HttpRequest::new("GET", &format!("http://127.0.0.1:{}/", port), 2_000).unwrap();
    let outcome = adapter.perform_request(request).await;
    assert_eq!(outcome.status, None);
    assert!(outcome.error.is_some());
    assert!(!outcome.is_pin_mismatch());
}
