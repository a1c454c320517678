//! External transport adapter
//!
//! Pin material and the technique travel out-of-band as reserved request
//! headers; the transport behind `ExternalTransport` enforces them itself.

use super::{log_outcome, StackAdapter};
use crate::{CaBundle, HttpRequest, RequestOutcome};
use async_trait::async_trait;
use pinprobe_core::{
    ExternalTechnique, PinMode, PinningConfig, PinningConfigStore, StackName, StackTechnique,
};
use std::sync::Arc;
use tracing::debug;

/// CA bundle path for the transport
pub const CA_INFO_HEADER: &str = "X-Curl-CaInfo";
/// Comma-joined SPKI pins
pub const SPKI_PINS_HEADER: &str = "X-Curl-SpkiPins";
/// Comma-joined whole-certificate pins
pub const CERT_PINS_HEADER: &str = "X-Curl-CertPins";
/// `preflight`, `sslctx` or `both`
pub const TECHNIQUE_HEADER: &str = "X-Curl-Technique";
/// `true`/`1` disables chain verification in the transport
pub const INSECURE_HEADER: &str = "X-Curl-Insecure";

/// Out-of-process transport that honours the side-channel headers
#[async_trait]
pub trait ExternalTransport: Send + Sync {
    /// Perform the request; failures are carried in the outcome
    async fn perform(&self, request: HttpRequest) -> RequestOutcome;
}

/// Adapter attaching side-channel headers for an external transport
pub struct ExternalAdapter {
    store: Arc<PinningConfigStore>,
    transport: Arc<dyn ExternalTransport>,
    ca_bundle: Option<CaBundle>,
}

impl ExternalAdapter {
    /// Adapter delegating to `transport`
    pub fn new(store: Arc<PinningConfigStore>, transport: Arc<dyn ExternalTransport>) -> Self {
        Self {
            store,
            transport,
            ca_bundle: None,
        }
    }

    /// Pass this bundle's path to the transport on every request
    pub fn with_ca_bundle(mut self, bundle: CaBundle) -> Self {
        self.ca_bundle = Some(bundle);
        self
    }

    /// Add the side-channel headers for `config`, keeping any the caller set
    pub fn attach_side_channel(&self, request: HttpRequest, config: &PinningConfig) -> HttpRequest {
        let mut request = request;

        if let Some(bundle) = &self.ca_bundle {
            match bundle.ensure() {
                Ok(path) => {
                    request = add_if_absent(request, CA_INFO_HEADER, &path.to_string_lossy());
                }
                Err(e) => debug!("CA bundle unavailable: {}", e),
            }
        }

        let technique = config.effective_technique::<ExternalTechnique>();
        let Some(technique_value) = technique.header_value().filter(|_| config.enabled) else {
            return request;
        };
        match config.mode {
            PinMode::PublicKey if !config.spki_pins.is_empty() => {
                request = add_if_absent(request, SPKI_PINS_HEADER, &config.spki_pins.join(","));
            }
            PinMode::CertHash if !config.cert_pins.is_empty() => {
                request = add_if_absent(request, CERT_PINS_HEADER, &config.cert_pins.join(","));
            }
            _ => {}
        }
        add_if_absent(request, TECHNIQUE_HEADER, technique_value)
    }
}

fn add_if_absent(request: HttpRequest, name: &str, value: &str) -> HttpRequest {
    if request.has_header(name) {
        return request;
    }
    let fallback = request.clone();
    request.with_header(name, value).unwrap_or_else(|e| {
        debug!("Side-channel header {} not attached: {}", name, e);
        fallback
    })
}

#[async_trait]
impl StackAdapter for ExternalAdapter {
    fn stack(&self) -> StackName {
        StackName::External
    }

    async fn perform_request(&self, request: HttpRequest) -> RequestOutcome {
        let snapshot = self.store.get();
        let technique = if snapshot.config.enabled {
            snapshot.config.effective_technique::<ExternalTechnique>()
        } else {
            ExternalTechnique::None
        };
        let request = self.attach_side_channel(request, &snapshot.config);
        let outcome = self.transport.perform(request.clone()).await;
        log_outcome(self.stack(), technique.name().as_str(), &request, &outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pinprobe_core::{StackName, TechniqueName};
    use std::time::Instant;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl ExternalTransport for Recording {
        async fn perform(&self, request: HttpRequest) -> RequestOutcome {
            self.seen.lock().push(request);
            RequestOutcome::success(204, String::new(), Instant::now())
        }
    }

    fn adapter(config: PinningConfig) -> (ExternalAdapter, Arc<Recording>) {
        let store = Arc::new(PinningConfigStore::with_config(config));
        let transport = Arc::new(Recording::default());
        (ExternalAdapter::new(store, transport.clone()), transport)
    }

    fn request() -> HttpRequest {
        HttpRequest::get("https://example.com/").unwrap()
    }

    #[tokio::test]
    async fn test_no_pin_headers_when_disabled() {
        let config = PinningConfig {
            enabled: false,
            ..PinningConfig::public_key(["a"])
        }
        .with_override(StackName::External, TechniqueName::Both)
        .unwrap();
        let (adapter, transport) = adapter(config);
        let outcome = adapter.perform_request(request()).await;
        assert_eq!(outcome.status, Some(204));

        let seen = transport.seen.lock();
        assert!(!seen[0].has_header(SPKI_PINS_HEADER));
        assert!(!seen[0].has_header(TECHNIQUE_HEADER));
    }

    #[tokio::test]
    async fn test_no_pin_headers_when_technique_none() {
        let (adapter, transport) = adapter(PinningConfig::public_key(["a", "b"]));
        adapter.perform_request(request()).await;
        let seen = transport.seen.lock();
        assert!(seen[0].headers().is_empty());
    }

    #[tokio::test]
    async fn test_mode_matching_pins_and_technique_attached() {
        let config = PinningConfig::public_key(["a", "sha256/b"])
            .with_override(StackName::External, TechniqueName::ContextLevelCheck)
            .unwrap();
        let (adapter, transport) = adapter(config);
        adapter.perform_request(request()).await;
        let seen = transport.seen.lock();
        assert_eq!(seen[0].header(SPKI_PINS_HEADER), Some("a,sha256/b"));
        assert_eq!(seen[0].header(TECHNIQUE_HEADER), Some("sslctx"));
        assert!(!seen[0].has_header(CERT_PINS_HEADER));
    }

    #[tokio::test]
    async fn test_cert_hash_mode_sends_cert_pins_only() {
        let mut config = PinningConfig::cert_hash(["c1", "c2"])
            .with_default_technique(TechniqueName::PreflightCheck);
        config.spki_pins = vec!["s".to_string()];
        let (adapter, transport) = adapter(config);
        adapter.perform_request(request()).await;
        let seen = transport.seen.lock();
        assert_eq!(seen[0].header(CERT_PINS_HEADER), Some("c1,c2"));
        assert_eq!(seen[0].header(TECHNIQUE_HEADER), Some("preflight"));
        assert!(!seen[0].has_header(SPKI_PINS_HEADER));
    }

    #[tokio::test]
    async fn test_caller_headers_never_overwritten() {
        let config = PinningConfig::public_key(["a"])
            .with_override(StackName::External, TechniqueName::Both)
            .unwrap();
        let (adapter, transport) = adapter(config);
        let request = request()
            .with_header("x-curl-spkipins", "mine")
            .unwrap()
            .with_header("X-CURL-TECHNIQUE", "preflight")
            .unwrap();
        adapter.perform_request(request).await;
        let seen = transport.seen.lock();
        assert_eq!(seen[0].header(SPKI_PINS_HEADER), Some("mine"));
        assert_eq!(seen[0].header(TECHNIQUE_HEADER), Some("preflight"));
        assert_eq!(seen[0].headers().len(), 2);
    }

    #[tokio::test]
    async fn test_ca_bundle_path_attached_even_without_pinning() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = CaBundle::from_bytes(b"-----BEGIN CERTIFICATE-----\n".to_vec(), dir.path(), "ca.pem");
        let (adapter, transport) = adapter(PinningConfig::default());
        let adapter = adapter.with_ca_bundle(bundle);
        adapter.perform_request(request()).await;
        let seen = transport.seen.lock();
        let path = seen[0].header(CA_INFO_HEADER).unwrap();
        assert!(path.ends_with("ca.pem"));
    }
}
