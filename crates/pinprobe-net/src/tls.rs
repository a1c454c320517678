//! TLS setup shared by the in-process adapters
//!
//! Every client config is built on the ring provider explicitly so no
//! process-wide default provider has to be installed.

use crate::verifiers::{AcceptAnyVerifier, HostPinVerifier, HostPins, PinTrustVerifier};
use crate::{Error, Result};
use pinprobe_core::ConfigSnapshot;
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, ServerName};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Crypto provider used by every config in this crate
pub fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Trust anchors for "default trust"
#[derive(Debug, Clone)]
pub struct TrustSettings {
    /// Include the bundled public web roots
    pub include_webpki_roots: bool,
    /// Additional anchors, e.g. from a CA bundle or a test CA
    pub extra_roots: Vec<CertificateDer<'static>>,
}

impl Default for TrustSettings {
    fn default() -> Self {
        Self {
            include_webpki_roots: true,
            extra_roots: Vec::new(),
        }
    }
}

impl TrustSettings {
    /// Trust only the given anchor
    pub fn only(root: CertificateDer<'static>) -> Self {
        Self {
            include_webpki_roots: false,
            extra_roots: vec![root],
        }
    }

    /// Add an anchor
    pub fn with_root(mut self, root: CertificateDer<'static>) -> Self {
        self.extra_roots.push(root);
        self
    }

    /// Add every certificate of a PEM bundle as an anchor
    pub fn with_pem_file(mut self, path: &Path) -> Result<Self> {
        let certs = CertificateDer::pem_file_iter(path)
            .map_err(|e| Error::Tls(format!("Failed to open CA bundle {}: {}", path.display(), e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Tls(format!("Failed to parse CA bundle {}: {}", path.display(), e)))?;
        debug!("Loaded {} anchors from {}", certs.len(), path.display());
        self.extra_roots.extend(certs);
        Ok(self)
    }

    /// Root store for these settings
    pub fn root_store(&self) -> Result<Arc<RootCertStore>> {
        let mut roots = RootCertStore::empty();
        if self.include_webpki_roots {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        for root in &self.extra_roots {
            roots
                .add(root.clone())
                .map_err(|e| Error::Tls(format!("Invalid trust anchor: {}", e)))?;
        }
        if roots.is_empty() {
            return Err(Error::Tls("No trust anchors configured".to_string()));
        }
        Ok(Arc::new(roots))
    }

    /// Chain and hostname validation against these anchors
    pub(crate) fn webpki_verifier(&self) -> Result<Arc<WebPkiServerVerifier>> {
        WebPkiServerVerifier::builder_with_provider(self.root_store()?, provider())
            .build()
            .map_err(|e| Error::Tls(format!("Failed to build certificate verifier: {}", e)))
    }
}

/// Client config under default trust
pub fn default_client_config(trust: &TrustSettings) -> Result<ClientConfig> {
    Ok(builder()?
        .with_root_certificates(trust.root_store()?)
        .with_no_client_auth())
}

/// Client config whose trust decision is the pin check alone
pub fn pin_trust_client_config(snapshot: Arc<ConfigSnapshot>) -> Result<ClientConfig> {
    let verifier = PinTrustVerifier::new(snapshot, provider());
    Ok(builder()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth())
}

/// Client config with default trust plus host-scoped SPKI pins
pub fn host_pinned_client_config(trust: &TrustSettings, pins: Vec<HostPins>) -> Result<ClientConfig> {
    let verifier = HostPinVerifier::new(trust.webpki_verifier()?, pins);
    Ok(builder()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth())
}

/// Client config that accepts any certificate, for reading a peer's pins
pub(crate) fn accept_any_client_config() -> Result<ClientConfig> {
    Ok(builder()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyVerifier::new(provider())))
        .with_no_client_auth())
}

fn builder() -> Result<rustls::ConfigBuilder<ClientConfig, rustls::WantsVerifier>> {
    ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(format!("Failed to select protocol versions: {}", e)))
}

/// TCP connect then TLS handshake, each bounded by `timeout`
pub async fn connect_tls(
    host: &str,
    port: u16,
    config: Arc<ClientConfig>,
    timeout: Duration,
) -> Result<TlsStream<TcpStream>> {
    let tcp = connect_tcp(host, port, timeout).await?;
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::InvalidRequest(format!("Invalid server name '{}': {}", host, e)))?;
    let connector = TlsConnector::from(config);
    tokio::time::timeout(timeout, connector.connect(server_name, tcp))
        .await
        .map_err(|_| Error::Timeout(format!("TLS handshake with {}:{} timed out", host, port)))?
        .map_err(|e| Error::from_source(&format!("TLS handshake with {}:{} failed", host, port), &e))
}

/// TCP connect bounded by `timeout`
pub async fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| Error::Timeout(format!("Connect to {}:{} timed out", host, port)))?
        .map_err(|e| Error::Transport(format!("Connect to {}:{} failed: {}", host, port, e)))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// DER chain the peer presented, leaf first
pub fn peer_chain(stream: &TlsStream<TcpStream>) -> Vec<CertificateDer<'static>> {
    let (_, connection) = stream.get_ref();
    connection
        .peer_certificates()
        .map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect())
        .unwrap_or_default()
}
