//! Server certificate verifiers
//!
//! `PinTrustVerifier` replaces the trust decision with the pin check.
//! `HostPinVerifier` keeps default trust and additionally requires a pinned
//! key somewhere in the validated chain for pinned hosts.
//! `AcceptAnyVerifier` is only used to read a peer's certificates.

use crate::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use pinprobe_core::{decode_pin_digest, spki_sha256_base64, ConfigSnapshot, PIN_MISMATCH_MARKER};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::{DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Pin check as the handshake's whole trust decision
///
/// The hostname is not checked, matching a trust manager swapped in for the
/// platform default.
#[derive(Debug)]
pub(crate) struct PinTrustVerifier {
    snapshot: Arc<ConfigSnapshot>,
    provider: Arc<CryptoProvider>,
}

impl PinTrustVerifier {
    pub(crate) fn new(snapshot: Arc<ConfigSnapshot>, provider: Arc<CryptoProvider>) -> Self {
        Self { snapshot, provider }
    }
}

impl ServerCertVerifier for PinTrustVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let mut chain: Vec<&[u8]> = Vec::with_capacity(1 + intermediates.len());
        chain.push(end_entity.as_ref());
        chain.extend(intermediates.iter().map(|c| c.as_ref()));

        let result = pinprobe_core::verify_chain(&chain, &self.snapshot.config);
        debug!(
            server = %server_name_str(server_name),
            accepted = result.accepted,
            "Trust manager override decision: {}",
            result.reason
        );
        if result.accepted {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(result.reason))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

pub(crate) fn server_name_str(name: &ServerName<'_>) -> String {
    match name {
        ServerName::DnsName(dns) => dns.as_ref().to_string(),
        ServerName::IpAddress(ip) => std::net::IpAddr::from(*ip).to_string(),
        _ => String::new(),
    }
}

/// SPKI pins registered for one host
#[derive(Debug, Clone)]
pub struct HostPins {
    host: String,
    include_subdomains: bool,
    expires_at: Option<SystemTime>,
    digests: HashSet<String>,
}

impl HostPins {
    /// Decode and register `pins` for `host`
    ///
    /// Every pin must decode to a 32-byte digest. An empty list is accepted
    /// and rejects every chain for the host.
    pub fn new<S: AsRef<str>>(
        host: &str,
        pins: &[S],
        include_subdomains: bool,
        expires_at: Option<SystemTime>,
    ) -> Result<Self> {
        let digests = pins
            .iter()
            .map(|pin| decode_pin_digest(pin.as_ref()).map(|digest| STANDARD.encode(digest)))
            .collect::<pinprobe_core::Result<HashSet<_>>>()?;
        Ok(Self {
            host: host.trim_end_matches('.').to_ascii_lowercase(),
            include_subdomains,
            expires_at,
            digests,
        })
    }

    /// Pinned host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Number of distinct pinned keys
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    /// Whether no key is pinned
    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Whether these pins govern connections to `server_name` right now
    pub fn applies_to(&self, server_name: &str) -> bool {
        if self
            .expires_at
            .is_some_and(|expiry| SystemTime::now() >= expiry)
        {
            return false;
        }
        let name = server_name.trim_end_matches('.').to_ascii_lowercase();
        name == self.host
            || (self.include_subdomains
                && name
                    .strip_suffix(self.host.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.')))
    }

    /// Whether any certificate of the chain carries a pinned key
    pub fn matches_chain<'a>(&self, chain: impl IntoIterator<Item = &'a [u8]>) -> bool {
        chain.into_iter().any(|der| {
            spki_sha256_base64(der).is_ok_and(|digest| self.digests.contains(&digest))
        })
    }
}

/// Default trust plus host-scoped SPKI pins
#[derive(Debug)]
pub(crate) struct HostPinVerifier {
    inner: Arc<WebPkiServerVerifier>,
    pins: Vec<HostPins>,
}

impl HostPinVerifier {
    pub(crate) fn new(inner: Arc<WebPkiServerVerifier>, pins: Vec<HostPins>) -> Self {
        Self { inner, pins }
    }
}

impl ServerCertVerifier for HostPinVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let verified =
            self.inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;

        let name = server_name_str(server_name);
        for pins in self.pins.iter().filter(|p| p.applies_to(&name)) {
            let chain = std::iter::once(end_entity.as_ref())
                .chain(intermediates.iter().map(|c| c.as_ref()));
            if !pins.matches_chain(chain) {
                warn!(host = %name, pinned = pins.len(), "Pinned key not found in chain");
                return Err(rustls::Error::General(format!(
                    "{}: certificate chain for {} matched none of {} pinned keys",
                    PIN_MISMATCH_MARKER,
                    name,
                    pins.len()
                )));
            }
            debug!(host = %name, "Pinned key found in chain");
        }
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Accepts any certificate; signatures are still checked
#[derive(Debug)]
pub(crate) struct AcceptAnyVerifier {
    provider: Arc<CryptoProvider>,
}

impl AcceptAnyVerifier {
    pub(crate) fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for AcceptAnyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
