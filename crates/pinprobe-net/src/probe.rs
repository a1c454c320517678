//! Read the pins a server currently presents

use crate::tls::{accept_any_client_config, connect_tls, peer_chain};
use crate::{Error, Result};
use pinprobe_core::{cert_sha256_base64, spki_sha256_base64};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Digests of a server's leaf certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPins {
    /// Base64 SHA-256 of the leaf SPKI
    pub spki_sha256: String,
    /// Base64 SHA-256 of the whole leaf certificate
    pub cert_sha256: String,
    /// Number of certificates presented
    pub chain_len: usize,
}

/// Connect without validating the chain and hash the presented leaf
pub async fn fetch_peer_pins(host: &str, port: u16, timeout: Duration) -> Result<PeerPins> {
    let tls = Arc::new(accept_any_client_config()?);
    let stream = connect_tls(host, port, tls, timeout).await?;
    let chain = peer_chain(&stream);
    let leaf = chain
        .first()
        .ok_or_else(|| Error::Tls("No peer certificate presented".to_string()))?;

    let pins = PeerPins {
        spki_sha256: spki_sha256_base64(leaf)?,
        cert_sha256: cert_sha256_base64(leaf)?,
        chain_len: chain.len(),
    };
    info!(host, port, spki = %pins.spki_sha256, "Fetched peer pins");
    Ok(pins)
}
