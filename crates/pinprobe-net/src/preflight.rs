//! Preflight pin check on a separate connection

use crate::tls::{connect_tls, peer_chain};
use crate::{Error, Result};
use pinprobe_core::{cert_sha256_base64, normalize_pin, spki_sha256_base64, PIN_MISMATCH_MARKER};
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Deadline for the whole preflight connection
pub const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to `host:port`, hash the leaf, and require its SPKI digest to be in
/// `spki_pins` or its certificate digest to be in `cert_pins`
///
/// Any failure, including an empty presented chain, is a rejection.
pub async fn verify_host_pins(
    host: &str,
    port: u16,
    spki_pins: &[String],
    cert_pins: &[String],
    tls: Arc<ClientConfig>,
) -> bool {
    match check_host_pins(host, port, spki_pins, cert_pins, tls).await {
        Ok(()) => true,
        Err(e) => {
            warn!(host, port, "Preflight pin check failed: {}", e);
            false
        }
    }
}

/// `verify_host_pins` with the failure cause
pub async fn check_host_pins(
    host: &str,
    port: u16,
    spki_pins: &[String],
    cert_pins: &[String],
    tls: Arc<ClientConfig>,
) -> Result<()> {
    let stream = connect_tls(host, port, tls, PREFLIGHT_TIMEOUT).await?;
    let chain = peer_chain(&stream);
    drop(stream);
    let leaf = chain
        .first()
        .ok_or_else(|| Error::PinMismatch(format!("{}: no peer certificate", PIN_MISMATCH_MARKER)))?;

    let spki = spki_sha256_base64(leaf)?;
    let whole = cert_sha256_base64(leaf)?;
    debug!(host, spki = %spki, cert = %whole, "Preflight digests");

    let spki_ok = spki_pins.iter().any(|p| normalize_pin(p) == spki);
    let cert_ok = cert_pins.iter().any(|p| normalize_pin(p) == whole);
    if spki_ok || cert_ok {
        Ok(())
    } else {
        Err(Error::PinMismatch(format!(
            "{}: preflight for {}:{} matched none of {} SPKI and {} certificate pins",
            PIN_MISMATCH_MARKER,
            host,
            port,
            spki_pins.len(),
            cert_pins.len()
        )))
    }
}
