//! Pin normalization and certificate digests
//!
//! A pin is the standard base64 encoding of a SHA-256 digest, optionally
//! written as `sha256/<base64>`. SPKI pins hash the DER SubjectPublicKeyInfo,
//! cert-hash pins hash the whole DER certificate. Digests are computed fresh
//! for every verification.

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

/// Optional pin prefix accepted on input
pub const PIN_PREFIX: &str = "sha256/";

/// Substring carried by every pin rejection, so callers can grep for it
pub const PIN_MISMATCH_MARKER: &str = "SSL pinning mismatch";

/// SHA-256 digest length in bytes
pub const DIGEST_LEN: usize = 32;

/// Canonical comparison form of a pin: no whitespace, no `sha256/` prefix.
pub fn normalize_pin(pin: &str) -> String {
    let compact: String = pin.chars().filter(|c| !c.is_whitespace()).collect();
    let mut rest = compact.as_str();
    while let Some(stripped) = rest.strip_prefix(PIN_PREFIX) {
        rest = stripped;
    }
    rest.to_string()
}

/// Base64 SHA-256 of the certificate's SubjectPublicKeyInfo
pub fn spki_sha256_base64(cert_der: &[u8]) -> Result<String> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| Error::Certificate(format!("Failed to parse certificate: {}", e)))?;
    Ok(sha256_base64(cert.public_key().raw))
}

/// Base64 SHA-256 of the whole DER certificate
///
/// The certificate is parsed first so garbage input is rejected the same way
/// for both pin modes.
pub fn cert_sha256_base64(cert_der: &[u8]) -> Result<String> {
    X509Certificate::from_der(cert_der)
        .map_err(|e| Error::Certificate(format!("Failed to parse certificate: {}", e)))?;
    Ok(sha256_base64(cert_der))
}

/// Decode a pin into its raw digest, requiring exactly 32 bytes
pub fn decode_pin_digest(pin: &str) -> Result<[u8; DIGEST_LEN]> {
    let normalized = normalize_pin(pin);
    let bytes = STANDARD
        .decode(normalized.as_bytes())
        .map_err(|e| Error::InvalidPin(format!("'{}' is not valid base64: {}", pin, e)))?;
    bytes.as_slice().try_into().map_err(|_| {
        Error::InvalidPin(format!(
            "'{}' decodes to {} bytes, expected {}",
            pin,
            bytes.len(),
            DIGEST_LEN
        ))
    })
}

pub(crate) fn sha256_base64(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}
