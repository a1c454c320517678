//! Leaf certificate pin verification

use crate::pin::{cert_sha256_base64, spki_sha256_base64, PIN_MISMATCH_MARKER};
use crate::{PinMode, PinningConfig};
use serde::Serialize;
use tracing::debug;

/// Accept/reject decision for one connection attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// Whether the connection may proceed
    pub accepted: bool,
    /// Human-readable cause; rejections start with `SSL pinning mismatch`
    pub reason: String,
    /// Mode the decision was made under
    pub mode: PinMode,
    /// Number of configured pins compared
    pub pins_checked: usize,
}

impl VerificationResult {
    fn accepted(mode: PinMode, pins_checked: usize, reason: impl Into<String>) -> Self {
        Self {
            accepted: true,
            reason: reason.into(),
            mode,
            pins_checked,
        }
    }

    fn rejected(mode: PinMode, pins_checked: usize, detail: impl std::fmt::Display) -> Self {
        Self {
            accepted: false,
            reason: format!("{}: {}", PIN_MISMATCH_MARKER, detail),
            mode,
            pins_checked,
        }
    }
}

/// Decide whether `leaf_der` satisfies the configured pins
///
/// Disabled pinning always accepts. Otherwise the digest selected by the mode
/// must equal one of the normalized pins of that mode's list; an empty list
/// never matches. Unparseable certificates are rejected.
pub fn verify(leaf_der: &[u8], config: &PinningConfig) -> VerificationResult {
    if !config.enabled {
        return VerificationResult::accepted(config.mode, 0, "pinning disabled");
    }

    let pins = config.normalized_pins();
    let digest = match config.mode {
        PinMode::PublicKey => spki_sha256_base64(leaf_der),
        PinMode::CertHash => cert_sha256_base64(leaf_der),
    };
    let digest = match digest {
        Ok(digest) => digest,
        Err(e) => {
            debug!(mode = %config.mode, "Pin check failed closed: {}", e);
            return VerificationResult::rejected(config.mode, pins.len(), e);
        }
    };

    debug!(
        mode = %config.mode,
        computed = %digest,
        configured = ?pins,
        "Comparing peer digest against pins"
    );

    if pins.iter().any(|pin| *pin == digest) {
        VerificationResult::accepted(config.mode, pins.len(), format!("{} pin matched", config.mode))
    } else {
        VerificationResult::rejected(
            config.mode,
            pins.len(),
            format!("no {} pin matched ({} checked)", config.mode, pins.len()),
        )
    }
}

/// Verify the first certificate of a presented chain; the rest is ignored
pub fn verify_chain<C: AsRef<[u8]>>(chain: &[C], config: &PinningConfig) -> VerificationResult {
    if !config.enabled {
        return VerificationResult::accepted(config.mode, 0, "pinning disabled");
    }
    match chain.first() {
        Some(leaf) => verify(leaf.as_ref(), config),
        None => VerificationResult::rejected(
            config.mode,
            config.active_pins().len(),
            "no peer certificate presented",
        ),
    }
}
