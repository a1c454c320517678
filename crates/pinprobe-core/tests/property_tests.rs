//! Property-based tests for pinprobe-core
//!
//! Uses proptest to verify pin normalization and verification invariants

use pinprobe_core::{normalize_pin, verify, PinMode, PinningConfig};
use proptest::prelude::*;

// ============================================================================
// Property Test Strategies
// ============================================================================

/// Base64-alphabet pin bodies, padded or not
fn pin_body_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9+/]{0,43}=?").unwrap()
}

/// Arbitrary text, including whitespace and stray prefixes
fn any_pin_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("(sha256/)?[ \\tA-Za-z0-9+/=]{0,60}").unwrap()
}

/// Whitespace runs
fn whitespace_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[ \\t\\r\\n]{0,4}").unwrap()
}

// ============================================================================
// Normalization Properties
// ============================================================================

proptest! {
    /// Property: normalizing twice equals normalizing once
    #[test]
    fn prop_normalize_idempotent(pin in any_pin_strategy()) {
        let once = normalize_pin(&pin);
        prop_assert_eq!(normalize_pin(&once), once);
    }

    /// Property: the prefix and surrounding whitespace never change the result
    #[test]
    fn prop_prefix_and_padding_equivalent(
        body in pin_body_strategy(),
        left in whitespace_strategy(),
        right in whitespace_strategy()
    ) {
        let plain = normalize_pin(&body);
        prop_assert_eq!(&normalize_pin(&format!("sha256/{}", body)), &plain);
        prop_assert_eq!(&normalize_pin(&format!("{}{}{}", left, body, right)), &plain);
        prop_assert_eq!(&normalize_pin(&format!(" {} ", body)), &plain);
    }

    /// Property: whitespace inserted anywhere is ignored
    #[test]
    fn prop_interior_whitespace_ignored(
        body in pin_body_strategy(),
        split in 0usize..44
    ) {
        let split = split.min(body.len());
        let spaced = format!("{} \n{}", &body[..split], &body[split..]);
        prop_assert_eq!(normalize_pin(&spaced), normalize_pin(&body));
    }

    /// Property: normalized pins carry no whitespace
    #[test]
    fn prop_normalized_has_no_whitespace(pin in any_pin_strategy()) {
        prop_assert!(!normalize_pin(&pin).chars().any(char::is_whitespace));
    }
}

// ============================================================================
// Verification Properties
// ============================================================================

proptest! {
    /// Property: disabled pinning accepts any bytes against any pins
    #[test]
    fn prop_disabled_accepts_everything(
        cert in prop::collection::vec(any::<u8>(), 0..256),
        pins in prop::collection::vec(any_pin_strategy(), 0..5),
        cert_hash in any::<bool>()
    ) {
        let config = PinningConfig {
            enabled: false,
            mode: if cert_hash { PinMode::CertHash } else { PinMode::PublicKey },
            spki_pins: pins.clone(),
            cert_pins: pins,
            ..PinningConfig::default()
        };
        prop_assert!(verify(&cert, &config).accepted);
    }

    /// Property: random bytes never pass an enabled check
    #[test]
    fn prop_garbage_rejected_when_enabled(
        cert in prop::collection::vec(any::<u8>(), 0..128),
        pins in prop::collection::vec(pin_body_strategy(), 0..5)
    ) {
        let config = PinningConfig::public_key(pins);
        prop_assert!(!verify(&cert, &config).accepted);
    }
}
