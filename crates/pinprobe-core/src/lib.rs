//! Pinning core
//!
//! Pin normalization and certificate digests, the typed pinning
//! configuration with its per-stack techniques, the snapshot store every
//! enforcement adapter reads from, and the leaf verifier.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod pin;
pub mod store;
pub mod technique;
pub mod verifier;

pub use config::{
    PinMode, PinningConfig, PinningConfigRequest, StackName, TechniqueName, TechniqueSettings,
    TechniquesRequest, MAX_PINS, MAX_PIN_LEN,
};
pub use error::{Error, Result};
pub use pin::{
    cert_sha256_base64, decode_pin_digest, normalize_pin, spki_sha256_base64, DIGEST_LEN,
    PIN_MISMATCH_MARKER, PIN_PREFIX,
};
pub use store::{ConfigSnapshot, PinningConfigStore};
pub use technique::{
    EngineTechnique, ExternalTechnique, PlatformTechnique, PooledTechnique, StackTechnique,
};
pub use verifier::{verify, verify_chain, VerificationResult};
