//! Pinning configuration
//!
//! `PinningConfig` is the validated, typed configuration every adapter reads.
//! `PinningConfigRequest` is the untrusted boundary form it is built from.

use crate::technique::StackTechnique;
use crate::{normalize_pin, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Upper bound on pins per list accepted from the boundary
pub const MAX_PINS: usize = 64;

/// Upper bound on a single pin's length accepted from the boundary
pub const MAX_PIN_LEN: usize = 256;

/// Which digest a pin is compared against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PinMode {
    /// SHA-256 over the SubjectPublicKeyInfo
    #[default]
    PublicKey,
    /// SHA-256 over the whole certificate
    CertHash,
}

impl PinMode {
    /// Boundary name
    pub fn as_str(&self) -> &'static str {
        match self {
            PinMode::PublicKey => "publicKey",
            PinMode::CertHash => "certHash",
        }
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PinMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "publicKey" => Ok(PinMode::PublicKey),
            "certHash" => Ok(PinMode::CertHash),
            other => Err(Error::Config(format!("Unknown pin mode '{}'", other))),
        }
    }
}

/// Network stack an adapter drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StackName {
    /// Platform-default client, one connection per request
    Platform,
    /// Pooled client with native pin support
    Pooled,
    /// Lifecycle-managed engine with pins baked in at build time
    Engine,
    /// External command-line transport
    External,
}

impl StackName {
    /// All stacks
    pub const ALL: [StackName; 4] = [
        StackName::Platform,
        StackName::Pooled,
        StackName::Engine,
        StackName::External,
    ];

    /// Boundary name
    pub fn as_str(&self) -> &'static str {
        match self {
            StackName::Platform => "platform",
            StackName::Pooled => "pooled",
            StackName::Engine => "engine",
            StackName::External => "external",
        }
    }

    /// Whether `technique` is one this stack can apply
    pub fn supports(&self, technique: TechniqueName) -> bool {
        use TechniqueName::*;
        match self {
            StackName::Platform => {
                matches!(technique, None | TrustManagerOverride | PostConnectVerify)
            }
            StackName::Pooled => matches!(technique, None | NativePinner | PostConnectVerify),
            StackName::Engine => matches!(technique, None | EnginePinRegistration),
            StackName::External => {
                matches!(technique, None | PreflightCheck | ContextLevelCheck | Both)
            }
        }
    }
}

impl fmt::Display for StackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StackName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "platform" | "httpUrlConnection" => Ok(StackName::Platform),
            "pooled" | "okHttp" => Ok(StackName::Pooled),
            "engine" | "cronet" => Ok(StackName::Engine),
            "external" | "nativeCurl" => Ok(StackName::External),
            other => Err(Error::Config(format!("Unknown stack '{}'", other))),
        }
    }
}

/// Every technique name understood at the configuration boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TechniqueName {
    /// No enforcement
    None,
    /// Custom trust decision installed before the handshake
    TrustManagerOverride,
    /// Default trust, then verify the negotiated leaf
    PostConnectVerify,
    /// Client's built-in pinning feature
    NativePinner,
    /// Pins registered at engine construction
    EnginePinRegistration,
    /// Separate pin check before the external transfer
    PreflightCheck,
    /// Pin check inside the external transport's TLS context
    ContextLevelCheck,
    /// Preflight and context-level check
    Both,
}

impl TechniqueName {
    /// Boundary name
    pub fn as_str(&self) -> &'static str {
        match self {
            TechniqueName::None => "none",
            TechniqueName::TrustManagerOverride => "trustManagerOverride",
            TechniqueName::PostConnectVerify => "postConnectVerify",
            TechniqueName::NativePinner => "nativePinner",
            TechniqueName::EnginePinRegistration => "enginePinRegistration",
            TechniqueName::PreflightCheck => "preflightCheck",
            TechniqueName::ContextLevelCheck => "contextLevelCheck",
            TechniqueName::Both => "both",
        }
    }
}

impl fmt::Display for TechniqueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TechniqueName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let technique = match s {
            "none" => TechniqueName::None,
            "trustManagerOverride" | "trustManager" => TechniqueName::TrustManagerOverride,
            "postConnectVerify" | "postConnect" => TechniqueName::PostConnectVerify,
            "nativePinner" | "okhttpPinner" => TechniqueName::NativePinner,
            "enginePinRegistration" | "cronetPinning" => TechniqueName::EnginePinRegistration,
            "preflightCheck" | "curlPreflight" | "preflight" => TechniqueName::PreflightCheck,
            "contextLevelCheck" | "curlSslCtx" | "sslctx" => TechniqueName::ContextLevelCheck,
            "both" | "curlBoth" | "auto" => TechniqueName::Both,
            other => return Err(Error::Config(format!("Unknown technique '{}'", other))),
        };
        Ok(technique)
    }
}

/// Default technique plus per-stack overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TechniqueSettings {
    /// Applied to every stack that supports it
    pub default: Option<TechniqueName>,
    /// Per-stack choice, always supported by its stack
    pub overrides: BTreeMap<StackName, TechniqueName>,
}

/// Validated pinning configuration, replaced wholesale on update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinningConfig {
    /// Pinning active at all
    pub enabled: bool,
    /// Digest kind compared against pins
    pub mode: PinMode,
    /// SPKI pins, as configured
    pub spki_pins: Vec<String>,
    /// Whole-certificate pins, as configured
    #[serde(rename = "certSha256Pins")]
    pub cert_pins: Vec<String>,
    /// Technique selection
    pub techniques: TechniqueSettings,
}

impl PinningConfig {
    /// Enabled config with SPKI pins and no technique selection
    pub fn public_key<I, S>(pins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: true,
            mode: PinMode::PublicKey,
            spki_pins: pins.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Enabled config with whole-certificate pins and no technique selection
    pub fn cert_hash<I, S>(pins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: true,
            mode: PinMode::CertHash,
            cert_pins: pins.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the default technique
    pub fn with_default_technique(mut self, technique: TechniqueName) -> Self {
        self.techniques.default = Some(technique);
        self
    }

    /// Set a per-stack override
    ///
    /// Fails when the stack cannot apply the technique.
    pub fn with_override(mut self, stack: StackName, technique: TechniqueName) -> Result<Self> {
        if !stack.supports(technique) {
            return Err(Error::Config(format!(
                "Technique '{}' is not supported by the {} stack",
                technique, stack
            )));
        }
        self.techniques.overrides.insert(stack, technique);
        Ok(self)
    }

    /// Technique a stack applies: override, else default when supported, else built-in
    pub fn effective_technique<T: StackTechnique>(&self) -> T {
        self.techniques
            .overrides
            .get(&T::STACK)
            .and_then(|name| T::try_from(*name).ok())
            .or_else(|| {
                self.techniques
                    .default
                    .and_then(|name| T::try_from(name).ok())
            })
            .unwrap_or(T::BUILTIN_DEFAULT)
    }

    /// Configured pins of the list matching `mode`
    pub fn active_pins(&self) -> &[String] {
        match self.mode {
            PinMode::PublicKey => &self.spki_pins,
            PinMode::CertHash => &self.cert_pins,
        }
    }

    /// Normalized pins of the list matching `mode`
    pub fn normalized_pins(&self) -> Vec<String> {
        self.active_pins().iter().map(|p| normalize_pin(p)).collect()
    }
}

/// Untrusted configuration as it arrives from the method-call boundary
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinningConfigRequest {
    /// Pinning active at all
    #[serde(default)]
    pub enabled: bool,
    /// `publicKey` or `certHash`; absent means `publicKey`
    #[serde(default)]
    pub mode: Option<String>,
    /// SPKI pins
    #[serde(default)]
    pub spki_pins: Vec<String>,
    /// Whole-certificate pins
    #[serde(default, rename = "certSha256Pins", alias = "certPins")]
    pub cert_pins: Vec<String>,
    /// Technique selection
    #[serde(default)]
    pub techniques: Option<TechniquesRequest>,
}

/// Untrusted technique selection
///
/// Besides `default` and `overrides`, a flat `{stackName: technique}` form is
/// accepted; `null` values there mean "no override".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TechniquesRequest {
    /// Default technique name
    #[serde(default)]
    pub default: Option<String>,
    /// Stack name to technique name
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
    /// Flat per-stack keys
    #[serde(flatten)]
    pub per_stack: BTreeMap<String, serde_json::Value>,
}

impl TryFrom<PinningConfigRequest> for PinningConfig {
    type Error = Error;

    fn try_from(request: PinningConfigRequest) -> Result<Self> {
        let mode = match request.mode.as_deref() {
            Some(mode) => mode.parse()?,
            None => PinMode::PublicKey,
        };
        check_pins("spkiPins", &request.spki_pins)?;
        check_pins("certSha256Pins", &request.cert_pins)?;

        let mut config = PinningConfig {
            enabled: request.enabled,
            mode,
            spki_pins: request.spki_pins,
            cert_pins: request.cert_pins,
            techniques: TechniqueSettings::default(),
        };

        let Some(techniques) = request.techniques else {
            return Ok(config);
        };
        if let Some(default) = techniques.default.as_deref() {
            config.techniques.default = Some(default.parse()?);
        }
        for (stack, value) in &techniques.per_stack {
            match value {
                serde_json::Value::Null => {}
                serde_json::Value::String(technique) => {
                    config = config.with_override(stack.parse()?, technique.parse()?)?;
                }
                other => {
                    return Err(Error::Config(format!(
                        "Technique for '{}' must be a string, got {}",
                        stack, other
                    )))
                }
            }
        }
        // explicit overrides win over the flat form
        for (stack, technique) in &techniques.overrides {
            config = config.with_override(stack.parse()?, technique.parse()?)?;
        }
        Ok(config)
    }
}

fn check_pins(field: &str, pins: &[String]) -> Result<()> {
    if pins.len() > MAX_PINS {
        return Err(Error::Config(format!(
            "{} has {} entries, at most {} allowed",
            field,
            pins.len(),
            MAX_PINS
        )));
    }
    if let Some(pin) = pins.iter().find(|p| p.len() > MAX_PIN_LEN) {
        return Err(Error::Config(format!(
            "{} entry of {} chars exceeds {}",
            field,
            pin.len(),
            MAX_PIN_LEN
        )));
    }
    Ok(())
}
