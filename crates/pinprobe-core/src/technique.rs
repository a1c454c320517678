//! Per-stack technique enumerations

use crate::{Error, StackName, TechniqueName};
use std::fmt::Debug;

/// Technique enumeration tied to one stack
pub trait StackTechnique:
    Copy + Debug + PartialEq + TryFrom<TechniqueName, Error = Error> + Send + Sync + 'static
{
    /// Stack the enumeration belongs to
    const STACK: StackName;

    /// Used when neither an override nor a supported default is configured
    const BUILTIN_DEFAULT: Self;

    /// Boundary name of this technique
    fn name(self) -> TechniqueName;

    /// Whether the technique enforces anything
    fn is_active(self) -> bool {
        self.name() != TechniqueName::None
    }
}

fn unsupported(stack: StackName, name: TechniqueName) -> Error {
    Error::Config(format!(
        "Technique '{}' is not supported by the {} stack",
        name, stack
    ))
}

/// Platform-default client techniques
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformTechnique {
    /// No enforcement
    None,
    /// Pin check replaces the handshake's trust decision
    TrustManagerOverride,
    /// Default trust, then verify the negotiated leaf
    PostConnectVerify,
}

impl TryFrom<TechniqueName> for PlatformTechnique {
    type Error = Error;

    fn try_from(name: TechniqueName) -> Result<Self, Error> {
        match name {
            TechniqueName::None => Ok(Self::None),
            TechniqueName::TrustManagerOverride => Ok(Self::TrustManagerOverride),
            TechniqueName::PostConnectVerify => Ok(Self::PostConnectVerify),
            other => Err(unsupported(Self::STACK, other)),
        }
    }
}

impl StackTechnique for PlatformTechnique {
    const STACK: StackName = StackName::Platform;
    const BUILTIN_DEFAULT: Self = Self::PostConnectVerify;

    fn name(self) -> TechniqueName {
        match self {
            Self::None => TechniqueName::None,
            Self::TrustManagerOverride => TechniqueName::TrustManagerOverride,
            Self::PostConnectVerify => TechniqueName::PostConnectVerify,
        }
    }
}

/// Pooled client techniques
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PooledTechnique {
    /// No enforcement
    None,
    /// Host-scoped SPKI pins enforced by the client's TLS layer
    NativePinner,
    /// Default trust, then verify the negotiated leaf
    PostConnectVerify,
}

impl TryFrom<TechniqueName> for PooledTechnique {
    type Error = Error;

    fn try_from(name: TechniqueName) -> Result<Self, Error> {
        match name {
            TechniqueName::None => Ok(Self::None),
            TechniqueName::NativePinner => Ok(Self::NativePinner),
            TechniqueName::PostConnectVerify => Ok(Self::PostConnectVerify),
            other => Err(unsupported(Self::STACK, other)),
        }
    }
}

impl StackTechnique for PooledTechnique {
    const STACK: StackName = StackName::Pooled;
    const BUILTIN_DEFAULT: Self = Self::NativePinner;

    fn name(self) -> TechniqueName {
        match self {
            Self::None => TechniqueName::None,
            Self::NativePinner => TechniqueName::NativePinner,
            Self::PostConnectVerify => TechniqueName::PostConnectVerify,
        }
    }
}

/// Lifecycle-managed engine techniques
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineTechnique {
    /// No enforcement
    None,
    /// Pins registered at engine construction, SPKI only
    EnginePinRegistration,
}

impl TryFrom<TechniqueName> for EngineTechnique {
    type Error = Error;

    fn try_from(name: TechniqueName) -> Result<Self, Error> {
        match name {
            TechniqueName::None => Ok(Self::None),
            TechniqueName::EnginePinRegistration => Ok(Self::EnginePinRegistration),
            other => Err(unsupported(Self::STACK, other)),
        }
    }
}

impl StackTechnique for EngineTechnique {
    const STACK: StackName = StackName::Engine;
    const BUILTIN_DEFAULT: Self = Self::None;

    fn name(self) -> TechniqueName {
        match self {
            Self::None => TechniqueName::None,
            Self::EnginePinRegistration => TechniqueName::EnginePinRegistration,
        }
    }
}

/// External transport techniques
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalTechnique {
    /// No enforcement
    None,
    /// Pin check on a separate connection before the transfer
    PreflightCheck,
    /// Pin check inside the transport's own TLS context
    ContextLevelCheck,
    /// Both checks
    Both,
}

impl ExternalTechnique {
    /// Value of the technique side-channel header, `None` when inactive
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::PreflightCheck => Some("preflight"),
            Self::ContextLevelCheck => Some("sslctx"),
            Self::Both => Some("both"),
        }
    }

    /// Parse a technique side-channel header value
    pub fn from_header_value(value: &str) -> Option<Self> {
        match value.trim() {
            "preflight" => Some(Self::PreflightCheck),
            "sslctx" => Some(Self::ContextLevelCheck),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    /// Whether a preflight check runs
    pub fn runs_preflight(self) -> bool {
        matches!(self, Self::PreflightCheck | Self::Both)
    }

    /// Whether the transport's TLS context checks pins
    pub fn runs_context_check(self) -> bool {
        matches!(self, Self::ContextLevelCheck | Self::Both)
    }
}

impl TryFrom<TechniqueName> for ExternalTechnique {
    type Error = Error;

    fn try_from(name: TechniqueName) -> Result<Self, Error> {
        match name {
            TechniqueName::None => Ok(Self::None),
            TechniqueName::PreflightCheck => Ok(Self::PreflightCheck),
            TechniqueName::ContextLevelCheck => Ok(Self::ContextLevelCheck),
            TechniqueName::Both => Ok(Self::Both),
            other => Err(unsupported(Self::STACK, other)),
        }
    }
}

impl StackTechnique for ExternalTechnique {
    const STACK: StackName = StackName::External;
    const BUILTIN_DEFAULT: Self = Self::None;

    fn name(self) -> TechniqueName {
        match self {
            Self::None => TechniqueName::None,
            Self::PreflightCheck => TechniqueName::PreflightCheck,
            Self::ContextLevelCheck => TechniqueName::ContextLevelCheck,
            Self::Both => TechniqueName::Both,
        }
    }
}
