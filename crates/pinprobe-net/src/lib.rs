//! Pin enforcement across network stacks
//!
//! One adapter per stack, each with its own enforcement point: a trust
//! decision substituted into the handshake, a check of the negotiated peer
//! after connect, pins registered in a client or engine at construction, or
//! pin material handed to an out-of-process transport. The lifecycle-managed
//! engine is rebuilt under an exclusive lock whenever its host or the
//! configuration changes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapters;
pub mod ca_bundle;
pub mod curl;
mod debug_log;
pub mod engine;
pub mod error;
pub mod harness;
pub mod logging;
pub mod preflight;
pub mod probe;
pub mod request;
pub mod tls;
mod verifiers;

// Re-export main types
pub use adapters::{
    EngineAdapter, ExternalAdapter, ExternalTransport, PlatformAdapter, PooledAdapter,
    StackAdapter,
};
pub use ca_bundle::CaBundle;
pub use curl::CurlTransport;
pub use engine::{EngineLifecycleManager, EngineOptions, EngineStatus, PinnedEngine};
pub use error::{Error, ErrorKind, Result};
pub use harness::{HarnessOptions, PinningHarness};
pub use probe::{fetch_peer_pins, PeerPins};
pub use request::{HttpRequest, RequestOutcome};
pub use tls::TrustSettings;
pub use verifiers::HostPins;
