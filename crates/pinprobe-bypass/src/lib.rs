//! Trust-decision bypass and traffic redirection for instrumented processes
//!
//! Hooks are expressed against a [`ProcessImage`]: a table of named exports
//! whose calls can be observed or replaced through an [`Interceptor`]. The
//! hook set covers the session authentication challenge, process-wide trust
//! evaluation, socket connect redirection to a proxy, and log-only
//! observation of the request APIs a process uses.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod interceptor;
pub mod sockaddr;
pub mod symbols;

// Re-export main types
pub use config::{BypassConfig, ProxyEndpoint};
pub use engine::{BypassEngine, HookKind, InstallReport};
pub use error::{HookError, Result};
pub use interceptor::{
    HookId, Implementation, Interceptor, InvocationListener, MemoryRef, ProcessImage, Value,
};
pub use sockaddr::SockaddrLayout;
pub use symbols::TargetSymbol;
