//! Method-call surface for a host UI
//!
//! Every call is a method name plus a JSON argument map and returns JSON.
//! Request methods never fail at this layer: bad arguments, transport
//! errors and pin rejections all come back as a request outcome.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod error;
pub mod models;
pub mod streams;

pub use api::Bridge;
pub use error::{BridgeError, Result};
pub use models::{Method, RequestArgs};
pub use streams::{init_bridge_logging, log_channel, LogForwardLayer, LogLine};
