//! Named-operation dispatch
//!
//! ## Methods
//!
//! - `setGlobalPinningConfig`: replace the configuration; returns `null`
//! - `getGlobalPinningConfig`: current configuration in the same schema
//! - `isEnginePinningSupported`: always `true`
//! - `platformRequest`, `pooledRequest`, `engineRequest`, `externalRequest`
//!   (and their `android*` aliases): run one request; always returns
//!   `{status, body, durationMs, error, errorKind}`

use crate::models::{config_request, Method, RequestArgs};
use crate::streams::LogLine;
use crate::Result;
use parking_lot::Mutex;
use pinprobe_core::{PinningConfig, StackName};
use pinprobe_net::{HarnessOptions, PinningHarness, RequestOutcome};
use serde_json::Value;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Bridge between a host UI and the pinning harness
pub struct Bridge {
    harness: PinningHarness,
    logs: Mutex<Option<mpsc::Receiver<LogLine>>>,
}

impl Bridge {
    /// Bridge over a fresh harness; must be called inside a Tokio runtime
    pub fn new(options: HarnessOptions) -> Result<Self> {
        Ok(Self {
            harness: PinningHarness::new(options)?,
            logs: Mutex::new(None),
        })
    }

    /// Attach the receiving end of a log channel for [`Bridge::log_stream`]
    pub fn with_log_stream(self, logs: mpsc::Receiver<LogLine>) -> Self {
        *self.logs.lock() = Some(logs);
        self
    }

    /// Take the log stream; `None` if absent or already taken
    pub fn log_stream(&self) -> Option<mpsc::Receiver<LogLine>> {
        self.logs.lock().take()
    }

    /// Harness behind the bridge
    pub fn harness(&self) -> &PinningHarness {
        &self.harness
    }

    /// Dispatch `method` with its argument map
    pub async fn invoke(&self, method: &str, args: Value) -> Result<Value> {
        debug!(method, "Bridge call");
        match method.parse::<Method>()? {
            Method::SetGlobalPinningConfig => {
                self.set_global_pinning_config(args)?;
                Ok(Value::Null)
            }
            Method::GetGlobalPinningConfig => self.get_global_pinning_config(),
            Method::IsEnginePinningSupported => Ok(Value::Bool(true)),
            Method::Request(stack) => {
                let outcome = self.request(stack, args).await;
                Ok(serde_json::to_value(outcome)?)
            }
        }
    }

    /// Validate and apply a configuration map; returns the new generation
    pub fn set_global_pinning_config(&self, args: Value) -> Result<u64> {
        let request = config_request(args)?;
        let config = PinningConfig::try_from(request).map_err(|e| {
            warn!("Pinning configuration rejected: {}", e);
            e
        })?;
        Ok(self.harness.set_config(config))
    }

    /// Current configuration as a map
    pub fn get_global_pinning_config(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.harness.store().get().config)?)
    }

    /// Run a request on `stack`; invalid arguments become a failed outcome
    pub async fn request(&self, stack: StackName, args: Value) -> RequestOutcome {
        let started = Instant::now();
        let request = match RequestArgs::from_value(args) {
            Ok(args) => args.into_request(),
            Err(e) => Err(pinprobe_net::Error::InvalidRequest(e.to_string())),
        };
        match request {
            Ok(request) => {
                info!(stack = %stack, url = %request.url(), "Dispatching request");
                self.harness.dispatch(stack, request).await
            }
            Err(e) => {
                warn!(stack = %stack, "Request rejected: {}", e);
                RequestOutcome::failure(&e, started)
            }
        }
    }
}
