//! Per-stack enforcement adapters
//!
//! Every adapter reads one configuration snapshot per request, bounds the
//! whole exchange by the request timeout and turns every failure into a
//! `RequestOutcome` instead of an error.

mod engine;
mod external;
mod platform;
mod pooled;

pub use engine::EngineAdapter;
pub use external::{
    ExternalAdapter, ExternalTransport, CA_INFO_HEADER, CERT_PINS_HEADER, INSECURE_HEADER,
    SPKI_PINS_HEADER, TECHNIQUE_HEADER,
};
pub use platform::PlatformAdapter;
pub use pooled::PooledAdapter;

use crate::debug_log::log_pin_event;
use crate::{HttpRequest, RequestOutcome};
use async_trait::async_trait;
use pinprobe_core::StackName;
use tracing::{info, warn};

/// One network stack with its enforcement point
#[async_trait]
pub trait StackAdapter: Send + Sync {
    /// Stack this adapter drives
    fn stack(&self) -> StackName;

    /// Perform the request; never fails, failures are carried in the outcome
    async fn perform_request(&self, request: HttpRequest) -> RequestOutcome;
}

pub(crate) fn log_outcome(stack: StackName, technique: &str, request: &HttpRequest, outcome: &RequestOutcome) {
    match (&outcome.error, outcome.error_kind) {
        (None, _) => info!(
            stack = %stack,
            technique,
            host = request.host(),
            status = outcome.status,
            duration_ms = outcome.duration_ms,
            "Request completed"
        ),
        (Some(error), kind) => {
            warn!(
                stack = %stack,
                technique,
                host = request.host(),
                kind = ?kind,
                duration_ms = outcome.duration_ms,
                "Request failed: {}",
                error
            );
            if outcome.is_pin_mismatch() {
                log_pin_event(
                    &format!("adapters:{}", stack),
                    "pin_reject",
                    &format!("host={} technique={} error={}", request.host(), technique, error),
                );
            }
        }
    }
}
