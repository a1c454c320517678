//! Log forwarding to the host UI
//!
//! Harness events are copied into a bounded channel as they are recorded.
//! When the UI falls behind, lines are dropped rather than blocking the
//! emitting task.

use serde::Serialize;
use std::fmt::{self, Write as _};
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Lines buffered before new ones are dropped
pub const LOG_BUFFER: usize = 1024;

/// One forwarded log event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    /// `INFO`, `WARN`, ...
    pub level: String,
    /// Emitting module
    pub target: String,
    /// Message followed by `key=value` fields
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.level, self.target, self.message)
    }
}

/// `tracing` layer forwarding `pinprobe*` events into a channel
pub struct LogForwardLayer {
    tx: mpsc::Sender<LogLine>,
}

/// Forwarding layer and the receiving end of its stream
pub fn log_channel() -> (LogForwardLayer, mpsc::Receiver<LogLine>) {
    let (tx, rx) = mpsc::channel(LOG_BUFFER);
    (LogForwardLayer { tx }, rx)
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for LogForwardLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !metadata.target().starts_with("pinprobe") {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let line = LogLine {
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message: visitor.message + &visitor.fields,
        };
        // full or closed: drop the line
        let _ = self.tx.try_send(line);
    }
}

/// Install fmt output plus forwarding and return the log stream
///
/// Returns `None` when a global subscriber is already installed.
pub fn init_bridge_logging(json: bool) -> Option<mpsc::Receiver<LogLine>> {
    let (layer, rx) = log_channel();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter).with(layer);
    let installed = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    installed.ok().map(|_| rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwards_pinprobe_events_only() {
        let (layer, mut rx) = log_channel();
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "pinprobe_net::adapters", host = "example.com", "Request completed");
            tracing::info!(target: "hyper::proto", "ignored");
        });

        let line = rx.try_recv().unwrap();
        assert_eq!(line.level, "INFO");
        assert_eq!(line.target, "pinprobe_net::adapters");
        assert_eq!(line.message, "Request completed host=example.com");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_channel_drops_lines() {
        let (tx, mut rx) = mpsc::channel(1);
        let subscriber = tracing_subscriber::registry().with(LogForwardLayer { tx });
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "pinprobe_core", "first");
            tracing::warn!(target: "pinprobe_core", "second");
        });
        assert_eq!(rx.try_recv().unwrap().message, "first");
        assert!(rx.try_recv().is_err());
    }
}
