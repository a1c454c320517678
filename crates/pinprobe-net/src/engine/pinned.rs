//! Long-lived engine with pins baked in at construction
//!
//! Requests run on their own tasks; every callback for every request is
//! delivered through one dispatcher task, so a single request's callbacks
//! arrive strictly in order and exactly one terminal callback is delivered.

use crate::tls::{default_client_config, host_pinned_client_config};
use crate::{Error, HostPins, HttpRequest, Result, TrustSettings};
use bytes::Bytes;
use pinprobe_core::{ConfigSnapshot, EngineTechnique, PinMode, StackTechnique};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::fmt;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Build parameters shared by every engine a manager creates
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Default trust
    pub trust: TrustSettings,
    /// Pins also cover subdomains of the bound host
    pub include_subdomains: bool,
    /// Registered pins stop applying after this long
    pub pin_lifetime: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            trust: TrustSettings::default(),
            include_subdomains: true,
            pin_lifetime: Duration::from_secs(365 * 24 * 60 * 60),
        }
    }
}

/// Receives one request's progress, in order, on the engine's dispatcher
pub trait UrlRequestCallback: Send + Sync + 'static {
    /// Response head received
    fn on_response_started(&self, _status: u16) {}

    /// One chunk of the body read
    fn on_read_completed(&self, _chunk: Bytes) {}

    /// Body fully read
    fn on_succeeded(&self);

    /// Request failed
    fn on_failed(&self, error: Error);

    /// Request cancelled before completing
    fn on_canceled(&self);
}

enum CallbackEvent {
    Started(u16),
    Read(Bytes),
    Succeeded,
    Failed(Error),
    Canceled,
}

struct Dispatch {
    callback: Arc<dyn UrlRequestCallback>,
    event: CallbackEvent,
}

/// Cancels the request it was returned for
///
/// Dropping every clone of the handle does not cancel the request.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: u64,
    cancel: Arc<watch::Sender<bool>>,
}

impl RequestHandle {
    /// Engine-unique request id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ask the request to stop; no effect after its terminal callback
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Whether `cancel` has been called
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

async fn cancel_requested(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // every handle dropped without cancelling
        std::future::pending::<()>().await;
    }
}

/// Engine bound to one host and one configuration generation
pub struct PinnedEngine {
    host: String,
    generation: u64,
    pinned: bool,
    client: reqwest::Client,
    dispatch: mpsc::UnboundedSender<Dispatch>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
    live: Arc<AtomicUsize>,
}

impl PinnedEngine {
    /// Build an engine for `host` from `snapshot`
    ///
    /// With pinning active the configuration must be in publicKey mode and
    /// every SPKI pin must decode to a 32-byte digest. Must be called inside
    /// a tokio runtime.
    pub fn build(
        host: &str,
        snapshot: &ConfigSnapshot,
        options: &EngineOptions,
        live: Arc<AtomicUsize>,
    ) -> Result<Self> {
        let config = &snapshot.config;
        let technique = config.effective_technique::<EngineTechnique>();
        let pinned = config.enabled && technique.is_active();

        let tls = if pinned {
            if config.mode != PinMode::PublicKey {
                return Err(Error::Config(format!(
                    "Engine pinning supports only SPKI pins; mode {} is not supported",
                    config.mode
                )));
            }
            if config.spki_pins.is_empty() {
                return Err(Error::Config(format!("No SPKI pins to register for {}", host)));
            }
            let expires_at = SystemTime::now() + options.pin_lifetime;
            let pins = HostPins::new(host, &config.spki_pins, options.include_subdomains, Some(expires_at))?;
            info!(
                host,
                pins = pins.len(),
                include_subdomains = options.include_subdomains,
                "Registering engine pins"
            );
            host_pinned_client_config(&options.trust, vec![pins])?
        } else {
            default_client_config(&options.trust)?
        };

        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .build()
            .map_err(|e| Error::Tls(format!("Failed to build engine client: {}", e)))?;

        let (dispatch, mut rx) = mpsc::unbounded_channel::<Dispatch>();
        tokio::spawn(async move {
            while let Some(Dispatch { callback, event }) = rx.recv().await {
                match event {
                    CallbackEvent::Started(status) => callback.on_response_started(status),
                    CallbackEvent::Read(chunk) => callback.on_read_completed(chunk),
                    CallbackEvent::Succeeded => callback.on_succeeded(),
                    CallbackEvent::Failed(error) => callback.on_failed(error),
                    CallbackEvent::Canceled => callback.on_canceled(),
                }
            }
            debug!("Engine callback dispatcher stopped");
        });

        live.fetch_add(1, Ordering::SeqCst);
        info!(host, generation = snapshot.generation, pinned, "Engine built");
        Ok(Self {
            host: host.to_string(),
            generation: snapshot.generation,
            pinned,
            client,
            dispatch,
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            live,
        })
    }

    /// Host the engine's pins are bound to
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Configuration generation the engine was built from
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether pins were registered
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Whether `shutdown` has run
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Start a request; progress is reported to `callback`
    pub fn start(&self, request: HttpRequest, callback: Arc<dyn UrlRequestCallback>) -> Result<RequestHandle> {
        if self.is_shut_down() {
            return Err(Error::Transport(format!("Engine for {} is shut down", self.host)));
        }
        let (cancel, cancel_rx) = watch::channel(false);
        let handle = RequestHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            cancel: Arc::new(cancel),
        };

        let client = self.client.clone();
        let dispatch = self.dispatch.clone();
        let id = handle.id;
        tokio::spawn(async move {
            let events = EventSink {
                callback,
                dispatch,
            };
            let terminal = tokio::select! {
                _ = cancel_requested(cancel_rx) => CallbackEvent::Canceled,
                result = run_request(&client, &request, &events) => match result {
                    Ok(()) => CallbackEvent::Succeeded,
                    Err(e) => CallbackEvent::Failed(e),
                },
            };
            debug!(id, "Engine request finished");
            events.send(terminal);
        });
        Ok(handle)
    }

    /// Refuse new requests; in-flight requests finish on this engine
    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            info!(host = %self.host, generation = self.generation, "Engine shut down");
        }
    }
}

impl fmt::Debug for PinnedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedEngine")
            .field("host", &self.host)
            .field("generation", &self.generation)
            .field("pinned", &self.pinned)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl Drop for PinnedEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct EventSink {
    callback: Arc<dyn UrlRequestCallback>,
    dispatch: mpsc::UnboundedSender<Dispatch>,
}

impl EventSink {
    fn send(&self, event: CallbackEvent) {
        let _ = self.dispatch.send(Dispatch {
            callback: self.callback.clone(),
            event,
        });
    }
}

async fn run_request(client: &reqwest::Client, request: &HttpRequest, events: &EventSink) -> Result<()> {
    let mut builder = client.request(request.method().clone(), request.url());
    for (name, value) in request.headers() {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body() {
        builder = builder.body(body.to_owned());
    }

    let mut response = builder.send().await?;
    events.send(CallbackEvent::Started(response.status().as_u16()));
    // read until end of stream
    while let Some(chunk) = response.chunk().await? {
        events.send(CallbackEvent::Read(chunk));
    }
    Ok(())
}
