//! Lifecycle-managed engine adapter

use super::{log_outcome, StackAdapter};
use crate::engine::{EngineLifecycleManager, RequestHandle, UrlRequestCallback};
use crate::{Error, HttpRequest, RequestOutcome, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use pinprobe_core::{ConfigSnapshot, EngineTechnique, PinningConfigStore, StackName, StackTechnique};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

/// Adapter running requests on the managed engine
pub struct EngineAdapter {
    store: Arc<PinningConfigStore>,
    manager: Arc<EngineLifecycleManager>,
}

impl EngineAdapter {
    /// Adapter over `manager`
    pub fn new(store: Arc<PinningConfigStore>, manager: Arc<EngineLifecycleManager>) -> Self {
        Self { store, manager }
    }

    /// Manager owning the engine
    pub fn manager(&self) -> &Arc<EngineLifecycleManager> {
        &self.manager
    }

    async fn execute(&self, request: HttpRequest, snapshot: Arc<ConfigSnapshot>) -> Result<(u16, String)> {
        let engine = self.manager.engine_for_snapshot(request.host(), snapshot).await?;
        let (done, finished) = oneshot::channel();
        let callback = Arc::new(BufferingCallback::new(done));
        let handle = engine.start(request, callback)?;
        // dropped on timeout, which cancels the in-flight request
        let _guard = CancelOnDrop(handle);
        finished
            .await
            .map_err(|_| Error::Transport("Engine dropped the request".to_string()))?
    }
}

#[async_trait]
impl StackAdapter for EngineAdapter {
    fn stack(&self) -> StackName {
        StackName::Engine
    }

    async fn perform_request(&self, request: HttpRequest) -> RequestOutcome {
        let started = Instant::now();
        let snapshot = self.store.get();
        let technique = if snapshot.config.enabled {
            snapshot.config.effective_technique::<EngineTechnique>()
        } else {
            EngineTechnique::None
        };

        let result = tokio::time::timeout(request.timeout(), self.execute(request.clone(), snapshot))
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout(format!(
                    "Request to {} timed out after {} ms",
                    request.url(),
                    request.timeout().as_millis()
                )))
            });

        let outcome = RequestOutcome::from_result(result, started);
        log_outcome(self.stack(), technique.name().as_str(), &request, &outcome);
        outcome
    }
}

struct CancelOnDrop(RequestHandle);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[derive(Default)]
struct Buffer {
    status: Option<u16>,
    body: Vec<u8>,
}

/// Collects a request's callbacks into one result
struct BufferingCallback {
    buffer: Mutex<Buffer>,
    done: Mutex<Option<oneshot::Sender<Result<(u16, String)>>>>,
}

impl BufferingCallback {
    fn new(done: oneshot::Sender<Result<(u16, String)>>) -> Self {
        Self {
            buffer: Mutex::new(Buffer::default()),
            done: Mutex::new(Some(done)),
        }
    }

    fn finish(&self, result: Result<(u16, String)>) {
        if let Some(done) = self.done.lock().take() {
            let _ = done.send(result);
        }
    }
}

impl UrlRequestCallback for BufferingCallback {
    fn on_response_started(&self, status: u16) {
        self.buffer.lock().status = Some(status);
    }

    fn on_read_completed(&self, chunk: Bytes) {
        self.buffer.lock().body.extend_from_slice(&chunk);
    }

    fn on_succeeded(&self) {
        let buffer = std::mem::take(&mut *self.buffer.lock());
        let result = match buffer.status {
            Some(status) => Ok((status, String::from_utf8_lossy(&buffer.body).into_owned())),
            None => Err(Error::Transport("Engine reported success without a response".to_string())),
        };
        self.finish(result);
    }

    fn on_failed(&self, error: Error) {
        self.finish(Err(error));
    }

    fn on_canceled(&self) {
        self.finish(Err(Error::Transport("Request canceled".to_string())));
    }
}
