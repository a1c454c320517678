//! All four stacks behind one configuration store
//!
//! Each request runs on its own worker task; the caller awaits the outcome
//! and never blocks on I/O.

use crate::adapters::{EngineAdapter, ExternalAdapter, ExternalTransport, PlatformAdapter, PooledAdapter, StackAdapter};
use crate::{
    CaBundle, CurlTransport, EngineLifecycleManager, EngineOptions, Error, HttpRequest, RequestOutcome,
    Result, TrustSettings,
};
use pinprobe_core::{PinningConfig, PinningConfigStore, StackName};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Construction parameters for [`PinningHarness`]
#[derive(Clone, Default)]
pub struct HarnessOptions {
    /// Default trust for in-process stacks
    pub trust: TrustSettings,
    /// CA bundle handed to the external transport
    pub ca_bundle: Option<CaBundle>,
    /// External transport; `curl` when unset
    pub external: Option<Arc<dyn ExternalTransport>>,
    /// Engine build parameters
    pub engine: EngineOptions,
}

/// Configuration store, adapters and the engine lifecycle, wired together
pub struct PinningHarness {
    store: Arc<PinningConfigStore>,
    platform: Arc<PlatformAdapter>,
    pooled: Arc<PooledAdapter>,
    engine: Arc<EngineAdapter>,
    external: Arc<ExternalAdapter>,
    manager: Arc<EngineLifecycleManager>,
    watcher: JoinHandle<()>,
}

impl PinningHarness {
    /// Build every adapter; must be called inside a Tokio runtime
    pub fn new(options: HarnessOptions) -> Result<Self> {
        let store = Arc::new(PinningConfigStore::new());
        let manager = Arc::new(EngineLifecycleManager::new(store.clone(), options.engine.clone()));
        let watcher = manager.spawn_config_watcher();

        let transport = options
            .external
            .unwrap_or_else(|| -> Arc<dyn ExternalTransport> {
                Arc::new(CurlTransport::new().with_trust(options.trust.clone()))
            });
        let mut external = ExternalAdapter::new(store.clone(), transport);
        if let Some(bundle) = options.ca_bundle {
            external = external.with_ca_bundle(bundle);
        }

        let harness = Self {
            platform: Arc::new(PlatformAdapter::new(store.clone(), &options.trust)?),
            pooled: Arc::new(PooledAdapter::new(store.clone(), options.trust)),
            engine: Arc::new(EngineAdapter::new(store.clone(), manager.clone())),
            external: Arc::new(external),
            manager,
            store,
            watcher,
        };
        info!("Pinning harness ready");
        Ok(harness)
    }

    /// Shared configuration store
    pub fn store(&self) -> &Arc<PinningConfigStore> {
        &self.store
    }

    /// Engine lifecycle
    pub fn engine_manager(&self) -> &Arc<EngineLifecycleManager> {
        &self.manager
    }

    /// Replace the configuration; returns the new generation
    pub fn set_config(&self, config: PinningConfig) -> u64 {
        self.store.set(config)
    }

    /// Adapter for `stack`
    pub fn adapter(&self, stack: StackName) -> Arc<dyn StackAdapter> {
        match stack {
            StackName::Platform => self.platform.clone(),
            StackName::Pooled => self.pooled.clone(),
            StackName::Engine => self.engine.clone(),
            StackName::External => self.external.clone(),
        }
    }

    /// Run `request` on `stack` in the caller's task
    pub async fn perform(&self, stack: StackName, request: HttpRequest) -> RequestOutcome {
        self.adapter(stack).perform_request(request).await
    }

    /// Run `request` on `stack` on a worker task
    pub fn spawn_request(&self, stack: StackName, request: HttpRequest) -> JoinHandle<RequestOutcome> {
        let adapter = self.adapter(stack);
        tokio::spawn(async move { adapter.perform_request(request).await })
    }

    /// Run `request` on a worker task and await its outcome
    ///
    /// A worker that panics or is aborted yields a failed outcome.
    pub async fn dispatch(&self, stack: StackName, request: HttpRequest) -> RequestOutcome {
        let started = Instant::now();
        match self.spawn_request(stack, request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(stack = %stack, "Request worker failed: {}", e);
                RequestOutcome::failure(&Error::Transport(format!("Request worker failed: {}", e)), started)
            }
        }
    }

    /// Shut the engine down and stop watching the store
    pub async fn shutdown(&self) {
        self.watcher.abort();
        self.manager.shutdown().await;
    }
}

impl Drop for PinningHarness {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
