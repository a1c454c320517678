//! Engine lifecycle: `Unbuilt` or `Built(host)`
//!
//! The state sits behind one async mutex held across shutdown and rebuild,
//! so no caller sees a half-replaced engine and two callers never both
//! rebuild.

use super::pinned::{EngineOptions, PinnedEngine};
use crate::Result;
use pinprobe_core::{ConfigSnapshot, PinningConfigStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Observable lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    /// No engine exists
    Unbuilt,
    /// An engine bound to `host`, built from config `generation`
    Built {
        /// Bound host
        host: String,
        /// Configuration generation
        generation: u64,
    },
}

enum EngineState {
    Unbuilt,
    Built(Arc<PinnedEngine>),
}

/// Owns the single live engine
pub struct EngineLifecycleManager {
    store: Arc<PinningConfigStore>,
    options: EngineOptions,
    state: Mutex<EngineState>,
    live: Arc<AtomicUsize>,
}

impl EngineLifecycleManager {
    /// Manager reading `store`; nothing is built until first use
    pub fn new(store: Arc<PinningConfigStore>, options: EngineOptions) -> Self {
        Self {
            store,
            options,
            state: Mutex::new(EngineState::Unbuilt),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Engine for `host` under the current configuration, rebuilding if the
    /// host or the configuration generation differs
    pub async fn engine_for(&self, host: &str) -> Result<Arc<PinnedEngine>> {
        self.engine_for_snapshot(host, self.store.get()).await
    }

    /// Engine for `host` built from exactly `snapshot`
    ///
    /// Callers that already chose a technique from a snapshot pass it here so
    /// the engine carries the same pins. An older snapshot may briefly replace
    /// a newer engine; the config watcher rebuilds it afterwards.
    pub async fn engine_for_snapshot(&self, host: &str, snapshot: Arc<ConfigSnapshot>) -> Result<Arc<PinnedEngine>> {
        let mut state = self.state.lock().await;
        if let EngineState::Built(engine) = &*state {
            if engine.host() == host && engine.generation() == snapshot.generation {
                return Ok(engine.clone());
            }
            debug!(
                bound = engine.host(),
                requested = host,
                built_from = engine.generation(),
                wanted = snapshot.generation,
                "Engine stale, rebuilding"
            );
        }
        self.rebuild_locked(&mut state, host, &snapshot)
    }

    /// Unconditionally rebuild for `host` with the current configuration
    pub async fn rebuild(&self, host: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let snapshot = self.store.get();
        self.rebuild_locked(&mut state, host, &snapshot).map(|_| ())
    }

    /// Rebuild for the bound host if the configuration moved on
    ///
    /// Does nothing while `Unbuilt`. A failed rebuild leaves `Unbuilt`.
    pub async fn on_config_changed(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let snapshot = self.store.get();
        let host = match &*state {
            EngineState::Built(engine) if engine.generation() != snapshot.generation => {
                engine.host().to_string()
            }
            _ => return Ok(()),
        };
        self.rebuild_locked(&mut state, &host, &snapshot).map(|_| ())
    }

    /// Rebuild on every configuration change published by the store
    ///
    /// The task holds only a weak reference and ends with the manager.
    pub fn spawn_config_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.store.subscribe();
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let generation = *changes.borrow_and_update();
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if let Err(e) = manager.on_config_changed().await {
                    warn!(generation, "Engine rebuild after configuration change failed: {}", e);
                }
            }
        })
    }

    /// Current state
    pub async fn status(&self) -> EngineStatus {
        match &*self.state.lock().await {
            EngineState::Unbuilt => EngineStatus::Unbuilt,
            EngineState::Built(engine) => EngineStatus::Built {
                host: engine.host().to_string(),
                generation: engine.generation(),
            },
        }
    }

    /// Engines built and not yet shut down
    pub fn live_engines(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Shut down the engine, if any, and return to `Unbuilt`
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let EngineState::Built(engine) = std::mem::replace(&mut *state, EngineState::Unbuilt) {
            engine.shutdown();
        }
    }

    fn rebuild_locked(
        &self,
        state: &mut EngineState,
        host: &str,
        snapshot: &ConfigSnapshot,
    ) -> Result<Arc<PinnedEngine>> {
        if let EngineState::Built(old) = std::mem::replace(state, EngineState::Unbuilt) {
            old.shutdown();
        }
        let engine = Arc::new(
            PinnedEngine::build(host, snapshot, &self.options, self.live.clone()).map_err(|e| {
                warn!(host, generation = snapshot.generation, "Engine build failed: {}", e);
                e
            })?,
        );
        info!(host, generation = snapshot.generation, "Engine ready");
        *state = EngineState::Built(engine.clone());
        Ok(engine)
    }
}
