//! Pinning configuration store
//!
//! Holds the active configuration as an immutable snapshot behind an `Arc`.
//! Readers clone the `Arc` and keep using that snapshot for the rest of their
//! request; writers swap in a whole new snapshot and publish its generation.
//! The read lock is only ever held for a pointer swap, never across logging
//! or notification.

use crate::{Error, PinningConfig, PinningConfigRequest, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// One consistent view of the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    /// Increases by one on every `set`, starting at 0
    pub generation: u64,
    /// The configuration
    pub config: PinningConfig,
}

/// Process-wide configuration handle shared by every adapter
pub struct PinningConfigStore {
    current: RwLock<Arc<ConfigSnapshot>>,
    // serializes writers so generations are published in order
    writer: Mutex<()>,
    changes: watch::Sender<u64>,
}

impl PinningConfigStore {
    /// Store holding the safe defaults (pinning disabled)
    pub fn new() -> Self {
        Self::with_config(PinningConfig::default())
    }

    /// Store holding `config` as generation 0
    pub fn with_config(config: PinningConfig) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            current: RwLock::new(Arc::new(ConfigSnapshot {
                generation: 0,
                config,
            })),
            writer: Mutex::new(()),
            changes,
        }
    }

    /// Current snapshot
    pub fn get(&self) -> Arc<ConfigSnapshot> {
        self.current.read().clone()
    }

    /// Replace the active configuration, returning the new generation
    pub fn set(&self, config: PinningConfig) -> u64 {
        let (enabled, mode) = (config.enabled, config.mode);
        let (spki_pins, cert_pins) = (config.spki_pins.len(), config.cert_pins.len());
        let generation = {
            let _writer = self.writer.lock();
            let generation = self.current.read().generation + 1;
            let snapshot = Arc::new(ConfigSnapshot { generation, config });
            *self.current.write() = snapshot;
            self.changes.send_replace(generation);
            generation
        };
        info!(
            generation,
            enabled,
            mode = %mode,
            spki_pins,
            cert_pins,
            "Pinning configuration updated"
        );
        generation
    }

    /// Validate and apply a boundary request
    pub fn update_from_request(&self, request: PinningConfigRequest) -> Result<u64> {
        let config = PinningConfig::try_from(request)?;
        Ok(self.set(config))
    }

    /// Generations published after each `set`
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Export the active configuration as JSON
    pub fn export_json(&self) -> Result<String> {
        let snapshot = self.get();
        serde_json::to_string_pretty(&snapshot.config).map_err(Error::from)
    }

    /// Import a configuration previously written by `export_json`
    pub fn import_json(&self, json: &str) -> Result<u64> {
        let request: PinningConfigRequest = serde_json::from_str(json)?;
        debug!("Importing pinning configuration");
        self.update_from_request(request)
    }
}

impl Default for PinningConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PinMode, StackName, TechniqueName};
    use std::time::{Duration, Instant};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    #[test]
    fn test_set_replaces_snapshot_and_bumps_generation() {
        let store = PinningConfigStore::new();
        let before = store.get();
        assert_eq!(before.generation, 0);
        assert!(!before.config.enabled);

        let generation = store.set(PinningConfig::public_key(["pin"]));
        assert_eq!(generation, 1);

        // a reader holding the old snapshot is unaffected
        assert!(!before.config.enabled);
        let after = store.get();
        assert_eq!(after.generation, 1);
        assert_eq!(after.config.spki_pins, vec!["pin".to_string()]);
    }

    #[tokio::test]
    async fn test_subscribers_see_new_generation() {
        let store = PinningConfigStore::new();
        let mut rx = store.subscribe();
        store.set(PinningConfig::cert_hash(["c"]));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);
    }

    #[test]
    fn test_export_import_roundtrip_keeps_config() {
        let store = PinningConfigStore::new();
        let config = PinningConfig::cert_hash(["sha256/abc"])
            .with_default_technique(TechniqueName::PostConnectVerify)
            .with_override(StackName::External, TechniqueName::PreflightCheck)
            .unwrap();
        store.set(config.clone());

        let json = store.export_json().unwrap();
        let other = PinningConfigStore::new();
        other.import_json(&json).unwrap();
        assert_eq!(other.get().config, config);
        assert_eq!(other.get().config.mode, PinMode::CertHash);
    }

    #[test]
    fn test_invalid_request_leaves_store_untouched() {
        let store = PinningConfigStore::new();
        let err = store.import_json(r#"{"enabled": true, "mode": "bogus"}"#).unwrap_err();
        assert!(err.is_config());
        assert_eq!(store.get().generation, 0);
    }

    struct SlowLayer;

    impl<S: tracing::Subscriber> Layer<S> for SlowLayer {
        fn on_event(&self, _event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            std::thread::sleep(Duration::from_millis(400));
        }
    }

    #[test]
    fn test_slow_subscriber_does_not_block_readers() {
        let store = Arc::new(PinningConfigStore::new());
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                let subscriber = tracing_subscriber::registry().with(SlowLayer);
                tracing::subscriber::with_default(subscriber, || {
                    store.set(PinningConfig::public_key(["p"]));
                });
            })
        };
        std::thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        let snapshot = store.get();
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(snapshot.generation, 1);
        writer.join().unwrap();
    }

    #[test]
    fn test_concurrent_writers_publish_last_generation() {
        let store = Arc::new(PinningConfigStore::new());
        let rx = store.subscribe();
        let writers: Vec<_> = (0..8)
            .map(|w| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store.set(PinningConfig::public_key([format!("w{}-{}", w, i)]));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(store.get().generation, 800);
        assert_eq!(*rx.borrow(), 800);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let store = Arc::new(PinningConfigStore::new());
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    store.set(PinningConfig::public_key([format!("p{}", i), format!("p{}", i)]));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let snapshot = store.get();
                        // both pins of one write always travel together
                        if let [a, b] = snapshot.config.spki_pins.as_slice() {
                            assert_eq!(a, b);
                        }
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.get().generation, 200);
    }
}
