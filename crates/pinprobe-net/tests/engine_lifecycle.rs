mod common;

use common::{TestServer, BODY, WRONG_PIN};
use pinprobe_core::{PinningConfig, PinningConfigStore, StackName, TechniqueName};
use pinprobe_net::engine::UrlRequestCallback;
use pinprobe_net::{EngineLifecycleManager, EngineOptions, EngineStatus, Error, ErrorKind, HttpRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn pinned(pins: &[&str]) -> PinningConfig {
    PinningConfig::public_key(pins.iter().copied())
        .with_override(StackName::Engine, TechniqueName::EnginePinRegistration)
        .unwrap()
}

fn manager(store: &Arc<PinningConfigStore>, server: Option<&TestServer>) -> Arc<EngineLifecycleManager> {
    let options = EngineOptions {
        trust: server.map(TestServer::trust).unwrap_or_default(),
        ..EngineOptions::default()
    };
    Arc::new(EngineLifecycleManager::new(store.clone(), options))
}

#[tokio::test]
async fn test_builds_lazily_and_reuses() {
    let store = Arc::new(PinningConfigStore::new());
    let manager = manager(&store, None);
    assert_eq!(manager.status().await, EngineStatus::Unbuilt);
    assert_eq!(manager.live_engines(), 0);

    let first = manager.engine_for("example.com").await.unwrap();
    let second = manager.engine_for("example.com").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(manager.live_engines(), 1);
}

#[tokio::test]
async fn test_single_live_engine_across_rebuilds() {
    let store = Arc::new(PinningConfigStore::with_config(pinned(&[WRONG_PIN])));
    let manager = manager(&store, None);

    let first = manager.engine_for("a.example").await.unwrap();
    manager.rebuild("a.example").await.unwrap();
    manager.rebuild("a.example").await.unwrap();
    assert!(first.is_shut_down());
    assert_eq!(manager.live_engines(), 1);

    // another host replaces the engine
    let other = manager.engine_for("b.example").await.unwrap();
    assert_eq!(other.host(), "b.example");
    assert_eq!(manager.live_engines(), 1);

    manager.shutdown().await;
    assert_eq!(manager.live_engines(), 0);
    assert_eq!(manager.status().await, EngineStatus::Unbuilt);
}

#[tokio::test]
async fn test_concurrent_callers_never_see_two_engines() {
    let store = Arc::new(PinningConfigStore::new());
    let manager = manager(&store, None);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            let host = if i % 2 == 0 { "a.example" } else { "b.example" };
            manager.engine_for(host).await.unwrap();
            manager.live_engines()
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap() <= 1);
    }
    assert_eq!(manager.live_engines(), 1);
}

#[tokio::test]
async fn test_config_change_rebuilds_bound_engine() {
    let store = Arc::new(PinningConfigStore::new());
    let manager = manager(&store, None);
    let watcher = manager.spawn_config_watcher();

    let first = manager.engine_for("a.example").await.unwrap();
    let generation = store.set(pinned(&[WRONG_PIN]));

    let mut rebuilt = false;
    for _ in 0..50 {
        if let EngineStatus::Built { generation: g, .. } = manager.status().await {
            if g == generation {
                rebuilt = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(rebuilt);
    assert!(first.is_shut_down());
    assert_eq!(manager.live_engines(), 1);
    watcher.abort();
}

#[tokio::test]
async fn test_invalid_pin_leaves_unbuilt() {
    let store = Arc::new(PinningConfigStore::with_config(pinned(&["sha256/not-base64!"])));
    let manager = manager(&store, None);

    let err = manager.engine_for("a.example").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(manager.status().await, EngineStatus::Unbuilt);
    assert_eq!(manager.live_engines(), 0);
}

#[tokio::test]
async fn test_failed_rebuild_shuts_down_previous_engine() {
    let store = Arc::new(PinningConfigStore::new());
    let manager = manager(&store, None);
    let first = manager.engine_for("a.example").await.unwrap();

    store.set(pinned(&["sha256/short"]));
    assert!(manager.rebuild("a.example").await.is_err());
    assert!(first.is_shut_down());
    assert_eq!(manager.status().await, EngineStatus::Unbuilt);
    assert_eq!(manager.live_engines(), 0);
}

#[tokio::test]
async fn test_shut_down_engine_refuses_requests() {
    let store = Arc::new(PinningConfigStore::new());
    let manager = manager(&store, None);
    let engine = manager.engine_for("a.example").await.unwrap();
    manager.shutdown().await;

    struct Ignore;
    impl UrlRequestCallback for Ignore {
        fn on_succeeded(&self) {}
        fn on_failed(&self, _error: Error) {}
        fn on_canceled(&self) {}
    }
    let request = HttpRequest::get("https://a.example/").unwrap();
    assert!(engine.start(request, Arc::new(Ignore)).is_err());
}

#[derive(Debug, PartialEq)]
enum Event {
    Started(u16),
    Read(usize),
    Succeeded,
    Failed(ErrorKind),
    Canceled,
}

struct Recorder(mpsc::UnboundedSender<Event>);

impl UrlRequestCallback for Recorder {
    fn on_response_started(&self, status: u16) {
        let _ = self.0.send(Event::Started(status));
    }

    fn on_read_completed(&self, chunk: bytes::Bytes) {
        let _ = self.0.send(Event::Read(chunk.len()));
    }

    fn on_succeeded(&self) {
        let _ = self.0.send(Event::Succeeded);
    }

    fn on_failed(&self, error: Error) {
        let _ = self.0.send(Event::Failed(error.kind()));
    }

    fn on_canceled(&self) {
        let _ = self.0.send(Event::Canceled);
    }
}

async fn collect(mut rx: mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        let terminal = matches!(event, Event::Succeeded | Event::Failed(_) | Event::Canceled);
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}

#[tokio::test]
async fn test_callbacks_in_order_with_one_terminal_event() {
    let server = TestServer::start().await;
    let store = Arc::new(PinningConfigStore::with_config(pinned(&[server.leaf_spki.as_str()])));
    let manager = manager(&store, Some(&server));
    let engine = manager.engine_for("localhost").await.unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    engine
        .start(HttpRequest::get(&server.url()).unwrap(), Arc::new(Recorder(tx)))
        .unwrap();
    let events = collect(rx).await;

    assert_eq!(events.first(), Some(&Event::Started(200)));
    assert_eq!(events.last(), Some(&Event::Succeeded));
    let read: usize = events
        .iter()
        .filter_map(|e| match e {
            Event::Read(n) => Some(*n),
            _ => None,
        })
        .sum();
    assert_eq!(read, BODY.len());
}

#[tokio::test]
async fn test_pin_failure_delivers_single_failed_callback() {
    let server = TestServer::start().await;
    let store = Arc::new(PinningConfigStore::with_config(pinned(&[WRONG_PIN])));
    let manager = manager(&store, Some(&server));
    let engine = manager.engine_for("localhost").await.unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    engine
        .start(HttpRequest::get(&server.url()).unwrap(), Arc::new(Recorder(tx)))
        .unwrap();
    assert_eq!(collect(rx).await, vec![Event::Failed(ErrorKind::PinMismatch)]);
}

#[tokio::test]
async fn test_cancel_delivers_canceled_callback() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // accept and never answer
    let stalled = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });

    let store = Arc::new(PinningConfigStore::new());
    let manager = manager(&store, None);
    let engine = manager.engine_for("127.0.0.1").await.unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = engine
        .start(
            HttpRequest::get(&format!("http://127.0.0.1:{}/", port)).unwrap(),
            Arc::new(Recorder(tx)),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();
    assert!(handle.is_cancelled());
    assert_eq!(collect(rx).await, vec![Event::Canceled]);
    stalled.abort();
}

#[tokio::test]
async fn test_engine_follows_the_callers_snapshot() {
    let store = Arc::new(PinningConfigStore::new());
    let manager = manager(&store, None);
    let unpinned = store.get();
    store.set(pinned(&[WRONG_PIN]));

    let engine = manager.engine_for_snapshot("a.example", unpinned.clone()).await.unwrap();
    assert_eq!(engine.generation(), unpinned.generation);
    assert!(!engine.is_pinned());

    let current = manager.engine_for("a.example").await.unwrap();
    assert_eq!(current.generation(), 1);
    assert!(current.is_pinned());
    assert!(engine.is_shut_down());
}

#[tokio::test]
async fn test_engine_debug_names_binding() {
    let store = Arc::new(PinningConfigStore::new());
    let manager = manager(&store, None);
    let engine = manager.engine_for("a.example").await.unwrap();
    let text = format!("{:?}", engine);
    assert!(text.starts_with("PinnedEngine"));
    assert!(text.contains("a.example"));
}
