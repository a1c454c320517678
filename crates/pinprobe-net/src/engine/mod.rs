//! Lifecycle-managed engine

mod lifecycle;
mod pinned;

pub use lifecycle::{EngineLifecycleManager, EngineStatus};
pub use pinned::{EngineOptions, PinnedEngine, RequestHandle, UrlRequestCallback};
