//! Offline-first response caching.
//!
//! This module provides the request-level caching mechanism:
//! - Named, generation-tagged stores of response snapshots
//! - Preloading core assets and reclaiming stores of old generations
//! - Cache-first and network-first fetch strategies with background write-back
//! - Offline fallback when neither cache nor network can answer

mod layer;
mod lifecycle;
mod storage;
mod traits;

pub use layer::{is_write_back_eligible, Classifier, FetchStrategy, Route};
pub use lifecycle::{preload, reconcile, refresh, AssetManifest, StoreNames};
pub use storage::{CacheStorage, CachedResponse, SqliteStorage};
pub use traits::{ResponseSource, Served};
