//! Model and prediction caches.
//!
//! - [`ModelCache`]: bounded cache of loaded model handles, strict
//!   insertion-order eviction.
//! - [`PredictionCache`]: two-tier (process-local + optional distributed)
//!   TTL cache of completed responses keyed by content hash.

mod model_cache;
pub(crate) mod prediction;

pub use model_cache::{ModelCache, ModelCacheEntry};
pub use prediction::{cache_key, PredictionCache};
