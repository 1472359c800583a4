//! Predictr - in-process inference request scheduler
//!
//! Predictr accepts prediction requests against named models, routes them
//! through priority-segregated queues and dedicated workers, short-circuits
//! repeat work via a two-tier prediction cache, and degrades gracefully under
//! load.
//!
//! # Architecture
//!
//! - **Engine**: public entry point (`predict`, `predict_batch`,
//!   `predict_stream`, `metrics`, `clear_cache`, `shutdown`)
//! - **QueuePool**: one bounded FIFO queue and one worker per priority level
//! - **ModelCache / PredictionCache**: bounded model handles (FIFO eviction)
//!   and TTL-cached responses (local + optional distributed tier)
//! - **ResourceMonitor**: background sampler that clears caches under
//!   CPU/memory pressure
//!
//! Model loading, feature transformation, and drift logging are external
//! collaborators behind the traits in [`model`].
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use predictr::{Engine, EngineConfig, PredictOptions};
//! # async fn example(
//! #     provider: Arc<dyn predictr::ModelProvider>,
//! #     transformer: Arc<dyn predictr::FeatureTransformer>,
//! # ) -> Result<(), predictr::EngineError> {
//! let engine = Engine::new(EngineConfig::default(), provider, transformer, None).await?;
//! let outcome = engine
//!     .predict("churn-model", serde_json::json!({"tenure": 12}), PredictOptions::default())
//!     .await;
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub(crate) mod monitor;
pub mod queue;
pub mod request;

// Re-export key types
pub use config::{EngineConfig, MonitorConfig, PredictionCacheConfig};
pub use engine::{Engine, PredictOptions, Submission};
pub use error::{CacheError, EngineError, ModelError, PredictError, ProviderError, TransformError};
pub use metrics::MetricsSnapshot;
pub use model::{FeatureTransformer, MetricsSink, Model, ModelMetadata, ModelProvider};
pub use request::{
    FeatureVector, InferenceRequest, InferenceResponse, Mode, Prediction, PredictionCallback,
    Priority,
};
