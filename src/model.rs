//! Collaborator contracts.
//!
//! The scheduler core is a library, not a network service; its boundary is the
//! set of traits below. How a model is trained or physically loaded, how raw
//! input becomes a feature vector, and how predictions are logged for offline
//! drift analysis all live behind these seams.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ModelError, ProviderError, TransformError};
use crate::request::{FeatureVector, Prediction};

/// Descriptive metadata attached to a loaded model handle.
#[derive(Debug, Clone, Default)]
pub struct ModelMetadata {
    pub version: Option<String>,
    pub loaded_from: Option<String>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub extra: HashMap<String, String>,
}

/// A loaded, executable model handle.
pub trait Model: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction, ModelError>;
}

/// Loads model handles on behalf of the model cache.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn load(&self, model_id: &str) -> Result<(Arc<dyn Model>, ModelMetadata), ProviderError>;

    /// Best-effort accelerated load. The default declines; the engine falls
    /// back to [`load`](ModelProvider::load) silently.
    async fn load_accelerated(
        &self,
        _model_id: &str,
    ) -> Option<(Arc<dyn Model>, ModelMetadata)> {
        None
    }
}

/// Turns an opaque raw input into the feature vector a model consumes.
pub trait FeatureTransformer: Send + Sync {
    fn transform(&self, raw: &serde_json::Value) -> Result<FeatureVector, TransformError>;
}

/// Fire-and-forget sink for offline drift analysis. Invoked after every
/// successful prediction; a failure here is logged and never fails the
/// prediction itself.
pub trait MetricsSink: Send + Sync {
    fn log_prediction(
        &self,
        model_id: &str,
        features: &FeatureVector,
        prediction: &Prediction,
        ground_truth: Option<&serde_json::Value>,
    ) -> anyhow::Result<()>;
}
