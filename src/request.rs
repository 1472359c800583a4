//! Request and response model.
//!
//! An [`InferenceRequest`] is created at submission time and destroyed after
//! processing; the matching [`InferenceResponse`] is created exactly once per
//! request and never mutated afterwards.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Invoked with the finished response on the asynchronous path.
pub type PredictionCallback = std::sync::Arc<dyn Fn(InferenceResponse) + Send + Sync>;

/// Priority levels for request scheduling.
///
/// Each level owns exactly one bounded queue and one dedicated worker; levels
/// never share a queue. Two levels run fully concurrently rather than strictly
/// by priority order, so a flood at one level cannot starve another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
    Background,
}

impl Priority {
    /// All levels, highest first. Also fixes the worker spawn order.
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Background,
    ];

    /// Fixed queue capacity for this level.
    pub fn queue_capacity(&self) -> usize {
        match self {
            Priority::Critical => 100,
            Priority::High => 500,
            Priority::Normal => 1000,
            Priority::Low => 2000,
            Priority::Background => 5000,
        }
    }

    /// Stable index into per-level arrays.
    pub(crate) fn index(&self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
            Priority::Background => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Background => "background",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing mode for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    RealTime,
    Batch,
    Streaming,
    Async,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::RealTime
    }
}

/// A single prediction request.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceRequest {
    /// Unique within the process lifetime.
    pub id: String,
    pub model_id: String,
    /// Opaque input payload.
    pub input: serde_json::Value,
    pub priority: Priority,
    pub mode: Mode,
    /// Bound on the synchronous wait for completion. Always > 0.
    pub timeout: Duration,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl InferenceRequest {
    /// Build a request, minting its id from the engine's monotonic sequence
    /// counter, the submission wall clock, and a hash of the payload.
    pub(crate) fn new(
        seq: u64,
        model_id: &str,
        input: serde_json::Value,
        priority: Priority,
        mode: Mode,
        timeout: Duration,
        metadata: HashMap<String, String>,
    ) -> Self {
        let created_at = Utc::now();
        let id = request_id(seq, created_at.timestamp_millis(), &input);
        Self {
            id,
            model_id: model_id.to_string(),
            input,
            priority,
            mode,
            timeout,
            metadata,
            created_at,
        }
    }
}

/// Mint a request id: submission millis, monotonic sequence, payload hash.
///
/// The sequence component alone guarantees process-lifetime uniqueness; the
/// timestamp and payload prefix make ids greppable in logs.
fn request_id(seq: u64, millis: i64, input: &serde_json::Value) -> String {
    let payload = serde_json::to_vec(input).unwrap_or_default();
    let digest = Sha256::digest(&payload);
    let mut prefix = String::with_capacity(8);
    for byte in &digest[..4] {
        prefix.push_str(&format!("{byte:02x}"));
    }
    format!("{millis:x}-{seq:x}-{prefix}")
}

/// A feature vector produced by the external feature transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub Vec<f32>);

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Raw model output before it is wrapped into a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Opaque result payload.
    pub values: serde_json::Value,
    /// Confidence in [0, 1].
    pub confidence: f32,
}

/// The outcome of a single request.
///
/// Exactly one of `predictions` / `error` is set, never both; the constructors
/// are the only way to build one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub request_id: String,
    pub model_id: String,
    pub predictions: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Confidence in [0, 1]; 0.0 for failures.
    pub confidence: f32,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl InferenceResponse {
    pub fn success(
        request_id: impl Into<String>,
        model_id: impl Into<String>,
        prediction: Prediction,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            model_id: model_id.into(),
            predictions: Some(prediction.values),
            error: None,
            confidence: prediction.confidence.clamp(0.0, 1.0),
            processing_time_ms,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(
        request_id: impl Into<String>,
        model_id: impl Into<String>,
        error: impl Into<String>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            model_id: model_id.into(),
            predictions: None,
            error: Some(error.into()),
            confidence: 0.0,
            processing_time_ms,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_capacities() {
        assert_eq!(Priority::Critical.queue_capacity(), 100);
        assert_eq!(Priority::High.queue_capacity(), 500);
        assert_eq!(Priority::Normal.queue_capacity(), 1000);
        assert_eq!(Priority::Low.queue_capacity(), 2000);
        assert_eq!(Priority::Background.queue_capacity(), 5000);
    }

    #[test]
    fn test_priority_ordering() {
        let indices: Vec<usize> = Priority::ALL.iter().map(|p| p.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_request_ids_unique_for_identical_payload() {
        let input = json!({"x": 1});
        let a = InferenceRequest::new(
            0,
            "m1",
            input.clone(),
            Priority::Normal,
            Mode::RealTime,
            Duration::from_millis(1000),
            HashMap::new(),
        );
        let b = InferenceRequest::new(
            1,
            "m1",
            input,
            Priority::Normal,
            Mode::RealTime,
            Duration::from_millis(1000),
            HashMap::new(),
        );
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_response_success_has_no_error() {
        let resp = InferenceResponse::success(
            "r1",
            "m1",
            Prediction {
                values: json!([0.9]),
                confidence: 0.9,
            },
            12,
        );
        assert!(resp.predictions.is_some());
        assert!(resp.error.is_none());
        assert!(resp.is_ok());
    }

    #[test]
    fn test_response_failure_has_no_predictions() {
        let resp = InferenceResponse::failure("r1", "m1", "boom", 3);
        assert!(resp.predictions.is_none());
        assert_eq!(resp.error.as_deref(), Some("boom"));
        assert_eq!(resp.confidence, 0.0);
        assert!(!resp.is_ok());
    }

    #[test]
    fn test_confidence_clamped() {
        let resp = InferenceResponse::success(
            "r1",
            "m1",
            Prediction {
                values: json!(null),
                confidence: 1.7,
            },
            0,
        );
        assert_eq!(resp.confidence, 1.0);
    }
}
