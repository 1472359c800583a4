//! Error types for the scheduler.

use thiserror::Error;

/// Failures while constructing or starting an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Per-request failure modes.
///
/// None of these escape `predict` as an `Err`: every variant is folded into an
/// [`InferenceResponse`](crate::request::InferenceResponse) with its `error`
/// field set, so the caller contract stays uniform regardless of failure mode.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// The target priority queue is at capacity. A normal, expected outcome
    /// under load, not a fault.
    #[error("Queue full - server overloaded")]
    QueueFull,

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Model execution failed: {0}")]
    Model(String),

    #[error("Engine is shutting down")]
    ShuttingDown,
}

/// Errors from either prediction-cache tier. Best-effort: logged and
/// swallowed, never surfaced to callers.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Distributed cache error: {0}")]
    Distributed(String),
}

/// Errors from the queue pool.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue is full")]
    Full,
}

/// Errors from a model provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Model load failed: {0}")]
    Load(String),
}

/// A feature-transformation failure. Malformed input surfaces as a
/// validation error on the response.
#[derive(Debug, Error)]
#[error("Feature transform failed: {0}")]
pub struct TransformError(pub String);

/// A failure raised by the model itself during execution.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ModelError(pub String);
