//! Request execution.
//!
//! One processing routine serves both the inline real-time path and the five
//! priority workers: prediction-cache check, feature transform, model fetch,
//! model invocation, write-through, metrics. The dispatcher decides where it
//! runs; this module decides what happens.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::prediction::cache_key;
use crate::engine::EngineCore;
use crate::error::{PredictError, ProviderError};
use crate::request::{
    FeatureVector, InferenceRequest, InferenceResponse, Prediction, PredictionCallback, Priority,
};

/// Consult the prediction cache for `request`.
///
/// On a hit the cached response is adapted to the new request id, the hit and
/// the completion are recorded, and the dispatcher returns it without any
/// queue or worker involvement. On a miss only the miss counter moves.
/// Returns the content key either way so the miss path can write through.
pub(crate) async fn check_cache(
    core: &EngineCore,
    request: &InferenceRequest,
) -> (String, Option<InferenceResponse>) {
    let key = cache_key(&request.model_id, &request.input);
    match core.prediction_cache.get(&key).await {
        Some(cached) => {
            core.metrics.record_cache_hit();
            let mut response = cached;
            response.request_id = request.id.clone();
            response.processing_time_ms = 0;
            let response = response.with_metadata("cache", "hit");
            core.metrics.record_completion(&response);
            (key, Some(response))
        }
        None => {
            core.metrics.record_cache_miss();
            (key, None)
        }
    }
}

/// Run the full miss path: execute, write through on success, record the
/// completion. `key` comes from [`check_cache`].
pub(crate) async fn process_uncached(
    core: &EngineCore,
    request: &InferenceRequest,
    key: &str,
) -> InferenceResponse {
    let response = execute(core, request).await;
    if response.is_ok() {
        core.prediction_cache.set(key, &response).await;
    }
    core.metrics.record_completion(&response);
    response
}

/// Transform, fetch the model, invoke it, and wrap the outcome into a
/// response. Failures of every kind come back as an error response, never as
/// a panic or an `Err` to the caller.
async fn execute(core: &EngineCore, request: &InferenceRequest) -> InferenceResponse {
    let started = Instant::now();
    match run_pipeline(core, request).await {
        Ok((features, prediction)) => {
            report_prediction(core, request, &features, &prediction);
            InferenceResponse::success(
                request.id.clone(),
                request.model_id.clone(),
                prediction,
                started.elapsed().as_millis() as u64,
            )
        }
        Err(err) => {
            tracing::debug!(request_id = %request.id, error = %err, "Request failed");
            InferenceResponse::failure(
                request.id.clone(),
                request.model_id.clone(),
                err.to_string(),
                started.elapsed().as_millis() as u64,
            )
        }
    }
}

async fn run_pipeline(
    core: &EngineCore,
    request: &InferenceRequest,
) -> Result<(FeatureVector, Prediction), PredictError> {
    let features = core
        .transformer
        .transform(&request.input)
        .map_err(|e| PredictError::Validation(e.to_string()))?;

    let model = core
        .model_cache
        .get(&request.model_id, core.provider.as_ref())
        .await
        .map_err(|e| match e {
            ProviderError::NotFound(_) => PredictError::Validation(e.to_string()),
            ProviderError::Load(_) => PredictError::Model(e.to_string()),
        })?;

    let prediction = model
        .predict(&features)
        .map_err(|e| PredictError::Model(e.to_string()))?;

    Ok((features, prediction))
}

/// Fire-and-forget drift reporting. A sink failure is logged and never fails
/// the prediction.
fn report_prediction(
    core: &EngineCore,
    request: &InferenceRequest,
    features: &FeatureVector,
    prediction: &Prediction,
) {
    if let Some(sink) = &core.sink {
        if let Err(err) = sink.log_prediction(&request.model_id, features, prediction, None) {
            tracing::warn!(request_id = %request.id, error = %err, "Metrics sink failed");
        }
    }
}

/// Invoke a completion callback, containing any panic it raises.
pub(crate) fn invoke_callback(callback: &PredictionCallback, response: InferenceResponse) {
    let request_id = response.request_id.clone();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(response)));
    if outcome.is_err() {
        tracing::warn!(request_id = %request_id, "Prediction callback panicked");
    }
}

/// Dedicated worker for one priority level.
///
/// Blocks on a short-poll pop so the running flag is observed promptly, skips
/// the shutdown sentinel, and otherwise runs the shared processing routine,
/// fulfills the completion sender, and fires the callback.
pub(crate) async fn worker_loop(core: Arc<EngineCore>, level: Priority) {
    let queue = Arc::clone(core.queues.queue(level));
    let poll = core.config.queue_poll_interval();
    tracing::debug!(%level, capacity = queue.capacity(), "Priority worker started");

    while core.running.load(Ordering::SeqCst) {
        let job = match queue.pop(poll).await {
            // Empty-queue poll elapsed; re-check the running flag.
            None => continue,
            // Sentinel: only exists to unblock a parked worker.
            Some(None) => continue,
            Some(Some(job)) => job,
        };

        tracing::trace!(
            request_id = %job.request.id,
            queued_ms = job.enqueued_at.elapsed().as_millis() as u64,
            "Processing queued request"
        );

        let (key, cached) = check_cache(&core, &job.request).await;
        let response = match cached {
            Some(response) => response,
            None => process_uncached(&core, &job.request, &key).await,
        };

        if let Some(tx) = job.completion {
            // The waiter may have timed out and gone; that is fine.
            let _ = tx.send(response.clone());
        }
        if let Some(callback) = &job.callback {
            invoke_callback(callback, response);
        }
    }

    tracing::debug!(%level, "Priority worker stopped");
}
