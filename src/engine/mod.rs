//! Core scheduling engine.
//!
//! [`Engine`] is the public entry point: it owns the priority queues, both
//! caches, the shared worker pool, and the resource monitor, and exposes
//! `predict` / `predict_batch` / `predict_stream` / `metrics` / `clear_cache`
//! / `shutdown`. One engine is constructed by the host process and passed by
//! reference to all callers; there is no implicit global instance.

mod exec;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::{ModelCache, PredictionCache};
use crate::config::EngineConfig;
use crate::error::{EngineError, PredictError, QueueError};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::model::{FeatureTransformer, MetricsSink, ModelProvider};
use crate::queue::{QueueJob, QueuePool};
use crate::request::{
    InferenceRequest, InferenceResponse, Mode, PredictionCallback, Priority,
};

/// Outcome of a `predict` call.
pub enum Submission {
    /// The request finished (or was rejected) and this is its response.
    Completed(InferenceResponse),
    /// The request was enqueued and the callback will receive the response;
    /// the id is the correlation handle.
    Queued(String),
}

impl Submission {
    /// The response, when the call completed inline.
    pub fn into_response(self) -> Option<InferenceResponse> {
        match self {
            Submission::Completed(response) => Some(response),
            Submission::Queued(_) => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            Submission::Completed(_) => None,
            Submission::Queued(id) => Some(id),
        }
    }
}

/// Per-call options for `predict`.
#[derive(Clone)]
pub struct PredictOptions {
    pub priority: Priority,
    pub mode: Mode,
    /// Bound on the synchronous wait for a queued submission, in ms.
    pub timeout_ms: u64,
    pub metadata: HashMap<String, String>,
    /// Presence of a callback selects the asynchronous path regardless of mode.
    pub callback: Option<PredictionCallback>,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            mode: Mode::RealTime,
            timeout_ms: 1000,
            metadata: HashMap::new(),
            callback: None,
        }
    }
}

impl PredictOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_callback(mut self, callback: PredictionCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Shared state behind the public [`Engine`] handle.
pub(crate) struct EngineCore {
    pub(crate) config: EngineConfig,
    pub(crate) provider: Arc<dyn ModelProvider>,
    pub(crate) transformer: Arc<dyn FeatureTransformer>,
    pub(crate) sink: Option<Arc<dyn MetricsSink>>,
    pub(crate) model_cache: ModelCache,
    pub(crate) prediction_cache: PredictionCache,
    pub(crate) queues: QueuePool,
    pub(crate) metrics: EngineMetrics,
    pub(crate) running: AtomicBool,
    /// Stop signal; the monitor loop selects on a subscription to it. A watch
    /// channel cannot lose the edge the way a bare notification can.
    pub(crate) stop: watch::Sender<bool>,
    /// Shared bounded pool for batch fan-out and inline real-time execution.
    pub(crate) pool: Arc<Semaphore>,
    request_seq: AtomicU64,
}

impl EngineCore {
    fn mint_request(
        &self,
        model_id: &str,
        input: serde_json::Value,
        opts: &PredictOptions,
    ) -> InferenceRequest {
        let seq = self.request_seq.fetch_add(1, Ordering::Relaxed);
        InferenceRequest::new(
            seq,
            model_id,
            input,
            opts.priority,
            opts.mode,
            Duration::from_millis(opts.timeout_ms.max(1)),
            opts.metadata.clone(),
        )
    }

    /// Terminal rejection: recorded as a completion, returned inline.
    fn reject(&self, request: &InferenceRequest, err: PredictError) -> InferenceResponse {
        let response = InferenceResponse::failure(
            request.id.clone(),
            request.model_id.clone(),
            err.to_string(),
            0,
        );
        self.metrics.record_completion(&response);
        response
    }

    /// The dispatch routine behind `predict`; also called from batch tasks
    /// and stream consumers.
    pub(crate) async fn submit(
        &self,
        model_id: &str,
        input: serde_json::Value,
        opts: PredictOptions,
    ) -> Submission {
        let request = self.mint_request(model_id, input, &opts);

        if !self.running.load(Ordering::SeqCst) {
            return Submission::Completed(self.reject(&request, PredictError::ShuttingDown));
        }

        if opts.mode == Mode::RealTime && opts.callback.is_none() {
            return Submission::Completed(self.process_inline(request).await);
        }
        self.submit_queued(request, opts.callback).await
    }

    /// Synchronous path: cache check, then inline processing on the caller's
    /// task under a shared-pool permit. No queueing, no worker.
    async fn process_inline(&self, request: InferenceRequest) -> InferenceResponse {
        let (key, cached) = exec::check_cache(self, &request).await;
        if let Some(response) = cached {
            return response;
        }

        // Transformation and model execution count against the shared pool.
        let permit = match Arc::clone(&self.pool).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return self.reject(&request, PredictError::ShuttingDown),
        };
        let response = exec::process_uncached(self, &request, &key).await;
        drop(permit);
        response
    }

    /// Asynchronous path: non-blocking enqueue with fail-fast load shedding.
    async fn submit_queued(
        &self,
        request: InferenceRequest,
        callback: Option<PredictionCallback>,
    ) -> Submission {
        let request_id = request.id.clone();
        let model_id = request.model_id.clone();
        let wait = request.timeout;
        let queue = self.queues.queue(request.priority);

        let (job, completion) = match callback {
            Some(callback) => (QueueJob::new(request).with_callback(callback), None),
            None => {
                let (tx, rx) = oneshot::channel();
                (QueueJob::new(request).with_completion(tx), Some(rx))
            }
        };

        if let Err(QueueError::Full) = queue.try_push(job) {
            tracing::warn!(
                request_id = %request_id,
                level = %queue.level(),
                "Queue full, shedding request"
            );
            let response = InferenceResponse::failure(
                request_id,
                model_id,
                PredictError::QueueFull.to_string(),
                0,
            );
            self.metrics.record_completion(&response);
            return Submission::Completed(response);
        }

        let Some(rx) = completion else {
            // Callback submissions return immediately; the worker delivers.
            return Submission::Queued(request_id);
        };

        // Queued submission without a callback: wait for the worker to
        // fulfill the completion future, bounded by the request timeout.
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(response)) => Submission::Completed(response),
            // Sender dropped: the job was drained at shutdown. Terminal.
            Ok(Err(_)) => Submission::Completed(InferenceResponse::failure(
                request_id,
                model_id,
                PredictError::ShuttingDown.to_string(),
                0,
            )),
            // The worker still owns the request and will record its one true
            // completion; this synthetic response is only for the caller.
            Err(_) => Submission::Completed(InferenceResponse::failure(
                request_id,
                model_id,
                PredictError::Timeout(wait.as_millis() as u64).to_string(),
                wait.as_millis() as u64,
            )),
        }
    }
}

/// The inference request scheduler.
pub struct Engine {
    core: Arc<EngineCore>,
    workers: Mutex<Vec<(Priority, JoinHandle<()>)>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    streams: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Construct and start an engine: connect the caches, spawn the five
    /// priority workers and the resource monitor.
    ///
    /// An unreachable distributed cache degrades to local-only mode with a
    /// warning; an invalid configuration is the only construction failure.
    pub async fn new(
        config: EngineConfig,
        provider: Arc<dyn ModelProvider>,
        transformer: Arc<dyn FeatureTransformer>,
        sink: Option<Arc<dyn MetricsSink>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let prediction_cache = PredictionCache::connect(
            &config.prediction_cache,
            config.distributed_cache_endpoint.as_deref(),
        )
        .await;

        let core = Arc::new(EngineCore {
            model_cache: ModelCache::new(config.cache_size, config.enable_accelerated_execution),
            prediction_cache,
            queues: QueuePool::new(),
            metrics: EngineMetrics::new(),
            running: AtomicBool::new(true),
            stop: watch::channel(false).0,
            pool: Arc::new(Semaphore::new(config.max_workers)),
            request_seq: AtomicU64::new(0),
            provider,
            transformer,
            sink,
            config,
        });

        let workers = Priority::ALL
            .iter()
            .map(|&level| (level, tokio::spawn(exec::worker_loop(Arc::clone(&core), level))))
            .collect();
        let monitor = tokio::spawn(crate::monitor::monitor_loop(Arc::clone(&core)));

        tracing::info!(
            pool_size = core.config.max_workers,
            cache_size = core.config.cache_size,
            distributed_cache = core.prediction_cache.has_remote(),
            "Inference engine started"
        );

        Ok(Self {
            core,
            workers: Mutex::new(workers),
            monitor: Mutex::new(Some(monitor)),
            streams: Mutex::new(Vec::new()),
        })
    }

    /// Submit one prediction request. Never returns an error directly: every
    /// failure mode arrives as a response with its `error` field set.
    pub async fn predict(
        &self,
        model_id: &str,
        input: serde_json::Value,
        opts: PredictOptions,
    ) -> Submission {
        self.core.submit(model_id, input, opts).await
    }

    /// Fan `inputs` out as independent batch-mode submissions on the shared
    /// bounded pool and gather them against one overall timeout.
    ///
    /// The returned order is completion order, not submission order. A
    /// per-item failure becomes that item's error response and never aborts
    /// the batch; items still pending at the deadline yield timeout responses
    /// carrying the batch id.
    pub async fn predict_batch(
        &self,
        model_id: &str,
        inputs: Vec<serde_json::Value>,
        priority: Priority,
        timeout_ms: u64,
    ) -> Vec<InferenceResponse> {
        let batch_id = Uuid::new_v4().to_string();
        let total = inputs.len();
        let mut pending = FuturesUnordered::new();

        for input in inputs {
            let core = Arc::clone(&self.core);
            let model_id = model_id.to_string();
            let batch_id = batch_id.clone();
            pending.push(tokio::spawn(async move {
                let permit = match Arc::clone(&core.pool).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return InferenceResponse::failure(
                            batch_id.clone(),
                            model_id,
                            PredictError::ShuttingDown.to_string(),
                            0,
                        )
                        .with_metadata("batch_id", batch_id)
                    }
                };
                let opts = PredictOptions::new()
                    .with_priority(priority)
                    .with_mode(Mode::Batch)
                    .with_timeout_ms(timeout_ms)
                    .with_metadata("batch_id", batch_id.clone());
                let outcome = core.submit(&model_id, input, opts).await;
                drop(permit);
                match outcome {
                    Submission::Completed(response) => response,
                    // Unreachable without a callback; be defensive anyway.
                    Submission::Queued(id) => InferenceResponse::failure(
                        id,
                        model_id,
                        "Batch item queued without completion".to_string(),
                        0,
                    ),
                }
            }));
        }

        let mut responses = Vec::with_capacity(total);
        let deadline = tokio::time::sleep(Duration::from_millis(timeout_ms));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                next = pending.next() => match next {
                    Some(Ok(response)) => responses.push(response),
                    Some(Err(err)) => {
                        tracing::warn!(batch_id = %batch_id, error = %err, "Batch task failed");
                        responses.push(
                            InferenceResponse::failure(
                                batch_id.clone(),
                                model_id,
                                PredictError::Model(err.to_string()).to_string(),
                                0,
                            )
                            .with_metadata("batch_id", batch_id.clone()),
                        );
                    }
                    None => break,
                },
            }
        }

        // Stragglers: stop waiting without killing them. Their workers still
        // record the real completions.
        if responses.len() < total {
            tracing::warn!(
                batch_id = %batch_id,
                pending = total - responses.len(),
                "Batch deadline reached with items outstanding"
            );
        }
        while responses.len() < total {
            responses.push(
                InferenceResponse::failure(
                    batch_id.clone(),
                    model_id,
                    PredictError::Timeout(timeout_ms).to_string(),
                    timeout_ms,
                )
                .with_metadata("batch_id", batch_id.clone()),
            );
        }
        responses
    }

    /// Consume a caller-supplied stream of inputs, issuing an asynchronous
    /// submission with `callback` for each item.
    ///
    /// The producer feeds a bounded channel; a dedicated consumer drains it.
    /// Results are delivered only via the callback (including load-shed
    /// rejections); the returned id is an opaque handle for correlation.
    pub fn predict_stream<S>(
        &self,
        model_id: &str,
        inputs: S,
        priority: Priority,
        callback: PredictionCallback,
    ) -> Uuid
    where
        S: Stream<Item = serde_json::Value> + Send + 'static,
    {
        let stream_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel::<serde_json::Value>(self.core.config.stream_buffer);

        let producer = tokio::spawn(async move {
            futures::pin_mut!(inputs);
            while let Some(item) = inputs.next().await {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        let core = Arc::clone(&self.core);
        let model_id = model_id.to_string();
        tracing::debug!(%stream_id, %model_id, "Prediction stream started");
        let consumer = tokio::spawn(async move {
            while let Some(input) = rx.recv().await {
                if !core.running.load(Ordering::SeqCst) {
                    break;
                }
                let opts = PredictOptions::new()
                    .with_priority(priority)
                    .with_mode(Mode::Streaming)
                    .with_metadata("stream_id", stream_id.to_string())
                    .with_callback(Arc::clone(&callback));
                match core.submit(&model_id, input, opts).await {
                    // The worker fires the callback on completion.
                    Submission::Queued(_) => {}
                    // Rejected before reaching a queue; deliver here.
                    Submission::Completed(response) => exec::invoke_callback(&callback, response),
                }
            }
            tracing::debug!(%stream_id, "Stream consumer finished");
        });

        self.streams.lock().extend([producer, consumer]);
        stream_id
    }

    /// Point-in-time engine counters plus live queue depths.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot(self.core.queues.depths())
    }

    /// Drop the model cache and both prediction-cache tiers.
    pub fn clear_cache(&self) {
        self.core.model_cache.clear();
        self.core.prediction_cache.clear();
        tracing::info!("All caches cleared");
    }

    /// Whether the engine is accepting work.
    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    /// Idempotent, bounded shutdown.
    ///
    /// Pending queue entries are drained without processing (fast,
    /// deterministic shutdown over completeness); their dropped completion
    /// senders unblock any parked callers. Each worker is joined within the
    /// configured bound and laggards are logged, not waited on.
    pub async fn shutdown(&self) {
        if !self.core.running.swap(false, Ordering::SeqCst) {
            tracing::debug!("Shutdown already performed");
            return;
        }
        tracing::info!("Engine shutting down");
        self.core.stop.send_replace(true);

        for queue in self.core.queues.iter() {
            let dropped = queue.drain().len();
            if dropped > 0 {
                tracing::warn!(
                    level = %queue.level(),
                    dropped,
                    "Discarding queued requests on shutdown"
                );
            }
            queue.push_sentinel();
        }

        let join_bound = self.core.config.shutdown_join_timeout();
        let workers = std::mem::take(&mut *self.workers.lock());
        for (level, handle) in workers {
            if tokio::time::timeout(join_bound, handle).await.is_err() {
                tracing::warn!(
                    %level,
                    bound_secs = join_bound.as_secs(),
                    "Worker did not stop within the join bound"
                );
            }
        }

        // Not-yet-started batch work fails fast once the pool closes.
        self.core.pool.close();

        for handle in std::mem::take(&mut *self.streams.lock()) {
            handle.abort();
        }

        self.core.prediction_cache.disconnect();
        self.core.model_cache.clear();
        self.core.prediction_cache.clear();

        if let Some(handle) = self.monitor.lock().take() {
            if tokio::time::timeout(join_bound, handle).await.is_err() {
                tracing::warn!("Resource monitor did not stop within the join bound");
            }
        }

        // A submission that raced the running-flag flip may have slipped in
        // behind the first drain.
        for queue in self.core.queues.iter() {
            queue.drain();
        }

        tracing::info!("Engine shutdown complete");
    }
}

impl Drop for Engine {
    /// Last-resort safety net only; hosts must call [`Engine::shutdown`].
    fn drop(&mut self) {
        if self.core.running.swap(false, Ordering::SeqCst) {
            tracing::warn!("Engine dropped without shutdown; stopping workers best-effort");
            self.core.stop.send_replace(true);
            for queue in self.core.queues.iter() {
                queue.push_sentinel();
            }
            self.core.pool.close();
        }
    }
}
