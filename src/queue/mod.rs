//! Priority-segregated bounded queues.
//!
//! Exactly one bounded FIFO queue per [`Priority`] level, each drained by one
//! dedicated worker. Backpressure is fail-fast: a full queue never blocks the
//! submitting caller, it returns [`QueueError::Full`] synchronously and the
//! dispatcher turns that into a load-shedding error response.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

use crate::error::QueueError;
use crate::request::{InferenceRequest, InferenceResponse, PredictionCallback, Priority};

/// A queued unit of work.
///
/// Carries the completion sender a synchronous waiter is parked on (fulfilled
/// by the worker) and the callback for the asynchronous path. Dropping an
/// unprocessed job drops the sender, which unblocks any waiter with a
/// recv error.
pub struct QueueJob {
    pub request: InferenceRequest,
    pub enqueued_at: Instant,
    pub completion: Option<oneshot::Sender<InferenceResponse>>,
    pub callback: Option<PredictionCallback>,
}

impl QueueJob {
    pub fn new(request: InferenceRequest) -> Self {
        Self {
            request,
            enqueued_at: Instant::now(),
            completion: None,
            callback: None,
        }
    }

    pub fn with_completion(mut self, tx: oneshot::Sender<InferenceResponse>) -> Self {
        self.completion = Some(tx);
        self
    }

    pub fn with_callback(mut self, callback: PredictionCallback) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// A slot popped off a queue. `None` is the shutdown sentinel, pushed only to
/// unblock a worker parked on an empty queue.
pub type QueueSlot = Option<QueueJob>;

/// One bounded FIFO queue.
pub struct PriorityQueue {
    level: Priority,
    capacity: usize,
    inner: Mutex<VecDeque<QueueSlot>>,
    notify: Notify,
}

impl PriorityQueue {
    pub fn new(level: Priority, capacity: usize) -> Self {
        Self {
            level,
            capacity,
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Queue for a level at its fixed capacity.
    pub fn for_level(level: Priority) -> Self {
        Self::new(level, level.queue_capacity())
    }

    pub fn level(&self) -> Priority {
        self.level
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Non-blocking enqueue. Fails immediately at capacity.
    pub fn try_push(&self, job: QueueJob) -> Result<(), QueueError> {
        {
            let mut queue = self.inner.lock();
            if queue.len() >= self.capacity {
                return Err(QueueError::Full);
            }
            queue.push_back(Some(job));
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Push the shutdown sentinel. Bypasses the capacity bound so a full
    /// queue cannot wedge shutdown.
    pub fn push_sentinel(&self) {
        self.inner.lock().push_back(None);
        self.notify.notify_one();
    }

    /// Pop the next slot, waiting up to `wait` on an empty queue.
    ///
    /// Returns `None` when the wait elapses; the worker loop uses the short
    /// poll to re-check the running flag. `Some(None)` is the sentinel.
    pub async fn pop(&self, wait: Duration) -> Option<QueueSlot> {
        if let Some(slot) = self.inner.lock().pop_front() {
            return Some(slot);
        }
        match tokio::time::timeout(wait, self.notify.notified()).await {
            Ok(()) => self.inner.lock().pop_front(),
            Err(_) => None,
        }
    }

    /// Pending real jobs; sentinels are not work and do not count.
    pub fn len(&self) -> usize {
        self.inner.lock().iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every pending job without processing it.
    pub fn drain(&self) -> Vec<QueueJob> {
        self.inner.lock().drain(..).flatten().collect()
    }
}

/// The five per-level queues.
pub struct QueuePool {
    queues: [Arc<PriorityQueue>; 5],
}

impl QueuePool {
    pub fn new() -> Self {
        Self {
            queues: Priority::ALL.map(|level| Arc::new(PriorityQueue::for_level(level))),
        }
    }

    pub fn queue(&self, level: Priority) -> &Arc<PriorityQueue> {
        &self.queues[level.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PriorityQueue>> {
        self.queues.iter()
    }

    /// Live occupancy per level.
    pub fn depths(&self) -> BTreeMap<String, usize> {
        self.queues
            .iter()
            .map(|q| (q.level().to_string(), q.len()))
            .collect()
    }

    pub fn total_pending(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }
}

impl Default for QueuePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::request::Mode;

    fn job(n: u64) -> QueueJob {
        let request = InferenceRequest::new(
            n,
            "m1",
            json!({ "n": n }),
            Priority::Critical,
            Mode::Async,
            Duration::from_millis(1000),
            HashMap::new(),
        );
        QueueJob::new(request)
    }

    #[test]
    fn test_full_queue_rejects_without_blocking() {
        let queue = PriorityQueue::new(Priority::Critical, 2);
        assert!(queue.try_push(job(0)).is_ok());
        assert!(queue.try_push(job(1)).is_ok());

        let start = Instant::now();
        let third = queue.try_push(job(2));
        assert!(matches!(third, Err(QueueError::Full)));
        assert!(
            start.elapsed() < Duration::from_millis(10),
            "rejection must not block"
        );
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_fifo_order_within_level() {
        let queue = PriorityQueue::new(Priority::Critical, 10);
        let ids: Vec<String> = (0..3)
            .map(|n| {
                let j = job(n);
                let id = j.request.id.clone();
                queue.try_push(j).unwrap();
                id
            })
            .collect();

        for expected in ids {
            let slot = queue.pop(Duration::from_millis(10)).await;
            let popped = slot.expect("slot").expect("job");
            assert_eq!(popped.request.id, expected);
        }
    }

    #[tokio::test]
    async fn test_pop_times_out_on_empty_queue() {
        let queue = PriorityQueue::new(Priority::Normal, 4);
        let slot = queue.pop(Duration::from_millis(20)).await;
        assert!(slot.is_none());
    }

    #[tokio::test]
    async fn test_sentinel_wakes_and_is_not_counted() {
        let queue = PriorityQueue::new(Priority::Normal, 4);
        queue.push_sentinel();
        assert_eq!(queue.len(), 0);

        let slot = queue.pop(Duration::from_millis(50)).await;
        assert!(matches!(slot, Some(None)));
    }

    #[test]
    fn test_drain_empties_queue() {
        let queue = PriorityQueue::new(Priority::Critical, 10);
        for n in 0..4 {
            queue.try_push(job(n)).unwrap();
        }
        queue.push_sentinel();

        let drained = queue.drain();
        assert_eq!(drained.len(), 4);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pool_depths() {
        let pool = QueuePool::new();
        pool.queue(Priority::High).try_push(job(0)).unwrap();
        pool.queue(Priority::High).try_push(job(1)).unwrap();

        let depths = pool.depths();
        assert_eq!(depths["high"], 2);
        assert_eq!(depths["critical"], 0);
        assert_eq!(pool.total_pending(), 2);
    }

    #[test]
    fn test_pool_capacities_match_levels() {
        let pool = QueuePool::new();
        for level in Priority::ALL {
            assert_eq!(pool.queue(level).capacity(), level.queue_capacity());
        }
    }
}
