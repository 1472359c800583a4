//! Bounded cache of loaded model handles.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::ProviderError;
use crate::model::{Model, ModelMetadata, ModelProvider};

/// A loaded handle plus its metadata.
pub struct ModelCacheEntry {
    pub model: Arc<dyn Model>,
    pub metadata: ModelMetadata,
    pub loaded_at: Instant,
}

struct Inner {
    entries: HashMap<String, ModelCacheEntry>,
    /// Insertion order; the front is evicted first.
    order: VecDeque<String>,
}

/// Capacity-bounded model cache.
///
/// Eviction is strict insertion order (the entry inserted earliest goes
/// first), independent of access recency. A deliberate simplification over
/// LRU: model reload is cheap relative to the bookkeeping under this
/// workload's access pattern.
pub struct ModelCache {
    capacity: usize,
    accelerated: bool,
    inner: Mutex<Inner>,
}

impl ModelCache {
    pub fn new(capacity: usize, accelerated: bool) -> Self {
        Self {
            capacity,
            accelerated,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Look up a model, loading it through the provider on a miss.
    ///
    /// When accelerated execution is enabled the provider's accelerated path
    /// is tried first and a decline falls back to the plain load silently.
    /// The load itself runs outside the cache lock.
    pub async fn get(
        &self,
        model_id: &str,
        provider: &dyn ModelProvider,
    ) -> Result<Arc<dyn Model>, ProviderError> {
        if let Some(entry) = self.inner.lock().entries.get(model_id) {
            return Ok(Arc::clone(&entry.model));
        }

        let (model, metadata) = if self.accelerated {
            match provider.load_accelerated(model_id).await {
                Some(loaded) => loaded,
                None => provider.load(model_id).await?,
            }
        } else {
            provider.load(model_id).await?
        };

        self.insert(model_id, Arc::clone(&model), metadata);
        Ok(model)
    }

    fn insert(&self, model_id: &str, model: Arc<dyn Model>, metadata: ModelMetadata) {
        let mut inner = self.inner.lock();
        // A concurrent load may have won the race; keep the first handle.
        if inner.entries.contains_key(model_id) {
            return;
        }
        while inner.entries.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                    tracing::info!(model_id = %oldest, "Evicting model");
                }
                None => break,
            }
        }
        inner.order.push_back(model_id.to_string());
        inner.entries.insert(
            model_id.to_string(),
            ModelCacheEntry {
                model,
                metadata,
                loaded_at: Instant::now(),
            },
        );
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.inner.lock().entries.contains_key(model_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        if dropped > 0 {
            tracing::info!(dropped, "Model cache cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::ModelError;
    use crate::request::{FeatureVector, Prediction};

    struct ConstModel;

    impl Model for ConstModel {
        fn predict(&self, _features: &FeatureVector) -> Result<Prediction, ModelError> {
            Ok(Prediction {
                values: json!(1.0),
                confidence: 1.0,
            })
        }
    }

    #[derive(Default)]
    struct CountingProvider {
        loads: AtomicUsize,
        accelerated_loads: AtomicUsize,
    }

    #[async_trait]
    impl ModelProvider for CountingProvider {
        async fn load(
            &self,
            model_id: &str,
        ) -> Result<(Arc<dyn Model>, ModelMetadata), ProviderError> {
            if model_id == "missing" {
                return Err(ProviderError::NotFound(model_id.to_string()));
            }
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok((Arc::new(ConstModel), ModelMetadata::default()))
        }
    }

    struct AcceleratedProvider;

    #[async_trait]
    impl ModelProvider for AcceleratedProvider {
        async fn load(
            &self,
            _model_id: &str,
        ) -> Result<(Arc<dyn Model>, ModelMetadata), ProviderError> {
            panic!("accelerated path should have been taken");
        }

        async fn load_accelerated(
            &self,
            _model_id: &str,
        ) -> Option<(Arc<dyn Model>, ModelMetadata)> {
            Some((Arc::new(ConstModel), ModelMetadata::default()))
        }
    }

    #[tokio::test]
    async fn test_hit_does_not_reload() {
        let provider = CountingProvider::default();
        let cache = ModelCache::new(4, false);

        cache.get("a", &provider).await.unwrap();
        cache.get("a", &provider).await.unwrap();

        assert_eq!(provider.loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_fifo_eviction_ignores_recency() {
        let provider = CountingProvider::default();
        let cache = ModelCache::new(2, false);

        cache.get("a", &provider).await.unwrap();
        cache.get("b", &provider).await.unwrap();
        // Touch "a" so it is the most recently used entry.
        cache.get("a", &provider).await.unwrap();
        cache.get("c", &provider).await.unwrap();

        // "a" was inserted first, so it goes first regardless of the touch.
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_model_propagates_not_found() {
        let provider = CountingProvider::default();
        let cache = ModelCache::new(2, false);

        let err = match cache.get("missing", &provider).await {
            Err(e) => e,
            Ok(_) => panic!("expected load to fail"),
        };
        assert!(matches!(err, ProviderError::NotFound(_)));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_accelerated_load_preferred_when_enabled() {
        let cache = ModelCache::new(2, true);
        cache.get("a", &AcceleratedProvider).await.unwrap();
        assert!(cache.contains("a"));
    }

    #[tokio::test]
    async fn test_accelerated_decline_falls_back() {
        let provider = CountingProvider::default();
        let cache = ModelCache::new(2, true);

        cache.get("a", &provider).await.unwrap();
        assert_eq!(provider.loads.load(Ordering::SeqCst), 1);
        assert_eq!(provider.accelerated_loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let provider = CountingProvider::default();
        let cache = ModelCache::new(4, false);
        cache.get("a", &provider).await.unwrap();
        cache.get("b", &provider).await.unwrap();

        cache.clear();
        assert!(cache.is_empty());
    }
}
