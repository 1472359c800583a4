//! Two-tier prediction cache.
//!
//! Completed responses are keyed by a content hash of (model id, input) and
//! live in a process-local TTL tier, with an optional distributed tier behind
//! it. Cache failures are best-effort: logged and swallowed, never surfaced
//! to the caller. Error responses are never stored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::sync::Cache;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};

use crate::config::PredictionCacheConfig;
use crate::error::CacheError;
use crate::request::InferenceResponse;

/// Deterministic content hash over the model id and the canonical
/// serialization of the input. serde_json orders object keys, so two inputs
/// that differ only in field order hash identically.
pub fn cache_key(model_id: &str, input: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(input).unwrap_or_default());
    let digest = hasher.finalize();
    let mut key = String::with_capacity(64);
    for byte in digest {
        key.push_str(&format!("{byte:02x}"));
    }
    key
}

/// Two-tier TTL cache of successful responses.
pub struct PredictionCache {
    local: Cache<String, InferenceResponse>,
    remote: Mutex<Option<ConnectionManager>>,
    ttl: Duration,
    /// Remote keys are namespaced by this epoch; a clear bumps it, making
    /// every existing remote entry unreachable until its TTL removes it.
    epoch: AtomicU64,
}

impl PredictionCache {
    /// Local-tier-only cache.
    pub fn local_only(config: &PredictionCacheConfig) -> Self {
        let ttl = Duration::from_secs(config.ttl_secs);
        let local = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(ttl)
            .build();
        Self {
            local,
            remote: Mutex::new(None),
            ttl,
            epoch: AtomicU64::new(0),
        }
    }

    /// Build the cache, attaching the distributed tier when an endpoint is
    /// configured. A connection failure degrades to local-only mode with a
    /// logged warning; it is never a startup failure.
    pub async fn connect(config: &PredictionCacheConfig, endpoint: Option<&str>) -> Self {
        let cache = Self::local_only(config);
        if let Some(url) = endpoint {
            match Self::open_remote(url).await {
                Ok(conn) => {
                    tracing::info!(endpoint = %url, "Distributed prediction cache connected");
                    *cache.remote.lock() = Some(conn);
                }
                Err(err) => {
                    tracing::warn!(
                        endpoint = %url,
                        error = %err,
                        "Distributed prediction cache unavailable, running local-only"
                    );
                }
            }
        }
        cache
    }

    async fn open_remote(url: &str) -> Result<ConnectionManager, CacheError> {
        let client =
            redis::Client::open(url).map_err(|e| CacheError::Distributed(e.to_string()))?;
        ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Distributed(e.to_string()))
    }

    fn remote_key(&self, key: &str) -> String {
        format!("predictr:{}:{}", self.epoch.load(Ordering::Relaxed), key)
    }

    /// Look up a response: local tier first, then the distributed tier.
    /// Both tiers expire independently.
    pub async fn get(&self, key: &str) -> Option<InferenceResponse> {
        if let Some(response) = self.local.get(key) {
            tracing::trace!(key, "Prediction cache HIT (local)");
            return Some(response);
        }

        let conn = self.remote.lock().clone();
        if let Some(mut conn) = conn {
            match conn.get::<_, Option<String>>(self.remote_key(key)).await {
                Ok(Some(raw)) => match serde_json::from_str::<InferenceResponse>(&raw) {
                    Ok(response) => {
                        tracing::trace!(key, "Prediction cache HIT (distributed)");
                        return Some(response);
                    }
                    Err(err) => {
                        tracing::warn!(key, error = %err, "Discarding undecodable cached response");
                    }
                },
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(key, error = %err, "Distributed cache read failed");
                }
            }
        }
        None
    }

    /// Write-through to both tiers. Error responses are never cached.
    pub async fn set(&self, key: &str, response: &InferenceResponse) {
        if !response.is_ok() {
            return;
        }

        self.local.insert(key.to_string(), response.clone());

        let conn = self.remote.lock().clone();
        if let Some(mut conn) = conn {
            match serde_json::to_string(response) {
                Ok(raw) => {
                    if let Err(err) = conn
                        .set_ex::<_, _, ()>(self.remote_key(key), raw, self.ttl.as_secs())
                        .await
                    {
                        tracing::warn!(key, error = %err, "Distributed cache write failed");
                    }
                }
                Err(err) => {
                    tracing::warn!(key, error = %err, "Response serialization failed");
                }
            }
        }
    }

    /// Clear both tiers. The local tier is invalidated outright; the remote
    /// tier is retired by bumping the key epoch and letting TTLs finish the
    /// job (a library must not flush a shared store).
    pub fn clear(&self) {
        self.local.invalidate_all();
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(epoch, "Prediction cache cleared");
    }

    /// Release the distributed connection. Local tier keeps working.
    pub fn disconnect(&self) {
        if self.remote.lock().take().is_some() {
            tracing::info!("Distributed prediction cache connection released");
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.lock().is_some()
    }

    /// Entries currently in the local tier.
    pub fn local_len(&self) -> u64 {
        self.local.run_pending_tasks();
        self.local.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::request::{InferenceResponse, Prediction};

    fn config(max_entries: u64, ttl_secs: u64) -> PredictionCacheConfig {
        PredictionCacheConfig {
            max_entries,
            ttl_secs,
        }
    }

    fn ok_response() -> InferenceResponse {
        InferenceResponse::success(
            "r1",
            "m1",
            Prediction {
                values: json!([0.25]),
                confidence: 0.9,
            },
            40,
        )
    }

    #[test]
    fn test_key_is_field_order_independent() {
        let a: serde_json::Value = serde_json::from_str(r#"{"x": 1, "y": 2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"y": 2, "x": 1}"#).unwrap();
        assert_eq!(cache_key("m1", &a), cache_key("m1", &b));
    }

    #[test]
    fn test_key_separates_models_and_inputs() {
        let input = json!({"x": 1});
        assert_ne!(cache_key("m1", &input), cache_key("m2", &input));
        assert_ne!(cache_key("m1", &input), cache_key("m1", &json!({"x": 2})));
    }

    #[tokio::test]
    async fn test_set_then_get_local() {
        let cache = PredictionCache::local_only(&config(10, 300));
        let key = cache_key("m1", &json!({"x": 1}));

        cache.set(&key, &ok_response()).await;
        let hit = cache.get(&key).await.expect("hit");
        assert_eq!(hit.predictions, Some(json!([0.25])));
    }

    #[tokio::test]
    async fn test_error_responses_are_never_cached() {
        let cache = PredictionCache::local_only(&config(10, 300));
        let key = cache_key("m1", &json!({"x": 1}));

        cache
            .set(&key, &InferenceResponse::failure("r1", "m1", "boom", 5))
            .await;
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.local_len(), 0);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = PredictionCache::local_only(&config(10, 1));
        let key = cache_key("m1", &json!({"x": 1}));

        cache.set(&key, &ok_response()).await;
        assert!(cache.get(&key).await.is_some());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_empties_local_tier() {
        let cache = PredictionCache::local_only(&config(10, 300));
        let key = cache_key("m1", &json!({"x": 1}));

        cache.set(&key, &ok_response()).await;
        cache.clear();
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.local_len(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_degrades_to_local() {
        let cache = PredictionCache::connect(
            &config(10, 300),
            Some("redis://127.0.0.1:1/"),
        )
        .await;
        assert!(!cache.has_remote());

        let key = cache_key("m1", &json!({"x": 1}));
        cache.set(&key, &ok_response()).await;
        assert!(cache.get(&key).await.is_some());
    }
}
