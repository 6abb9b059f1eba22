//! Known-face registry: the set of (identity, embedding) pairs a photo is
//! matched against.

use crate::error::PipelineError;
use crate::store::{bounded, AttendanceStore};
use rollcall_core::KnownFaceEntry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Loads the registry from storage, optionally keeping a snapshot between
/// uploads.
///
/// With caching off every [`snapshot`](Self::snapshot) reads the store, so
/// a registration is visible to the very next upload. With caching on the
/// snapshot lives until [`refresh`](Self::refresh) or
/// [`invalidate`](Self::invalidate).
pub struct KnownFaceRegistry {
    store: Arc<dyn AttendanceStore>,
    timeout: Duration,
    caching: bool,
    cached: RwLock<Option<Arc<[KnownFaceEntry]>>>,
    /// Bumped by every invalidation. A load that started under an older
    /// generation is returned to its caller but never cached.
    generation: AtomicU64,
}

impl KnownFaceRegistry {
    pub fn new(store: Arc<dyn AttendanceStore>, timeout: Duration, caching: bool) -> Self {
        Self {
            store,
            timeout,
            caching,
            cached: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn caching(&self) -> bool {
        self.caching
    }

    /// Read every registered entry from storage, ordered by identity.
    pub async fn load(&self) -> Result<Vec<KnownFaceEntry>, PipelineError> {
        let mut entries = bounded(self.timeout, self.store.list_known_faces())
            .await
            .map_err(|e| PipelineError::RegistryUnavailable(e.to_string()))?;
        entries.sort_by(|a, b| a.identity.cmp(&b.identity));
        tracing::debug!(entries = entries.len(), "known-face registry loaded");
        Ok(entries)
    }

    /// Registry view for one matching operation.
    pub async fn snapshot(&self) -> Result<Arc<[KnownFaceEntry]>, PipelineError> {
        if !self.caching {
            return Ok(self.load().await?.into());
        }
        if let Some(cached) = self.cached.read().await.as_ref() {
            return Ok(Arc::clone(cached));
        }
        self.refresh().await
    }

    /// Reload from storage and replace the cached snapshot.
    pub async fn refresh(&self) -> Result<Arc<[KnownFaceEntry]>, PipelineError> {
        let started = self.generation.load(Ordering::Acquire);
        let fresh: Arc<[KnownFaceEntry]> = self.load().await?.into();
        if self.caching {
            let mut cached = self.cached.write().await;
            if self.generation.load(Ordering::Acquire) == started {
                *cached = Some(Arc::clone(&fresh));
            } else {
                tracing::debug!("registry changed during load; snapshot not cached");
            }
        }
        Ok(fresh)
    }

    /// Drop the cached snapshot; the next snapshot reloads.
    pub async fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cached.write().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::testing::FlakyStore;
    use rollcall_core::Embedding;

    async fn store_with(names: &[&str]) -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        for (i, name) in names.iter().enumerate() {
            store
                .upsert_known_face(name, &Embedding::new(vec![i as f32, 0.5]))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_uncached_snapshot_sees_new_registrations() {
        let store = store_with(&["bo", "al"]).await;
        let registry = KnownFaceRegistry::new(store.clone(), Duration::from_secs(1), false);

        let first = registry.snapshot().await.unwrap();
        assert_eq!(first.iter().map(|e| e.identity.as_str()).collect::<Vec<_>>(), vec!["al", "bo"]);

        store.upsert_known_face("cy", &Embedding::new(vec![9.0, 9.0])).await.unwrap();
        assert_eq!(registry.snapshot().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_cached_snapshot_until_invalidated() {
        let store = store_with(&["al"]).await;
        let registry = KnownFaceRegistry::new(store.clone(), Duration::from_secs(1), true);

        assert_eq!(registry.snapshot().await.unwrap().len(), 1);
        store.upsert_known_face("bo", &Embedding::new(vec![1.0, 1.0])).await.unwrap();
        assert_eq!(registry.snapshot().await.unwrap().len(), 1);

        registry.invalidate().await;
        assert_eq!(registry.snapshot().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_during_load_keeps_stale_result_out_of_cache() {
        let sqlite = store_with(&["al"]).await;
        let slow = Arc::new(FlakyStore::new(sqlite.clone()).with_read_delay(Duration::from_millis(150)));
        let registry = KnownFaceRegistry::new(slow, Duration::from_secs(2), true);

        let (in_flight, ()) = tokio::join!(registry.snapshot(), async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            sqlite.upsert_known_face("zed", &Embedding::new(vec![5.0, 5.0])).await.unwrap();
            registry.invalidate().await;
        });

        // The load read the store before "zed" existed.
        assert_eq!(in_flight.unwrap().len(), 1);
        let names: Vec<String> = registry
            .snapshot()
            .await
            .unwrap()
            .iter()
            .map(|e| e.identity.clone())
            .collect();
        assert_eq!(names, vec!["al", "zed"]);
    }

    #[tokio::test]
    async fn test_empty_registry_is_not_an_error() {
        let store = store_with(&[]).await;
        let registry = KnownFaceRegistry::new(store, Duration::from_secs(1), false);
        assert!(registry.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_store_is_registry_unavailable() {
        let inner = store_with(&["al"]).await;
        let store = Arc::new(FlakyStore::new(inner).registry_down());
        let registry = KnownFaceRegistry::new(store, Duration::from_secs(1), true);

        let err = registry.snapshot().await.unwrap_err();
        assert!(matches!(err, PipelineError::RegistryUnavailable(_)));
        assert!(err.is_retryable());
    }
}
