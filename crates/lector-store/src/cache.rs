//! Read-through TTL cache in front of a [`LectureStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use serde_json::Value;
use tracing::{debug, instrument};

use lector_core::errors::PersistenceError;
use lector_core::ids::LectureId;
use lector_core::lecture::{HydratedSlide, StylePreferences};
use lector_core::store::LectureStore;

/// Caches raw documents by id. Writes go straight to the inner store and
/// drop the cached entry once they commit.
///
/// Each write bumps a per-lecture epoch. A read that overlapped a write
/// (the epoch moved while it was fetching) never leaves its value cached.
pub struct CachedLectureStore {
    inner: Arc<dyn LectureStore>,
    cache: Cache<LectureId, Value>,
    epochs: DashMap<LectureId, u64>,
}

impl CachedLectureStore {
    pub fn new(inner: Arc<dyn LectureStore>, ttl: Duration, capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(capacity)
            .build();
        Self {
            inner,
            cache,
            epochs: DashMap::new(),
        }
    }

    fn epoch(&self, id: &LectureId) -> u64 {
        self.epochs.get(id).map(|e| *e).unwrap_or(0)
    }
}

#[async_trait]
impl LectureStore for CachedLectureStore {
    async fn create(
        &self,
        topic: &str,
        permitted_users: &[String],
        preferences: &StylePreferences,
    ) -> Result<LectureId, PersistenceError> {
        self.inner.create(topic, permitted_users, preferences).await
    }

    #[instrument(skip(self, id), fields(lecture_id = %id))]
    async fn get(&self, id: &LectureId) -> Result<Value, PersistenceError> {
        if let Some(doc) = self.cache.get(id).await {
            debug!("lecture cache hit");
            return Ok(doc);
        }
        let epoch = self.epoch(id);
        let doc = self.inner.get(id).await?;
        if self.epoch(id) != epoch {
            debug!("lecture written during read, not caching");
            return Ok(doc);
        }
        self.cache.insert(id.clone(), doc.clone()).await;
        // A write that bumped after the check above invalidates after this
        // insert; one that bumped before it is caught here.
        if self.epoch(id) != epoch {
            self.cache.invalidate(id).await;
        }
        Ok(doc)
    }

    async fn replace_suffix(
        &self,
        id: &LectureId,
        offset: usize,
        slides: &[HydratedSlide],
    ) -> Result<u64, PersistenceError> {
        let result = self.inner.replace_suffix(id, offset, slides).await;
        *self.epochs.entry(id.clone()).or_insert(0) += 1;
        self.cache.invalidate(id).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::Notify;

    use lector_core::lecture::{LectureDocument, SlideDraft};

    use crate::database::Database;
    use crate::lectures::SqliteLectureStore;

    struct CountingStore {
        inner: SqliteLectureStore,
        gets: AtomicUsize,
    }

    #[async_trait]
    impl LectureStore for CountingStore {
        async fn create(
            &self,
            topic: &str,
            permitted_users: &[String],
            preferences: &StylePreferences,
        ) -> Result<LectureId, PersistenceError> {
            self.inner.create(topic, permitted_users, preferences).await
        }

        async fn get(&self, id: &LectureId) -> Result<Value, PersistenceError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(id).await
        }

        async fn replace_suffix(
            &self,
            id: &LectureId,
            offset: usize,
            slides: &[HydratedSlide],
        ) -> Result<u64, PersistenceError> {
            self.inner.replace_suffix(id, offset, slides).await
        }
    }

    /// Pauses the next `get` after it has read, until released.
    struct PausingStore {
        inner: SqliteLectureStore,
        pause: AtomicBool,
        read: Notify,
        release: Notify,
    }

    #[async_trait]
    impl LectureStore for PausingStore {
        async fn create(
            &self,
            topic: &str,
            permitted_users: &[String],
            preferences: &StylePreferences,
        ) -> Result<LectureId, PersistenceError> {
            self.inner.create(topic, permitted_users, preferences).await
        }

        async fn get(&self, id: &LectureId) -> Result<Value, PersistenceError> {
            let doc = self.inner.get(id).await;
            if self.pause.swap(false, Ordering::SeqCst) {
                self.read.notify_one();
                self.release.notified().await;
            }
            doc
        }

        async fn replace_suffix(
            &self,
            id: &LectureId,
            offset: usize,
            slides: &[HydratedSlide],
        ) -> Result<u64, PersistenceError> {
            self.inner.replace_suffix(id, offset, slides).await
        }
    }

    fn setup() -> (Arc<CountingStore>, CachedLectureStore) {
        let counting = Arc::new(CountingStore {
            inner: SqliteLectureStore::new(Database::in_memory().unwrap()),
            gets: AtomicUsize::new(0),
        });
        let cached = CachedLectureStore::new(counting.clone(), Duration::from_secs(60), 100);
        (counting, cached)
    }

    #[tokio::test]
    async fn repeated_gets_hit_the_cache() {
        let (counting, cached) = setup();
        let id = cached.create("t", &[], &StylePreferences::default()).await.unwrap();

        cached.get(&id).await.unwrap();
        cached.get(&id).await.unwrap();
        assert_eq!(counting.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn write_invalidates_entry() {
        let (counting, cached) = setup();
        let id = cached.create("t", &[], &StylePreferences::default()).await.unwrap();
        cached.get(&id).await.unwrap();

        let slide = HydratedSlide::from_draft(SlideDraft::new("one", "body", "narration"));
        cached.replace_suffix(&id, 0, &[slide]).await.unwrap();

        let doc = LectureDocument::from_value(cached.get(&id).await.unwrap()).unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.slides.len(), 1);
        assert_eq!(counting.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn misses_are_not_cached() {
        let (counting, cached) = setup();
        let ghost = LectureId::from_raw("ghost");
        assert!(cached.get(&ghost).await.unwrap_err().is_not_found());
        assert!(cached.get(&ghost).await.unwrap_err().is_not_found());
        assert_eq!(counting.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn short_ttl_expires() {
        let counting = Arc::new(CountingStore {
            inner: SqliteLectureStore::new(Database::in_memory().unwrap()),
            gets: AtomicUsize::new(0),
        });
        let cached = CachedLectureStore::new(counting.clone(), Duration::from_millis(50), 100);
        let id = cached.create("t", &[], &StylePreferences::default()).await.unwrap();

        cached.get(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        cached.get(&id).await.unwrap();
        assert_eq!(counting.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn read_overlapping_a_write_is_not_cached() {
        let pausing = Arc::new(PausingStore {
            inner: SqliteLectureStore::new(Database::in_memory().unwrap()),
            pause: AtomicBool::new(false),
            read: Notify::new(),
            release: Notify::new(),
        });
        let cached = Arc::new(CachedLectureStore::new(pausing.clone(), Duration::from_secs(60), 100));
        let id = cached.create("t", &[], &StylePreferences::default()).await.unwrap();

        pausing.pause.store(true, Ordering::SeqCst);
        let reader = tokio::spawn({
            let cached = Arc::clone(&cached);
            let id = id.clone();
            async move { cached.get(&id).await.unwrap() }
        });
        pausing.read.notified().await;

        let slide = HydratedSlide::from_draft(SlideDraft::new("one", "body", "narration"));
        assert_eq!(cached.replace_suffix(&id, 0, &[slide]).await.unwrap(), 1);
        pausing.release.notify_one();

        let stale = LectureDocument::from_value(reader.await.unwrap()).unwrap();
        assert_eq!(stale.version, 0);

        let fresh = LectureDocument::from_value(cached.get(&id).await.unwrap()).unwrap();
        assert_eq!(fresh.version, 1);
        assert_eq!(fresh.slides.len(), 1);
    }
}
