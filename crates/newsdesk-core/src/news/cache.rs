//! Category-scoped article cache with single-flight loading.
//!
//! Reads of a resolved, unexpired entry never take a gate. A miss takes the
//! gate of its own key only, so a slow upstream call for one category never
//! blocks another. Failed upstream fetches are cached as an empty list with
//! a much shorter lifetime than successful ones.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use super::client::NewsSource;
use super::models::Article;
use crate::config::AppConfig;

/// Normalized (trimmed, lower-cased) category name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CategoryKey(String);

impl CategoryKey {
    pub fn new(category: &str) -> Self {
        Self(category.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Empty,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    key: CategoryKey,
    value: Vec<Article>,
    expires_at: Option<Instant>,
    state: EntryState,
}

impl CacheEntry {
    fn loading(key: CategoryKey) -> Self {
        Self {
            key,
            value: Vec::new(),
            expires_at: None,
            state: EntryState::Loading,
        }
    }

    fn resolved(key: CategoryKey, value: Vec<Article>, ttl: Duration, state: EntryState) -> Self {
        Self {
            key,
            value,
            expires_at: Some(Instant::now() + ttl),
            state,
        }
    }

    /// Ready or Failed and not yet expired
    fn is_servable(&self, now: Instant) -> bool {
        matches!(self.state, EntryState::Ready | EntryState::Failed)
            && self.expires_at.map_or(false, |at| at > now)
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// Per-key lock. Lives in the gate map only while someone holds or awaits it.
struct Gate {
    key: CategoryKey,
    lock: Arc<Mutex<()>>,
}

/// Held gate. Dropping it, even when the fetch is cancelled, releases the
/// lock and removes the gate from the map if nobody else is waiting on it.
struct GateHold<'a> {
    gates: &'a DashMap<String, Gate>,
    cache_key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for GateHold<'_> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let lock = OwnedMutexGuard::mutex(&guard).clone();
        drop(guard);

        // One reference in the map, one here: no waiters left
        self.gates.remove_if(&self.cache_key, |_, gate| {
            Arc::ptr_eq(&gate.lock, &lock) && Arc::strong_count(&gate.lock) == 2
        });
    }
}

/// Shared category cache. Construct once and hand out behind an `Arc`.
pub struct CategoryCache {
    source: Arc<dyn NewsSource>,
    entries: DashMap<String, CacheEntry>,
    gates: DashMap<String, Gate>,
    ttl: Duration,
    failure_ttl: Duration,
    window_days: i64,
}

impl CategoryCache {
    pub fn new(source: Arc<dyn NewsSource>, ttl: Duration, failure_ttl: Duration) -> Self {
        Self {
            source,
            entries: DashMap::new(),
            gates: DashMap::new(),
            ttl,
            failure_ttl,
            window_days: 10,
        }
    }

    pub fn from_config(source: Arc<dyn NewsSource>, config: &AppConfig) -> Self {
        Self::new(source, config.cache.ttl(), config.cache.failure_ttl())
            .with_window_days(config.newscatcher.search_window_days)
    }

    /// The search window is part of the cache identity
    pub fn with_window_days(mut self, days: i64) -> Self {
        self.window_days = days;
        self
    }

    fn cache_key(&self, key: &CategoryKey, language: &str, country: &str) -> String {
        format!(
            "news_{}_{}_{}_{}d",
            key,
            language.trim().to_lowercase(),
            country.trim().to_lowercase(),
            self.window_days
        )
    }

    fn lookup(&self, cache_key: &str) -> Option<Vec<Article>> {
        let now = Instant::now();
        self.entries
            .get(cache_key)
            .filter(|entry| entry.is_servable(now))
            .map(|entry| entry.value.clone())
    }

    async fn acquire(&self, key: &CategoryKey, cache_key: &str) -> GateHold<'_> {
        let lock = self
            .gates
            .entry(cache_key.to_string())
            .or_insert_with(|| Gate {
                key: key.clone(),
                lock: Arc::new(Mutex::new(())),
            })
            .lock
            .clone();

        GateHold {
            gates: &self.gates,
            cache_key: cache_key.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Articles for a category. Never fails: upstream errors yield an empty
    /// list that is itself cached for the failure TTL. Other errors (a broken
    /// request, say) are logged and not cached.
    pub async fn get(&self, category: &str, language: &str, country: &str) -> Vec<Article> {
        let key = CategoryKey::new(category);
        let cache_key = self.cache_key(&key, language, country);

        if let Some(articles) = self.lookup(&cache_key) {
            tracing::debug!(key = %key, "Category cache hit");
            return articles;
        }

        let _gate = self.acquire(&key, &cache_key).await;

        // Another caller may have finished the fetch while we waited
        if let Some(articles) = self.lookup(&cache_key) {
            return articles;
        }

        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        self.entries
            .insert(cache_key.clone(), CacheEntry::loading(key.clone()));

        let fetched = self.source.fetch_category(key.as_str(), language, country).await;
        let entry = match fetched {
            Ok(articles) => {
                tracing::info!(key = %key, count = articles.len(), "Cached category articles");
                CacheEntry::resolved(key, articles, self.ttl, EntryState::Ready)
            }
            Err(e) if e.is_upstream() => {
                tracing::error!(key = %key, error = %e, "Category fetch failed, caching empty result");
                CacheEntry::resolved(key, Vec::new(), self.failure_ttl, EntryState::Failed)
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Category fetch failed, not caching");
                self.entries.remove(&cache_key);
                return Vec::new();
            }
        };

        let articles = entry.value.clone();
        self.entries.insert(cache_key, entry);
        articles
    }

    /// Cached articles whose topic mentions the category
    pub async fn get_by_category(
        &self,
        category: &str,
        language: &str,
        country: &str,
    ) -> Vec<Article> {
        self.get(category, language, country)
            .await
            .into_iter()
            .filter(|a| a.topic_contains(category))
            .collect()
    }

    /// State of the entry for a category, `Empty` when nothing is cached.
    /// An expired entry reports its last state; `get` treats it as a miss.
    pub fn entry_state(&self, category: &str, language: &str, country: &str) -> EntryState {
        let cache_key = self.cache_key(&CategoryKey::new(category), language, country);
        self.entries
            .get(&cache_key)
            .map(|entry| entry.state)
            .unwrap_or(EntryState::Empty)
    }

    /// Drop every cached language/country variant of a category, along with
    /// any idle gates for it
    pub fn invalidate(&self, category: &str) -> usize {
        let key = CategoryKey::new(category);
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.key != key);
        self.gates
            .retain(|_, gate| gate.key != key || Arc::strong_count(&gate.lock) > 1);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::news::SearchQuery;
    use crate::{Error, Result};

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);
    const MINUTE: Duration = Duration::from_secs(60);

    fn article(id: &str, topic: &str) -> Article {
        Article {
            id: Some(id.to_string()),
            title: Some(format!("title {}", id)),
            topic: Some(topic.to_string()),
            ..Default::default()
        }
        .normalize()
    }

    /// Counts upstream calls; fails while `failing` is set
    struct MockSource {
        calls: AtomicUsize,
        failing: std::sync::atomic::AtomicBool,
        misconfigured: std::sync::atomic::AtomicBool,
        delay: Duration,
    }

    impl MockSource {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failing: std::sync::atomic::AtomicBool::new(false),
                misconfigured: std::sync::atomic::AtomicBool::new(false),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NewsSource for MockSource {
        async fn fetch_category(
            &self,
            category: &str,
            _language: &str,
            _country: &str,
        ) -> Result<Vec<Article>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::UpstreamUnavailable("HTTP 503".into()));
            }
            if self.misconfigured.load(Ordering::SeqCst) {
                return Err(Error::Config("news provider api_key is not set".into()));
            }
            Ok(vec![article("1", category), article("2", "other")])
        }

        async fn search(&self, _query: &SearchQuery) -> Result<Vec<Article>> {
            Ok(Vec::new())
        }

        async fn fetch_by_id(&self, _id: &str) -> Result<Option<Article>> {
            Ok(None)
        }
    }

    fn cache_with(source: Arc<MockSource>) -> CategoryCache {
        CategoryCache::new(source, 5 * DAY, 5 * MINUTE)
    }

    #[tokio::test(start_paused = true)]
    async fn test_populated_entry_never_calls_upstream() {
        let source = Arc::new(MockSource::new());
        let cache = cache_with(source.clone());

        cache.get("Tech", "en", "us").await;
        assert_eq!(source.calls(), 1);

        for _ in 0..5 {
            let articles = cache.get("  TECH ", "en", "us").await;
            assert_eq!(articles.len(), 2);
        }
        assert_eq!(source.calls(), 1);
        assert_eq!(cache.entry_state("tech", "en", "us"), EntryState::Ready);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cold_misses_collapse_into_one_call() {
        let source = Arc::new(MockSource {
            delay: Duration::from_millis(50),
            ..MockSource::new()
        });
        let cache = Arc::new(cache_with(source.clone()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get("sports", "en", "us").await }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(source.calls(), 1);
        assert!(results.iter().all(|r| r == &results[0]));
        assert_eq!(results[0].len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unrelated_categories_do_not_share_a_gate() {
        let source = Arc::new(MockSource {
            delay: Duration::from_millis(200),
            ..MockSource::new()
        });
        let cache = Arc::new(cache_with(source.clone()));

        let started = std::time::Instant::now();
        let a = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get("tech", "en", "us").await }
        });
        let b = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get("health", "en", "us").await }
        });
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(source.calls(), 2);
        // Serialized fetches would take at least 400ms
        assert!(started.elapsed() < Duration::from_millis(390));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_ttl_boundaries() {
        let source = Arc::new(MockSource::new());
        let cache = cache_with(source.clone());

        cache.get("tech", "en", "us").await;

        tokio::time::advance(4 * DAY + 23 * 60 * MINUTE).await;
        cache.get("tech", "en", "us").await;
        assert_eq!(source.calls(), 1);

        tokio::time::advance(61 * MINUTE).await; // T + 5d 1m
        cache.get("tech", "en", "us").await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_negative_cached_briefly() {
        let source = Arc::new(MockSource::new());
        source.failing.store(true, Ordering::SeqCst);
        let cache = cache_with(source.clone());

        assert!(cache.get("politics", "en", "us").await.is_empty());
        assert_eq!(cache.entry_state("politics", "en", "us"), EntryState::Failed);

        // Still inside the negative TTL: no retry storm
        tokio::time::advance(4 * MINUTE).await;
        assert!(cache.get("politics", "en", "us").await.is_empty());
        assert_eq!(source.calls(), 1);

        source.failing.store(false, Ordering::SeqCst);
        tokio::time::advance(MINUTE + Duration::from_secs(1)).await;
        assert_eq!(cache.get("politics", "en", "us").await.len(), 2);
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.entry_state("politics", "en", "us"), EntryState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_language_and_country_are_separate_entries() {
        let source = Arc::new(MockSource::new());
        let cache = cache_with(source.clone());

        cache.get("tech", "en", "us").await;
        cache.get("tech", "fr", "fr").await;
        cache.get("Tech", "EN", "US").await;

        assert_eq!(source.calls(), 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.invalidate("TECH"), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_by_category_filters_topic() {
        let source = Arc::new(MockSource::new());
        let cache = cache_with(source.clone());

        let articles = cache.get_by_category("Science", "en", "us").await;
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].id.as_deref(), Some("1"));
    }

    #[test]
    fn test_category_key_normalization() {
        assert_eq!(CategoryKey::new("  Tech "), CategoryKey::new("tech"));
        assert_eq!(CategoryKey::new("Sports").as_str(), "sports");
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_upstream_error_is_not_cached() {
        let source = Arc::new(MockSource::new());
        source.misconfigured.store(true, Ordering::SeqCst);
        let cache = cache_with(source.clone());

        assert!(cache.get("tech", "en", "us").await.is_empty());
        assert_eq!(cache.entry_state("tech", "en", "us"), EntryState::Empty);
        assert!(cache.is_empty());

        source.misconfigured.store(false, Ordering::SeqCst);
        assert_eq!(cache.get("tech", "en", "us").await.len(), 2);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_gates_are_released_after_fetch() {
        let source = Arc::new(MockSource {
            delay: Duration::from_millis(20),
            ..MockSource::new()
        });
        let cache = Arc::new(cache_with(source.clone()));

        let mut handles = Vec::new();
        for i in 0..24 {
            let cache = cache.clone();
            let category = format!("category-{}", i % 3);
            handles.push(tokio::spawn(async move { cache.get(&category, "en", "us").await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(source.calls(), 3);
        assert!(cache.gates.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetch_releases_its_gate() {
        let source = Arc::new(MockSource {
            delay: Duration::from_secs(30),
            ..MockSource::new()
        });
        let cache = Arc::new(cache_with(source.clone()));

        let pending = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get("tech", "en", "us").await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cache.gates.len(), 1);
        assert_eq!(cache.entry_state("tech", "en", "us"), EntryState::Loading);

        pending.abort();
        assert!(pending.await.unwrap_err().is_cancelled());
        assert!(cache.gates.is_empty());

        // The abandoned Loading entry is a miss for the next caller
        assert_eq!(cache.get("tech", "en", "us").await.len(), 2);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_evicted_on_next_miss() {
        let source = Arc::new(MockSource::new());
        let cache = cache_with(source.clone());

        cache.get("tech", "en", "us").await;
        cache.get("health", "en", "us").await;
        assert_eq!(cache.len(), 2);

        tokio::time::advance(5 * DAY + MINUTE).await;
        cache.get("sports", "en", "us").await;

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.entry_state("tech", "en", "us"), EntryState::Empty);
        assert_eq!(cache.entry_state("sports", "en", "us"), EntryState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_drops_idle_gates() {
        let source = Arc::new(MockSource::new());
        let cache = cache_with(source.clone());

        cache.get("tech", "en", "us").await;
        cache.gates.insert(
            "news_tech_fr_fr_10d".to_string(),
            Gate {
                key: CategoryKey::new("tech"),
                lock: Arc::new(Mutex::new(())),
            },
        );
        cache.gates.insert(
            "news_health_en_us_10d".to_string(),
            Gate {
                key: CategoryKey::new("health"),
                lock: Arc::new(Mutex::new(())),
            },
        );

        assert_eq!(cache.invalidate("Tech"), 1);
        assert_eq!(cache.gates.len(), 1);
        assert!(cache.gates.contains_key("news_health_en_us_10d"));
    }
}
