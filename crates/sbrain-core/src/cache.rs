use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use sbrain_events::Subscription;

use crate::error::ClientError;

/// Tuple-shaped cache key, e.g. `("brain", "piece", "status", "abc")`.
///
/// Keys are opaque beyond equality and prefix comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(","))
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    updated_at: Instant,
    invalidated: bool,
}

impl CacheEntry {
    fn fresh(value: Value) -> Self {
        Self {
            value,
            updated_at: Instant::now(),
            invalidated: false,
        }
    }
}

type Entries = HashMap<CacheKey, CacheEntry>;

/// Key/value store of cached server responses.
///
/// Invalidation marks an entry stale without dropping its value: readers still see the
/// last known data, and the next [`CacheStore::fetch_with`] goes back to the server.
#[derive(Clone)]
pub struct CacheStore {
    entries: Arc<RwLock<Entries>>,
    stale_time: Duration,
}

impl CacheStore {
    pub fn new(stale_time: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            stale_time,
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).map(|e| e.value.clone())
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn set(&self, key: CacheKey, value: Value) {
        self.write().insert(key, CacheEntry::fresh(value));
    }

    /// Apply `f` to an existing entry; returns `false` when the key is absent.
    pub fn update(&self, key: &CacheKey, f: impl FnOnce(&mut Value)) -> bool {
        let mut entries = self.write();
        match entries.get_mut(key) {
            Some(entry) => {
                f(&mut entry.value);
                entry.updated_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Run `f` with exclusive access to several entries at once.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut CacheTxn<'_>) -> R) -> R {
        let mut entries = self.write();
        let mut txn = CacheTxn {
            entries: &mut entries,
        };
        f(&mut txn)
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        match self.write().get_mut(key) {
            Some(entry) => {
                entry.invalidated = true;
                true
            }
            None => false,
        }
    }

    /// Invalidate every key under `prefix`; returns how many entries were touched.
    pub fn invalidate_prefix(&self, prefix: &CacheKey) -> usize {
        let mut touched = 0;
        for (key, entry) in self.write().iter_mut() {
            if key.starts_with(prefix) {
                entry.invalidated = true;
                touched += 1;
            }
        }
        touched
    }

    pub fn invalidate_all(&self) -> usize {
        let mut entries = self.write();
        for entry in entries.values_mut() {
            entry.invalidated = true;
        }
        entries.len()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Missing, invalidated, or older than the stale time.
    pub fn is_stale(&self, key: &CacheKey) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) => entry.invalidated || entry.updated_at.elapsed() >= self.stale_time,
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-through: serve the cached value while it is fresh, otherwise run `fetch`,
    /// store its result and return it. A failed fetch leaves the entry untouched.
    pub async fn fetch_with<F, Fut>(&self, key: CacheKey, fetch: F) -> Result<Value, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ClientError>>,
    {
        if !self.is_stale(&key) {
            if let Some(value) = self.get(&key) {
                tracing::trace!(key = %key, "cache hit");
                return Ok(value);
            }
        }
        tracing::debug!(key = %key, "cache miss; fetching");
        let value = fetch().await?;
        self.set(key, value.clone());
        Ok(value)
    }

    /// Invalidate everything whenever the subscription yields an envelope.
    ///
    /// Meant for a subscription filtered to the logout topic; the task ends when the
    /// hub goes away or the handle is aborted.
    pub fn spawn_logout_listener(&self, mut sub: Subscription) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            while let Some(env) = sub.recv().await {
                let touched = cache.invalidate_all();
                tracing::info!(kind = %env.kind, touched, "session ended; cache invalidated");
            }
        })
    }
}

/// Exclusive view over the store handed to [`CacheStore::transaction`].
pub struct CacheTxn<'a> {
    entries: &'a mut Entries,
}

impl CacheTxn<'_> {
    pub fn get(&self, key: &CacheKey) -> Option<&Value> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, key: &CacheKey) -> Option<&mut Value> {
        self.entries.get_mut(key).map(|e| {
            e.updated_at = Instant::now();
            &mut e.value
        })
    }

    pub fn set(&mut self, key: CacheKey, value: Value) {
        self.entries.insert(key, CacheEntry::fresh(value));
    }

    pub fn invalidate(&mut self, key: &CacheKey) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.invalidated = true;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(parts: &[&str]) -> CacheKey {
        CacheKey::new(parts.iter().copied())
    }

    #[test]
    fn prefix_matching_is_segment_wise() {
        let piece = key(&["brain", "piece", "status", "abc"]);
        assert!(piece.starts_with(&key(&["brain"])));
        assert!(piece.starts_with(&key(&["brain", "piece"])));
        assert!(!piece.starts_with(&key(&["brain", "pie"])));
        assert_eq!(piece.to_string(), "[brain,piece,status,abc]");
    }

    #[test]
    fn invalidation_keeps_value_readable() {
        let cache = CacheStore::new(Duration::from_secs(60));
        let status = key(&["brain", "status"]);
        cache.set(status.clone(), json!({"isSharing": true}));
        assert!(!cache.is_stale(&status));

        assert!(cache.invalidate(&status));
        assert!(cache.is_stale(&status));
        assert_eq!(cache.get(&status), Some(json!({"isSharing": true})));
        assert!(!cache.invalidate(&key(&["missing"])));
    }

    #[test]
    fn invalidate_prefix_only_touches_matching_keys() {
        let cache = CacheStore::new(Duration::from_secs(60));
        cache.set(key(&["brain", "status"]), json!(1));
        cache.set(key(&["brain", "piece", "status", "a"]), json!(2));
        cache.set(key(&["user-contents"]), json!([]));

        assert_eq!(cache.invalidate_prefix(&key(&["brain"])), 2);
        assert!(cache.is_stale(&key(&["brain", "piece", "status", "a"])));
        assert!(!cache.is_stale(&key(&["user-contents"])));
        assert_eq!(cache.invalidate_all(), 3);
    }

    #[test]
    fn transaction_writes_several_keys() {
        let cache = CacheStore::new(Duration::from_secs(60));
        let a = key(&["a"]);
        let b = key(&["b"]);
        cache.set(a.clone(), json!({"n": 1}));
        cache.transaction(|txn| {
            if let Some(v) = txn.get_mut(&a) {
                v["n"] = json!(2);
            }
            txn.set(b.clone(), json!("new"));
        });
        assert_eq!(cache.get(&a), Some(json!({"n": 2})));
        assert_eq!(cache.get(&b), Some(json!("new")));
    }

    #[tokio::test]
    async fn fetch_with_serves_fresh_entries_and_refetches_invalidated_ones() {
        let cache = CacheStore::new(Duration::from_secs(60));
        let contents = key(&["user-contents"]);
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let fetch = move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ClientError>(json!([n]))
        };

        assert_eq!(cache.fetch_with(contents.clone(), fetch).await.unwrap(), json!([0]));
        assert_eq!(cache.fetch_with(contents.clone(), fetch).await.unwrap(), json!([0]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate(&contents);
        assert_eq!(cache.fetch_with(contents.clone(), fetch).await.unwrap(), json!([1]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.is_stale(&contents));
    }

    #[tokio::test]
    async fn zero_stale_time_always_refetches() {
        let cache = CacheStore::new(Duration::ZERO);
        let user = key(&["user"]);
        cache.set(user.clone(), json!({"name": "old"}));
        let value = cache
            .fetch_with(user.clone(), || async { Ok(json!({"name": "new"})) })
            .await
            .unwrap();
        assert_eq!(value, json!({"name": "new"}));
    }

    #[tokio::test]
    async fn failed_fetch_leaves_entry_alone() {
        let cache = CacheStore::new(Duration::from_secs(60));
        let status = key(&["brain", "status"]);
        cache.set(status.clone(), json!({"isSharing": false}));
        cache.invalidate(&status);

        let err = cache
            .fetch_with(status.clone(), || async {
                Err(ClientError::Transport("offline".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(cache.get(&status), Some(json!({"isSharing": false})));
        assert!(cache.is_stale(&status));
    }

    #[tokio::test]
    async fn logout_listener_invalidates_everything() {
        let bus = sbrain_events::Bus::new(8);
        let cache = CacheStore::new(Duration::from_secs(60));
        cache.set(key(&["user"]), json!({"name": "a"}));
        cache.set(key(&["user-contents"]), json!([]));

        let handle =
            cache.spawn_logout_listener(bus.subscribe_kinds(&[sbrain_topics::TOPIC_SESSION_LOGOUT]));
        bus.publish(sbrain_topics::TOPIC_SESSION_LOGOUT, &json!({"error": "expired"}));

        tokio::time::timeout(Duration::from_secs(2), async {
            while !cache.is_stale(&key(&["user"])) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("listener invalidated the cache");
        assert!(cache.is_stale(&key(&["user-contents"])));
        handle.abort();
    }
}
