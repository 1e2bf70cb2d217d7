//! Small TTL memo cache for point lookups.
//!
//! Expiry is lazy: an entry older than the TTL reads as absent but stays in the
//! map until it is overwritten or pushed out. Eviction is FIFO by first
//! insertion, not by access. Instances are shared behind `Arc` and mutated from
//! async code, so the map sits behind a short-lived std mutex that is never held
//! across an await.

use crate::error::Result;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    order: VecDeque<K>,
}

pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, ttl: Duration, max_entries: usize) -> Self {
        Self {
            name,
            ttl,
            max_entries: max_entries.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let inner = self.lock();
        inner
            .entries
            .get(key)
            .filter(|e| e.inserted_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.lock();
        let entry = Entry {
            value,
            inserted_at: Instant::now(),
        };
        if let Some(existing) = inner.entries.get_mut(&key) {
            *existing = entry;
            return;
        }
        while inner.entries.len() >= self.max_entries {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                    log::debug!("[cache:{}] evicted oldest entry", self.name);
                }
                None => break,
            }
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(key, entry);
    }

    /// Serve from cache, otherwise run `fetch` and remember the result. A failed
    /// fetch stores `on_error` for the same TTL so a broken upstream is not hit
    /// again on every render.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F, on_error: V) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(v) = self.get(&key) {
            return v;
        }
        let value = match fetch().await {
            Ok(v) => v,
            Err(e) => {
                log::warn!("[cache:{}] lookup failed, caching negative result: {e}", self.name);
                on_error
            }
        };
        self.insert(key, value.clone());
        value
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K, V>> {
        // A panic while holding the guard leaves the map consistent enough to keep serving.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn cache(max: usize) -> TtlCache<String, bool> {
        TtlCache::new("test", Duration::from_secs(300), max)
    }

    #[tokio::test(start_paused = true)]
    async fn set_then_get() {
        let c = cache(10);
        c.insert("k".into(), true);
        assert_eq!(c.get(&"k".to_string()), Some(true));
        assert_eq!(c.get(&"missing".to_string()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_reads_as_absent() {
        let c = cache(10);
        c.insert("k".into(), true);
        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(c.get(&"k".to_string()), Some(true));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(c.get(&"k".to_string()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_first_inserted_not_least_recently_read() {
        let c = cache(2);
        c.insert("a".into(), true);
        c.insert("b".into(), true);
        // reading "a" must not protect it
        assert!(c.get(&"a".to_string()).is_some());
        c.insert("c".into(), true);
        assert_eq!(c.get(&"a".to_string()), None);
        assert!(c.get(&"b".to_string()).is_some());
        assert!(c.get(&"c".to_string()).is_some());
        assert_eq!(c.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_does_not_evict() {
        let c = cache(2);
        c.insert("a".into(), true);
        c.insert("b".into(), true);
        c.insert("a".into(), false);
        assert_eq!(c.get(&"a".to_string()), Some(false));
        assert!(c.get(&"b".to_string()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_lookup_is_cached_as_negative() {
        let c = cache(10);
        let calls = std::sync::atomic::AtomicUsize::new(0);
        for _ in 0..3 {
            let v = c
                .get_or_fetch(
                    "pid".to_string(),
                    || async {
                        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        Err(Error::DryRun("cu down".into()))
                    },
                    false,
                )
                .await;
            assert!(!v);
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        let v = c.get_or_fetch("pid".to_string(), || async { Ok(true) }, false).await;
        assert!(v);
    }
}
