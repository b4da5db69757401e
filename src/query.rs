//! Keyed read cache shared by every hook.
//!
//! Reads are keyed by `(entity, params...)`. Concurrent reads of one key
//! share a single in-flight fetch. A fresh entry is served as is; a stale
//! one is served while a background refetch runs; an invalidated one makes
//! the reader wait for a fresh fetch.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new(entity: &str) -> Self {
        QueryKey(vec![entity.to_string()])
    }

    pub fn with(mut self, param: impl Into<String>) -> Self {
        self.0.push(param.into());
        self
    }

    /// Segment-wise prefix, so `attendance` does not match `attendance-stats`.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub stale_time: Duration,
    /// Unused entries older than this are dropped.
    pub cache_time: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            stale_time: Duration::from_secs(5 * 60),
            cache_time: Duration::from_secs(5 * 60),
            retries: 2,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl From<&Config> for QueryOptions {
    fn from(config: &Config) -> Self {
        QueryOptions {
            stale_time: config.stale_time,
            retry_delay: config.retry_delay,
            ..QueryOptions::default()
        }
    }
}

type Cached = Arc<dyn Any + Send + Sync>;
type InFlight = Shared<BoxFuture<'static, Result<Cached>>>;

struct Entry {
    value: Option<Cached>,
    fetched_at: Instant,
    last_used: Instant,
    invalidated: bool,
    /// Bumped on invalidation; a fetch only lands if it still matches.
    generation: u64,
    in_flight: Option<InFlight>,
}

impl Entry {
    fn new(now: Instant) -> Self {
        Entry {
            value: None,
            fetched_at: now,
            last_used: now,
            invalidated: false,
            generation: 0,
            in_flight: None,
        }
    }
}

#[derive(Default)]
struct Cache {
    entries: HashMap<QueryKey, Entry>,
}

impl Cache {
    fn evict(&mut self, now: Instant, cache_time: Duration) {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.in_flight.is_some() || now.duration_since(e.last_used) < cache_time);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, "evicted unused query entries");
        }
    }
}

fn lock(cache: &Mutex<Cache>) -> MutexGuard<'_, Cache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Delay before retry number `attempt + 1`: doubles from `base`, capped at 30 s.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_RETRY_DELAY)
}

async fn fetch_with_retry<T, F, Fut>(options: &QueryOptions, key: &QueryKey, fetch: &F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match fetch().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_not_configured() || attempt >= options.retries => return Err(e),
            Err(e) => {
                let delay = retry_delay(options.retry_delay, attempt);
                debug!(key = %key, attempt, ?delay, error = %e, "query failed; retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

enum Plan<T> {
    Hit(T),
    Wait(InFlight),
}

pub struct QueryClient {
    options: QueryOptions,
    cache: Arc<Mutex<Cache>>,
}

impl QueryClient {
    pub fn new(options: QueryOptions) -> Self {
        QueryClient {
            options,
            cache: Arc::new(Mutex::new(Cache::default())),
        }
    }

    /// Cached read of `key`, calling `fetch` on a miss.
    pub async fn query<T, F, Fut>(&self, key: QueryKey, fetch: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let fetch = Arc::new(fetch);
        let plan = {
            let mut cache = lock(&self.cache);
            let now = Instant::now();
            cache.evict(now, self.options.cache_time);
            let entry = cache
                .entries
                .entry(key.clone())
                .or_insert_with(|| Entry::new(now));
            entry.last_used = now;
            let cached = entry
                .value
                .as_ref()
                .and_then(|v| v.downcast_ref::<T>())
                .cloned();
            match cached {
                Some(value)
                    if !entry.invalidated
                        && now.duration_since(entry.fetched_at) < self.options.stale_time =>
                {
                    Plan::Hit(value)
                }
                Some(value) if !entry.invalidated => {
                    if entry.in_flight.is_none() {
                        debug!(key = %key, "serving stale entry; refetching in background");
                        let refetch = self.start(&key, entry, Arc::clone(&fetch));
                        tokio::spawn(refetch);
                    }
                    Plan::Hit(value)
                }
                _ => Plan::Wait(match entry.in_flight.clone() {
                    Some(shared) => shared,
                    None => self.start(&key, entry, Arc::clone(&fetch)),
                }),
            }
        };

        match plan {
            Plan::Hit(value) => Ok(value),
            Plan::Wait(shared) => {
                let value = shared.await?;
                match value.downcast_ref::<T>() {
                    Some(v) => Ok(v.clone()),
                    None => {
                        warn!(key = %key, "cached value has another type; fetching uncached");
                        fetch().await
                    }
                }
            }
        }
    }

    fn start<T, F, Fut>(&self, key: &QueryKey, entry: &mut Entry, fetch: Arc<F>) -> InFlight
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let generation = entry.generation;
        let cache = Arc::clone(&self.cache);
        let options = self.options.clone();
        let key = key.clone();
        let shared = async move {
            let result = fetch_with_retry(&options, &key, fetch.as_ref())
                .await
                .map(|v| Arc::new(v) as Cached);
            {
                let mut cache = lock(&cache);
                match cache.entries.get_mut(&key).filter(|e| e.generation == generation) {
                    Some(entry) => {
                        entry.in_flight = None;
                        if let Ok(value) = &result {
                            entry.value = Some(Arc::clone(value));
                            entry.fetched_at = Instant::now();
                            entry.invalidated = false;
                        }
                    }
                    None => debug!(key = %key, "dropping result of a superseded fetch"),
                }
            }
            result
        }
        .boxed()
        .shared();
        entry.in_flight = Some(shared.clone());
        shared
    }

    /// Marks every entry under `prefix` as needing a fresh fetch.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut cache = lock(&self.cache);
        let mut touched = 0;
        for (_, entry) in cache.entries.iter_mut().filter(|(k, _)| k.starts_with(prefix)) {
            entry.invalidated = true;
            entry.generation += 1;
            entry.in_flight = None;
            touched += 1;
        }
        debug!(prefix = %prefix, touched, "invalidated queries");
        touched
    }

    pub fn invalidate_entity(&self, entity: &str) -> usize {
        self.invalidate(&QueryKey::new(entity))
    }

    /// Drops everything, e.g. when the signed-in user changes.
    pub fn clear(&self) {
        lock(&self.cache).entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.cache).entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BackendError, Error};
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Fetch = Arc<dyn Fn() -> BoxFuture<'static, Result<usize>> + Send + Sync>;

    /// Each call sleeps briefly and yields its 1-based call number.
    fn counting(calls: &Arc<AtomicUsize>) -> impl Fn() -> BoxFuture<'static, Result<usize>> + Clone + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(n)
            }
            .boxed()
        }
    }

    /// Fails the first `failures` calls with `error`.
    fn flaky(calls: &Arc<AtomicUsize>, failures: usize, error: Error) -> Fetch {
        let calls = Arc::clone(calls);
        Arc::new(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let error = error.clone();
            async move {
                if n <= failures {
                    Err(error)
                } else {
                    Ok(n)
                }
            }
            .boxed()
        })
    }

    fn key() -> QueryKey {
        QueryKey::new("classes").with("all")
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        assert_eq!(retry_delay(base, 0), Duration::from_secs(1));
        assert_eq!(retry_delay(base, 1), Duration::from_secs(2));
        assert_eq!(retry_delay(base, 10), MAX_RETRY_DELAY);
    }

    #[test]
    fn prefixes_match_whole_segments() {
        let stats = QueryKey::new("attendance-stats").with("c1");
        assert!(!stats.starts_with(&QueryKey::new("attendance")));
        assert!(QueryKey::new("attendance").with("c1").starts_with(&QueryKey::new("attendance")));
        assert_eq!(stats.to_string(), "attendance-stats/c1");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_reads_share_one_fetch() {
        let client = QueryClient::new(QueryOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting(&calls);
        let (a, b) = tokio::join!(client.query(key(), fetch.clone()), client.query(key(), fetch.clone()));
        assert_eq!(a, Ok(1));
        assert_eq!(b, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(client.query(key(), fetch).await, Ok(1), "still fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entries_are_served_then_refreshed() {
        let client = QueryClient::new(QueryOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting(&calls);
        assert_eq!(client.query(key(), fetch.clone()).await, Ok(1));

        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        client.query(key(), fetch.clone()).await.expect("touch");
        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        assert_eq!(client.query(key(), fetch.clone()).await, Ok(1), "stale value served");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.query(key(), fetch).await, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_forces_a_fresh_fetch() {
        let client = QueryClient::new(QueryOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting(&calls);
        let other = QueryKey::new("students").with("all");
        client.query(key(), fetch.clone()).await.expect("classes");
        client.query(other.clone(), fetch.clone()).await.expect("students");

        assert_eq!(client.invalidate_entity("classes"), 1);
        assert_eq!(client.query(key(), fetch.clone()).await, Ok(3));
        assert_eq!(client.query(other, fetch).await, Ok(2), "other entities untouched");
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_started_before_invalidation_does_not_land() {
        let client = Arc::new(QueryClient::new(QueryOptions::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting(&calls);

        let first = {
            let client = Arc::clone(&client);
            let fetch = fetch.clone();
            tokio::spawn(async move { client.query(key(), fetch).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        client.invalidate_entity("classes");

        assert_eq!(client.query(key(), fetch.clone()).await, Ok(2));
        assert_eq!(first.await.expect("join"), Ok(1));
        assert_eq!(client.query(key(), fetch).await, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_retry_twice_with_backoff() {
        let client = QueryClient::new(QueryOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let boom = Error::Backend(BackendError::request("08006", "connection reset"));

        let started = Instant::now();
        let fetch = flaky(&calls, 2, boom.clone());
        assert_eq!(client.query(key(), move || fetch()).await, Ok(3));
        assert!(started.elapsed() >= Duration::from_secs(3));

        client.clear();
        calls.store(0, Ordering::SeqCst);
        let fetch = flaky(&calls, usize::MAX, boom.clone());
        assert_eq!(client.query(key(), move || fetch()).await, Err(boom));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn not_configured_is_not_retried() {
        let client = QueryClient::new(QueryOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = flaky(&calls, usize::MAX, BackendError::NotConfigured.into());
        let result = client.query(key(), move || fetch()).await;
        assert!(result.expect_err("fails").is_not_configured());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unused_entries_are_evicted() {
        let client = QueryClient::new(QueryOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting(&calls);
        client.query(key(), fetch.clone()).await.expect("first");
        assert_eq!(client.len(), 1);

        tokio::time::advance(Duration::from_secs(6 * 60)).await;
        client
            .query(QueryKey::new("students"), fetch)
            .await
            .expect("second");
        assert_eq!(client.len(), 1);
    }
}
