//! [`CachedClient`] – time-boxed cache and call budget in front of a remote
//! data source.
//!
//! Every external source is wrapped in its own client instance with its own
//! TTL, call budget and timeout.  [`CachedClient::fetch`] follows one rule
//! set for all of them:
//!
//! 1. A cached payload younger than the TTL is returned without touching the
//!    network.
//! 2. Otherwise, if the budget allows, the source is queried.  Success
//!    replaces the cache entry.
//! 3. A failed or refused query returns the previous payload marked
//!    [`Fetched::Stale`], or [`Fetched::Empty`] when nothing was ever fetched.
//!
//! Callers never see a source error and never receive fabricated defaults.
//!
//! # Example
//!
//! ```
//! use async_trait::async_trait;
//! use roadwise_sources::cache::{CachedClient, Fetched, RemoteSource, SourcePolicy};
//! use roadwise_sources::SourceError;
//!
//! struct Clock;
//!
//! #[async_trait]
//! impl RemoteSource for Clock {
//!     type Key = ();
//!     type Payload = u32;
//!     fn name(&self) -> &str { "clock" }
//!     async fn fetch_remote(&self, _key: &()) -> Result<u32, SourceError> { Ok(12) }
//! }
//!
//! # tokio_test();
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn tokio_test() {
//! let client = CachedClient::new(Clock, SourcePolicy::default());
//! assert_eq!(client.fetch(&()).await, Fetched::Fresh(12));
//! assert_eq!(client.remote_calls(), 1);
//! # }
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::SourceError;

// ─────────────────────────────────────────────────────────────────────────────
// RemoteSource
// ─────────────────────────────────────────────────────────────────────────────

/// A single external data source reached over the network.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Identifies one cached query.
    type Key: Clone + Eq + Hash + Debug + Send + Sync;
    type Payload: Clone + Send + Sync;

    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Perform one uncached query.
    async fn fetch_remote(&self, key: &Self::Key) -> Result<Self::Payload, SourceError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy and result
// ─────────────────────────────────────────────────────────────────────────────

/// Per-source cache and budget settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePolicy {
    pub ttl: Duration,
    /// Remote calls allowed per `window`.
    pub calls_per_window: u32,
    pub window: Duration,
    /// Upper bound on a single remote call.
    pub timeout: Duration,
    /// Distinct keys kept at once; the oldest entry is evicted beyond this.
    pub max_entries: usize,
}

impl Default for SourcePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            calls_per_window: 10,
            window: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
            max_entries: 16,
        }
    }
}

impl SourcePolicy {
    pub fn new(ttl_s: u64, calls_per_window: u32, window_s: u64, timeout_s: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_s),
            calls_per_window,
            window: Duration::from_secs(window_s),
            timeout: Duration::from_secs(timeout_s),
            ..Self::default()
        }
    }

    fn quota(&self) -> Quota {
        let burst = NonZeroU32::new(self.calls_per_window).unwrap_or(NonZeroU32::MIN);
        let period = self.window / burst.get();
        Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst)
    }
}

/// Outcome of [`CachedClient::fetch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<P> {
    /// Within TTL, either from cache or a successful remote call.
    Fresh(P),
    /// The source failed or the budget was exhausted; last known payload.
    Stale(P),
    /// The source failed and nothing was ever cached.
    Empty,
}

impl<P> Fetched<P> {
    pub fn payload(&self) -> Option<&P> {
        match self {
            Self::Fresh(p) | Self::Stale(p) => Some(p),
            Self::Empty => None,
        }
    }

    pub fn into_payload(self) -> Option<P> {
        match self {
            Self::Fresh(p) | Self::Stale(p) => Some(p),
            Self::Empty => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CachedClient
// ─────────────────────────────────────────────────────────────────────────────

struct CacheEntry<P> {
    payload: P,
    fetched_at: Instant,
}

/// Owns one source's cache and call budget.
///
/// Share an instance through an `Arc` to pool both between capabilities.
pub struct CachedClient<S: RemoteSource> {
    source: S,
    policy: SourcePolicy,
    limiter: DefaultDirectRateLimiter,
    entries: Mutex<HashMap<S::Key, CacheEntry<S::Payload>>>,
    remote_calls: AtomicU64,
}

impl<S: RemoteSource> CachedClient<S> {
    pub fn new(source: S, policy: SourcePolicy) -> Self {
        let limiter = RateLimiter::direct(policy.quota());
        Self {
            source,
            policy,
            limiter,
            entries: Mutex::new(HashMap::new()),
            remote_calls: AtomicU64::new(0),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn policy(&self) -> &SourcePolicy {
        &self.policy
    }

    /// Remote queries attempted so far (refused-by-budget calls excluded).
    pub fn remote_calls(&self) -> u64 {
        self.remote_calls.load(Ordering::Relaxed)
    }

    /// Fetch `key`, serving from cache when fresh.
    ///
    /// Concurrent callers are serialised per client, so a cold key is fetched
    /// once even when requested by several capabilities in the same cycle.
    pub async fn fetch(&self, key: &S::Key) -> Fetched<S::Payload> {
        let name = self.source.name();
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries
            .get(key)
            .filter(|e| e.fetched_at.elapsed() < self.policy.ttl)
        {
            debug!(source = name, ?key, "cache hit");
            return Fetched::Fresh(entry.payload.clone());
        }

        let result = if self.limiter.check().is_err() {
            Err(SourceError::BudgetExhausted)
        } else {
            self.remote_calls.fetch_add(1, Ordering::Relaxed);
            tokio::time::timeout(self.policy.timeout, self.source.fetch_remote(key))
                .await
                .unwrap_or(Err(SourceError::Timeout(self.policy.timeout)))
        };

        match result {
            Ok(payload) => {
                if !entries.contains_key(key) && entries.len() >= self.policy.max_entries {
                    let oldest = entries
                        .iter()
                        .min_by_key(|(_, e)| e.fetched_at)
                        .map(|(k, _)| k.clone());
                    if let Some(oldest) = oldest {
                        entries.remove(&oldest);
                    }
                }
                entries.insert(
                    key.clone(),
                    CacheEntry {
                        payload: payload.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                debug!(source = name, ?key, "fetched");
                Fetched::Fresh(payload)
            }
            Err(e) => match entries.get(key) {
                Some(entry) => {
                    warn!(source = name, ?key, error = %e, "source failed, serving stale payload");
                    Fetched::Stale(entry.payload.clone())
                }
                None => {
                    warn!(source = name, ?key, error = %e, "source failed with nothing cached");
                    Fetched::Empty
                }
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    /// Returns an incrementing counter, or fails while `failing` is set.
    struct Counter {
        next: AtomicU64,
        failing: AtomicBool,
        delay: Duration,
    }

    impl Counter {
        fn new() -> Self {
            Self {
                next: AtomicU64::new(1),
                failing: AtomicBool::new(false),
                delay: Duration::ZERO,
            }
        }

        fn fail(&self, on: bool) {
            self.failing.store(on, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RemoteSource for Counter {
        type Key = String;
        type Payload = u64;

        fn name(&self) -> &str {
            "counter"
        }

        async fn fetch_remote(&self, _key: &String) -> Result<u64, SourceError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(SourceError::BadResponse("down".into()));
            }
            Ok(self.next.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn policy(ttl_s: u64, calls: u32) -> SourcePolicy {
        SourcePolicy::new(ttl_s, calls, 3600, 5)
    }

    fn key(k: &str) -> String {
        k.to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_within_ttl_makes_one_remote_call() {
        let client = CachedClient::new(Counter::new(), policy(30, 10));
        assert_eq!(client.fetch(&key("a")).await, Fetched::Fresh(1));
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(client.fetch(&key("a")).await, Fetched::Fresh(1));
        assert_eq!(client.remote_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched() {
        let client = CachedClient::new(Counter::new(), policy(30, 10));
        client.fetch(&key("a")).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(client.fetch(&key("a")).await, Fetched::Fresh(2));
        assert_eq!(client.remote_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_after_ttl_serves_stale_after_one_attempt() {
        let client = CachedClient::new(Counter::new(), policy(30, 10));
        client.fetch(&key("a")).await;
        client.source().fail(true);
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(client.fetch(&key("a")).await, Fetched::Stale(1));
        assert_eq!(client.remote_calls(), 2);
    }

    #[tokio::test]
    async fn failure_with_nothing_cached_is_empty() {
        let source = Counter::new();
        source.fail(true);
        let client = CachedClient::new(source, policy(30, 10));
        let got = client.fetch(&key("a")).await;
        assert!(got.is_empty());
        assert_eq!(got.payload(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_serves_stale_without_calling() {
        let client = CachedClient::new(Counter::new(), policy(1, 1));
        client.fetch(&key("a")).await;
        tokio::time::advance(Duration::from_secs(2)).await;

        let got = client.fetch(&key("a")).await;
        assert_eq!(got, Fetched::Stale(1));
        assert_eq!(client.remote_calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_with_cold_key_is_empty() {
        let client = CachedClient::new(Counter::new(), policy(30, 1));
        client.fetch(&key("a")).await;
        assert!(client.fetch(&key("b")).await.is_empty());
        assert_eq!(client.remote_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out_to_stale() {
        let mut source = Counter::new();
        source.delay = Duration::from_secs(10);
        let client = CachedClient::new(
            source,
            SourcePolicy {
                timeout: Duration::from_secs(1),
                ..policy(0, 10)
            },
        );
        assert!(client.fetch(&key("a")).await.is_empty());
    }

    #[tokio::test]
    async fn keys_are_cached_independently() {
        let client = CachedClient::new(Counter::new(), policy(30, 10));
        assert_eq!(client.fetch(&key("a")).await, Fetched::Fresh(1));
        assert_eq!(client.fetch(&key("b")).await, Fetched::Fresh(2));
        assert_eq!(client.fetch(&key("a")).await, Fetched::Fresh(1));
        assert_eq!(client.remote_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn oldest_key_is_evicted_beyond_capacity() {
        let client = CachedClient::new(
            Counter::new(),
            SourcePolicy {
                max_entries: 2,
                ..policy(300, 10)
            },
        );
        client.fetch(&key("a")).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        client.fetch(&key("b")).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        client.fetch(&key("c")).await;

        // "a" was evicted, so it is fetched again.
        assert_eq!(client.fetch(&key("a")).await, Fetched::Fresh(4));
        assert_eq!(client.fetch(&key("c")).await, Fetched::Fresh(3));
    }

    #[tokio::test]
    async fn shared_client_pools_cache() {
        let client = Arc::new(CachedClient::new(Counter::new(), policy(30, 10)));
        let other = Arc::clone(&client);
        client.fetch(&key("a")).await;
        other.fetch(&key("a")).await;
        assert_eq!(client.remote_calls(), 1);
    }

    #[test]
    fn fetched_accessors() {
        let stale: Fetched<u8> = Fetched::Stale(3);
        assert!(stale.is_stale());
        assert_eq!(stale.into_payload(), Some(3));
        assert!(Fetched::<u8>::Empty.into_payload().is_none());
    }
}
