use crate::application_port::CacheError;
use crate::logger::*;
use dashmap::DashMap;
use futures_util::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Lifetime of a successfully refreshed entry.
    pub default_ttl: Duration,
    /// Lifetime of an entry whose refresh failed. Keep it well below `default_ttl`.
    pub retry_ttl: Duration,
    /// How long a last-known-good value may be served after refreshes started failing.
    pub max_staleness: Duration,
    /// Upper bound for a single refresh call.
    pub fetch_timeout: Duration,
}

/// Produces a fresh value for a registered cache name.
#[async_trait::async_trait]
pub trait Refresher<V>: Send + Sync {
    async fn refresh(&self, name: &str) -> anyhow::Result<V>;
}

struct Entry<V> {
    value: Option<V>,
    error: Option<String>,
    expires_at: Instant,
    stale_since: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Expiring cache with refresh-on-expiry.
///
/// Reads never block on the network. Names with a registered [`Refresher`]
/// are refreshed by [`KeyCache::sweep`] once they expire; concurrent refreshes
/// of the same name collapse into a single call. A failed refresh keeps the
/// entry around for `retry_ttl` with an error marker (and the last good value,
/// while it is younger than `max_staleness`), so a broken upstream is retried
/// at a steady pace instead of on every request.
pub struct KeyCache<V> {
    entries: DashMap<String, Entry<V>>,
    refreshers: DashMap<String, Arc<dyn Refresher<V>>>,
    flights: DashMap<String, Arc<Mutex<()>>>,
    policy: CachePolicy,
}

impl<V> KeyCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(policy: CachePolicy) -> Self {
        KeyCache {
            entries: DashMap::new(),
            refreshers: DashMap::new(),
            flights: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn register(&self, name: &str, refresher: Arc<dyn Refresher<V>>) {
        self.refreshers.insert(name.to_string(), refresher);
    }

    /// Pure read: the live value, if any.
    pub fn get(&self, name: &str) -> Option<V> {
        match self.live(name) {
            Some(Ok(value)) => Some(value),
            _ => None,
        }
    }

    /// Like [`KeyCache::get`] but tells a miss apart from a cached failure.
    pub fn lookup(&self, name: &str) -> Result<V, CacheError> {
        self.live(name)
            .unwrap_or_else(|| Err(CacheError::NotInCache(name.to_string())))
    }

    /// Insert or replace; `None` uses the default TTL.
    pub fn set(&self, name: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.policy.default_ttl);
        self.entries.insert(
            name.to_string(),
            Entry {
                value: Some(value),
                error: None,
                expires_at: Instant::now() + ttl,
                stale_since: None,
            },
        );
    }

    pub fn remove(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn flush(&self) {
        self.entries.clear();
        self.flights.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Time left before `name` expires.
    pub fn remaining_ttl(&self, name: &str) -> Option<Duration> {
        let entry = self.entries.get(name)?;
        Some(entry.expires_at.saturating_duration_since(Instant::now()))
    }

    /// Refresh a registered name unless another caller already did.
    pub async fn refresh(&self, name: &str) -> Result<V, CacheError> {
        let refresher = self
            .refreshers
            .get(name)
            .map(|r| r.value().clone())
            .ok_or_else(|| CacheError::NotInCache(name.to_string()))?;
        let ttl = self.policy.default_ttl;

        self.get_or_load(name, || async move {
            refresher.refresh(name).await.map(|value| (value, ttl))
        })
        .await
    }

    /// Serve a live entry, or run `load` (single-flight) and cache its result
    /// for the TTL it returns. A failed load is cached as a failure.
    pub async fn get_or_load<F, Fut>(&self, name: &str, load: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<(V, Duration)>>,
    {
        if let Some(found) = self.live(name) {
            return found;
        }

        let flight = self
            .flights
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = flight.lock().await;

        // Whoever held the flight before us may have filled the entry.
        if let Some(found) = self.live(name) {
            return found;
        }

        let outcome = match tokio::time::timeout(self.policy.fetch_timeout, load()).await {
            Ok(Ok(loaded)) => Ok(loaded),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "timed out after {}ms",
                self.policy.fetch_timeout.as_millis()
            )),
        };

        match outcome {
            Ok((value, ttl)) => {
                debug!(name, ttl_secs = ttl.as_secs(), "cache entry refreshed");
                self.set(name, value.clone(), Some(ttl));
                Ok(value)
            }
            Err(reason) => {
                warn!(name, %reason, "cache refresh failed");
                self.reinstate_failed(name, reason.clone());
                match self.live(name) {
                    Some(Ok(stale)) => Ok(stale),
                    _ => Err(CacheError::RefreshFailed {
                        name: name.to_string(),
                        reason,
                    }),
                }
            }
        }
    }

    /// Refresh every expired registered name and every registered name that
    /// was never filled; drop expired names nobody refreshes.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_live(now))
            .map(|e| e.key().clone())
            .collect();

        let mut due: Vec<String> = Vec::new();
        for name in expired {
            if self.refreshers.contains_key(&name) {
                due.push(name);
            } else {
                self.entries.remove_if(&name, |_, e| !e.is_live(now));
                self.flights
                    .remove_if(&name, |_, flight| Arc::strong_count(flight) == 1);
            }
        }
        for r in self.refreshers.iter() {
            if !self.entries.contains_key(r.key()) && !due.contains(r.key()) {
                due.push(r.key().clone());
            }
        }

        if due.is_empty() {
            return;
        }
        debug!(count = due.len(), "refreshing expired cache entries");
        join_all(due.iter().map(|name| self.refresh(name))).await;
    }

    /// Run [`KeyCache::sweep`] every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => cache.sweep().await,
                }
            }
            debug!("key cache sweeper stopped");
        })
    }

    fn live(&self, name: &str) -> Option<Result<V, CacheError>> {
        let entry = self.entries.get(name)?;
        if !entry.is_live(Instant::now()) {
            return None;
        }
        match (&entry.value, &entry.error) {
            (Some(value), _) => Some(Ok(value.clone())),
            (None, error) => Some(Err(CacheError::RefreshFailed {
                name: name.to_string(),
                reason: error.clone().unwrap_or_default(),
            })),
        }
    }

    fn reinstate_failed(&self, name: &str, reason: String) {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| Entry {
                value: None,
                error: None,
                expires_at: now,
                stale_since: None,
            });

        let stale_since = entry.stale_since.unwrap_or(now);
        if now.duration_since(stale_since) >= self.policy.max_staleness {
            entry.value = None;
        }
        entry.error = Some(reason);
        entry.stale_since = Some(stale_since);
        entry.expires_at = now + self.policy.retry_ttl;
    }
}
