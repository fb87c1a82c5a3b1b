//! TTL response cache with single-flight de-duplication.

use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use core_runtime::config::CacheConfig;
use core_runtime::events::{CoreEvent, EventBus, GatewayEvent};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use super::key::CacheKey;
use super::stats::{CacheMetrics, CacheStats};
use super::store::{CacheStore, MemoryCacheStore};
use crate::context::RequestContext;
use crate::error::{GatewayError, Result};

type FlightOutcome = std::result::Result<Value, GatewayError>;
type InFlight = Arc<Mutex<HashMap<CacheKey, Vec<oneshot::Sender<FlightOutcome>>>>>;

enum Flight {
    Lead(FlightGuard),
    Wait(oneshot::Receiver<FlightOutcome>),
}

/// Cache for idempotent external reads.
///
/// At most one upstream fetch runs per key at a time: concurrent callers for
/// the same key wait on the leader and all observe its single outcome.
/// Successful values are stored with `expires_at = completion + ttl`;
/// failures are handed to every waiter and never cached.
pub struct ResponseCache {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    in_flight: InFlight,
    metrics: CacheMetrics,
    event_bus: Option<EventBus>,
}

impl ResponseCache {
    /// In-memory cache on the system clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryCacheStore::new()), Arc::new(SystemClock))
    }

    pub fn with_store(config: CacheConfig, store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            metrics: CacheMetrics::default(),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Return the cached value for `(namespace, params)` or fetch it.
    ///
    /// `ttl` overrides the configured TTL for the namespace. A hit is
    /// recorded on `ctx`. The fetch closure is only invoked if this caller
    /// ends up leading the flight for the key.
    ///
    /// Every caller, the leader included, receives the value as decoded from
    /// its JSON form.
    #[instrument(skip(self, ctx, params, fetch), fields(request_id = %ctx.request_id()))]
    pub async fn get_or_fetch<T, P, F, Fut, E>(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        params: &P,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        P: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let key = CacheKey::new(namespace, params)?;
        let ttl = ttl.unwrap_or_else(|| self.config.ttl_for(namespace));

        let flight = loop {
            if let Some(value) = self.lookup(&key).await? {
                self.record_hit(ctx, &key);
                return decode(value);
            }

            match self.join_or_lead(&key) {
                Flight::Lead(flight) => break flight,
                Flight::Wait(rx) => match rx.await {
                    Ok(Ok(value)) => {
                        self.metrics.record_coalesced();
                        debug!(key = %key, "Coalesced onto in-flight fetch");
                        return decode(value);
                    }
                    Ok(Err(err)) => return Err(err),
                    Err(_) => {
                        debug!(key = %key, "In-flight leader dropped, retrying");
                        continue;
                    }
                },
            }
        };

        // A previous leader may have stored the value between our lookup and
        // our registration.
        if let Some(value) = self.lookup(&key).await? {
            flight.complete(Ok(value.clone()));
            self.record_hit(ctx, &key);
            return decode(value);
        }

        self.metrics.record_miss();
        self.emit(GatewayEvent::CacheMiss {
            namespace: namespace.to_string(),
        });
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Cache miss, fetching upstream");

        match fetch().await {
            Ok(value) => {
                let json = match serde_json::to_value(&value) {
                    Ok(json) => json,
                    Err(e) => {
                        let err = GatewayError::InvalidParams(format!(
                            "Fetched value is not serializable: {}",
                            e
                        ));
                        flight.complete(Err(err.clone()));
                        return Err(err);
                    }
                };

                let expires_at = expiry(self.clock.now(), ttl);
                if let Err(e) = self.store.put(key.clone(), json.clone(), expires_at).await {
                    // The value is still good for everyone waiting on it.
                    warn!(key = %key, error = %e, "Failed to store fetched value");
                }
                flight.complete(Ok(json.clone()));
                // The leader sees exactly what its waiters and later hits see.
                decode(json)
            }
            Err(e) => {
                let err = GatewayError::Fetch(Arc::new(e));
                let waiters = flight.complete(Err(err.clone()));
                self.metrics.record_failure();
                warn!(key = %key, waiters, error = %err, "Upstream fetch failed");
                self.emit(GatewayEvent::FetchFailed {
                    namespace: namespace.to_string(),
                    message: err.to_string(),
                    waiters,
                });
                Err(err)
            }
        }
    }

    /// Flag `ctx` as served from cache.
    pub fn mark_hit(&self, ctx: &RequestContext) {
        ctx.mark_hit();
    }

    /// Drop the entry for `(namespace, params)`. In-flight fetches are untouched.
    pub async fn invalidate<P: Serialize + ?Sized>(&self, namespace: &str, params: &P) -> Result<bool> {
        let key = CacheKey::new(namespace, params)?;
        self.store.remove(&key).await
    }

    /// Remove expired entries; returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let purged = self.store.purge_expired(self.clock.now()).await?;
        if purged > 0 {
            debug!(purged, "Purged expired cache entries");
        }
        Ok(purged)
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.len().await
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    /// Keys with a fetch currently running.
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    async fn lookup(&self, key: &CacheKey) -> Result<Option<Value>> {
        self.store.get(key, self.clock.now()).await
    }

    fn join_or_lead(&self, key: &CacheKey) -> Flight {
        let mut in_flight = lock(&self.in_flight);
        if let Some(waiters) = in_flight.get_mut(key) {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            return Flight::Wait(rx);
        }

        in_flight.insert(key.clone(), Vec::new());
        Flight::Lead(FlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            key: key.clone(),
            completed: false,
        })
    }

    fn record_hit(&self, ctx: &RequestContext, key: &CacheKey) {
        self.metrics.record_hit();
        ctx.mark_hit();
        debug!(key = %key, "Cache hit");
        self.emit(GatewayEvent::CacheHit {
            namespace: key.namespace().to_string(),
        });
    }

    fn emit(&self, event: GatewayEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Gateway(event));
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight_count())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Leadership of one key's flight. Dropping it without completing (the
/// leader was cancelled) releases waiters so one of them can lead instead.
struct FlightGuard {
    in_flight: InFlight,
    key: CacheKey,
    completed: bool,
}

impl FlightGuard {
    /// Clear the marker and deliver `outcome` to every waiter.
    fn complete(mut self, outcome: FlightOutcome) -> usize {
        self.completed = true;
        let waiters = lock(&self.in_flight).remove(&self.key).unwrap_or_default();
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        count
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.completed {
            // Dropping the senders wakes waiters with a receive error.
            lock(&self.in_flight).remove(&self.key);
        }
    }
}

fn lock(
    in_flight: &InFlight,
) -> MutexGuard<'_, HashMap<CacheKey, Vec<oneshot::Sender<FlightOutcome>>>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| GatewayError::Decode(e.to_string()))
}

fn expiry(completed_at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| completed_at.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
