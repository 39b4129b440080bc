//! Read-through cache over the shared KV substrate.
//!
//! ## Policies
//!
//! | Policy | Miss | Confirmed absent | Expired hot key |
//! |--------|------|------------------|-----------------|
//! | [`CachePolicy::PassThrough`] | load inline, write back | null marker, short TTL | every reader loads |
//! | [`CachePolicy::Mutex`] | lock holder loads, others back off and re-read | null marker, short TTL | one loader, readers wait |
//! | [`CachePolicy::LogicalExpire`] | `Missing`, never loads | `Absent` | stale payload now, one background rebuild |
//!
//! ## Trade-off between the breakdown policies
//!
//! The mutex policy always returns fresh data but a reader can wait up to the
//! full backoff schedule (or the loader latency, for the lock holder). The
//! logical-expiry policy answers every read from the substrate without
//! waiting, and serves the previous payload for one rebuild cycle after
//! expiry. It requires keys to be pre-warmed with [`CacheClient::set_logical`].
//!
//! ## Null marker
//!
//! An id the loader reports as absent is remembered as
//! [`NULL_MARKER`] for `cache.null_ttl_secs`, so repeated requests for it do
//! not reach the system of record. The marker is distinct from a missing key.
//!
//! ## Background rebuilds
//!
//! Logical-expiry rebuilds run on tasks tracked by a [`TaskTracker`] and
//! bounded by a semaphore of `cache.rebuild_workers` permits. A stale reader
//! takes a permit before it takes the rebuild lock, so the lock lease only
//! starts once a worker is free. With every worker busy the stale entry is
//! served and no rebuild is scheduled. A failed rebuild is logged and counted,
//! and the stale entry stays in place.

mod entry;

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dianping_core::Clock;
use dianping_core::keys::{NULL_MARKER, rebuild_lock_name};
use dianping_kv::{DynKvStore, KvError};
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;

use crate::config::CacheConfig;
use crate::lock::{DistributedLock, LockHandle};
use crate::metrics;

pub use entry::{CachePolicy, LogicalEntry, Lookup};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("failed to encode cache value for {key}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },

    #[error("corrupt cache entry at {key}: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },

    #[error("loader failed for {key}: {source}")]
    Loader {
        key: String,
        source: Box<dyn StdError + Send + Sync>,
    },

    /// The blocking policy gave up waiting for another rebuild.
    #[error("rebuild lock for {key} still held after {attempts} attempts")]
    LockContention { key: String, attempts: u32 },
}

impl CacheError {
    fn loader<E>(key: &str, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Loader {
            key: key.to_string(),
            source: Box::new(source),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RebuildOutcome {
    Rebuilt,
    Removed,
    Skipped,
}

impl RebuildOutcome {
    fn label(self) -> &'static str {
        match self {
            RebuildOutcome::Rebuilt => "rebuilt",
            RebuildOutcome::Removed => "removed",
            RebuildOutcome::Skipped => "skipped",
        }
    }
}

/// Rebuild lock and worker permit held by one scheduled rebuild.
struct RebuildClaim {
    lock: LockHandle,
    _permit: OwnedSemaphorePermit,
}

struct CacheInner {
    kv: DynKvStore,
    lock: DistributedLock,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    rebuild_workers: u32,
    rebuild_permits: Arc<Semaphore>,
    rebuilds: TaskTracker,
}

/// Cache client shared by every request task. Cloning is cheap.
#[derive(Clone)]
pub struct CacheClient {
    inner: Arc<CacheInner>,
}

impl CacheClient {
    pub fn new(
        kv: DynKvStore,
        lock: DistributedLock,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        let workers = u32::try_from(config.rebuild_workers.max(1)).unwrap_or(u32::MAX);
        Self {
            inner: Arc::new(CacheInner {
                kv,
                lock,
                clock,
                config,
                rebuild_workers: workers,
                rebuild_permits: Arc::new(Semaphore::new(workers as usize)),
                rebuilds: TaskTracker::new(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Writes `value` with a substrate TTL.
    pub async fn set<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let raw = encode(key, value)?;
        self.inner.kv.set(key, &raw, Some(ttl)).await?;
        Ok(())
    }

    /// Writes `value` as a [`LogicalEntry`] expiring `logical_ttl` from now,
    /// with no substrate TTL.
    pub async fn set_logical<T>(
        &self,
        key: &str,
        value: &T,
        logical_ttl: Duration,
    ) -> Result<(), CacheError>
    where
        T: Serialize,
    {
        let entry = LogicalEntry {
            data: value,
            expire_time: deadline(self.inner.clock.now(), logical_ttl),
        };
        let raw = encode(key, &entry)?;
        self.inner.kv.set(key, &raw, None).await?;
        Ok(())
    }

    /// Deletes a cached entry. Returns whether it existed.
    pub async fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.inner.kv.delete(key).await?)
    }

    /// Reads `{key_prefix}{id}` under `policy`, loading through `loader` as
    /// the policy allows.
    ///
    /// `ttl` is the substrate TTL for the TTL-backed policies and the logical
    /// TTL of rebuilt entries for [`CachePolicy::LogicalExpire`].
    pub async fn get_or_load<T, Id, F, Fut, E>(
        &self,
        key_prefix: &str,
        id: Id,
        loader: F,
        ttl: Duration,
        policy: CachePolicy,
    ) -> Result<Lookup<T>, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        Id: fmt::Display + Send + Sync + 'static,
        F: Fn(Id) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        E: StdError + Send + Sync + 'static,
    {
        match policy {
            CachePolicy::PassThrough => {
                self.query_with_pass_through(key_prefix, id, loader, ttl)
                    .await
            }
            CachePolicy::Mutex => self.query_with_mutex(key_prefix, id, loader, ttl).await,
            CachePolicy::LogicalExpire => {
                self.query_with_logical_expire(key_prefix, id, loader, ttl)
                    .await
            }
        }
    }

    /// Penetration-protected read: a miss loads inline, an absent id is
    /// remembered with the null marker.
    pub async fn query_with_pass_through<T, Id, F, Fut, E>(
        &self,
        key_prefix: &str,
        id: Id,
        loader: F,
        ttl: Duration,
    ) -> Result<Lookup<T>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        Id: fmt::Display,
        F: Fn(Id) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let key = format!("{key_prefix}{id}");
        if let Some(found) = self.read_cached(key_prefix, &key).await? {
            return Ok(found);
        }

        metrics::record_cache_miss(key_prefix);
        self.load_and_fill(key_prefix, &key, id, &loader, ttl).await
    }

    /// Breakdown-protected read, blocking variant.
    ///
    /// On a miss only the holder of `lock:{scope}{id}` calls the loader. The
    /// others sleep with doubling backoff (`cache.mutex_backoff_ms` up to
    /// `cache.mutex_max_backoff_ms`) and re-read, for at most
    /// `cache.mutex_max_attempts` lock attempts, then fail with
    /// [`CacheError::LockContention`].
    pub async fn query_with_mutex<T, Id, F, Fut, E>(
        &self,
        key_prefix: &str,
        id: Id,
        loader: F,
        ttl: Duration,
    ) -> Result<Lookup<T>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        Id: fmt::Display,
        F: Fn(Id) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let config = &self.inner.config;
        let key = format!("{key_prefix}{id}");
        let lock_name = rebuild_lock_name(key_prefix, &id.to_string());
        let mut backoff = config.mutex_backoff();

        for attempt in 1..=config.mutex_max_attempts {
            if let Some(found) = self.read_cached(key_prefix, &key).await? {
                return Ok(found);
            }

            if let Some(handle) = self
                .inner
                .lock
                .try_acquire(&lock_name, config.rebuild_lock_lease())
                .await?
            {
                // The previous holder may have filled the key just before releasing.
                let result = match self.read_cached(key_prefix, &key).await {
                    Ok(Some(found)) => Ok(found),
                    Ok(None) => {
                        metrics::record_cache_miss(key_prefix);
                        self.load_and_fill(key_prefix, &key, id, &loader, ttl).await
                    }
                    Err(e) => Err(e),
                };
                self.inner.lock.release_quietly(handle).await;
                return result;
            }

            tracing::debug!(
                key = %key,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "rebuild lock busy, backing off"
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(config.mutex_max_backoff());
        }

        if let Some(found) = self.read_cached(key_prefix, &key).await? {
            return Ok(found);
        }
        Err(CacheError::LockContention {
            key,
            attempts: config.mutex_max_attempts,
        })
    }

    /// Breakdown-protected read, logical-expiry variant. Never waits on the
    /// loader.
    ///
    /// An expired entry is returned as [`Lookup::Stale`]; if this call wins
    /// the rebuild lock it also schedules one background rebuild with
    /// `logical_ttl`.
    pub async fn query_with_logical_expire<T, Id, F, Fut, E>(
        &self,
        key_prefix: &str,
        id: Id,
        loader: F,
        logical_ttl: Duration,
    ) -> Result<Lookup<T>, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        Id: fmt::Display + Send + Sync + 'static,
        F: Fn(Id) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        E: StdError + Send + Sync + 'static,
    {
        let key = format!("{key_prefix}{id}");
        let Some(raw) = self.inner.kv.get(&key).await? else {
            metrics::record_cache_miss(key_prefix);
            return Ok(Lookup::Missing);
        };
        if raw == NULL_MARKER {
            metrics::record_null_hit(key_prefix);
            return Ok(Lookup::Absent);
        }

        let entry: LogicalEntry<T> = decode(&key, &raw)?;
        if !entry.is_expired(self.inner.clock.now()) {
            metrics::record_cache_hit(key_prefix);
            return Ok(Lookup::Hit(entry.data));
        }

        metrics::record_stale_read(key_prefix);
        let Ok(permit) = self.inner.rebuild_permits.clone().try_acquire_owned() else {
            tracing::debug!(key = %key, "rebuild workers busy, serving stale entry");
            return Ok(Lookup::Stale(entry.data));
        };
        let lock_name = rebuild_lock_name(key_prefix, &id.to_string());
        match self
            .inner
            .lock
            .try_acquire(&lock_name, self.inner.config.rebuild_lock_lease())
            .await
        {
            Ok(Some(handle)) => {
                self.spawn_rebuild(
                    key_prefix.to_string(),
                    key,
                    id,
                    loader,
                    logical_ttl,
                    RebuildClaim {
                        lock: handle,
                        _permit: permit,
                    },
                );
            }
            Ok(None) => {
                tracing::debug!(key = %key, "rebuild already in progress, serving stale entry");
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to take rebuild lock, serving stale entry");
            }
        }
        Ok(Lookup::Stale(entry.data))
    }

    /// Waits until every background rebuild scheduled so far has finished.
    ///
    /// Holds all worker permits for an instant, so several tasks may wait at
    /// once. Stale reads arriving meanwhile skip scheduling.
    pub async fn wait_for_rebuilds(&self) {
        let _all = self
            .inner
            .rebuild_permits
            .acquire_many(self.inner.rebuild_workers)
            .await;
    }

    /// Stops tracking new rebuilds and waits for the running ones to exit.
    pub async fn close(&self) {
        let rebuilds = &self.inner.rebuilds;
        rebuilds.close();
        rebuilds.wait().await;
    }

    /// Background rebuilds currently scheduled or running.
    pub fn rebuilds_in_flight(&self) -> usize {
        self.inner.rebuilds.len()
    }

    async fn read_cached<T>(&self, key_prefix: &str, key: &str) -> Result<Option<Lookup<T>>, CacheError>
    where
        T: DeserializeOwned,
    {
        match self.inner.kv.get(key).await? {
            None => Ok(None),
            Some(raw) if raw == NULL_MARKER => {
                metrics::record_null_hit(key_prefix);
                Ok(Some(Lookup::Absent))
            }
            Some(raw) => {
                metrics::record_cache_hit(key_prefix);
                Ok(Some(Lookup::Hit(decode(key, &raw)?)))
            }
        }
    }

    async fn load_and_fill<T, Id, F, Fut, E>(
        &self,
        key_prefix: &str,
        key: &str,
        id: Id,
        loader: &F,
        ttl: Duration,
    ) -> Result<Lookup<T>, CacheError>
    where
        T: Serialize,
        F: Fn(Id) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: StdError + Send + Sync + 'static,
    {
        metrics::record_cache_load(key_prefix);
        let loaded = loader(id).await.map_err(|e| CacheError::loader(key, e))?;
        match loaded {
            Some(value) => {
                self.set(key, &value, ttl).await?;
                Ok(Lookup::Loaded(value))
            }
            None => {
                self.inner
                    .kv
                    .set(key, NULL_MARKER, Some(self.inner.config.null_ttl()))
                    .await?;
                tracing::debug!(key = %key, "absent upstream, null marker written");
                Ok(Lookup::Absent)
            }
        }
    }

    fn spawn_rebuild<T, Id, F, Fut, E>(
        &self,
        key_prefix: String,
        key: String,
        id: Id,
        loader: F,
        logical_ttl: Duration,
        claim: RebuildClaim,
    ) where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        Id: Send + 'static,
        F: Fn(Id) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        E: StdError + Send + Sync + 'static,
    {
        let client = self.clone();
        self.inner.rebuilds.spawn(async move {
            match client
                .rebuild_logical(&key_prefix, &key, id, &loader, logical_ttl)
                .await
            {
                Ok(outcome) => {
                    tracing::debug!(key = %key, outcome = outcome.label(), "logical cache rebuild finished");
                    metrics::record_rebuild(&key_prefix, outcome.label());
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "Background cache rebuild failed");
                    metrics::record_rebuild(&key_prefix, "failed");
                }
            }
            client.inner.lock.release_quietly(claim.lock).await;
        });
    }

    async fn rebuild_logical<T, Id, F, Fut, E>(
        &self,
        key_prefix: &str,
        key: &str,
        id: Id,
        loader: &F,
        logical_ttl: Duration,
    ) -> Result<RebuildOutcome, CacheError>
    where
        T: Serialize,
        F: Fn(Id) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: StdError + Send + Sync + 'static,
    {
        // Another process may have rebuilt the entry after our stale read.
        if let Some(raw) = self.inner.kv.get(key).await?
            && raw != NULL_MARKER
        {
            let current: LogicalEntry<IgnoredAny> = decode(key, &raw)?;
            if !current.is_expired(self.inner.clock.now()) {
                return Ok(RebuildOutcome::Skipped);
            }
        }

        metrics::record_cache_load(key_prefix);
        match loader(id).await.map_err(|e| CacheError::loader(key, e))? {
            Some(value) => {
                self.set_logical(key, &value, logical_ttl).await?;
                Ok(RebuildOutcome::Rebuilt)
            }
            None => {
                self.inner.kv.delete(key).await?;
                Ok(RebuildOutcome::Removed)
            }
        }
    }
}

impl fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheClient")
            .field("mode", &self.inner.kv.mode())
            .field("config", &self.inner.config)
            .field("rebuilds_in_flight", &self.inner.rebuilds.len())
            .finish()
    }
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<String, CacheError> {
    serde_json::to_string(value).map_err(|source| CacheError::Encode {
        key: key.to_string(),
        source,
    })
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, CacheError> {
    serde_json::from_str(raw).map_err(|source| CacheError::Decode {
        key: key.to_string(),
        source,
    })
}

fn deadline(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
