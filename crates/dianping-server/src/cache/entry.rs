//! Cache entry encodings and lookup results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A value with an application-managed expiry, stored without substrate TTL.
///
/// Readers compare `expire_time` against the clock; the substrate never
/// evicts the entry on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalEntry<T> {
    pub data: T,
    pub expire_time: DateTime<Utc>,
}

impl<T> LogicalEntry<T> {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_time <= now
    }
}

/// Read-through strategy for [`super::CacheClient::get_or_load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// TTL-backed entries; misses load inline and absent ids are remembered
    /// with the null marker.
    #[default]
    PassThrough,
    /// Like `PassThrough`, but only the holder of the rebuild lock loads; the
    /// others back off and re-read.
    Mutex,
    /// Pre-warmed logical entries; expired entries are served stale while one
    /// background task rebuilds them. Never loads inline.
    LogicalExpire,
}

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// Served from the cache.
    Hit(T),
    /// Loaded from the system of record by this call and written back.
    Loaded(T),
    /// Logically expired payload; a rebuild may be running.
    Stale(T),
    /// Confirmed absent upstream.
    Absent,
    /// Key not present under the logical-expiry policy (never warmed).
    Missing,
}

impl<T> Lookup<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Lookup::Hit(v) | Lookup::Loaded(v) | Lookup::Stale(v) => Some(v),
            Lookup::Absent | Lookup::Missing => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Lookup::Hit(v) | Lookup::Loaded(v) | Lookup::Stale(v) => Some(v),
            Lookup::Absent | Lookup::Missing => None,
        }
    }

    pub fn is_found(&self) -> bool {
        self.value().is_some()
    }
}
