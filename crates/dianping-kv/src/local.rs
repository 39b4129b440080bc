//! In-process KV store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{KvError, Result};
use crate::script::KvScript;
use crate::store::KvStore;

#[derive(Debug, Clone)]
enum LocalValue {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct LocalEntry {
    value: LocalValue,
    expires_at: Option<Instant>,
}

impl LocalEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Key space of a [`LocalKvStore`].
///
/// Exposed so that [`KvScript`] local renditions can operate on it while the
/// store's lock is held. Expired entries are dropped lazily on access.
#[derive(Debug, Default)]
pub struct LocalData {
    entries: HashMap<String, LocalEntry>,
}

impl LocalData {
    fn live(&mut self, key: &str) -> Option<&mut LocalEntry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    pub fn exists(&mut self, key: &str) -> bool {
        self.live(key).is_some()
    }

    pub fn get(&mut self, key: &str) -> Result<Option<String>> {
        match self.live(key) {
            None => Ok(None),
            Some(LocalEntry {
                value: LocalValue::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(KvError::wrong_type(key, "string")),
        }
    }

    pub fn set(&mut self, key: &str, value: String, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(
            key.to_string(),
            LocalEntry {
                value: LocalValue::Str(value),
                expires_at,
            },
        );
    }

    pub fn delete(&mut self, key: &str) -> bool {
        let existed = self.exists(key);
        self.entries.remove(key);
        existed
    }

    /// Adds `delta` to the integer at `key`, keeping any TTL.
    pub fn incr_by(&mut self, key: &str, delta: i64) -> Result<i64> {
        let Some(entry) = self.live(key) else {
            self.set(key, delta.to_string(), None);
            return Ok(delta);
        };
        let LocalValue::Str(current) = &mut entry.value else {
            return Err(KvError::wrong_type(key, "integer"));
        };
        let next = current
            .parse::<i64>()
            .ok()
            .and_then(|n| n.checked_add(delta))
            .ok_or_else(|| KvError::wrong_type(key, "integer"))?;
        *current = next.to_string();
        Ok(next)
    }

    /// Adds `member` to the set at `key`. Returns whether it was new.
    pub fn set_add(&mut self, key: &str, member: &str) -> Result<bool> {
        let Some(entry) = self.live(key) else {
            self.entries.insert(
                key.to_string(),
                LocalEntry {
                    value: LocalValue::Set(HashSet::from([member.to_string()])),
                    expires_at: None,
                },
            );
            return Ok(true);
        };
        match &mut entry.value {
            LocalValue::Set(members) => Ok(members.insert(member.to_string())),
            LocalValue::Str(_) => Err(KvError::wrong_type(key, "set")),
        }
    }

    pub fn set_contains(&mut self, key: &str, member: &str) -> Result<bool> {
        match self.live(key) {
            None => Ok(false),
            Some(LocalEntry {
                value: LocalValue::Set(members),
                ..
            }) => Ok(members.contains(member)),
            Some(_) => Err(KvError::wrong_type(key, "set")),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// KV store living in this process.
///
/// One mutex guards the whole key space, which makes every operation and
/// every script atomic with respect to each other. Clones share the data.
#[derive(Debug, Clone, Default)]
pub struct LocalKvStore {
    data: Arc<Mutex<LocalData>>,
}

impl LocalKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with exclusive access to the key space.
    pub fn with_data<R>(&self, f: impl FnOnce(&mut LocalData) -> R) -> R {
        f(&mut self.data.lock())
    }
}

#[async_trait]
impl KvStore for LocalKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.data.lock().get(key)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.data.lock().set(key, value.to_string(), ttl);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut data = self.data.lock();
        if data.exists(key) {
            return Ok(false);
        }
        data.set(key, value.to_string(), Some(ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.data.lock().delete(key))
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.data.lock().incr_by(key, 1)
    }

    async fn eval(&self, script: &KvScript, keys: &[String], args: &[String]) -> Result<i64> {
        let mut data = self.data.lock();
        script.run_local(&mut data, keys, args)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn mode(&self) -> &'static str {
        "local"
    }
}
