//! The KV substrate contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::script::KvScript;

/// Primitive operations of the shared KV substrate.
///
/// Every operation is atomic on its own. [`KvStore::eval`] runs a whole
/// script atomically relative to every other operation on the substrate.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Reads a string value. `None` means the key is not present.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a string value, replacing any previous value and TTL.
    /// `ttl = None` stores the value without expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Writes `value` with `ttl` only if `key` is not present.
    /// Returns whether the value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Deletes a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically increments the integer at `key` (missing counts as 0) and
    /// returns the new value.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Executes `script` atomically with the given keys and arguments.
    async fn eval(&self, script: &KvScript, keys: &[String], args: &[String]) -> Result<i64>;

    /// Round-trips to the substrate (health checks).
    async fn ping(&self) -> Result<()>;

    /// Short backend name for logs and health output.
    fn mode(&self) -> &'static str;
}
