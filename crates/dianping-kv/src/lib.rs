//! Client for the shared KV substrate.
//!
//! ## Backends
//!
//! - **Redis**: shared by every process, the production substrate.
//! - **Local**: a single in-process map with the same semantics, for
//!   single-instance deployments and tests.
//!
//! Both expose the same primitive set through [`KvStore`]: get/set/delete
//! with TTL, atomic increment, set-if-absent with TTL, and atomic execution
//! of a [`KvScript`].
//!
//! A local store gives no mutual exclusion across processes. When Redis is
//! enabled but unreachable, [`create_kv_store`] fails instead of degrading to
//! a local store.

mod config;
mod error;
mod local;
mod redis_store;
mod script;
mod store;

use std::sync::Arc;

pub use config::RedisConfig;
pub use error::{KvError, Result};
pub use local::{LocalData, LocalKvStore};
pub use redis_store::RedisKvStore;
pub use script::{KvScript, LocalScriptFn};
pub use store::KvStore;

/// Shareable handle to a KV substrate.
pub type DynKvStore = Arc<dyn KvStore>;

/// Creates the KV substrate selected by configuration.
///
/// - **Redis disabled**: returns a [`LocalKvStore`].
/// - **Redis enabled**: connects and verifies the connection; errors are
///   returned to the caller.
pub async fn create_kv_store(config: &RedisConfig) -> Result<DynKvStore> {
    if !config.enabled {
        tracing::info!("Redis disabled, using local KV store");
        return Ok(Arc::new(LocalKvStore::new()));
    }

    let store = RedisKvStore::connect(config).await?;
    Ok(Arc::new(store))
}
