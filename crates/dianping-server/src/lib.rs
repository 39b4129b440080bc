//! # dianping-server
//!
//! The concurrency and caching coordination layer of the dianping service.
//! It sits between application endpoints and two shared stores: the KV
//! substrate (`dianping-kv`) and the system of record (`dianping-storage`).
//!
//! - [`lock`]: distributed lock with owner-checked release
//! - [`id`]: cluster-wide `timestamp << 32 | counter` ids
//! - [`cache`]: read-through cache with penetration and breakdown protection
//! - [`seckill`]: flash-sale purchase coordinator
//! - [`shop`]: shop detail service built on the cache
//! - [`app`]: wiring from [`config::AppConfig`]

pub mod app;
pub mod cache;
pub mod config;
pub mod id;
pub mod lock;
pub mod metrics;
pub mod observability;
pub mod seckill;
pub mod shop;

pub use app::Services;
pub use cache::{CacheClient, CacheError, CachePolicy, LogicalEntry, Lookup};
pub use config::AppConfig;
pub use id::{IdError, IdGenerator, IdParts};
pub use lock::{DistributedLock, LockError, LockHandle};
pub use seckill::{SeckillCoordinator, SeckillError, SeckillOutcome};
pub use shop::{ShopError, ShopService};
