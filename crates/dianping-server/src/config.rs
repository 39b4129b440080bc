use std::time::Duration;

use dianping_db_postgres::PostgresConfig;
use dianping_kv::RedisConfig;
use serde::{Deserialize, Serialize};

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Shared KV substrate. Disabled means an in-process store.
    #[serde(default)]
    pub redis: RedisConfig,
    /// System of record. Absent means the in-memory store.
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub seckill: SeckillConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis.enabled {
            if self.redis.url.trim().is_empty() {
                return Err(ConfigError::invalid("redis.url must not be empty"));
            }
            if self.redis.pool_size == 0 {
                return Err(ConfigError::invalid("redis.pool_size must be > 0"));
            }
        }

        if let Some(pg) = &self.postgres {
            if pg.url.trim().is_empty() {
                return Err(ConfigError::invalid("postgres.url must not be empty"));
            }
            if pg.pool_size == 0 {
                return Err(ConfigError::invalid("postgres.pool_size must be > 0"));
            }
        }

        let cache = &self.cache;
        if cache.default_ttl_secs == 0 {
            return Err(ConfigError::invalid("cache.default_ttl_secs must be > 0"));
        }
        if cache.null_ttl_secs == 0 {
            return Err(ConfigError::invalid("cache.null_ttl_secs must be > 0"));
        }
        if cache.rebuild_lock_lease_secs == 0 {
            return Err(ConfigError::invalid(
                "cache.rebuild_lock_lease_secs must be > 0",
            ));
        }
        if cache.rebuild_workers == 0 {
            return Err(ConfigError::invalid("cache.rebuild_workers must be > 0"));
        }
        if cache.mutex_max_attempts == 0 {
            return Err(ConfigError::invalid("cache.mutex_max_attempts must be > 0"));
        }
        if cache.mutex_backoff_ms == 0 || cache.mutex_backoff_ms > cache.mutex_max_backoff_ms {
            return Err(ConfigError::invalid(
                "cache.mutex_backoff_ms must be > 0 and <= cache.mutex_max_backoff_ms",
            ));
        }

        if self.seckill.order_lock_lease_secs == 0 {
            return Err(ConfigError::invalid(
                "seckill.order_lock_lease_secs must be > 0",
            ));
        }
        if self.seckill.queue_capacity == 0 {
            return Err(ConfigError::invalid("seckill.queue_capacity must be > 0"));
        }
        if self.seckill.voucher_cache_ttl_secs == 0 {
            return Err(ConfigError::invalid(
                "seckill.voucher_cache_ttl_secs must be > 0",
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::invalid("logging.level must not be empty"));
        }
        Ok(())
    }
}

/// Read-through cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL of cached values (and logical TTL for pre-warmed entries).
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,
    /// TTL of the null marker; bounds how long an id stays confirmed absent.
    #[serde(default = "default_null_ttl_secs")]
    pub null_ttl_secs: u64,
    #[serde(default = "default_rebuild_lock_lease_secs")]
    pub rebuild_lock_lease_secs: u64,
    /// Concurrent background rebuilds, independent of request concurrency.
    #[serde(default = "default_rebuild_workers")]
    pub rebuild_workers: usize,
    /// Lock attempts a blocking read makes before giving up.
    #[serde(default = "default_mutex_max_attempts")]
    pub mutex_max_attempts: u32,
    #[serde(default = "default_mutex_backoff_ms")]
    pub mutex_backoff_ms: u64,
    #[serde(default = "default_mutex_max_backoff_ms")]
    pub mutex_max_backoff_ms: u64,
}

fn default_cache_ttl_secs() -> u64 {
    30 * 60
}
fn default_null_ttl_secs() -> u64 {
    2 * 60
}
fn default_rebuild_lock_lease_secs() -> u64 {
    10
}
fn default_rebuild_workers() -> usize {
    10
}
fn default_mutex_max_attempts() -> u32 {
    10
}
fn default_mutex_backoff_ms() -> u64 {
    50
}
fn default_mutex_max_backoff_ms() -> u64 {
    800
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_cache_ttl_secs(),
            null_ttl_secs: default_null_ttl_secs(),
            rebuild_lock_lease_secs: default_rebuild_lock_lease_secs(),
            rebuild_workers: default_rebuild_workers(),
            mutex_max_attempts: default_mutex_max_attempts(),
            mutex_backoff_ms: default_mutex_backoff_ms(),
            mutex_max_backoff_ms: default_mutex_max_backoff_ms(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn null_ttl(&self) -> Duration {
        Duration::from_secs(self.null_ttl_secs)
    }

    pub fn rebuild_lock_lease(&self) -> Duration {
        Duration::from_secs(self.rebuild_lock_lease_secs)
    }

    pub fn mutex_backoff(&self) -> Duration {
        Duration::from_millis(self.mutex_backoff_ms)
    }

    pub fn mutex_max_backoff(&self) -> Duration {
        Duration::from_millis(self.mutex_max_backoff_ms)
    }
}

/// How accepted purchases reach the system of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SeckillMode {
    /// Persist inline under the per-user lock and report the final state.
    #[default]
    Synchronous,
    /// Hand the order to the background writer and report it as accepted.
    Queued,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeckillConfig {
    #[serde(default)]
    pub mode: SeckillMode,
    /// Lease of the per-user order lock. Order creation must finish within it.
    #[serde(default = "default_order_lock_lease_secs")]
    pub order_lock_lease_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_voucher_cache_ttl_secs")]
    pub voucher_cache_ttl_secs: u64,
}

fn default_order_lock_lease_secs() -> u64 {
    10
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_voucher_cache_ttl_secs() -> u64 {
    300
}

impl Default for SeckillConfig {
    fn default() -> Self {
        Self {
            mode: SeckillMode::default(),
            order_lock_lease_secs: default_order_lock_lease_secs(),
            queue_capacity: default_queue_capacity(),
            voucher_cache_ttl_secs: default_voucher_cache_ttl_secs(),
        }
    }
}

impl SeckillConfig {
    pub fn order_lock_lease(&self) -> Duration {
        Duration::from_secs(self.order_lock_lease_secs)
    }

    pub fn voucher_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.voucher_cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::{AppConfig, ConfigError};
    use ::config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "dianping.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                } else {
                    return Err(ConfigError::invalid(format!("config file not found: {p}")));
                }
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., DIANPING__REDIS__URL=redis://cache:6379
        builder = builder.add_source(
            Environment::with_prefix("DIANPING")
                .try_parsing(true)
                .separator("__"),
        );
        let merged: AppConfig = builder.build()?.try_deserialize()?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert!(!config.redis.enabled);
        assert!(config.postgres.is_none());
        assert_eq!(config.cache.default_ttl(), Duration::from_secs(1800));
        assert_eq!(config.cache.null_ttl(), Duration::from_secs(120));
        assert_eq!(config.seckill.mode, SeckillMode::Synchronous);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[redis]
enabled = true
url = "redis://cache:6379"

[postgres]
url = "postgres://app:secret@db/dianping"
pool_size = 4

[cache]
null_ttl_secs = 30
mutex_max_attempts = 3

[seckill]
mode = "queued"
queue_capacity = 16
"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let config = loader::load_config(Some(&path)).unwrap();
        assert!(config.redis.enabled);
        assert_eq!(config.redis.url, "redis://cache:6379");
        let pg = config.postgres.unwrap();
        assert_eq!(pg.pool_size, 4);
        assert!(pg.run_migrations);
        assert_eq!(config.cache.null_ttl_secs, 30);
        assert_eq!(config.cache.mutex_max_attempts, 3);
        assert_eq!(config.cache.default_ttl_secs, 1800);
        assert_eq!(config.seckill.mode, SeckillMode::Queued);
        assert_eq!(config.seckill.queue_capacity, 16);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = loader::load_config(Some("/nonexistent/dianping.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.cache.mutex_backoff_ms = 1000;
        config.cache.mutex_max_backoff_ms = 100;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.seckill.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.redis.enabled = true;
        config.redis.url = String::new();
        assert!(config.validate().is_err());
    }
}
