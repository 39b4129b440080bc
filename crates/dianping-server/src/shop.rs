//! Shop detail reads through the cache client, and cache-aware updates.

use std::sync::Arc;
use std::time::Duration;

use dianping_core::Shop;
use dianping_core::keys::CACHE_SHOP_KEY;
use dianping_storage::{ShopStore, StorageError};

use crate::cache::{CacheClient, CacheError, CachePolicy, Lookup};

#[derive(Debug, thiserror::Error)]
pub enum ShopError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("shop id must be positive, got {0}")]
    InvalidId(i64),
}

#[derive(Clone)]
pub struct ShopService {
    store: Arc<dyn ShopStore>,
    cache: CacheClient,
    ttl: Duration,
}

impl ShopService {
    pub fn new(store: Arc<dyn ShopStore>, cache: CacheClient, ttl: Duration) -> Self {
        Self { store, cache, ttl }
    }

    pub async fn query_by_id(&self, id: i64, policy: CachePolicy) -> Result<Lookup<Shop>, ShopError> {
        let store = self.store.clone();
        let loader = move |id: i64| {
            let store = store.clone();
            async move { store.get_shop(id).await }
        };
        Ok(self
            .cache
            .get_or_load(CACHE_SHOP_KEY, id, loader, self.ttl, policy)
            .await?)
    }

    /// Writes the system of record first, then drops the cached entry so the
    /// next read loads the new row.
    ///
    /// Returns `false` when no shop with that id exists.
    pub async fn update_shop(&self, shop: &Shop) -> Result<bool, ShopError> {
        if shop.id <= 0 {
            return Err(ShopError::InvalidId(shop.id));
        }
        if !self.store.update_shop(shop).await? {
            return Ok(false);
        }
        self.cache
            .invalidate(&format!("{CACHE_SHOP_KEY}{}", shop.id))
            .await?;
        Ok(true)
    }

    /// Pre-warms the logical-expiry entry of a shop.
    ///
    /// Returns `false` when no shop with that id exists.
    pub async fn warm_shop(&self, id: i64, logical_ttl: Duration) -> Result<bool, ShopError> {
        let Some(shop) = self.store.get_shop(id).await? else {
            return Ok(false);
        };
        self.cache
            .set_logical(&format!("{CACHE_SHOP_KEY}{id}"), &shop, logical_ttl)
            .await?;
        tracing::debug!(shop_id = id, "shop cache pre-warmed");
        Ok(true)
    }
}
