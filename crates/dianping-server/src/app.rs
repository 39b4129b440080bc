//! Wiring of the coordination layer from configuration.

use std::sync::Arc;

use anyhow::Context;
use dianping_core::{Clock, SystemClock};
use dianping_db_memory::InMemoryStore;
use dianping_db_postgres::PostgresStore;
use dianping_kv::{DynKvStore, create_kv_store};
use dianping_storage::{ShopStore, VoucherStore};
use tokio::task::JoinHandle;

use crate::cache::CacheClient;
use crate::config::{AppConfig, SeckillMode};
use crate::id::IdGenerator;
use crate::lock::DistributedLock;
use crate::seckill::{OrderPersister, OrderQueue, OrderWriter, OrderWriterReport, SeckillCoordinator};
use crate::shop::ShopService;

/// Every service of the coordination layer, sharing one substrate and one
/// system of record.
pub struct Services {
    pub kv: DynKvStore,
    pub lock: DistributedLock,
    pub ids: IdGenerator,
    pub cache: CacheClient,
    pub shops: ShopService,
    pub seckill: SeckillCoordinator,
    /// Present in queued mode. Finishes after `seckill` and all its clones
    /// are dropped.
    pub order_writer: Option<JoinHandle<OrderWriterReport>>,
    postgres: Option<PostgresStore>,
}

impl Services {
    /// Connects the substrate and the system of record named by `config`.
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let kv = create_kv_store(&config.redis)
            .await
            .context("failed to connect to the KV substrate")?;
        tracing::info!(mode = kv.mode(), "KV substrate ready");

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        match &config.postgres {
            Some(pg) => {
                let store = PostgresStore::new(pg)
                    .await
                    .context("failed to connect to PostgreSQL")?;
                let mut services = Self::from_parts(
                    kv,
                    Arc::new(store.clone()),
                    Arc::new(store.clone()),
                    clock,
                    config,
                );
                services.postgres = Some(store);
                Ok(services)
            }
            None => {
                tracing::info!("PostgreSQL not configured, using the in-memory system of record");
                let store = InMemoryStore::new();
                Ok(Self::from_parts(
                    kv,
                    Arc::new(store.clone()),
                    Arc::new(store),
                    clock,
                    config,
                ))
            }
        }
    }

    /// Builds the services over already-connected backends. Spawns the order
    /// writer in queued mode, so it must run inside a Tokio runtime.
    pub fn from_parts(
        kv: DynKvStore,
        shops: Arc<dyn ShopStore>,
        vouchers: Arc<dyn VoucherStore>,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        let lock = DistributedLock::new(kv.clone());
        let ids = IdGenerator::new(kv.clone(), clock.clone());
        let cache = CacheClient::new(kv.clone(), lock.clone(), clock.clone(), config.cache.clone());
        let shops = ShopService::new(shops, cache.clone(), config.cache.default_ttl());

        let persister = OrderPersister::new(
            vouchers.clone(),
            lock.clone(),
            config.seckill.order_lock_lease(),
        );
        let coordinator = SeckillCoordinator::synchronous(
            kv.clone(),
            vouchers,
            cache.clone(),
            ids.clone(),
            clock,
            persister.clone(),
        )
        .with_voucher_cache_ttl(config.seckill.voucher_cache_ttl());

        let (seckill, order_writer) = match config.seckill.mode {
            SeckillMode::Synchronous => (coordinator, None),
            SeckillMode::Queued => {
                let (queue, rx) = OrderQueue::bounded(config.seckill.queue_capacity);
                let writer = OrderWriter::spawn(rx, persister);
                (coordinator.with_queue(queue), Some(writer))
            }
        };

        Self {
            kv,
            lock,
            ids,
            cache,
            shops,
            seckill,
            order_writer,
            postgres: None,
        }
    }

    /// The PostgreSQL store, when one is configured.
    pub fn postgres(&self) -> Option<&PostgresStore> {
        self.postgres.as_ref()
    }

    /// Waits for background rebuilds and, in queued mode, for every queued
    /// order to be written.
    pub async fn shutdown(self) -> Option<OrderWriterReport> {
        let Services {
            cache,
            seckill,
            order_writer,
            ..
        } = self;
        drop(seckill);
        cache.close().await;

        let writer = order_writer?;
        match writer.await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "order writer task failed");
                None
            }
        }
    }
}
