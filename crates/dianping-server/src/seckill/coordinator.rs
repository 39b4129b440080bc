use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dianping_core::keys::{CACHE_VOUCHER_KEY, seckill_order_key, seckill_stock_key};
use dianping_core::{Clock, RequestContext, SeckillVoucher, VoucherOrder};
use dianping_kv::DynKvStore;
use dianping_storage::VoucherStore;

use super::script::{SECKILL_SCRIPT, ScriptVerdict};
use super::{OrderPersister, OrderQueue, PersistOutcome, PurchaseState, Rejection, SeckillError, SeckillOutcome};
use crate::cache::{CacheClient, Lookup};
use crate::id::IdGenerator;
use crate::metrics;

/// Id generator prefix of voucher orders.
pub const ORDER_ID_PREFIX: &str = "order";

#[derive(Clone, Debug)]
enum Dispatch {
    Synchronous,
    Queued(OrderQueue),
}

/// Entry point for purchase requests. Cloning is cheap; every clone shares
/// the same queue in queued mode.
#[derive(Clone)]
pub struct SeckillCoordinator {
    kv: DynKvStore,
    vouchers: Arc<dyn VoucherStore>,
    cache: CacheClient,
    ids: IdGenerator,
    clock: Arc<dyn Clock>,
    persister: OrderPersister,
    dispatch: Dispatch,
    voucher_cache_ttl: Duration,
}

impl SeckillCoordinator {
    /// Coordinator that persists orders inline.
    pub fn synchronous(
        kv: DynKvStore,
        vouchers: Arc<dyn VoucherStore>,
        cache: CacheClient,
        ids: IdGenerator,
        clock: Arc<dyn Clock>,
        persister: OrderPersister,
    ) -> Self {
        Self {
            kv,
            vouchers,
            cache,
            ids,
            clock,
            persister,
            dispatch: Dispatch::Synchronous,
            voucher_cache_ttl: Duration::from_secs(300),
        }
    }

    /// Switches to queued mode: accepted orders go to `queue`.
    pub fn with_queue(mut self, queue: OrderQueue) -> Self {
        self.dispatch = Dispatch::Queued(queue);
        self
    }

    pub fn with_voucher_cache_ttl(mut self, ttl: Duration) -> Self {
        self.voucher_cache_ttl = ttl;
        self
    }

    pub fn persister(&self) -> &OrderPersister {
        &self.persister
    }

    /// Tries to buy one unit of `voucher_id` for `ctx.user_id`.
    ///
    /// Expected negatives (unknown voucher, outside the sale window, no
    /// stock, repeat buyer, order not persisted) are `Ok` outcomes. Only
    /// infrastructure failures are `Err`.
    pub async fn seckill_voucher(
        &self,
        ctx: &RequestContext,
        voucher_id: i64,
    ) -> Result<SeckillOutcome, SeckillError> {
        let outcome = self.run(ctx, voucher_id).await?;
        metrics::record_seckill_outcome(outcome.label());
        tracing::debug!(
            request_id = %ctx.request_id,
            user_id = ctx.user_id,
            voucher_id,
            state = ?outcome.state(),
            order_id = ?outcome.order_id(),
            "seckill request finished"
        );
        Ok(outcome)
    }

    async fn run(&self, ctx: &RequestContext, voucher_id: i64) -> Result<SeckillOutcome, SeckillError> {
        let Some(voucher) = self.voucher(voucher_id).await? else {
            return Ok(SeckillOutcome::Rejected(Rejection::VoucherNotFound));
        };
        let now = self.clock.now();
        if !voucher.has_started(now) {
            return Ok(SeckillOutcome::Rejected(Rejection::NotStarted));
        }
        if voucher.has_ended(now) {
            return Ok(SeckillOutcome::Rejected(Rejection::Ended));
        }

        tracing::trace!(user_id = ctx.user_id, voucher_id, state = ?PurchaseState::Checking, "running admission script");
        let keys = [seckill_stock_key(voucher_id), seckill_order_key(voucher_id)];
        let args = [ctx.user_id.to_string()];
        let code = self.kv.eval(&SECKILL_SCRIPT, &keys, &args).await?;
        match ScriptVerdict::try_from(code)? {
            ScriptVerdict::Proceed => {}
            ScriptVerdict::InsufficientStock => {
                return Ok(SeckillOutcome::Rejected(Rejection::InsufficientStock));
            }
            ScriptVerdict::DuplicatePurchase => {
                return Ok(SeckillOutcome::Rejected(Rejection::DuplicatePurchase));
            }
        }

        let raw_id = self.ids.next_id(ORDER_ID_PREFIX).await?;
        let order_id = i64::try_from(raw_id).map_err(|_| SeckillError::OrderIdOutOfRange(raw_id))?;
        let order = VoucherOrder {
            id: order_id,
            user_id: ctx.user_id,
            voucher_id,
            created_at: now,
        };

        match &self.dispatch {
            Dispatch::Synchronous => match self.persister.persist(&order).await? {
                PersistOutcome::Created => Ok(SeckillOutcome::Created { order_id }),
                PersistOutcome::Failed(reason) => Ok(SeckillOutcome::Failed { order_id, reason }),
            },
            Dispatch::Queued(queue) => {
                queue.submit(order).await?;
                Ok(SeckillOutcome::Accepted { order_id })
            }
        }
    }

    /// Voucher metadata through the mutex-protected cache. The entry is
    /// written on publish, and after an expiry a single request reloads it
    /// while the others wait for the refilled key.
    async fn voucher(&self, voucher_id: i64) -> Result<Option<SeckillVoucher>, SeckillError> {
        let vouchers = self.vouchers.clone();
        let lookup = self
            .cache
            .query_with_mutex(
                CACHE_VOUCHER_KEY,
                voucher_id,
                move |id: i64| {
                    let vouchers = vouchers.clone();
                    async move { vouchers.get_seckill_voucher(id).await }
                },
                self.voucher_cache_ttl,
            )
            .await?;
        Ok(match lookup {
            Lookup::Hit(v) | Lookup::Loaded(v) | Lookup::Stale(v) => Some(v),
            Lookup::Absent | Lookup::Missing => None,
        })
    }

    /// Inserts a voucher into the system of record and publishes its stock to
    /// the substrate.
    pub async fn publish_voucher(&self, voucher: &SeckillVoucher) -> Result<(), SeckillError> {
        self.vouchers.insert_seckill_voucher(voucher).await?;
        self.kv
            .set(&seckill_stock_key(voucher.voucher_id), &voucher.stock.to_string(), None)
            .await?;
        // Overwrites a null marker cached while the voucher did not exist yet.
        self.cache_voucher(voucher).await?;
        tracing::info!(voucher_id = voucher.voucher_id, stock = voucher.stock, "seckill voucher published");
        Ok(())
    }

    /// Copies the system-of-record stock of an existing voucher into the
    /// substrate. Purchase markers are left as they are.
    ///
    /// Returns `false` when the voucher does not exist.
    pub async fn preload_stock(&self, voucher_id: i64) -> Result<bool, SeckillError> {
        let Some(voucher) = self.vouchers.get_seckill_voucher(voucher_id).await? else {
            return Ok(false);
        };
        self.kv
            .set(&seckill_stock_key(voucher_id), &voucher.stock.to_string(), None)
            .await?;
        self.cache_voucher(&voucher).await?;
        tracing::info!(voucher_id, stock = voucher.stock, "seckill stock preloaded");
        Ok(true)
    }

    async fn cache_voucher(&self, voucher: &SeckillVoucher) -> Result<(), SeckillError> {
        let key = format!("{CACHE_VOUCHER_KEY}{}", voucher.voucher_id);
        self.cache.set(&key, voucher, self.voucher_cache_ttl).await?;
        Ok(())
    }
}

impl fmt::Debug for SeckillCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeckillCoordinator")
            .field("dispatch", &self.dispatch)
            .field("voucher_cache_ttl", &self.voucher_cache_ttl)
            .finish()
    }
}
