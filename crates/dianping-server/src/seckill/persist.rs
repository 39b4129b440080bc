//! Durable order creation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dianping_core::VoucherOrder;
use dianping_core::keys::order_lock_name;
use dianping_storage::{StorageError, VoucherStore, with_transaction};

use super::{OrderFailure, SeckillError};
use crate::lock::DistributedLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Created,
    Failed(OrderFailure),
}

/// Writes accepted orders under `lock:order:{userId}`, one transaction per
/// order.
///
/// Used inline by the synchronous coordinator and by the queued
/// [`super::OrderWriter`].
#[derive(Clone)]
pub struct OrderPersister {
    vouchers: Arc<dyn VoucherStore>,
    lock: DistributedLock,
    lease: Duration,
}

impl OrderPersister {
    pub fn new(vouchers: Arc<dyn VoucherStore>, lock: DistributedLock, lease: Duration) -> Self {
        Self {
            vouchers,
            lock,
            lease,
        }
    }

    pub async fn persist(&self, order: &VoucherOrder) -> Result<PersistOutcome, SeckillError> {
        let Some(handle) = self
            .lock
            .try_acquire(&order_lock_name(order.user_id), self.lease)
            .await?
        else {
            tracing::debug!(
                user_id = order.user_id,
                voucher_id = order.voucher_id,
                "order lock held by another request of this user"
            );
            return Ok(PersistOutcome::Failed(OrderFailure::LockBusy));
        };

        let result = self.create_in_transaction(order.clone()).await;
        match self.lock.release(handle).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                user_id = order.user_id,
                order_id = order.id,
                "order lock lease expired before the order transaction finished"
            ),
            Err(e) => tracing::warn!(user_id = order.user_id, error = %e, "Failed to release order lock"),
        }
        result
    }

    async fn create_in_transaction(
        &self,
        order: VoucherOrder,
    ) -> Result<PersistOutcome, SeckillError> {
        let result = with_transaction::<_, StorageError, _>(self.vouchers.as_ref(), move |tx| {
            Box::pin(async move {
                if tx.has_order(order.user_id, order.voucher_id).await? {
                    return Ok(PersistOutcome::Failed(OrderFailure::AlreadyOrdered));
                }
                if !tx.decrement_stock(order.voucher_id).await? {
                    return Ok(PersistOutcome::Failed(OrderFailure::StockExhausted));
                }
                // A conflict must roll back the decrement, so it stays an error here.
                tx.insert_order(&order).await?;
                Ok(PersistOutcome::Created)
            })
        })
        .await;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_conflict() => Ok(PersistOutcome::Failed(OrderFailure::Conflict)),
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Debug for OrderPersister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderPersister")
            .field("lock", &self.lock)
            .field("lease", &self.lease)
            .finish()
    }
}
