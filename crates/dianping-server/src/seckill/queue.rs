//! Queued order persistence.
//!
//! In queued mode the coordinator answers as soon as the admission script has
//! reserved stock, and hands the order to a bounded channel. One
//! [`OrderWriter`] task drains it through the same [`OrderPersister`] path the
//! synchronous mode uses. Orders that fail to persist are logged at `error`
//! and counted; the writer keeps going.

use dianping_core::VoucherOrder;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{OrderPersister, PersistOutcome, SeckillError};
use crate::metrics;

/// Sending half of the order queue.
#[derive(Debug, Clone)]
pub struct OrderQueue {
    tx: mpsc::Sender<VoucherOrder>,
}

impl OrderQueue {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<VoucherOrder>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueues an order, waiting while the queue is full.
    pub async fn submit(&self, order: VoucherOrder) -> Result<(), SeckillError> {
        self.tx
            .send(order)
            .await
            .map_err(|_| SeckillError::QueueClosed)
    }
}

/// Totals of one writer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderWriterReport {
    pub created: u64,
    pub failed: u64,
}

pub struct OrderWriter;

impl OrderWriter {
    /// Spawns the writer. It finishes once every [`OrderQueue`] clone has been
    /// dropped and the queue is drained.
    pub fn spawn(
        mut rx: mpsc::Receiver<VoucherOrder>,
        persister: OrderPersister,
    ) -> JoinHandle<OrderWriterReport> {
        tokio::spawn(async move {
            let mut report = OrderWriterReport::default();
            while let Some(order) = rx.recv().await {
                match persister.persist(&order).await {
                    Ok(PersistOutcome::Created) => {
                        report.created += 1;
                        tracing::debug!(order_id = order.id, user_id = order.user_id, "queued order written");
                    }
                    Ok(PersistOutcome::Failed(reason)) => {
                        report.failed += 1;
                        metrics::record_order_write_failure(reason.label());
                        tracing::error!(
                            order_id = order.id,
                            user_id = order.user_id,
                            voucher_id = order.voucher_id,
                            reason = reason.label(),
                            "Queued order rejected by the system of record"
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        metrics::record_order_write_failure("error");
                        tracing::error!(
                            order_id = order.id,
                            user_id = order.user_id,
                            voucher_id = order.voucher_id,
                            error = %e,
                            "Failed to write queued order"
                        );
                    }
                }
            }
            tracing::info!(created = report.created, failed = report.failed, "order writer stopped");
            report
        })
    }
}
