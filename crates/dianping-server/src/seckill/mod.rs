//! Flash-sale purchase coordination.
//!
//! A purchase moves through
//!
//! ```text
//! ─┬─> INELIGIBLE
//!  └─> CHECKING ─┬─> REJECTED_NO_STOCK
//!                ├─> REJECTED_DUPLICATE
//!                └─> ACCEPTED ─┬─> ORDER_CREATED
//!                              └─> ORDER_FAILED
//! ```
//!
//! INELIGIBLE covers requests turned away before CHECKING: unknown voucher
//! or outside the sale window.
//!
//! CHECKING is a single atomic substrate script ([`SECKILL_SCRIPT`]) that
//! checks stock and the buyer's purchase marker and, only if both pass,
//! reserves a unit and sets the marker. All concurrent decisions for a
//! voucher serialize through it; rejected requests never reach the system of
//! record.
//!
//! An accepted purchase is persisted under the per-user lock
//! `lock:order:{userId}` inside one transaction that re-checks for an
//! existing order and decrements stock with `WHERE stock > 0`. The system of
//! record is authoritative: when it disagrees with the substrate the purchase
//! fails rather than producing a second order.

mod coordinator;
mod persist;
mod queue;
mod script;

use dianping_core::ApiResponse;
use dianping_kv::KvError;
use dianping_storage::StorageError;

use crate::cache::CacheError;
use crate::id::IdError;

pub use coordinator::{ORDER_ID_PREFIX, SeckillCoordinator};
pub use persist::{OrderPersister, PersistOutcome};
pub use queue::{OrderQueue, OrderWriter, OrderWriterReport};
pub use script::{SECKILL_SCRIPT, ScriptVerdict};

#[derive(Debug, thiserror::Error)]
pub enum SeckillError {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Id(#[from] IdError),

    #[error("order id {0} does not fit a signed 64-bit column")]
    OrderIdOutOfRange(u64),

    #[error("order queue is closed")]
    QueueClosed,
}

/// States of one purchase request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseState {
    /// Unknown voucher or outside the sale window; CHECKING never ran.
    Ineligible,
    Checking,
    RejectedNoStock,
    RejectedDuplicate,
    Accepted,
    OrderCreated,
    OrderFailed,
}

/// Why a purchase was turned away before any order id was minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    VoucherNotFound,
    NotStarted,
    Ended,
    InsufficientStock,
    DuplicatePurchase,
}

impl Rejection {
    pub fn message(self) -> &'static str {
        match self {
            Rejection::VoucherNotFound => "Voucher not found",
            Rejection::NotStarted => "Seckill has not started",
            Rejection::Ended => "Seckill has ended",
            Rejection::InsufficientStock => "Insufficient stock",
            Rejection::DuplicatePurchase => "Duplicate purchase",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Rejection::VoucherNotFound => "voucher_not_found",
            Rejection::NotStarted => "not_started",
            Rejection::Ended => "ended",
            Rejection::InsufficientStock => "insufficient_stock",
            Rejection::DuplicatePurchase => "duplicate_purchase",
        }
    }
}

/// Why an accepted purchase did not become an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderFailure {
    /// Another request of the same user holds `lock:order:{userId}`.
    LockBusy,
    /// The system of record already has an order for this user and voucher.
    AlreadyOrdered,
    /// The conditional stock decrement matched no row.
    StockExhausted,
    /// The insert hit the `(user_id, voucher_id)` unique index.
    Conflict,
}

impl OrderFailure {
    pub fn label(self) -> &'static str {
        match self {
            OrderFailure::LockBusy => "lock_busy",
            OrderFailure::AlreadyOrdered => "already_ordered",
            OrderFailure::StockExhausted => "stock_exhausted",
            OrderFailure::Conflict => "conflict",
        }
    }
}

/// Final answer to a purchase request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeckillOutcome {
    /// The order row exists.
    Created { order_id: i64 },
    /// Queued mode: stock reserved, the order is being written in the
    /// background.
    Accepted { order_id: i64 },
    Rejected(Rejection),
    Failed { order_id: i64, reason: OrderFailure },
}

impl SeckillOutcome {
    pub fn state(&self) -> PurchaseState {
        match self {
            SeckillOutcome::Created { .. } => PurchaseState::OrderCreated,
            SeckillOutcome::Accepted { .. } => PurchaseState::Accepted,
            SeckillOutcome::Rejected(Rejection::DuplicatePurchase) => {
                PurchaseState::RejectedDuplicate
            }
            SeckillOutcome::Rejected(Rejection::InsufficientStock) => {
                PurchaseState::RejectedNoStock
            }
            SeckillOutcome::Rejected(
                Rejection::VoucherNotFound | Rejection::NotStarted | Rejection::Ended,
            ) => PurchaseState::Ineligible,
            SeckillOutcome::Failed { .. } => PurchaseState::OrderFailed,
        }
    }

    pub fn order_id(&self) -> Option<i64> {
        match self {
            SeckillOutcome::Created { order_id }
            | SeckillOutcome::Accepted { order_id }
            | SeckillOutcome::Failed { order_id, .. } => Some(*order_id),
            SeckillOutcome::Rejected(_) => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SeckillOutcome::Created { .. } => "created",
            SeckillOutcome::Accepted { .. } => "accepted",
            SeckillOutcome::Rejected(rejection) => rejection.label(),
            SeckillOutcome::Failed { .. } => "order_failed",
        }
    }
}

impl From<SeckillOutcome> for ApiResponse<i64> {
    fn from(outcome: SeckillOutcome) -> Self {
        match outcome {
            SeckillOutcome::Created { order_id } | SeckillOutcome::Accepted { order_id } => {
                ApiResponse::ok(order_id)
            }
            SeckillOutcome::Rejected(rejection) => ApiResponse::fail(rejection.message()),
            SeckillOutcome::Failed { .. } => ApiResponse::fail("Order could not be created"),
        }
    }
}
