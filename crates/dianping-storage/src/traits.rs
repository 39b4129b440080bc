//! System-of-record traits.

use async_trait::async_trait;
use dianping_core::{SeckillVoucher, Shop, VoucherOrder};

use crate::error::Result;

/// Shop detail persistence.
#[async_trait]
pub trait ShopStore: Send + Sync {
    /// Reads a shop by id. `None` when no such shop exists.
    async fn get_shop(&self, id: i64) -> Result<Option<Shop>>;

    /// Overwrites a shop. Returns whether a row was updated.
    async fn update_shop(&self, shop: &Shop) -> Result<bool>;
}

/// Seckill voucher persistence and order transactions.
#[async_trait]
pub trait VoucherStore: Send + Sync {
    async fn get_seckill_voucher(&self, voucher_id: i64) -> Result<Option<SeckillVoucher>>;

    /// Inserts a new seckill voucher. Fails with `AlreadyExists` when the id
    /// is taken.
    async fn insert_seckill_voucher(&self, voucher: &SeckillVoucher) -> Result<()>;

    /// Number of orders placed for a voucher.
    async fn count_orders(&self, voucher_id: i64) -> Result<i64>;

    async fn find_order(&self, user_id: i64, voucher_id: i64) -> Result<Option<VoucherOrder>>;

    /// Begins a transaction for the order creation path.
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>>;
}

/// Operations of the order creation path, all inside one transaction.
///
/// Dropping a transaction without calling [`OrderTransaction::commit`] rolls
/// it back.
#[async_trait]
pub trait OrderTransaction: Send {
    /// Whether an order already exists for `(user_id, voucher_id)`.
    async fn has_order(&mut self, user_id: i64, voucher_id: i64) -> Result<bool>;

    /// `stock = stock - 1 WHERE voucher_id = ? AND stock > 0`.
    /// Returns whether a unit of stock was taken.
    async fn decrement_stock(&mut self, voucher_id: i64) -> Result<bool>;

    /// Inserts the order row. A second order for the same
    /// `(user_id, voucher_id)` fails with `AlreadyExists`.
    async fn insert_order(&mut self, order: &VoucherOrder) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
