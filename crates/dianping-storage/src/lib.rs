//! # dianping-storage
//!
//! System-of-record abstraction for the dianping coordination layer.
//!
//! This crate defines the traits every relational backend implements. It
//! contains no backend; see `dianping-db-memory` and `dianping-db-postgres`.
//!
//! ## Overview
//!
//! - [`ShopStore`]: shop detail reads and updates.
//! - [`VoucherStore`]: seckill voucher reads and the entry point for order
//!   creation transactions.
//! - [`OrderTransaction`]: the operations the order path runs inside one
//!   database transaction (existence check, conditional stock decrement,
//!   insert).
//! - [`with_transaction`]: explicit transaction boundary taking the unit of
//!   work as a closure.
//!
//! ## Example
//!
//! ```ignore
//! use dianping_storage::{with_transaction, StorageError, VoucherStore};
//!
//! async fn buy(store: &dyn VoucherStore, order: VoucherOrder) -> Result<bool, StorageError> {
//!     with_transaction(store, move |tx| {
//!         Box::pin(async move {
//!             if !tx.decrement_stock(order.voucher_id).await? {
//!                 return Ok(false);
//!             }
//!             tx.insert_order(&order).await?;
//!             Ok(true)
//!         })
//!     })
//!     .await
//! }
//! ```

mod error;
mod traits;
mod transaction;

pub use error::{Result, StorageError};
pub use traits::{OrderTransaction, ShopStore, VoucherStore};
pub use transaction::with_transaction;
