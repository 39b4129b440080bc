//! Order creation transaction.

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgTransaction;

use dianping_core::VoucherOrder;
use dianping_storage::{OrderTransaction, StorageError};

use crate::error::{is_unique_violation, storage_error};

/// A PostgreSQL transaction scoped to one order attempt.
///
/// Rolls back on drop if neither `commit` nor `rollback` was called; sqlx
/// issues the `ROLLBACK` when the inner transaction is dropped.
pub struct PostgresTransaction {
    tx: Option<PgTransaction<'static>>,
}

impl PostgresTransaction {
    pub fn new(tx: PgTransaction<'static>) -> Self {
        Self { tx: Some(tx) }
    }

    fn active(&mut self) -> Result<&mut PgTransaction<'static>, StorageError> {
        self.tx.as_mut().ok_or_else(|| {
            StorageError::transaction_error("Transaction already completed (committed or rolled back)")
        })
    }
}

#[async_trait]
impl OrderTransaction for PostgresTransaction {
    async fn has_order(&mut self, user_id: i64, voucher_id: i64) -> Result<bool, StorageError> {
        let tx = self.active()?;
        query_scalar(
            "SELECT EXISTS(SELECT 1 FROM tb_voucher_order WHERE user_id = $1 AND voucher_id = $2)",
        )
        .bind(user_id)
        .bind(voucher_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| storage_error("check existing order", e))
    }

    async fn decrement_stock(&mut self, voucher_id: i64) -> Result<bool, StorageError> {
        let tx = self.active()?;
        let result = query(
            "UPDATE tb_seckill_voucher SET stock = stock - 1, update_time = NOW() \
             WHERE voucher_id = $1 AND stock > 0",
        )
        .bind(voucher_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| storage_error("decrement stock", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_order(&mut self, order: &VoucherOrder) -> Result<(), StorageError> {
        let tx = self.active()?;
        query(
            "INSERT INTO tb_voucher_order (id, user_id, voucher_id, create_time) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.voucher_id)
        .bind(order.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::already_exists(
                    "tb_voucher_order",
                    format!("{}/{}", order.user_id, order.voucher_id),
                )
            } else {
                storage_error("insert voucher order", e)
            }
        })?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await.map_err(|e| {
                StorageError::transaction_error(format!("Failed to commit transaction: {e}"))
            })?;
            tracing::debug!("Order transaction committed");
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.map_err(|e| {
                StorageError::transaction_error(format!("Failed to rollback transaction: {e}"))
            })?;
            tracing::debug!("Order transaction rolled back");
        }
        Ok(())
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::warn!("PostgresTransaction dropped without explicit commit/rollback");
        }
    }
}
