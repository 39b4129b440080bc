//! PostgreSQL implementations of the system-of-record traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx_core::query::query;
use sqlx_core::query_scalar::query_scalar;
use sqlx_core::row::Row;
use sqlx_postgres::{PgPool, PgRow};
use tracing::{debug, instrument};

use dianping_core::{SeckillVoucher, Shop, VoucherOrder};
use dianping_storage::{OrderTransaction, ShopStore, StorageError, VoucherStore};

use crate::config::PostgresConfig;
use crate::error::{is_unique_violation, storage_error, Result as PgResult};
use crate::migrations;
use crate::pool::create_pool;
use crate::transaction::PostgresTransaction;

const SHOP_COLUMNS: &str = "id, name, type_id, images, area, address, x, y, avg_price, \
                            sold, comments, score, open_hours";

/// Shops, seckill vouchers and voucher orders stored in PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects to PostgreSQL and, when configured, applies pending migrations.
    pub async fn new(config: &PostgresConfig) -> PgResult<Self> {
        let pool = create_pool(config).await?;
        if config.run_migrations {
            migrations::run(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Wraps an existing pool. Migrations are the caller's concern.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn shop_from_row(row: &PgRow) -> Result<Shop, sqlx_core::error::Error> {
    Ok(Shop {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        type_id: row.try_get("type_id")?,
        images: row.try_get("images")?,
        area: row.try_get("area")?,
        address: row.try_get("address")?,
        x: row.try_get("x")?,
        y: row.try_get("y")?,
        avg_price: row.try_get("avg_price")?,
        sold: row.try_get("sold")?,
        comments: row.try_get("comments")?,
        score: row.try_get("score")?,
        open_hours: row.try_get("open_hours")?,
    })
}

fn voucher_from_row(row: &PgRow) -> Result<SeckillVoucher, sqlx_core::error::Error> {
    Ok(SeckillVoucher {
        voucher_id: row.try_get("voucher_id")?,
        stock: row.try_get("stock")?,
        begin_time: row.try_get::<DateTime<Utc>, _>("begin_time")?,
        end_time: row.try_get::<DateTime<Utc>, _>("end_time")?,
    })
}

fn order_from_row(row: &PgRow) -> Result<VoucherOrder, sqlx_core::error::Error> {
    Ok(VoucherOrder {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        voucher_id: row.try_get("voucher_id")?,
        created_at: row.try_get::<DateTime<Utc>, _>("create_time")?,
    })
}

#[async_trait]
impl ShopStore for PostgresStore {
    #[instrument(skip(self))]
    async fn get_shop(&self, id: i64) -> Result<Option<Shop>, StorageError> {
        let sql = format!("SELECT {SHOP_COLUMNS} FROM tb_shop WHERE id = $1");
        let row = query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("select shop", e))?;

        row.as_ref()
            .map(shop_from_row)
            .transpose()
            .map_err(|e| storage_error("decode shop", e))
    }

    #[instrument(skip(self, shop), fields(shop_id = shop.id))]
    async fn update_shop(&self, shop: &Shop) -> Result<bool, StorageError> {
        let result = query(
            "UPDATE tb_shop SET name = $2, type_id = $3, images = $4, area = $5, address = $6, \
             x = $7, y = $8, avg_price = $9, sold = $10, comments = $11, score = $12, \
             open_hours = $13, update_time = NOW() WHERE id = $1",
        )
        .bind(shop.id)
        .bind(&shop.name)
        .bind(shop.type_id)
        .bind(&shop.images)
        .bind(&shop.area)
        .bind(&shop.address)
        .bind(shop.x)
        .bind(shop.y)
        .bind(shop.avg_price)
        .bind(shop.sold)
        .bind(shop.comments)
        .bind(shop.score)
        .bind(&shop.open_hours)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("update shop", e))?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl VoucherStore for PostgresStore {
    #[instrument(skip(self))]
    async fn get_seckill_voucher(
        &self,
        voucher_id: i64,
    ) -> Result<Option<SeckillVoucher>, StorageError> {
        let row = query(
            "SELECT voucher_id, stock, begin_time, end_time FROM tb_seckill_voucher \
             WHERE voucher_id = $1",
        )
        .bind(voucher_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("select seckill voucher", e))?;

        row.as_ref()
            .map(voucher_from_row)
            .transpose()
            .map_err(|e| storage_error("decode seckill voucher", e))
    }

    #[instrument(skip(self, voucher), fields(voucher_id = voucher.voucher_id))]
    async fn insert_seckill_voucher(&self, voucher: &SeckillVoucher) -> Result<(), StorageError> {
        query(
            "INSERT INTO tb_seckill_voucher (voucher_id, stock, begin_time, end_time) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(voucher.voucher_id)
        .bind(voucher.stock)
        .bind(voucher.begin_time)
        .bind(voucher.end_time)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::already_exists("tb_seckill_voucher", voucher.voucher_id)
            } else {
                storage_error("insert seckill voucher", e)
            }
        })?;

        debug!(voucher_id = voucher.voucher_id, stock = voucher.stock, "Seckill voucher inserted");
        Ok(())
    }

    async fn count_orders(&self, voucher_id: i64) -> Result<i64, StorageError> {
        query_scalar("SELECT COUNT(*) FROM tb_voucher_order WHERE voucher_id = $1")
            .bind(voucher_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error("count voucher orders", e))
    }

    async fn find_order(
        &self,
        user_id: i64,
        voucher_id: i64,
    ) -> Result<Option<VoucherOrder>, StorageError> {
        let row = query(
            "SELECT id, user_id, voucher_id, create_time FROM tb_voucher_order \
             WHERE user_id = $1 AND voucher_id = $2",
        )
        .bind(user_id)
        .bind(voucher_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("select voucher order", e))?;

        row.as_ref()
            .map(order_from_row)
            .transpose()
            .map_err(|e| storage_error("decode voucher order", e))
    }

    async fn begin(&self) -> Result<Box<dyn OrderTransaction>, StorageError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("begin transaction", e))?;
        Ok(Box::new(PostgresTransaction::new(tx)))
    }
}
