use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dianping_core::{SeckillVoucher, Shop, VoucherOrder};
use dianping_storage::{OrderTransaction, Result, ShopStore, StorageError, VoucherStore};
use tokio::sync::{Mutex, OwnedMutexGuard};

const VOUCHER_TABLE: &str = "tb_seckill_voucher";
const ORDER_TABLE: &str = "tb_voucher_order";

#[derive(Debug, Default)]
struct State {
    shops: HashMap<i64, Shop>,
    vouchers: HashMap<i64, SeckillVoucher>,
    orders: HashMap<i64, VoucherOrder>,
    /// `(user_id, voucher_id)` -> order id, the uniqueness guard.
    orders_by_buyer: HashMap<(i64, i64), i64>,
}

/// In-memory system of record.
///
/// Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    shop_reads: Arc<AtomicU64>,
    voucher_reads: Arc<AtomicU64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a shop row.
    pub async fn put_shop(&self, shop: Shop) {
        self.state.lock().await.shops.insert(shop.id, shop);
    }

    pub async fn delete_shop(&self, id: i64) -> bool {
        self.state.lock().await.shops.remove(&id).is_some()
    }

    /// Number of `get_shop` calls served so far.
    pub fn shop_reads(&self) -> u64 {
        self.shop_reads.load(Ordering::SeqCst)
    }

    /// Number of `get_seckill_voucher` calls served so far.
    pub fn voucher_reads(&self) -> u64 {
        self.voucher_reads.load(Ordering::SeqCst)
    }

    pub async fn orders(&self, voucher_id: i64) -> Vec<VoucherOrder> {
        let state = self.state.lock().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.voucher_id == voucher_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        orders
    }
}

#[async_trait]
impl ShopStore for InMemoryStore {
    async fn get_shop(&self, id: i64) -> Result<Option<Shop>> {
        self.shop_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().await.shops.get(&id).cloned())
    }

    async fn update_shop(&self, shop: &Shop) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.shops.get_mut(&shop.id) {
            Some(existing) => {
                *existing = shop.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl VoucherStore for InMemoryStore {
    async fn get_seckill_voucher(&self, voucher_id: i64) -> Result<Option<SeckillVoucher>> {
        self.voucher_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().await.vouchers.get(&voucher_id).cloned())
    }

    async fn insert_seckill_voucher(&self, voucher: &SeckillVoucher) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.vouchers.contains_key(&voucher.voucher_id) {
            return Err(StorageError::already_exists(VOUCHER_TABLE, voucher.voucher_id));
        }
        state.vouchers.insert(voucher.voucher_id, voucher.clone());
        Ok(())
    }

    async fn count_orders(&self, voucher_id: i64) -> Result<i64> {
        let state = self.state.lock().await;
        let count = state
            .orders
            .values()
            .filter(|o| o.voucher_id == voucher_id)
            .count();
        Ok(count as i64)
    }

    async fn find_order(&self, user_id: i64, voucher_id: i64) -> Result<Option<VoucherOrder>> {
        let state = self.state.lock().await;
        Ok(state
            .orders_by_buyer
            .get(&(user_id, voucher_id))
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn begin(&self) -> Result<Box<dyn OrderTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(InMemoryTransaction {
            guard: Some(guard),
            undo: Vec::new(),
        }))
    }
}

#[derive(Debug)]
enum Undo {
    RestoreStock(i64),
    RemoveOrder(i64),
}

/// Order transaction over an [`InMemoryStore`].
pub struct InMemoryTransaction {
    guard: Option<OwnedMutexGuard<State>>,
    undo: Vec<Undo>,
}

impl InMemoryTransaction {
    fn state(&mut self) -> Result<&mut State> {
        self.guard
            .as_deref_mut()
            .ok_or_else(|| StorageError::transaction_error("Transaction already completed"))
    }

    fn undo_all(&mut self) {
        let undo = std::mem::take(&mut self.undo);
        let Some(state) = self.guard.as_deref_mut() else {
            return;
        };
        for step in undo.into_iter().rev() {
            match step {
                Undo::RestoreStock(voucher_id) => {
                    if let Some(v) = state.vouchers.get_mut(&voucher_id) {
                        v.stock += 1;
                    }
                }
                Undo::RemoveOrder(order_id) => {
                    if let Some(order) = state.orders.remove(&order_id) {
                        state
                            .orders_by_buyer
                            .remove(&(order.user_id, order.voucher_id));
                    }
                }
            }
        }
    }
}

#[async_trait]
impl OrderTransaction for InMemoryTransaction {
    async fn has_order(&mut self, user_id: i64, voucher_id: i64) -> Result<bool> {
        let state = self.state()?;
        Ok(state.orders_by_buyer.contains_key(&(user_id, voucher_id)))
    }

    async fn decrement_stock(&mut self, voucher_id: i64) -> Result<bool> {
        let state = self.state()?;
        let taken = match state.vouchers.get_mut(&voucher_id) {
            Some(voucher) if voucher.stock > 0 => {
                voucher.stock -= 1;
                true
            }
            _ => false,
        };
        if taken {
            self.undo.push(Undo::RestoreStock(voucher_id));
        }
        Ok(taken)
    }

    async fn insert_order(&mut self, order: &VoucherOrder) -> Result<()> {
        let state = self.state()?;
        let buyer = (order.user_id, order.voucher_id);
        if state.orders_by_buyer.contains_key(&buyer) || state.orders.contains_key(&order.id) {
            return Err(StorageError::already_exists(
                ORDER_TABLE,
                format!("{}/{}", order.user_id, order.voucher_id),
            ));
        }
        state.orders_by_buyer.insert(buyer, order.id);
        state.orders.insert(order.id, order.clone());
        self.undo.push(Undo::RemoveOrder(order.id));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.guard.take().is_none() {
            return Err(StorageError::transaction_error("Transaction already completed"));
        }
        self.undo.clear();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.undo_all();
        self.guard.take();
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if self.guard.is_some() && !self.undo.is_empty() {
            tracing::warn!("InMemoryTransaction dropped without commit/rollback - rolling back");
            self.undo_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};

    fn voucher(id: i64, stock: i32) -> SeckillVoucher {
        let now = Utc::now();
        SeckillVoucher {
            voucher_id: id,
            stock,
            begin_time: now - TimeDelta::hours(1),
            end_time: now + TimeDelta::hours(1),
        }
    }

    fn order(id: i64, user_id: i64, voucher_id: i64) -> VoucherOrder {
        VoucherOrder {
            id,
            user_id,
            voucher_id,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_commit_persists_order_and_stock() {
        let store = InMemoryStore::new();
        store.insert_seckill_voucher(&voucher(1, 2)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(!tx.has_order(7, 1).await.unwrap());
        assert!(tx.decrement_stock(1).await.unwrap());
        tx.insert_order(&order(100, 7, 1)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.get_seckill_voucher(1).await.unwrap().unwrap().stock, 1);
        assert_eq!(store.count_orders(1).await.unwrap(), 1);
        assert_eq!(store.find_order(7, 1).await.unwrap().unwrap().id, 100);
    }

    #[tokio::test]
    async fn test_rollback_restores_state() {
        let store = InMemoryStore::new();
        store.insert_seckill_voucher(&voucher(1, 1)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.decrement_stock(1).await.unwrap());
        tx.insert_order(&order(100, 7, 1)).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.get_seckill_voucher(1).await.unwrap().unwrap().stock, 1);
        assert_eq!(store.count_orders(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drop_without_commit_rolls_back() {
        let store = InMemoryStore::new();
        store.insert_seckill_voucher(&voucher(1, 1)).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            assert!(tx.decrement_stock(1).await.unwrap());
        }

        assert_eq!(store.get_seckill_voucher(1).await.unwrap().unwrap().stock, 1);
    }

    #[tokio::test]
    async fn test_conditional_decrement_stops_at_zero() {
        let store = InMemoryStore::new();
        store.insert_seckill_voucher(&voucher(1, 1)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.decrement_stock(1).await.unwrap());
        assert!(!tx.decrement_stock(1).await.unwrap());
        assert!(!tx.decrement_stock(99).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(store.get_seckill_voucher(1).await.unwrap().unwrap().stock, 0);
    }

    #[tokio::test]
    async fn test_second_order_for_same_buyer_is_rejected() {
        let store = InMemoryStore::new();
        store.insert_seckill_voucher(&voucher(1, 5)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&order(100, 7, 1)).await.unwrap();
        let err = tx.insert_order(&order(101, 7, 1)).await.unwrap_err();
        assert!(err.is_conflict());
        tx.commit().await.unwrap();

        assert_eq!(store.count_orders(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reads_are_counted() {
        let store = InMemoryStore::new();
        assert!(store.get_shop(1).await.unwrap().is_none());
        assert!(store.get_shop(1).await.unwrap().is_none());
        assert_eq!(store.shop_reads(), 2);

        store.insert_seckill_voucher(&voucher(3, 1)).await.unwrap();
        assert!(store.get_seckill_voucher(3).await.unwrap().is_some());
        assert_eq!(store.voucher_reads(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_voucher_rejected() {
        let store = InMemoryStore::new();
        store.insert_seckill_voucher(&voucher(1, 5)).await.unwrap();
        let err = store.insert_seckill_voucher(&voucher(1, 5)).await.unwrap_err();
        assert!(err.is_conflict());
    }
}
