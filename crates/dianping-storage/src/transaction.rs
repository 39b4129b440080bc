//! Explicit transaction boundary.

use futures_util::future::BoxFuture;

use crate::error::StorageError;
use crate::traits::{OrderTransaction, VoucherStore};

/// Runs `work` inside one order transaction.
///
/// The transaction commits when `work` returns `Ok` and rolls back when it
/// returns `Err`. Business outcomes that must not persist anything (an order
/// that already exists, stock already gone) should be returned as `Ok`
/// values; nothing has been written at that point, so committing is a
/// no-op.
pub async fn with_transaction<R, E, F>(store: &dyn VoucherStore, work: F) -> Result<R, E>
where
    F: for<'t> FnOnce(&'t mut (dyn OrderTransaction + 'static)) -> BoxFuture<'t, Result<R, E>>
        + Send,
    E: From<StorageError>,
{
    let mut tx = store.begin().await?;

    match work(tx.as_mut()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Failed to roll back order transaction");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use dianping_core::{SeckillVoucher, VoucherOrder};
    use parking_lot::Mutex;

    use super::*;
    use crate::error::Result;

    #[derive(Default)]
    struct Journal {
        inserted: Vec<i64>,
        committed: usize,
        rolled_back: usize,
    }

    struct JournalStore(Arc<Mutex<Journal>>);

    struct JournalTx(Arc<Mutex<Journal>>, Vec<i64>);

    #[async_trait]
    impl VoucherStore for JournalStore {
        async fn get_seckill_voucher(&self, _voucher_id: i64) -> Result<Option<SeckillVoucher>> {
            Ok(None)
        }

        async fn insert_seckill_voucher(&self, _voucher: &SeckillVoucher) -> Result<()> {
            Ok(())
        }

        async fn count_orders(&self, _voucher_id: i64) -> Result<i64> {
            Ok(self.0.lock().inserted.len() as i64)
        }

        async fn find_order(&self, _user_id: i64, _voucher_id: i64) -> Result<Option<VoucherOrder>> {
            Ok(None)
        }

        async fn begin(&self) -> Result<Box<dyn OrderTransaction>> {
            Ok(Box::new(JournalTx(self.0.clone(), Vec::new())))
        }
    }

    #[async_trait]
    impl OrderTransaction for JournalTx {
        async fn has_order(&mut self, _user_id: i64, _voucher_id: i64) -> Result<bool> {
            Ok(false)
        }

        async fn decrement_stock(&mut self, _voucher_id: i64) -> Result<bool> {
            Ok(true)
        }

        async fn insert_order(&mut self, order: &VoucherOrder) -> Result<()> {
            self.1.push(order.id);
            Ok(())
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            let mut journal = self.0.lock();
            journal.inserted.extend(self.1.iter().copied());
            journal.committed += 1;
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            self.0.lock().rolled_back += 1;
            Ok(())
        }
    }

    fn order(id: i64) -> VoucherOrder {
        VoucherOrder {
            id,
            user_id: 1,
            voucher_id: 2,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_commits_on_ok() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let store = JournalStore(journal.clone());

        let created = order(10);
        let result: Result<i64> = with_transaction(&store, move |tx| {
            Box::pin(async move {
                tx.insert_order(&created).await?;
                Ok(created.id)
            })
        })
        .await;

        assert_eq!(result.unwrap(), 10);
        let journal = journal.lock();
        assert_eq!(journal.inserted, vec![10]);
        assert_eq!(journal.committed, 1);
        assert_eq!(journal.rolled_back, 0);
    }

    #[tokio::test]
    async fn test_rolls_back_on_err() {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let store = JournalStore(journal.clone());

        let created = order(11);
        let result: Result<()> = with_transaction(&store, move |tx| {
            Box::pin(async move {
                tx.insert_order(&created).await?;
                Err(StorageError::internal("insert rejected downstream"))
            })
        })
        .await;

        assert!(result.is_err());
        let journal = journal.lock();
        assert!(journal.inserted.is_empty());
        assert_eq!(journal.committed, 0);
        assert_eq!(journal.rolled_back, 1);
    }
}
