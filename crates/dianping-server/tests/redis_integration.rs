//! End-to-end runs against a real Redis substrate.
//!
//! Run with `cargo test -p dianping-server -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use dianping_core::keys::seckill_stock_key;
use dianping_core::{RequestContext, SeckillVoucher, SystemClock};
use dianping_db_memory::InMemoryStore;
use dianping_kv::{DynKvStore, KvStore, RedisConfig, RedisKvStore};
use dianping_server::seckill::PurchaseState;
use dianping_server::{AppConfig, DistributedLock, Services};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn redis_kv() -> DynKvStore {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            (container, format!("redis://127.0.0.1:{host_port}"))
        })
        .await;
    let config = RedisConfig {
        enabled: true,
        url: url.clone(),
        pool_size: 16,
        timeout_ms: 5000,
    };
    Arc::new(RedisKvStore::connect(&config).await.expect("connect redis"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore = "requires Docker"]
async fn test_redis_seckill_never_oversells() {
    let kv = redis_kv().await;
    let store = InMemoryStore::new();
    let services = Services::from_parts(
        kv.clone(),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(SystemClock),
        &AppConfig::default(),
    );
    let now = Utc::now();
    let voucher = SeckillVoucher {
        voucher_id: 9_001,
        stock: 15,
        begin_time: now - TimeDelta::minutes(5),
        end_time: now + TimeDelta::minutes(5),
    };
    services.seckill.publish_voucher(&voucher).await.unwrap();

    let mut handles = Vec::new();
    for user_id in (1..=100).chain(1..=20) {
        let seckill = services.seckill.clone();
        handles.push(tokio::spawn(async move {
            seckill
                .seckill_voucher(&RequestContext::for_user(user_id), 9_001)
                .await
                .unwrap()
        }));
    }
    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().state() == PurchaseState::OrderCreated {
            created += 1;
        }
    }

    assert_eq!(created, 15);
    assert_eq!(store.orders(9_001).await.len(), 15);
    assert_eq!(
        kv.get(&seckill_stock_key(9_001)).await.unwrap().as_deref(),
        Some("0")
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_lock_is_owner_checked() {
    let kv = redis_kv().await;
    let first = DistributedLock::new(kv.clone());
    let second = DistributedLock::new(kv.clone());

    let held = first
        .try_acquire("it:owner", Duration::from_millis(200))
        .await
        .unwrap()
        .unwrap();
    assert!(
        second
            .try_acquire("it:owner", Duration::from_secs(5))
            .await
            .unwrap()
            .is_none()
    );

    // Lease runs out, someone else takes the lock, the first holder's
    // release must not remove it.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let taken = second
        .try_acquire("it:owner", Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    assert!(!first.release(held).await.unwrap());
    assert!(kv.get("lock:it:owner").await.unwrap().is_some());
    assert!(second.release(taken).await.unwrap());
    assert!(kv.get("lock:it:owner").await.unwrap().is_none());
}
