//! Read-through cache behavior across concurrent readers.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use dianping_core::keys::CACHE_SHOP_KEY;
use dianping_core::{ManualClock, Shop};
use dianping_db_memory::InMemoryStore;
use dianping_kv::{DynKvStore, KvStore, LocalKvStore};
use dianping_server::{AppConfig, CachePolicy, Lookup, ShopError, Services};

fn shop(id: i64, name: &str) -> Shop {
    Shop {
        id,
        name: name.to_string(),
        type_id: 1,
        images: String::new(),
        area: Some("Downtown".to_string()),
        address: "1 Main St".to_string(),
        x: 120.15,
        y: 30.28,
        avg_price: Some(8_000),
        sold: 0,
        comments: 0,
        score: 45,
        open_hours: None,
    }
}

struct Harness {
    services: Services,
    store: InMemoryStore,
    kv: DynKvStore,
    clock: ManualClock,
}

fn harness() -> Harness {
    let config = AppConfig::default();
    let store = InMemoryStore::new();
    let kv: DynKvStore = Arc::new(LocalKvStore::new());
    let clock = ManualClock::new(Utc::now());
    let services = Services::from_parts(
        kv.clone(),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
        &config,
    );
    Harness {
        services,
        store,
        kv,
        clock,
    }
}

#[tokio::test]
async fn test_absent_shop_reaches_store_once() {
    let h = harness();

    for policy in [CachePolicy::PassThrough, CachePolicy::Mutex] {
        let lookup = h.services.shops.query_by_id(404, policy).await.unwrap();
        assert_eq!(lookup, Lookup::Absent);
    }
    assert_eq!(h.store.shop_reads(), 1);
    assert_eq!(
        h.kv.get(&format!("{CACHE_SHOP_KEY}404")).await.unwrap().as_deref(),
        Some("")
    );
}

#[tokio::test]
async fn test_pass_through_loads_then_hits() {
    let h = harness();
    h.store.put_shop(shop(1, "Noodle House")).await;

    let first = h.services.shops.query_by_id(1, CachePolicy::PassThrough).await.unwrap();
    let second = h.services.shops.query_by_id(1, CachePolicy::PassThrough).await.unwrap();

    assert_eq!(first, Lookup::Loaded(shop(1, "Noodle House")));
    assert_eq!(second, Lookup::Hit(shop(1, "Noodle House")));
    assert_eq!(h.store.shop_reads(), 1);
}

#[tokio::test]
async fn test_update_invalidates_cached_shop() {
    let h = harness();
    h.store.put_shop(shop(2, "Tea Garden")).await;
    h.services.shops.query_by_id(2, CachePolicy::PassThrough).await.unwrap();

    let renamed = shop(2, "Tea Garden II");
    assert!(h.services.shops.update_shop(&renamed).await.unwrap());
    assert!(h.kv.get(&format!("{CACHE_SHOP_KEY}2")).await.unwrap().is_none());

    let lookup = h.services.shops.query_by_id(2, CachePolicy::PassThrough).await.unwrap();
    assert_eq!(lookup, Lookup::Loaded(renamed));

    assert!(!h.services.shops.update_shop(&shop(3, "Nowhere")).await.unwrap());
    assert!(matches!(
        h.services.shops.update_shop(&shop(0, "Bad")).await,
        Err(ShopError::InvalidId(0))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_mutex_policy_loads_once_under_concurrency() {
    let h = harness();
    let loads = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let cache = h.services.cache.clone();
        let loads = loads.clone();
        handles.push(tokio::spawn(async move {
            cache
                .query_with_mutex(
                    "cache:hot:",
                    7_i64,
                    move |id: i64| {
                        let loads = loads.clone();
                        async move {
                            loads.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok::<_, Infallible>(Some(format!("value-{id}")))
                        }
                    },
                    Duration::from_secs(60),
                )
                .await
                .unwrap()
        }));
    }

    for handle in handles {
        let lookup = handle.await.unwrap();
        assert_eq!(lookup.into_value().as_deref(), Some("value-7"));
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_logical_expiry_serves_stale_and_rebuilds_once() {
    let h = harness();
    h.store.put_shop(shop(5, "Old Name")).await;
    assert!(
        h.services
            .shops
            .warm_shop(5, Duration::from_secs(10))
            .await
            .unwrap()
    );
    assert_eq!(h.store.shop_reads(), 1);

    // The row changes behind the cache and the entry expires logically.
    h.store.put_shop(shop(5, "New Name")).await;
    h.clock.advance(TimeDelta::seconds(20));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let shops = h.services.shops.clone();
        handles.push(tokio::spawn(async move {
            tokio::time::timeout(
                Duration::from_millis(500),
                shops.query_by_id(5, CachePolicy::LogicalExpire),
            )
            .await
            .expect("logical expiry reads never wait on the loader")
            .unwrap()
        }));
    }
    for handle in handles {
        match handle.await.unwrap() {
            Lookup::Stale(s) => assert_eq!(s.name, "Old Name"),
            Lookup::Hit(s) => assert_eq!(s.name, "New Name"),
            other => panic!("unexpected lookup {other:?}"),
        }
    }

    h.services.cache.wait_for_rebuilds().await;
    assert_eq!(h.store.shop_reads(), 2);

    let lookup = h.services.shops.query_by_id(5, CachePolicy::LogicalExpire).await.unwrap();
    assert_eq!(lookup, Lookup::Hit(shop(5, "New Name")));
}

#[tokio::test]
async fn test_logical_expiry_without_entry_is_missing() {
    let h = harness();
    h.store.put_shop(shop(6, "Cold")).await;

    let lookup = h.services.shops.query_by_id(6, CachePolicy::LogicalExpire).await.unwrap();
    assert_eq!(lookup, Lookup::Missing);
    assert_eq!(h.store.shop_reads(), 0);
}

#[tokio::test]
async fn test_logical_rebuild_removes_deleted_shop() {
    let h = harness();
    h.store.put_shop(shop(8, "Closing Down")).await;
    h.services.shops.warm_shop(8, Duration::from_secs(1)).await.unwrap();
    h.store.delete_shop(8).await;
    h.clock.advance(TimeDelta::seconds(5));

    let lookup = h.services.shops.query_by_id(8, CachePolicy::LogicalExpire).await.unwrap();
    assert!(matches!(lookup, Lookup::Stale(_)));
    h.services.cache.wait_for_rebuilds().await;

    assert!(h.kv.get(&format!("{CACHE_SHOP_KEY}8")).await.unwrap().is_none());
    let lookup = h.services.shops.query_by_id(8, CachePolicy::LogicalExpire).await.unwrap();
    assert_eq!(lookup, Lookup::Missing);
}
