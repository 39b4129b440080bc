//! Integration tests for the Redis substrate.
//!
//! Each test checks that Redis and the local store agree on the same
//! operation sequence. Tests use testcontainers to spin up a real Redis.

use std::time::Duration;

use dianping_kv::{KvScript, KvStore, LocalData, LocalKvStore, RedisConfig, RedisKvStore};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
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
    url.clone()
}

async fn redis_store() -> RedisKvStore {
    let config = RedisConfig {
        enabled: true,
        url: get_redis_url().await,
        pool_size: 4,
        timeout_ms: 5000,
    };
    RedisKvStore::connect(&config).await.expect("connect redis")
}

const TAKE_LUA: &str = r"
local stock = tonumber(redis.call('GET', KEYS[1]) or '0')
if stock <= 0 then
    return 1
end
redis.call('INCRBY', KEYS[1], -1)
redis.call('SADD', KEYS[2], ARGV[1])
return 0
";

fn take_local(data: &mut LocalData, keys: &[String], args: &[String]) -> dianping_kv::Result<i64> {
    let stock = data
        .get(&keys[0])?
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0);
    if stock <= 0 {
        return Ok(1);
    }
    data.incr_by(&keys[0], -1)?;
    data.set_add(&keys[1], &args[0])?;
    Ok(0)
}

const TAKE: KvScript = KvScript::new("take", TAKE_LUA, take_local);

async fn exercise(store: &dyn KvStore, ns: &str) {
    let key = format!("{ns}:plain");
    store.set(&key, "v", None).await.unwrap();
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("v"));
    assert!(store.delete(&key).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap(), None);

    let lock = format!("{ns}:lock");
    assert!(store.set_if_absent(&lock, "a", Duration::from_secs(5)).await.unwrap());
    assert!(!store.set_if_absent(&lock, "b", Duration::from_secs(5)).await.unwrap());

    let counter = format!("{ns}:icr");
    assert_eq!(store.incr(&counter).await.unwrap(), 1);
    assert_eq!(store.incr(&counter).await.unwrap(), 2);

    let stock = format!("{ns}:stock");
    let buyers = format!("{ns}:buyers");
    store.set(&stock, "1", None).await.unwrap();
    let keys = vec![stock.clone(), buyers];
    assert_eq!(store.eval(&TAKE, &keys, &["7".into()]).await.unwrap(), 0);
    assert_eq!(store.eval(&TAKE, &keys, &["8".into()]).await.unwrap(), 1);
    assert_eq!(store.get(&stock).await.unwrap().as_deref(), Some("0"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_matches_local_semantics() {
    let redis = redis_store().await;
    exercise(&redis, "it:redis").await;
    exercise(&LocalKvStore::new(), "it:local").await;
    assert_eq!(redis.mode(), "redis");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_ttl_expiry() {
    let redis = redis_store().await;
    redis
        .set("it:ttl", "", Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert_eq!(redis.get("it:ttl").await.unwrap().as_deref(), Some(""));

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(redis.get("it:ttl").await.unwrap(), None);
}
