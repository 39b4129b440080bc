//! Key naming and TTL conventions in the shared KV substrate.
//!
//! All processes sharing the substrate must agree on these, so they live in
//! one place.

use std::time::Duration;

/// Prefix of shop detail cache entries: `cache:shop:{id}`.
pub const CACHE_SHOP_KEY: &str = "cache:shop:";
/// TTL of shop detail cache entries.
pub const CACHE_SHOP_TTL: Duration = Duration::from_secs(30 * 60);

/// Prefix of seckill voucher metadata cache entries: `cache:voucher:{id}`.
pub const CACHE_VOUCHER_KEY: &str = "cache:voucher:";

/// TTL of the null marker written for ids confirmed absent upstream.
pub const CACHE_NULL_TTL: Duration = Duration::from_secs(2 * 60);

/// Value stored under a key whose id is confirmed absent upstream.
///
/// JSON encodings are never empty, so the empty string cannot collide with a
/// cached payload.
pub const NULL_MARKER: &str = "";

/// Prefix every distributed lock key carries: `lock:{name}`.
pub const LOCK_KEY_PREFIX: &str = "lock:";
/// Default lease of cache rebuild locks.
pub const REBUILD_LOCK_LEASE: Duration = Duration::from_secs(10);

/// Lock name guarding order creation for one user: `lock:order:{userId}`.
pub const ORDER_LOCK_PREFIX: &str = "order:";

/// Remaining seckill stock in the substrate: `seckill:stock:{voucherId}`.
pub const SECKILL_STOCK_KEY: &str = "seckill:stock:";
/// Set of user ids that already bought a voucher: `seckill:order:{voucherId}`.
pub const SECKILL_ORDER_KEY: &str = "seckill:order:";

/// Prefix of the id generator counters: `icr:{prefix}:{yyyy:MM:dd}`.
pub const ID_COUNTER_KEY: &str = "icr:";

pub fn seckill_stock_key(voucher_id: i64) -> String {
    format!("{SECKILL_STOCK_KEY}{voucher_id}")
}

pub fn seckill_order_key(voucher_id: i64) -> String {
    format!("{SECKILL_ORDER_KEY}{voucher_id}")
}

pub fn order_lock_name(user_id: i64) -> String {
    format!("{ORDER_LOCK_PREFIX}{user_id}")
}

/// Lock name guarding the rebuild of a cache entry.
///
/// `cache:shop:` + `7` becomes `shop:7`, which the lock stores as
/// `lock:shop:7`.
pub fn rebuild_lock_name(key_prefix: &str, id: &str) -> String {
    let scope = key_prefix.strip_prefix("cache:").unwrap_or(key_prefix);
    format!("{scope}{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_keys() {
        assert_eq!(seckill_stock_key(12), "seckill:stock:12");
        assert_eq!(seckill_order_key(12), "seckill:order:12");
        assert_eq!(order_lock_name(7), "order:7");
        assert_eq!(rebuild_lock_name(CACHE_SHOP_KEY, "3"), "shop:3");
        assert_eq!(rebuild_lock_name("plain:", "3"), "plain:3");
    }
}
