//! Entities owned by the system of record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A shop listed on the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
    pub id: i64,
    pub name: String,
    pub type_id: i64,
    #[serde(default)]
    pub images: String,
    #[serde(default)]
    pub area: Option<String>,
    pub address: String,
    pub x: f64,
    pub y: f64,
    /// Average spend per customer, in cents.
    #[serde(default)]
    pub avg_price: Option<i64>,
    #[serde(default)]
    pub sold: i32,
    #[serde(default)]
    pub comments: i32,
    /// Rating times ten (`45` is 4.5 stars).
    #[serde(default)]
    pub score: i32,
    #[serde(default)]
    pub open_hours: Option<String>,
}

/// Inventory and sale window of a flash-sale voucher.
///
/// `stock` is only ever lowered through a conditional decrement
/// (`stock = stock - 1 WHERE stock > 0`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeckillVoucher {
    pub voucher_id: i64,
    pub stock: i32,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl SeckillVoucher {
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.begin_time <= now
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_time < now
    }
}

/// A purchased voucher. At most one exists per `(user_id, voucher_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherOrder {
    pub id: i64,
    pub user_id: i64,
    pub voucher_id: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    #[test]
    fn voucher_window() {
        let begin = Utc.with_ymd_and_hms(2024, 6, 18, 0, 0, 0).unwrap();
        let voucher = SeckillVoucher {
            voucher_id: 1,
            stock: 10,
            begin_time: begin,
            end_time: begin + TimeDelta::hours(2),
        };

        assert!(!voucher.has_started(begin - TimeDelta::seconds(1)));
        assert!(voucher.has_started(begin));
        assert!(!voucher.has_ended(begin + TimeDelta::hours(2)));
        assert!(voucher.has_ended(begin + TimeDelta::hours(2) + TimeDelta::seconds(1)));
    }

    #[test]
    fn shop_json_uses_camel_case() {
        let json = serde_json::json!({
            "id": 1,
            "name": "Tea House",
            "typeId": 2,
            "address": "1 Main St",
            "x": 120.1,
            "y": 30.2,
            "avgPrice": 80
        });
        let shop: Shop = serde_json::from_value(json).unwrap();
        assert_eq!(shop.type_id, 2);
        assert_eq!(shop.avg_price, Some(80));
        assert_eq!(shop.sold, 0);
    }
}
