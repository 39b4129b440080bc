//! The admission script: stock and duplicate check plus reservation, in one
//! atomic step on the substrate.

use dianping_kv::{KvError, KvScript, LocalData};

const SECKILL_LUA: &str = r"
local stock = tonumber(redis.call('GET', KEYS[1]))
if stock == nil or stock <= 0 then
    return 1
end
if redis.call('SISMEMBER', KEYS[2], ARGV[1]) == 1 then
    return 2
end
redis.call('INCRBY', KEYS[1], -1)
redis.call('SADD', KEYS[2], ARGV[1])
return 0
";

fn seckill_local(data: &mut LocalData, keys: &[String], args: &[String]) -> dianping_kv::Result<i64> {
    let ([stock_key, order_key], [user_id]) = (keys, args) else {
        return Err(KvError::script(
            "seckill",
            "expected stock and order keys and one user id",
        ));
    };

    let stock = match data.get(stock_key)? {
        Some(raw) => raw.parse::<i64>().ok(),
        None => None,
    };
    if !stock.is_some_and(|s| s > 0) {
        return Ok(1);
    }
    if data.set_contains(order_key, user_id)? {
        return Ok(2);
    }
    data.incr_by(stock_key, -1)?;
    data.set_add(order_key, user_id)?;
    Ok(0)
}

/// `KEYS = [seckill:stock:{voucherId}, seckill:order:{voucherId}]`,
/// `ARGV = [userId]`. Returns a [`ScriptVerdict`] code.
pub static SECKILL_SCRIPT: KvScript = KvScript::new("seckill", SECKILL_LUA, seckill_local);

/// Decision of the admission script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptVerdict {
    /// Stock reserved and purchase marker set.
    Proceed = 0,
    InsufficientStock = 1,
    DuplicatePurchase = 2,
}

impl TryFrom<i64> for ScriptVerdict {
    type Error = KvError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ScriptVerdict::Proceed),
            1 => Ok(ScriptVerdict::InsufficientStock),
            2 => Ok(ScriptVerdict::DuplicatePurchase),
            other => Err(KvError::script(
                "seckill",
                format!("unexpected result code {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(data: &mut LocalData, user: &str) -> i64 {
        let keys = ["seckill:stock:1".to_string(), "seckill:order:1".to_string()];
        seckill_local(data, &keys, &[user.to_string()]).unwrap()
    }

    #[test]
    fn test_local_script_verdicts() {
        let mut data = LocalData::default();
        assert_eq!(run(&mut data, "10"), 1, "no stock published");

        data.set("seckill:stock:1", "2".into(), None);
        assert_eq!(run(&mut data, "10"), 0);
        assert_eq!(run(&mut data, "10"), 2);
        assert_eq!(run(&mut data, "11"), 0);
        assert_eq!(run(&mut data, "12"), 1);

        assert_eq!(data.get("seckill:stock:1").unwrap().as_deref(), Some("0"));
        assert!(data.set_contains("seckill:order:1", "11").unwrap());
    }

    #[test]
    fn test_verdict_codes() {
        assert_eq!(ScriptVerdict::try_from(0).unwrap(), ScriptVerdict::Proceed);
        assert_eq!(
            ScriptVerdict::try_from(2).unwrap(),
            ScriptVerdict::DuplicatePurchase
        );
        assert!(ScriptVerdict::try_from(3).is_err());
    }
}
