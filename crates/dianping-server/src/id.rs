//! Cluster-wide unique, roughly time-ordered 64-bit ids.
//!
//! `id = (seconds since 2023-01-01T00:00:00Z) << 32 | counter`, where the
//! counter is an atomic substrate increment of `icr:{prefix}:{yyyy:MM:dd}`.
//! The counter restarts every UTC day.
//!
//! Ids are only increasing while the wall clock is. A clock stepped backwards
//! can yield an id smaller than one already issued; this is not corrected.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dianping_core::Clock;
use dianping_core::keys::ID_COUNTER_KEY;
use dianping_kv::{DynKvStore, KvError};

use crate::metrics;

/// 2023-01-01T00:00:00Z.
pub const ID_EPOCH_SECS: i64 = 1_672_531_200;

const COUNT_BITS: u32 = 32;
const COUNT_MASK: u64 = (1 << COUNT_BITS) - 1;

#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error(transparent)]
    Kv(#[from] KvError),

    /// The clock is before the epoch or more than 2^32 seconds after it.
    #[error("timestamp {now} is outside the id range")]
    TimestampOutOfRange { now: DateTime<Utc> },

    /// More than 2^32 ids were requested for one prefix in one day.
    #[error("counter {key} exhausted at {value}")]
    CounterExhausted { key: String, value: i64 },
}

/// A decoded id, for debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    /// Second the id was issued in.
    pub issued_at: DateTime<Utc>,
    /// Position within the day's counter, starting at 1.
    pub sequence: u32,
}

#[derive(Clone)]
pub struct IdGenerator {
    kv: DynKvStore,
    clock: Arc<dyn Clock>,
}

impl IdGenerator {
    pub fn new(kv: DynKvStore, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    pub async fn next_id(&self, prefix: &str) -> Result<u64, IdError> {
        let now = self.clock.now();
        let elapsed = u32::try_from(now.timestamp() - ID_EPOCH_SECS)
            .map_err(|_| IdError::TimestampOutOfRange { now })?;

        let key = counter_key(prefix, now);
        let value = self.kv.incr(&key).await?;
        let sequence =
            u32::try_from(value).map_err(|_| IdError::CounterExhausted { key, value })?;

        metrics::record_id_issued(prefix);
        Ok(compose(elapsed, sequence))
    }

    pub fn decode(id: u64) -> IdParts {
        let elapsed = (id >> COUNT_BITS) as i64;
        IdParts {
            issued_at: DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(ID_EPOCH_SECS + elapsed),
            sequence: (id & COUNT_MASK) as u32,
        }
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator")
            .field("mode", &self.kv.mode())
            .field("clock", &self.clock)
            .finish()
    }
}

fn compose(elapsed: u32, sequence: u32) -> u64 {
    (u64::from(elapsed) << COUNT_BITS) | u64::from(sequence)
}

/// `icr:{prefix}:{yyyy:MM:dd}` for the UTC day of `now`.
pub fn counter_key(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{ID_COUNTER_KEY}{prefix}:{}", now.format("%Y:%m:%d"))
}
