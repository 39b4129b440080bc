//! Distributed mutual exclusion on the KV substrate.
//!
//! Acquisition is one `SET key token NX PX lease`. Release is an atomic
//! compare-and-delete script, so a caller whose lease already expired cannot
//! delete a lock that a different owner has since acquired.
//!
//! Leases are never renewed. Work done under a lock must finish within the
//! lease or mutual exclusion is lost for the remainder.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dianping_core::keys::LOCK_KEY_PREFIX;
use dianping_kv::{DynKvStore, KvError, KvScript, LocalData};
use uuid::Uuid;

use crate::metrics;

/// Lock failures are substrate failures. Contention is not an error.
pub type LockError = KvError;

const UNLOCK_LUA: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

fn unlock_local(data: &mut LocalData, keys: &[String], args: &[String]) -> dianping_kv::Result<i64> {
    let (Some(key), Some(token)) = (keys.first(), args.first()) else {
        return Err(KvError::script("unlock", "expected one key and one argument"));
    };
    if data.get(key)?.as_deref() == Some(token.as_str()) {
        data.delete(key);
        Ok(1)
    } else {
        Ok(0)
    }
}

/// Compare-and-delete: removes `KEYS[1]` only while it still holds `ARGV[1]`.
pub static UNLOCK_SCRIPT: KvScript = KvScript::new("unlock", UNLOCK_LUA, unlock_local);

/// Proof of a held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    key: String,
    owner_token: String,
    lease: Duration,
}

impl LockHandle {
    /// Full substrate key, `lock:{name}`.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner_token(&self) -> &str {
        &self.owner_token
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }
}

/// Lock client shared by every task of this process.
///
/// Owner tokens are `{process uuid}-{attempt sequence}`, unique per attempt
/// across all processes sharing the substrate.
#[derive(Clone)]
pub struct DistributedLock {
    kv: DynKvStore,
    process_id: Arc<str>,
    sequence: Arc<AtomicU64>,
}

impl DistributedLock {
    pub fn new(kv: DynKvStore) -> Self {
        Self {
            kv,
            process_id: Uuid::new_v4().simple().to_string().into(),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_token(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{seq}", self.process_id)
    }

    /// Attempts to take `lock:{name}` for `lease`, without waiting.
    ///
    /// `Ok(None)` means another owner holds it.
    pub async fn try_acquire(
        &self,
        name: &str,
        lease: Duration,
    ) -> Result<Option<LockHandle>, LockError> {
        let key = format!("{LOCK_KEY_PREFIX}{name}");
        let owner_token = self.next_token();
        let acquired = self.kv.set_if_absent(&key, &owner_token, lease).await?;
        metrics::record_lock_attempt(acquired);

        if acquired {
            tracing::trace!(key = %key, "lock acquired");
            Ok(Some(LockHandle {
                key,
                owner_token,
                lease,
            }))
        } else {
            tracing::trace!(key = %key, "lock held by another owner");
            Ok(None)
        }
    }

    /// Releases `handle` if it is still the owner.
    ///
    /// Returns `false` when the lease had already expired; the lock may now
    /// belong to someone else and is left untouched.
    pub async fn release(&self, handle: LockHandle) -> Result<bool, LockError> {
        let keys = [handle.key];
        let args = [handle.owner_token];
        let deleted = self.kv.eval(&UNLOCK_SCRIPT, &keys, &args).await? == 1;
        if !deleted {
            metrics::record_lock_release_missed();
            tracing::debug!(key = %keys[0], "lock no longer owned at release");
        }
        Ok(deleted)
    }

    /// Releases `handle`, logging instead of returning substrate failures.
    /// The lease bounds how long a failed release keeps the lock held.
    pub async fn release_quietly(&self, handle: LockHandle) {
        let key = handle.key.clone();
        if let Err(e) = self.release(handle).await {
            tracing::warn!(key = %key, error = %e, "Failed to release lock");
        }
    }
}

impl fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedLock")
            .field("process_id", &self.process_id)
            .field("mode", &self.kv.mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dianping_kv::{KvStore, LocalKvStore};

    fn lock() -> (DistributedLock, DynKvStore) {
        let kv: DynKvStore = Arc::new(LocalKvStore::new());
        (DistributedLock::new(kv.clone()), kv)
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let (lock, kv) = lock();
        let handle = lock
            .try_acquire("shop:1", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.key(), "lock:shop:1");
        assert_eq!(
            kv.get("lock:shop:1").await.unwrap().as_deref(),
            Some(handle.owner_token())
        );

        let second = lock.try_acquire("shop:1", Duration::from_secs(10)).await.unwrap();
        assert!(second.is_none());

        assert!(lock.release(handle).await.unwrap());
        assert!(kv.get("lock:shop:1").await.unwrap().is_none());

        let again = lock.try_acquire("shop:1", Duration::from_secs(10)).await.unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn test_owner_tokens_are_unique_per_attempt() {
        let (lock, _) = lock();
        let a = lock.try_acquire("a", Duration::from_secs(5)).await.unwrap().unwrap();
        let b = lock.try_acquire("b", Duration::from_secs(5)).await.unwrap().unwrap();
        assert_ne!(a.owner_token(), b.owner_token());

        let other_process = DistributedLock::new(Arc::new(LocalKvStore::new()));
        let c = other_process
            .try_acquire("a", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(a.owner_token(), c.owner_token());
    }

    #[tokio::test]
    async fn test_release_after_expiry_does_not_steal() {
        let (lock, kv) = lock();
        let stale = lock
            .try_acquire("order:7", Duration::from_millis(30))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let current = lock
            .try_acquire("order:7", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        assert!(!lock.release(stale).await.unwrap());
        assert_eq!(
            kv.get("lock:order:7").await.unwrap().as_deref(),
            Some(current.owner_token())
        );
        assert!(lock.release(current).await.unwrap());
    }

    #[test]
    fn test_unlock_local_rejects_missing_arguments() {
        let mut data = LocalData::default();
        assert!(unlock_local(&mut data, &[], &[]).is_err());
    }
}
