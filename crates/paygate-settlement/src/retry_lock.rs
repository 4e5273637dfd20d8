//! Cross-process sweep lock.
//!
//! A SET-NX key with a TTL shorter than the sweep interval. Whoever claims
//! it runs the sweep; everyone else skips the round. If the holder dies the
//! key expires before the next round.

use std::sync::Arc;
use std::time::Duration;

use paygate_ingress::KvStore;
use paygate_types::Result;
use tracing::warn;

pub struct SweepLock {
    kv: Arc<dyn KvStore>,
    key: String,
    ttl: Duration,
}

impl SweepLock {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            kv,
            key: key.into(),
            ttl,
        }
    }

    /// Claim the lock. `false` means another worker holds it.
    ///
    /// # Errors
    /// The store's error; callers treat it as "not acquired".
    pub async fn try_acquire(&self) -> Result<bool> {
        self.kv.set_nx_ex(&self.key, "1", self.ttl).await
    }

    /// Drop the lock early. Failure is harmless: the TTL reclaims it.
    pub async fn release(&self) {
        if let Err(e) = self.kv.del(&self.key).await {
            warn!(key = %self.key, error = %e, "sweep lock release failed");
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paygate_ingress::InMemoryKv;

    #[tokio::test(start_paused = true)]
    async fn second_holder_blocked() {
        let kv = Arc::new(InMemoryKv::new());
        let a = SweepLock::new(kv.clone(), "lock:test", Duration::from_secs(25));
        let b = SweepLock::new(kv, "lock:test", Duration::from_secs(25));
        assert!(a.try_acquire().await.unwrap());
        assert!(!b.try_acquire().await.unwrap());
        a.release().await;
        assert!(b.try_acquire().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expires_without_release() {
        let kv = Arc::new(InMemoryKv::new());
        let lock = SweepLock::new(kv, "lock:test", Duration::from_secs(25));
        assert!(lock.try_acquire().await.unwrap());
        tokio::time::advance(Duration::from_secs(26)).await;
        assert!(lock.try_acquire().await.unwrap());
    }
}
