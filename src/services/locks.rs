use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::core::redis::RedisHandle;

#[derive(Debug, Error)]
pub(crate) enum LockError {
    #[error("lock backend error: {0}")]
    Backend(#[from] redis::RedisError),
}

/// Possession token for a per-essay critical section. Release must present
/// the same token, so an expired holder cannot free a successor's lock.
#[derive(Debug, Clone)]
pub(crate) struct CorrectionLock {
    pub(crate) key: String,
    pub(crate) token: String,
}

#[async_trait]
pub(crate) trait LockManager: Send + Sync {
    /// Non-blocking acquire. `None` means another holder owns the lock,
    /// which callers treat as "someone else has this essay", not an error.
    async fn try_acquire(
        &self,
        essay_id: i64,
        ttl: Duration,
    ) -> Result<Option<CorrectionLock>, LockError>;

    /// Best-effort release. `false` when the lock already expired or belongs
    /// to another holder.
    async fn release(&self, lock: &CorrectionLock) -> Result<bool, LockError>;
}

#[derive(Clone)]
pub(crate) struct RedisLockManager {
    redis: RedisHandle,
}

impl RedisLockManager {
    pub(crate) fn new(redis: RedisHandle) -> Self {
        Self { redis }
    }

    fn lock_key(essay_id: i64) -> String {
        format!("essay-correction:{essay_id}")
    }
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn try_acquire(
        &self,
        essay_id: i64,
        ttl: Duration,
    ) -> Result<Option<CorrectionLock>, LockError> {
        let key = Self::lock_key(essay_id);
        let token = Uuid::new_v4().to_string();
        let ttl_ms = ttl.as_millis().min(u128::from(u64::MAX)) as u64;

        if self.redis.acquire_lock(&key, &token, ttl_ms).await? {
            Ok(Some(CorrectionLock { key, token }))
        } else {
            Ok(None)
        }
    }

    async fn release(&self, lock: &CorrectionLock) -> Result<bool, LockError> {
        Ok(self.redis.release_lock(&lock.key, &lock.token).await?)
    }
}
