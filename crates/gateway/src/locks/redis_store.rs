use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tracing::{debug, warn};

use collab_core::lock::{LockStore, Ttl};

/// Retries a transport-fallible Redis call with exponential backoff,
/// 50ms × attempt capped at 2s, matching spec §4.C.
async fn with_retry<T, F, Fut>(max_attempts: u32, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = redis::RedisResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Some(value),
            Err(e) if attempt >= max_attempts => {
                warn!(error = %e, attempt, "redis call failed, giving up");
                return None;
            }
            Err(e) => {
                let backoff = Duration::from_millis((50 * attempt as u64).min(2_000));
                debug!(error = %e, attempt, backoff_ms = backoff.as_millis(), "redis call failed, retrying");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Redis-backed `LockStore`. Atomicity of `put_if_absent` relies on Redis's
/// `SET key value NX PX ttl` being a single command.
pub struct RedisLockStore {
    pool: Pool,
    max_attempts: u32,
}

impl RedisLockStore {
    pub fn new(redis_url: &str) -> Result<Self, redis::RedisError> {
        let config = Config::from_url(redis_url);
        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| redis::RedisError::from((redis::ErrorKind::IoError, "pool creation failed", e.to_string())))?;
        Ok(Self { pool, max_attempts: 5 })
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let pool = self.pool.clone();
        let key = key.to_string();
        let value = value.to_string();
        let ttl_ms = ttl.as_millis() as u64;
        with_retry(self.max_attempts, || {
            let pool = pool.clone();
            let key = key.clone();
            let value = value.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| {
                    redis::RedisError::from((redis::ErrorKind::IoError, "pool get failed", e.to_string()))
                })?;
                let result: Option<String> = redis::cmd("SET")
                    .arg(&key)
                    .arg(&value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut conn)
                    .await?;
                Ok(result.is_some())
            }
        })
        .await
        .unwrap_or(false)
    }

    async fn get(&self, key: &str) -> Option<String> {
        let pool = self.pool.clone();
        let key = key.to_string();
        with_retry(self.max_attempts, || {
            let pool = pool.clone();
            let key = key.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| {
                    redis::RedisError::from((redis::ErrorKind::IoError, "pool get failed", e.to_string()))
                })?;
                conn.get::<_, Option<String>>(&key).await
            }
        })
        .await
        .flatten()
    }

    async fn pttl(&self, key: &str) -> Ttl {
        let pool = self.pool.clone();
        let key = key.to_string();
        let result = with_retry(self.max_attempts, || {
            let pool = pool.clone();
            let key = key.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| {
                    redis::RedisError::from((redis::ErrorKind::IoError, "pool get failed", e.to_string()))
                })?;
                conn.pttl::<_, i64>(&key).await
            }
        })
        .await;

        match result {
            Some(-2) | None => Ttl::NoKey,
            Some(-1) => Ttl::NoExpiry,
            Some(ms) => Ttl::Remaining(ms),
        }
    }

    async fn delete(&self, key: &str) -> bool {
        let pool = self.pool.clone();
        let key = key.to_string();
        with_retry(self.max_attempts, || {
            let pool = pool.clone();
            let key = key.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| {
                    redis::RedisError::from((redis::ErrorKind::IoError, "pool get failed", e.to_string()))
                })?;
                conn.del::<_, i64>(&key).await
            }
        })
        .await
        .map(|deleted| deleted > 0)
        .unwrap_or(false)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let pool = self.pool.clone();
        let key = key.to_string();
        let value = value.to_string();
        let ttl_ms = ttl.as_millis() as u64;
        with_retry(self.max_attempts, || {
            let pool = pool.clone();
            let key = key.clone();
            let value = value.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| {
                    redis::RedisError::from((redis::ErrorKind::IoError, "pool get failed", e.to_string()))
                })?;
                redis::cmd("SET")
                    .arg(&key)
                    .arg(&value)
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async::<_, ()>(&mut conn)
                    .await
            }
        })
        .await
        .is_some()
    }
}
