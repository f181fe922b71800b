use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::resource_id::ResourceId;

/// Outcome of `LockStore::pttl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Remaining(i64),
    NoExpiry,
    NoKey,
}

/// The four primitives spec §4.C requires over an external KV store with
/// native expiry. Implementations (Redis, in-memory) must make `put_if_absent`
/// atomic; everything else in `LockEngine` is built on that guarantee.
#[async_trait]
pub trait LockStore: Send + Sync {
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> bool;
    async fn get(&self, key: &str) -> Option<String>;
    async fn pttl(&self, key: &str) -> Ttl;
    async fn delete(&self, key: &str) -> bool;
    /// Overwrites an existing key's value and TTL unconditionally. Used by
    /// `acquire`'s refresh path and by `renew`, both of which have already
    /// confirmed ownership via `get`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool;
}

/// Canonical JSON value stored at `lock:<resourceId>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockValue {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "acquiredAt")]
    pub acquired_at: i64,
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
}

impl LockValue {
    fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self).expect("LockValue always serializes")
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Outcome of `LockEngine::acquire_outcome`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The resource was free, or already held by this same user (refreshed).
    Acquired,
    /// Taken over from a different owner whose recorded `expiresAt` had
    /// already passed even though the store had not yet evicted the key
    /// (store TTL resolution lagging the logical expiry written into the
    /// value). The previous owner is reported so callers can notify it.
    Stolen { previous_owner: String },
    /// Held by a different owner whose lock is still logically valid.
    Conflict,
}

/// Ownership semantics layered on top of a `LockStore`. Relies entirely on
/// the store's `put_if_absent` atomicity to resolve acquire races; a lost
/// race returns `false` without side effects.
pub struct LockEngine {
    store: Arc<dyn LockStore>,
    default_ttl: Duration,
}

impl LockEngine {
    #[must_use]
    pub fn new(store: Arc<dyn LockStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// Convenience wrapper over `acquire_outcome` for callers that only
    /// care whether they now hold the lock, not how.
    pub async fn acquire(&self, resource: &ResourceId, user_id: &str, ttl: Option<Duration>) -> bool {
        !matches!(self.acquire_outcome(resource, user_id, ttl).await, AcquireOutcome::Conflict)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn acquire_outcome(&self, resource: &ResourceId, user_id: &str, ttl: Option<Duration>) -> AcquireOutcome {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let key = resource.lock_key();

        match self.store.get(&key).await {
            Some(raw) => match LockValue::parse(&raw) {
                Some(existing) if existing.user_id == user_id => {
                    // Refresh: preserve acquiredAt, bump expiresAt.
                    let refreshed = LockValue {
                        user_id: user_id.to_string(),
                        acquired_at: existing.acquired_at,
                        expires_at: now_ms() + ttl.as_millis() as i64,
                    };
                    if self.store.set(&key, &refreshed.to_json(), ttl).await {
                        AcquireOutcome::Acquired
                    } else {
                        AcquireOutcome::Conflict
                    }
                }
                Some(existing) if existing.expires_at <= now_ms() => {
                    warn!(resource = %resource, previous_owner = %existing.user_id, "lock logically expired but not yet evicted, stealing");
                    // The key is still present, so `put_if_absent` would
                    // lose to itself; overwrite unconditionally instead.
                    let acquired_at = now_ms();
                    let value = LockValue {
                        user_id: user_id.to_string(),
                        acquired_at,
                        expires_at: acquired_at + ttl.as_millis() as i64,
                    };
                    if self.store.set(&key, &value.to_json(), ttl).await {
                        AcquireOutcome::Stolen { previous_owner: existing.user_id }
                    } else {
                        AcquireOutcome::Conflict
                    }
                }
                Some(_) => AcquireOutcome::Conflict,
                None => {
                    // Corrupted value: treat as absent, clear it first.
                    warn!(resource = %resource, "corrupted lock value, clearing");
                    self.store.delete(&key).await;
                    if self.put_new(&key, user_id, ttl).await {
                        AcquireOutcome::Acquired
                    } else {
                        AcquireOutcome::Conflict
                    }
                }
            },
            None => {
                if self.put_new(&key, user_id, ttl).await {
                    AcquireOutcome::Acquired
                } else {
                    AcquireOutcome::Conflict
                }
            }
        }
    }

    async fn put_new(&self, key: &str, user_id: &str, ttl: Duration) -> bool {
        let acquired_at = now_ms();
        let value = LockValue {
            user_id: user_id.to_string(),
            acquired_at,
            expires_at: acquired_at + ttl.as_millis() as i64,
        };
        self.store.put_if_absent(key, &value.to_json(), ttl).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn release(&self, resource: &ResourceId, user_id: &str) -> bool {
        let key = resource.lock_key();
        match self.store.get(&key).await {
            Some(raw) => match LockValue::parse(&raw) {
                Some(existing) if existing.user_id == user_id => self.store.delete(&key).await,
                _ => false,
            },
            None => false,
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn renew(&self, resource: &ResourceId, user_id: &str, ttl: Duration) -> bool {
        let key = resource.lock_key();
        match self.store.get(&key).await {
            Some(raw) => match LockValue::parse(&raw) {
                Some(existing) if existing.user_id == user_id => {
                    let renewed = LockValue {
                        user_id: user_id.to_string(),
                        acquired_at: existing.acquired_at,
                        expires_at: now_ms() + ttl.as_millis() as i64,
                    };
                    self.store.set(&key, &renewed.to_json(), ttl).await
                }
                _ => false,
            },
            None => false,
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_holder(&self, resource: &ResourceId) -> Option<LockValue> {
        let raw = self.store.get(&resource.lock_key()).await?;
        LockValue::parse(&raw)
    }
}

/// In-memory `LockStore` with a background sweep for TTL expiry, used for
/// single-process demos and tests that don't need a live Redis instance.
pub struct InMemoryLockStore {
    entries: Arc<AsyncMutex<HashMap<String, (String, tokio::time::Instant)>>>,
}

impl InMemoryLockStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(AsyncMutex::new(HashMap::new())),
        }
    }

    async fn is_live(map: &HashMap<String, (String, tokio::time::Instant)>, key: &str) -> bool {
        map.get(key)
            .map(|(_, expires_at)| *expires_at > tokio::time::Instant::now())
            .unwrap_or(false)
    }
}

impl Default for InMemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let mut map = self.entries.lock().await;
        if Self::is_live(&map, key).await {
            return false;
        }
        map.insert(key.to_string(), (value.to_string(), tokio::time::Instant::now() + ttl));
        true
    }

    async fn get(&self, key: &str) -> Option<String> {
        let map = self.entries.lock().await;
        if Self::is_live(&map, key).await {
            map.get(key).map(|(v, _)| v.clone())
        } else {
            None
        }
    }

    async fn pttl(&self, key: &str) -> Ttl {
        let map = self.entries.lock().await;
        match map.get(key) {
            Some((_, expires_at)) => {
                let now = tokio::time::Instant::now();
                if *expires_at > now {
                    Ttl::Remaining((*expires_at - now).as_millis() as i64)
                } else {
                    Ttl::NoKey
                }
            }
            None => Ttl::NoKey,
        }
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.lock().await.remove(key).is_some()
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let mut map = self.entries.lock().await;
        map.insert(key.to_string(), (value.to_string(), tokio::time::Instant::now() + ttl));
        debug!(key, "lock value overwritten");
        true
    }
}
