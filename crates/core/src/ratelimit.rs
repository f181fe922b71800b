use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Sliding-window rate limiter configuration.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub limit: usize,
    pub window: Duration,
}

impl RateLimitConfig {
    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Per-key sliding window state: an ordered sequence of admission timestamps.
#[derive(Default)]
struct Window {
    timestamps: VecDeque<Instant>,
}

impl Window {
    fn evict(&mut self, cutoff: Instant) {
        while let Some(front) = self.timestamps.front() {
            if *front <= cutoff {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window permit counter, sharded per key.
///
/// Each key gets its own mutex so the decide-and-append step is atomic
/// without serializing unrelated keys against each other. Cleanup runs on
/// every call, giving O(limit) worst case per call and amortized constant
/// space per idle key (idle keys are never touched again, so they simply
/// accumulate one dead entry in the outer map — acceptable for the
/// connection-scoped keys this limiter is used with).
pub struct RateLimiter<K> {
    config: RateLimitConfig,
    windows: Arc<std::sync::Mutex<HashMap<K, Arc<Mutex<Window>>>>>,
}

impl<K> RateLimiter<K>
where
    K: Eq + Hash + Clone,
{
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    fn window_for(&self, key: &K) -> Arc<Mutex<Window>> {
        self.windows
            .lock()
            .expect("rate limiter map poisoned")
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Window::default())))
            .clone()
    }

    /// Attempts to admit one request for `key`. Returns `true` if admitted.
    pub async fn allow(&self, key: &K) -> bool {
        let window = self.window_for(key);
        let mut guard = window.lock().await;
        let now = Instant::now();
        let cutoff = now.checked_sub(self.config.window).unwrap_or(now);
        guard.evict(cutoff);
        if guard.timestamps.len() < self.config.limit {
            guard.timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Remaining admissions in the current window for `key`.
    pub async fn remaining(&self, key: &K) -> usize {
        let window = self.window_for(key);
        let mut guard = window.lock().await;
        let now = Instant::now();
        let cutoff = now.checked_sub(self.config.window).unwrap_or(now);
        guard.evict(cutoff);
        self.config.limit.saturating_sub(guard.timestamps.len())
    }

    /// Clears all recorded admissions for `key`.
    pub async fn reset(&self, key: &K) {
        let window = self.window_for(key);
        window.lock().await.timestamps.clear();
    }

    /// Drops bookkeeping for a key entirely, e.g. on connection close.
    pub fn forget(&self, key: &K) {
        self.windows
            .lock()
            .expect("rate limiter map poisoned")
            .remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_limit_then_denies() {
        let limiter = RateLimiter::new(RateLimitConfig::new(3, Duration::from_millis(100)));
        let key = "conn-1".to_string();
        assert!(limiter.allow(&key).await);
        assert!(limiter.allow(&key).await);
        assert!(limiter.allow(&key).await);
        assert!(!limiter.allow(&key).await);
        assert_eq!(limiter.remaining(&key).await, 0);
    }

    #[tokio::test]
    async fn limit_one_allows_exactly_one_per_window() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, Duration::from_millis(50)));
        let key = "conn-1".to_string();
        assert!(limiter.allow(&key).await);
        assert!(!limiter.allow(&key).await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(limiter.allow(&key).await);
    }

    #[tokio::test]
    async fn reset_clears_window() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, Duration::from_millis(1000)));
        let key = "conn-1".to_string();
        assert!(limiter.allow(&key).await);
        assert!(!limiter.allow(&key).await);
        limiter.reset(&key).await;
        assert!(limiter.allow(&key).await);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, Duration::from_millis(1000)));
        assert!(limiter.allow(&"a".to_string()).await);
        assert!(limiter.allow(&"b".to_string()).await);
        assert!(!limiter.allow(&"a".to_string()).await);
    }
}
