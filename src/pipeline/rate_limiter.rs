use std::sync::Arc;

use crate::event::Platform;
use crate::kv::{KvError, KvStore, NAMESPACE};

/// Per-channel leaky bucket: `INCR` the window counter, arm the TTL on the
/// first increment, allow while the count stays within the limit. A denied
/// job is rescheduled by the caller, never failed.
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    limit: u32,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, limit: u32, window_secs: u64) -> Self {
        Self {
            kv,
            limit,
            window_secs,
        }
    }

    fn key(platform: Platform, channel_id: &str) -> String {
        format!("{NAMESPACE}:ratelimit:{platform}:{channel_id}")
    }

    pub async fn allow(&self, platform: Platform, channel_id: &str) -> Result<bool, KvError> {
        let key = Self::key(platform, channel_id);
        let count = self.kv.incr(&key).await?;
        if count == 1 {
            self.kv.expire(&key, self.window_secs).await?;
        }
        Ok(count <= i64::from(self.limit))
    }

    /// How long a denied job should wait before its next attempt: the
    /// remaining window TTL, or a full window when the counter is gone.
    pub async fn delay_ms(&self, platform: Platform, channel_id: &str) -> Result<u64, KvError> {
        let key = Self::key(platform, channel_id);
        Ok(self
            .kv
            .ttl_ms(&key)
            .await?
            .unwrap_or(self.window_secs * 1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    #[tokio::test]
    async fn allows_up_to_limit_within_window() {
        let limiter = RateLimiter::new(Arc::new(MemoryKv::new()), 5, 2);

        for _ in 0..5 {
            assert!(limiter.allow(Platform::Fluxer, "C_B").await.unwrap());
        }
        assert!(!limiter.allow(Platform::Fluxer, "C_B").await.unwrap());
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let limiter = RateLimiter::new(Arc::new(MemoryKv::new()), 1, 2);

        assert!(limiter.allow(Platform::Fluxer, "C_1").await.unwrap());
        assert!(!limiter.allow(Platform::Fluxer, "C_1").await.unwrap());
        assert!(limiter.allow(Platform::Fluxer, "C_2").await.unwrap());
        assert!(limiter.allow(Platform::Discord, "C_1").await.unwrap());
    }

    #[tokio::test]
    async fn delay_tracks_remaining_window() {
        let limiter = RateLimiter::new(Arc::new(MemoryKv::new()), 1, 2);

        // No counter yet: a full window.
        assert_eq!(limiter.delay_ms(Platform::Fluxer, "C_B").await.unwrap(), 2000);

        limiter.allow(Platform::Fluxer, "C_B").await.unwrap();
        let delay = limiter.delay_ms(Platform::Fluxer, "C_B").await.unwrap();
        assert!(delay <= 2000, "delay {delay} must not exceed the window");
    }
}
