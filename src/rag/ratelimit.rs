//! Per-user fixed-window rate limiting
//!
//! Runs before anything downstream, so an over-limit user never costs an
//! embedding, retrieval or generative call.

use std::time::SystemTime;

use dashmap::DashMap;
use tracing::debug;

use crate::errors::KrishiRagError;
use crate::errors::Result;

struct Window {
    started_at: u64,
    count: u32,
}

/// Fixed-window counter per user id
pub struct FixedWindowRateLimiter {
    windows: DashMap<String, Window>,
    limit: u32,
    window_secs: u64,
}

impl FixedWindowRateLimiter {
    #[must_use]
    pub fn new(limit: u32, window_secs: u64) -> Self {
        Self {
            windows: DashMap::new(),
            limit: limit.max(1),
            window_secs: window_secs.max(1),
        }
    }

    #[must_use]
    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self::new(
            config.rate_limit.requests_per_window,
            config.rate_limit.window_secs,
        )
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Record one request for `user_id`.
    ///
    /// # Errors
    /// - `RateLimited` once the user's count in the current window exceeds
    ///   the limit, with the seconds remaining until the window resets
    pub fn check(&self, user_id: &str) -> Result<()> {
        let now = Self::now_secs();
        let window_start = now - (now % self.window_secs);

        let mut entry = self.windows.entry(user_id.to_string()).or_insert(Window {
            started_at: window_start,
            count: 0,
        });

        if entry.started_at != window_start {
            entry.started_at = window_start;
            entry.count = 0;
        }

        if entry.count >= self.limit {
            let retry_after_secs = (entry.started_at + self.window_secs).saturating_sub(now);
            debug!(
                "Rate limit hit for user {}: {} requests in window",
                user_id, entry.count
            );
            return Err(KrishiRagError::RateLimited { retry_after_secs });
        }

        entry.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_within_limit_pass() {
        let limiter = FixedWindowRateLimiter::new(3, 60);
        for _ in 0..3 {
            assert!(limiter.check("farmer-1").is_ok());
        }
    }

    #[test]
    fn test_exceeding_limit_is_rejected_with_retry_after() {
        let limiter = FixedWindowRateLimiter::new(2, 60);
        limiter.check("farmer-1").unwrap();
        limiter.check("farmer-1").unwrap();

        match limiter.check("farmer-1") {
            Err(KrishiRagError::RateLimited { retry_after_secs }) => {
                assert!(retry_after_secs <= 60);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn test_users_have_independent_windows() {
        let limiter = FixedWindowRateLimiter::new(1, 60);
        limiter.check("farmer-1").unwrap();
        assert!(limiter.check("farmer-2").is_ok());
        assert!(limiter.check("farmer-1").is_err());
    }
}
