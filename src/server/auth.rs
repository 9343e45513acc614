//! Shared-secret verification and per-address rate limiting for the gateway
//! WebSocket listener.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Sliding window over which connection attempts are counted.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Maximum connection attempts from one address within the window.
pub const RATE_LIMIT_MAX: usize = 10;

/// Constant-time comparison of the presented `X-Bridge-Secret` header against
/// the configured secret, so a timing side-channel can't be used to guess it
/// byte by byte.
pub fn verify_secret(provided: &str, expected: &str) -> bool {
    ring::constant_time::verify_slices_are_equal(provided.as_bytes(), expected.as_bytes()).is_ok()
}

/// A sliding-window rate limiter keyed by source address.
pub struct RateLimiter {
    hits: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Records one attempt from `addr` and returns whether it's within the
    /// allowed rate.
    pub fn check(&self, addr: IpAddr) -> bool {
        let mut hits = self.hits.lock().unwrap();
        let now = Instant::now();
        let window = hits.entry(addr).or_default();
        while let Some(&front) = window.front() {
            if now.duration_since(front) > RATE_LIMIT_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= RATE_LIMIT_MAX {
            return false;
        }
        window.push_back(now);
        true
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_secret_accepts_matching_strings() {
        assert!(verify_secret("abc123", "abc123"));
    }

    #[test]
    fn verify_secret_rejects_mismatch() {
        assert!(!verify_secret("abc123", "abc124"));
        assert!(!verify_secret("short", "a-much-longer-secret"));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_allows_up_to_cap_then_blocks() {
        let limiter = RateLimiter::new();
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..RATE_LIMIT_MAX {
            assert!(limiter.check(addr));
        }
        assert!(!limiter.check(addr));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_resets_after_window_elapses() {
        let limiter = RateLimiter::new();
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..RATE_LIMIT_MAX {
            assert!(limiter.check(addr));
        }
        assert!(!limiter.check(addr));
        tokio::time::advance(RATE_LIMIT_WINDOW + Duration::from_secs(1)).await;
        assert!(limiter.check(addr));
    }

    #[tokio::test]
    async fn rate_limiter_tracks_addresses_independently() {
        let limiter = RateLimiter::new();
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();
        for _ in 0..RATE_LIMIT_MAX {
            assert!(limiter.check(a));
        }
        assert!(!limiter.check(a));
        assert!(limiter.check(b));
    }
}
