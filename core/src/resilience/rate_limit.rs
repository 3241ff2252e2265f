//! Request rate limiting
//!
//! Sliding window counters, consulted before every client store/retrieve and
//! every signed peer request:
//! - per client IP
//! - per sender snode pubkey

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Configuration for rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window for a single client IP
    pub max_client_requests: u32,
    /// Maximum requests per window for a single snode
    pub max_snode_requests: u32,
    /// Window duration
    pub window_duration: Duration,
    /// Whether rate limiting is enabled
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_client_requests: 100,
            max_snode_requests: 300,
            window_duration: Duration::from_secs(60),
            enabled: true,
        }
    }
}

/// Sliding window counter
#[derive(Debug)]
struct SlidingWindow {
    requests: Vec<Instant>,
    max_requests: u32,
    window_duration: Duration,
}

impl SlidingWindow {
    fn new(max_requests: u32, window_duration: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window_duration,
        }
    }

    /// Check if a request is allowed and record it if so
    fn check_and_record(&mut self, now: Instant) -> bool {
        let cutoff = now.checked_sub(self.window_duration).unwrap_or(now);
        self.requests.retain(|&t| t > cutoff);

        if self.requests.len() >= self.max_requests as usize {
            return false;
        }
        self.requests.push(now);
        true
    }
}

/// Rate limiter over both client and snode identities.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: HashMap<String, SlidingWindow>,
    snodes: HashMap<String, SlidingWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: HashMap::new(),
            snodes: HashMap::new(),
        }
    }

    /// Should this client request be rejected with 429?
    pub fn should_rate_limit_client(&mut self, client_ip: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        let window = self.clients.entry(client_ip.to_string()).or_insert_with(|| {
            SlidingWindow::new(self.config.max_client_requests, self.config.window_duration)
        });
        !window.check_and_record(Instant::now())
    }

    /// Should this signed peer request be rejected with 429?
    pub fn should_rate_limit_snode(&mut self, snode_address: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        let window = self.snodes.entry(snode_address.to_string()).or_insert_with(|| {
            SlidingWindow::new(self.config.max_snode_requests, self.config.window_duration)
        });
        !window.check_and_record(Instant::now())
    }

    /// Drop windows that have gone fully idle. Called from the maintenance
    /// sweep to bound memory.
    pub fn prune_idle(&mut self) {
        let now = Instant::now();
        let window = self.config.window_duration;
        let cutoff = now.checked_sub(window).unwrap_or(now);
        self.clients
            .retain(|_, w| w.requests.iter().any(|&t| t > cutoff));
        self.snodes
            .retain(|_, w| w.requests.iter().any(|&t| t > cutoff));
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> RateLimitConfig {
        RateLimitConfig {
            max_client_requests: 3,
            max_snode_requests: 2,
            window_duration: Duration::from_secs(60),
            enabled: true,
        }
    }

    #[test]
    fn test_allows_under_limit() {
        let mut limiter = RateLimiter::new(small_config());
        for _ in 0..3 {
            assert!(!limiter.should_rate_limit_client("1.2.3.4"));
        }
    }

    #[test]
    fn test_limits_over_limit() {
        let mut limiter = RateLimiter::new(small_config());
        for _ in 0..3 {
            limiter.should_rate_limit_client("1.2.3.4");
        }
        assert!(limiter.should_rate_limit_client("1.2.3.4"));
    }

    #[test]
    fn test_clients_are_independent() {
        let mut limiter = RateLimiter::new(small_config());
        for _ in 0..3 {
            limiter.should_rate_limit_client("1.2.3.4");
        }
        assert!(!limiter.should_rate_limit_client("5.6.7.8"));
    }

    #[test]
    fn test_snode_limit_independent_of_client_limit() {
        let mut limiter = RateLimiter::new(small_config());
        assert!(!limiter.should_rate_limit_snode("addr"));
        assert!(!limiter.should_rate_limit_snode("addr"));
        assert!(limiter.should_rate_limit_snode("addr"));
        assert!(!limiter.should_rate_limit_client("addr"));
    }

    #[test]
    fn test_disabled_allows_everything() {
        let mut config = small_config();
        config.enabled = false;
        let mut limiter = RateLimiter::new(config);
        for _ in 0..100 {
            assert!(!limiter.should_rate_limit_client("1.2.3.4"));
        }
    }

    #[test]
    fn test_prune_idle_keeps_active() {
        let mut limiter = RateLimiter::new(small_config());
        limiter.should_rate_limit_client("1.2.3.4");
        limiter.prune_idle();
        assert_eq!(limiter.clients.len(), 1);
    }
}
