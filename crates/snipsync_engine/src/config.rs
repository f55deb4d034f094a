//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for one sync coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Consumer tag this coordinator serves. Also the default cache
    /// namespace.
    pub tag: String,
    /// Cache key under which the snapshot is persisted.
    pub cache_key: String,
    /// Live-channel reconnect configuration.
    pub retry: RetryConfig,
    /// How long to keep producers alive after the last observer is gone.
    pub grace_period: Duration,
}

impl SyncConfig {
    /// Creates a configuration for the given consumer tag.
    pub fn new(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        let cache_key = format!("snipsync/{tag}");
        Self {
            tag,
            cache_key,
            retry: RetryConfig::default(),
            grace_period: Duration::from_secs(5),
        }
    }

    /// Overrides the cache key.
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = key.into();
        self
    }

    /// Sets the reconnect configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the teardown grace period.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Configuration for live-channel reconnect behavior.
///
/// The reconnect policy is a fixed delay with a bounded attempt count; a
/// successful open resets the counter.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl RetryConfig {
    /// Creates a reconnect configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::from_secs(3),
        }
    }

    /// Creates a configuration with no reconnects.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            delay: Duration::ZERO,
        }
    }

    /// Sets the delay between attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
