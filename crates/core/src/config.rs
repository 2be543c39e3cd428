use serde::Deserialize;

/// Tunables for the dispatch core. The documented defaults match the
/// production constants; every field can be overridden through a `VIGIL_*`
/// environment variable.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Bounded queue length per subscription; oldest entries are evicted
    /// past this point.
    pub queue_capacity: usize,
    /// Alerts returned by a poll when the caller does not ask for a count.
    pub poll_default: usize,
    /// Hard ceiling on a single poll.
    pub poll_max: usize,
    /// Subscription lifetime applied when the subscribe request carries no
    /// parseable duration.
    pub default_ttl_minutes: i64,
    /// Undelivered push messages buffered per connection; further failures
    /// are not buffered once full.
    pub retry_buffer_capacity: usize,
    /// Delivery attempts per buffered message before it is dropped.
    pub max_delivery_attempts: u32,
    /// Idle time after which a connection is considered stale.
    pub stale_after_secs: i64,
    pub expiry_sweep_secs: u64,
    pub connection_sweep_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            poll_default: 50,
            poll_max: 100,
            default_ttl_minutes: 240,
            retry_buffer_capacity: 10,
            max_delivery_attempts: 3,
            stale_after_secs: 300,
            expiry_sweep_secs: 60,
            connection_sweep_secs: 30,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Self {
            queue_capacity: env_or("VIGIL_QUEUE_CAPACITY", defaults.queue_capacity),
            poll_default: env_or("VIGIL_POLL_DEFAULT", defaults.poll_default),
            poll_max: env_or("VIGIL_POLL_MAX", defaults.poll_max),
            default_ttl_minutes: env_or("VIGIL_DEFAULT_TTL_MINUTES", defaults.default_ttl_minutes),
            retry_buffer_capacity: env_or(
                "VIGIL_RETRY_BUFFER_CAPACITY",
                defaults.retry_buffer_capacity,
            ),
            max_delivery_attempts: env_or(
                "VIGIL_MAX_DELIVERY_ATTEMPTS",
                defaults.max_delivery_attempts,
            ),
            stale_after_secs: env_or("VIGIL_STALE_AFTER_SECS", defaults.stale_after_secs),
            expiry_sweep_secs: env_or("VIGIL_EXPIRY_SWEEP_SECS", defaults.expiry_sweep_secs),
            connection_sweep_secs: env_or(
                "VIGIL_CONNECTION_SWEEP_SECS",
                defaults.connection_sweep_secs,
            ),
        }
    }

    pub fn default_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.default_ttl_minutes)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs)
    }

    pub fn expiry_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.expiry_sweep_secs)
    }

    pub fn connection_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connection_sweep_secs)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(fallback)
}
