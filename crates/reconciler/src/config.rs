//! Reconciler configuration.
//!
//! Durations are written in milliseconds:
//!
//! ```toml
//! workers = 4
//! resync_period = 900000
//! requeue_delay = 1000
//!
//! [retry]
//! attempts = 5
//! interval = 10000
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bounded, fixed-interval retry for writes that must land before the
/// reconcile can report success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Delay between attempts.
    #[serde(with = "duration_ms", default = "default_interval")]
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            interval: default_interval(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// A single attempt, no waiting.
    #[must_use]
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Configuration for the reconciler and its controller runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Retry for status updates and content creation.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Worker tasks per queue.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How often every cached key is re-queued.
    #[serde(with = "duration_ms", default = "default_resync_period")]
    pub resync_period: Duration,

    /// Delay before a key that failed with a retryable error is re-queued.
    #[serde(with = "duration_ms", default = "default_requeue_delay")]
    pub requeue_delay: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            workers: default_workers(),
            resync_period: default_resync_period(),
            requeue_delay: default_requeue_delay(),
        }
    }
}

impl ReconcilerConfig {
    /// Set the retry policy.
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the number of workers per queue.
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the resync period.
    #[must_use]
    pub const fn resync_period(mut self, period: Duration) -> Self {
        self.resync_period = period;
        self
    }

    /// Set the requeue delay.
    #[must_use]
    pub const fn requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the document does not parse or fails
    /// validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::invalid_config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `VSNAP_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a variable is not a number or the result
    /// fails validation.
    pub fn from_env(self) -> Result<Self> {
        self.from_env_with(|name| std::env::var(name).ok())
    }

    /// Apply `VSNAP_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a variable is not a number or the result
    /// fails validation.
    pub fn from_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(attempts) = parse_var(&lookup, "VSNAP_RETRY_ATTEMPTS")? {
            self.retry.attempts = attempts;
        }
        if let Some(ms) = parse_var(&lookup, "VSNAP_RETRY_INTERVAL_MS")? {
            self.retry.interval = Duration::from_millis(ms);
        }
        if let Some(workers) = parse_var(&lookup, "VSNAP_WORKERS")? {
            self.workers = workers;
        }
        if let Some(ms) = parse_var(&lookup, "VSNAP_RESYNC_PERIOD_MS")? {
            self.resync_period = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "VSNAP_REQUEUE_DELAY_MS")? {
            self.requeue_delay = Duration::from_millis(ms);
        }
        self.validate()?;
        Ok(self)
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if there are no retry attempts, no workers, or
    /// a zero resync period.
    pub fn validate(&self) -> Result<()> {
        if self.retry.attempts == 0 {
            return Err(Error::invalid_config("retry.attempts must be at least 1"));
        }
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        if self.resync_period.is_zero() {
            return Err(Error::invalid_config("resync_period must be positive"));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::invalid_config(format!("{name}: '{raw}' is not a number")))
        })
        .transpose()
}

const fn default_attempts() -> u32 {
    5
}

const fn default_interval() -> Duration {
    Duration::from_secs(10)
}

const fn default_workers() -> usize {
    10
}

const fn default_resync_period() -> Duration {
    Duration::from_secs(15 * 60)
}

const fn default_requeue_delay() -> Duration {
    Duration::from_secs(1)
}

/// Serialization helper for Duration as milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
