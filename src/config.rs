//! Pool configuration.
//!
//! Defaults suit a web process that only pushes notifications: one worker per
//! core, an unbounded queue and a half-second idle poll. Everything can be
//! overridden in code or from `DISPATCH_*` environment variables.

use super::{errors::ConfigError, model::Overflow};
use std::{str::FromStr, time::Duration};

pub const ENV_WORKERS: &str = "DISPATCH_WORKERS";
pub const ENV_QUEUE_CAPACITY: &str = "DISPATCH_QUEUE_CAPACITY";
pub const ENV_OVERFLOW: &str = "DISPATCH_OVERFLOW";
pub const ENV_POLL_INTERVAL_MS: &str = "DISPATCH_POLL_INTERVAL_MS";
pub const ENV_THREAD_PREFIX: &str = "DISPATCH_THREAD_PREFIX";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub workers: usize,
    /// `None` means unbounded.
    pub capacity: Option<usize>,
    pub overflow: Overflow,
    /// How long an idle worker waits on the queue before re-checking the
    /// running flag.
    pub poll_interval: Duration,
    pub thread_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            capacity: None,
            overflow: Overflow::Block,
            poll_interval: Duration::from_millis(500),
            thread_prefix: "dispatch-worker".to_owned(),
        }
    }
}

impl Config {
    /// One worker, so effects are observed in submission order.
    pub fn single_lane() -> Self {
        Self {
            workers: 1,
            ..Default::default()
        }
    }

    pub fn bounded(workers: usize, capacity: usize, overflow: Overflow) -> Self {
        Self {
            workers,
            capacity: Some(capacity),
            overflow,
            ..Default::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_overflow(mut self, overflow: Overflow) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.capacity == Some(0) {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }

    /// Reads overrides from the process environment on top of
    /// [`Config::default`].
    ///
    /// Call `dotenvy::dotenv().ok()` first to pick up a local `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_WORKERS) {
            config.workers = parse_var(ENV_WORKERS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_QUEUE_CAPACITY) {
            // Spellings of "no limit".
            config.capacity = match raw.trim().to_ascii_lowercase().as_str() {
                "" | "none" | "unbounded" => None,
                _ => Some(parse_var(ENV_QUEUE_CAPACITY, &raw)?),
            };
        }
        if let Some(raw) = lookup(ENV_OVERFLOW) {
            config.overflow = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            let ms: u64 = parse_var(ENV_POLL_INTERVAL_MS, &raw)?;
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup(ENV_THREAD_PREFIX) {
            if !raw.trim().is_empty() {
                config.thread_prefix = raw.trim().to_owned();
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidVar {
        var,
        value: raw.to_owned(),
    })
}
