//! Runtime configuration for the processor and the sweeper.

use std::env::var;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

use crate::domain::RetryPolicy;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxConfig {
    /// Delay between processor cycles.
    pub poll_interval: Duration,

    /// Maximum messages fetched per cycle.
    pub batch_size: usize,

    /// Delay between retention sweeps.
    pub sweep_interval: Duration,

    /// How long processed messages are kept.
    pub retention_days: u32,

    /// Claim lease on fetched messages.
    pub lease: Duration,

    pub retry_policy: RetryPolicy,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2_000),
            batch_size: 100,
            sweep_interval: Duration::from_secs(3_600),
            retention_days: 30,
            lease: Duration::from_secs(30),
            retry_policy: RetryPolicy::immediate(),
        }
    }
}

impl OutboxConfig {
    /// Read `OUTBOX_*` variables, loading `.env` first when present.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv();
        Self::from_lookup(|key| var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let defaults = Self::default();

        let poll_ms = parse(&lookup, "OUTBOX_POLL_INTERVAL_MS")?;
        let batch_size = parse::<usize, _>(&lookup, "OUTBOX_BATCH_SIZE")?;
        let sweep_secs = parse(&lookup, "OUTBOX_SWEEP_INTERVAL_SECS")?;
        let retention_days = parse::<u32, _>(&lookup, "OUTBOX_RETENTION_DAYS")?;
        let lease_secs = parse(&lookup, "OUTBOX_LEASE_SECS")?;
        let retry_base_ms = parse::<u64, _>(&lookup, "OUTBOX_RETRY_BASE_MS")?.unwrap_or(0);
        let retry_multiplier = parse::<f64, _>(&lookup, "OUTBOX_RETRY_MULTIPLIER")?.unwrap_or(2.0);
        let retry_max_ms = parse::<u64, _>(&lookup, "OUTBOX_RETRY_MAX_MS")?.unwrap_or(300_000);

        if batch_size == Some(0) {
            return Err(invalid("OUTBOX_BATCH_SIZE", "0"));
        }
        if retention_days == Some(0) {
            return Err(invalid("OUTBOX_RETENTION_DAYS", "0"));
        }
        if !retry_multiplier.is_finite() || retry_multiplier < 1.0 {
            return Err(invalid(
                "OUTBOX_RETRY_MULTIPLIER",
                &retry_multiplier.to_string(),
            ));
        }

        let retry_policy = if retry_base_ms == 0 {
            RetryPolicy::immediate()
        } else {
            RetryPolicy::exponential(
                Duration::from_millis(retry_base_ms),
                retry_multiplier,
                Duration::from_millis(retry_max_ms.max(retry_base_ms)),
            )
        };

        Ok(Self {
            poll_interval: poll_ms.map_or(defaults.poll_interval, Duration::from_millis),
            batch_size: batch_size.unwrap_or(defaults.batch_size),
            sweep_interval: sweep_secs.map_or(defaults.sweep_interval, Duration::from_secs),
            retention_days: retention_days.unwrap_or(defaults.retention_days),
            lease: lease_secs.map_or(defaults.lease, Duration::from_secs),
            retry_policy,
        })
    }

    /// Retention window as a signed duration for cutoff arithmetic.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(key, &raw)),
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}
