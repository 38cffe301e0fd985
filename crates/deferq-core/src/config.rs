//! Service configuration.

use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Externally tunable settings for the deferral service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Queue to consume from.
    pub queue_name: String,

    /// Broker endpoint or connection string.
    pub connection: String,

    /// Expected duration of one unit of work.
    pub expected_processing: Duration,

    /// Length of one processing slice between progress deferrals.
    pub slice: Duration,

    /// Worker pool size.
    pub workers: usize,

    /// Watchdog tick period.
    pub watchdog_interval: Duration,

    /// Messages inspected per watchdog tick.
    pub peek_window: usize,

    /// Backoff policy for broker operations in the worker loop.
    pub retry: RetryPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            queue_name: "files".to_string(),
            connection: String::new(),
            expected_processing: Duration::from_secs(3 * 60),
            slice: Duration::from_secs(30),
            workers: 3,
            watchdog_interval: Duration::from_secs(30),
            peek_window: 10,
            retry: RetryPolicy::default(),
        }
    }
}

impl ServiceConfig {
    /// Deadline budget for one message: twice the expected duration. The
    /// watchdog polls coarsely, so a message that is merely slow must not
    /// look the same as one that is stuck.
    pub fn completion_budget(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.expected_processing.as_millis() as i64 * 2)
    }

    /// Read settings from `DEFERQ_*` environment variables. Unset variables
    /// keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("DEFERQ_QUEUE") {
            config.queue_name = v;
        }
        if let Ok(v) = std::env::var("DEFERQ_CONNECTION") {
            config.connection = v;
        }
        if let Ok(v) = std::env::var("DEFERQ_EXPECTED_PROCESSING_SECS") {
            config.expected_processing =
                Duration::from_secs(parse(&v, "DEFERQ_EXPECTED_PROCESSING_SECS")?);
        }
        if let Ok(v) = std::env::var("DEFERQ_SLICE_SECS") {
            config.slice = Duration::from_secs(parse(&v, "DEFERQ_SLICE_SECS")?);
        }
        if let Ok(v) = std::env::var("DEFERQ_WORKERS") {
            config.workers = parse(&v, "DEFERQ_WORKERS")?;
        }
        if let Ok(v) = std::env::var("DEFERQ_WATCHDOG_INTERVAL_SECS") {
            config.watchdog_interval =
                Duration::from_secs(parse(&v, "DEFERQ_WATCHDOG_INTERVAL_SECS")?);
        }
        if let Ok(v) = std::env::var("DEFERQ_PEEK_WINDOW") {
            config.peek_window = parse(&v, "DEFERQ_PEEK_WINDOW")?;
        }
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid value for {var}: {value:?}")]
pub struct ConfigError {
    var: &'static str,
    value: String,
}

fn parse<T: FromStr>(value: &str, var: &'static str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError {
        var,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tuning_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.workers, 3);
        assert_eq!(config.expected_processing, Duration::from_secs(180));
        assert_eq!(config.slice, Duration::from_secs(30));
        assert_eq!(config.watchdog_interval, Duration::from_secs(30));
        assert_eq!(config.peek_window, 10);
    }

    #[test]
    fn completion_budget_is_twice_the_expected_duration() {
        let config = ServiceConfig::default();
        assert_eq!(config.completion_budget(), chrono::Duration::seconds(360));
    }
}
