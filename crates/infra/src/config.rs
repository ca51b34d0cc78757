//! Pipeline configuration, read from the environment.

use std::time::Duration;

use thiserror::Error;

pub const ENV_REDIS_URL: &str = "REDIS_URL";
pub const ENV_REDIS_HOST: &str = "REDIS_HOST";
pub const ENV_REDIS_PORT: &str = "REDIS_PORT";
pub const ENV_BLOCK_MS: &str = "EVENTS_BLOCK_MS";
pub const ENV_RETRY_BACKOFF_MS: &str = "EVENTS_RETRY_BACKOFF_MS";
pub const ENV_READ_COUNT: &str = "EVENTS_READ_COUNT";
pub const ENV_CHANNEL_CAPACITY: &str = "EVENTS_CHANNEL_CAPACITY";
pub const ENV_REDELIVERY_INTERVAL_MS: &str = "EVENTS_REDELIVERY_INTERVAL_MS";
pub const ENV_STATS_INTERVAL_SECS: &str = "STATS_INTERVAL_SECS";

const MIN_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub redis_url: String,
    /// Wait window of a blocking read for new entries.
    pub block: Duration,
    /// Fixed pause after a transient read error.
    pub retry_backoff: Duration,
    /// Max entries per read.
    pub read_count: usize,
    /// Capacity of the reader-to-processor hand-off channel.
    pub channel_capacity: usize,
    /// How often a worker re-reads its own pending entries. `None` disables it.
    pub redelivery_interval: Option<Duration>,
    /// Stats log interval of the worker binary.
    pub stats_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            block: Duration::from_millis(1000),
            retry_backoff: Duration::from_millis(5000),
            read_count: 10,
            channel_capacity: 100,
            redelivery_interval: Some(Duration::from_millis(30_000)),
            stats_interval: Duration::from_secs(60),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let redis_url = match lookup(ENV_REDIS_URL).filter(|v| !v.is_empty()) {
            Some(url) => url,
            None => {
                let host = lookup(ENV_REDIS_HOST).unwrap_or_else(|| "localhost".to_string());
                let port = parse_or(&lookup, ENV_REDIS_PORT, 6379u16)?;
                format!("redis://{host}:{port}")
            }
        };

        let block = Duration::from_millis(positive(&lookup, ENV_BLOCK_MS, 1000)?);
        let retry_backoff = Duration::from_millis(positive(&lookup, ENV_RETRY_BACKOFF_MS, 5000)?);
        let read_count = positive(&lookup, ENV_READ_COUNT, defaults.read_count as u64)? as usize;
        let channel_capacity =
            positive(&lookup, ENV_CHANNEL_CAPACITY, defaults.channel_capacity as u64)? as usize;
        let redelivery_interval = match parse_or(&lookup, ENV_REDELIVERY_INTERVAL_MS, 30_000u64)? {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let stats_interval = Duration::from_secs(positive(&lookup, ENV_STATS_INTERVAL_SECS, 60)?);

        Ok(Self {
            redis_url,
            block,
            retry_backoff,
            read_count,
            channel_capacity,
            redelivery_interval,
            stats_interval,
        })
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Raised to at least 1ms.
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block.max(MIN_WAIT);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff.max(MIN_WAIT);
        self
    }

    pub fn with_read_count(mut self, count: usize) -> Self {
        self.read_count = count.max(1);
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn with_redelivery_interval(mut self, interval: Option<Duration>) -> Self {
        self.redelivery_interval = interval;
        self
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn positive<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(lookup, key, default)? {
        0 => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
        }),
        n => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn redis_url_is_built_from_host_and_port() {
        let config =
            PipelineConfig::from_lookup(lookup(&[(ENV_REDIS_HOST, "cache"), (ENV_REDIS_PORT, "6380")]))
                .unwrap();
        assert_eq!(config.redis_url, "redis://cache:6380");

        let config = PipelineConfig::from_lookup(lookup(&[
            (ENV_REDIS_URL, "redis://explicit:1"),
            (ENV_REDIS_HOST, "ignored"),
        ]))
        .unwrap();
        assert_eq!(config.redis_url, "redis://explicit:1");
    }

    #[test]
    fn zero_redelivery_interval_disables_scans() {
        let config =
            PipelineConfig::from_lookup(lookup(&[(ENV_REDELIVERY_INTERVAL_MS, "0")])).unwrap();
        assert_eq!(config.redelivery_interval, None);
    }

    #[test]
    fn invalid_and_zero_values_are_rejected() {
        let err = PipelineConfig::from_lookup(lookup(&[(ENV_BLOCK_MS, "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: ENV_BLOCK_MS,
                value: "soon".into()
            }
        );

        assert!(PipelineConfig::from_lookup(lookup(&[(ENV_READ_COUNT, "0")])).is_err());
        assert!(PipelineConfig::from_lookup(lookup(&[(ENV_RETRY_BACKOFF_MS, "0")])).is_err());
        assert!(PipelineConfig::from_lookup(lookup(&[(ENV_CHANNEL_CAPACITY, "0")])).is_err());
        assert!(PipelineConfig::from_lookup(lookup(&[(ENV_REDIS_PORT, "99999")])).is_err());
    }

    #[test]
    fn builders_never_produce_zero_waits() {
        let config = PipelineConfig::default()
            .with_block(Duration::ZERO)
            .with_retry_backoff(Duration::ZERO)
            .with_read_count(0)
            .with_channel_capacity(0);

        assert_eq!(config.block, Duration::from_millis(1));
        assert_eq!(config.retry_backoff, Duration::from_millis(1));
        assert_eq!(config.read_count, 1);
        assert_eq!(config.channel_capacity, 1);

        let config = PipelineConfig::default().with_block(Duration::from_millis(20));
        assert_eq!(config.block, Duration::from_millis(20));
    }
}
