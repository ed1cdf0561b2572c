use std::{env, str::FromStr, time::Duration};

use thiserror::Error;

use crate::ride::DEFAULT_CHANNEL_CAPACITY;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub snapshot_interval_ms: u64,
    pub reap_interval_secs: u64,
    pub stale_after_secs: u64,
    pub channel_capacity: usize,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 3001,
            snapshot_interval_ms: 2000,
            reap_interval_secs: 60,
            stale_after_secs: 120,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 60,
        }
    }
}

impl Config {
    /// Loads `.env` if present, then reads every setting from the process
    /// environment. Unset variables fall back to their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            server_host: lookup("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: parse_or(&lookup, "SERVER_PORT", defaults.server_port)?,
            snapshot_interval_ms: parse_or(
                &lookup,
                "SNAPSHOT_INTERVAL_MS",
                defaults.snapshot_interval_ms,
            )?,
            reap_interval_secs: parse_or(&lookup, "REAP_INTERVAL_SECS", defaults.reap_interval_secs)?,
            stale_after_secs: parse_or(&lookup, "STALE_AFTER_SECS", defaults.stale_after_secs)?,
            channel_capacity: parse_or(&lookup, "CHANNEL_CAPACITY", defaults.channel_capacity)?,
            heartbeat_interval_secs: parse_or(
                &lookup,
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval_secs,
            )?,
            heartbeat_timeout_secs: parse_or(
                &lookup,
                "HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout_secs,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("SNAPSHOT_INTERVAL_MS", self.snapshot_interval_ms),
            ("REAP_INTERVAL_SECS", self.reap_interval_secs),
            ("STALE_AFTER_SECS", self.stale_after_secs),
            ("CHANNEL_CAPACITY", self.channel_capacity as u64),
            ("HEARTBEAT_INTERVAL_SECS", self.heartbeat_interval_secs),
            ("HEARTBEAT_TIMEOUT_SECS", self.heartbeat_timeout_secs),
        ];
        match nonzero.into_iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ConfigError::Zero(name)),
            None => Ok(()),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
