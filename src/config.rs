//! Server configuration.
//!
//! The library consumes a fully resolved [`Config`]. Turning command-line
//! flags into one is the binary's job.

use crate::storage::{EvictionPolicy, DEFAULT_DATABASES};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid memory size '{0}'")]
    InvalidSize(String),

    #[error("unknown eviction policy '{0}'")]
    InvalidPolicy(String),

    #[error("database count must be at least 1")]
    NoDatabases,

    #[error("tick frequency must be between 1 and {max} Hz, got {got}")]
    InvalidTickRate { got: u32, max: u32 },
}

/// Highest accepted maintenance tick frequency.
pub const MAX_TICK_HZ: u32 = 500;

pub const DEFAULT_OUTPUT_PAUSE_LIMIT: usize = 1024 * 1024;

pub const DEFAULT_PUBSUB_OUTPUT_LIMIT: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Number of logical databases
    pub databases: usize,
    /// Memory bound in bytes, 0 for unlimited
    pub max_memory: usize,
    pub eviction_policy: EvictionPolicy,
    /// Maintenance ticks per second
    pub tick_hz: u32,
    /// Unsent reply bytes above which the reactor stops reading a client
    pub output_pause_limit: usize,
    /// Unsent bytes at which a subscriber is disconnected, 0 for unlimited
    pub pubsub_output_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            databases: DEFAULT_DATABASES,
            max_memory: 0,
            eviction_policy: EvictionPolicy::NoEviction,
            tick_hz: 10,
            output_pause_limit: DEFAULT_OUTPUT_PAUSE_LIMIT,
            pubsub_output_limit: DEFAULT_PUBSUB_OUTPUT_LIMIT,
        }
    }
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Time between maintenance ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_hz.max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.databases == 0 {
            return Err(ConfigError::NoDatabases);
        }
        if self.tick_hz == 0 || self.tick_hz > MAX_TICK_HZ {
            return Err(ConfigError::InvalidTickRate {
                got: self.tick_hz,
                max: MAX_TICK_HZ,
            });
        }
        Ok(())
    }
}

/// Parses a byte count such as `1048576`, `512kb`, `100mb` or `2GB`.
pub fn parse_memory_size(input: &str) -> Result<usize, ConfigError> {
    let s = input.trim().to_ascii_lowercase();
    let (digits, multiplier) = if let Some(n) = s.strip_suffix("gb") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("mb") {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("kb") {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('b') {
        (n, 1)
    } else {
        (s.as_str(), 1)
    };

    digits
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| ConfigError::InvalidSize(input.to_string()))
}

/// Parses an eviction policy name.
pub fn parse_eviction_policy(input: &str) -> Result<EvictionPolicy, ConfigError> {
    input
        .parse()
        .map_err(|_| ConfigError::InvalidPolicy(input.to_string()))
}
