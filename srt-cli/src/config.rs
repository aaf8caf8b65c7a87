//! Configuration file support for the loopback tool

use serde::{Deserialize, Serialize};
use srt_buffers::BufferConfig;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Simulated link parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Drop every Nth original transmission; 0 disables loss
    #[serde(default)]
    pub loss_every: u64,
    /// Bytes per application message
    #[serde(default = "default_message_size")]
    pub message_size: usize,
    /// Messages handed to the sender per tick
    #[serde(default = "default_messages_per_tick")]
    pub messages_per_tick: usize,
    /// Simulated time per tick in microseconds
    #[serde(default = "default_tick_us")]
    pub tick_us: u64,
    /// Ticks between periodic loss reports
    #[serde(default = "default_nak_period")]
    pub nak_period_ticks: u64,
    /// Message time-to-live in milliseconds; unset never expires
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    /// Sequence number of the first packet
    #[serde(default)]
    pub initial_seq: u32,
}

fn default_message_size() -> usize {
    1316
}

fn default_messages_per_tick() -> usize {
    8
}

fn default_tick_us() -> u64 {
    1000
}

fn default_nak_period() -> u64 {
    20
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            loss_every: 0,
            message_size: default_message_size(),
            messages_per_tick: default_messages_per_tick(),
            tick_us: default_tick_us(),
            nak_period_ticks: default_nak_period(),
            ttl_ms: None,
            initial_seq: 0,
        }
    }
}

impl ChannelConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_micros(self.tick_us)
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

/// Combined configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoopbackConfig {
    #[serde(default)]
    pub buffers: BufferConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Statistics interval in milliseconds of simulated time
    #[serde(default = "default_stats_interval")]
    pub stats_interval_ms: u64,
}

fn default_stats_interval() -> u64 {
    1000
}

impl LoopbackConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: LoopbackConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.buffers.validate()?;
        if self.channel.message_size == 0 {
            return Err(ConfigError::Invalid(
                "channel.message_size must not be zero".into(),
            ));
        }
        if self.channel.messages_per_tick == 0 {
            return Err(ConfigError::Invalid(
                "channel.messages_per_tick must not be zero".into(),
            ));
        }
        if self.channel.tick_us == 0 {
            return Err(ConfigError::Invalid("channel.tick_us must not be zero".into()));
        }
        if self.channel.loss_every == 1 {
            return Err(ConfigError::Invalid(
                "channel.loss_every = 1 would drop every packet".into(),
            ));
        }
        Ok(())
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Buffer configuration: {0}")]
    Buffers(#[from] srt_buffers::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
