//! Buffer configuration
//!
//! Loadable from TOML; every field has a default so partial files work.

use crate::packet::MAX_PAYLOAD_SIZE;
use crate::tsbpd::DriftTracer;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Send buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendConfig {
    /// Blocks allocated up front and added on each growth
    #[serde(default = "default_initial_blocks")]
    pub initial_blocks: usize,
    /// Payload bytes per block
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
    /// Upper bound on blocks; growth beyond it fails
    #[serde(default = "default_max_blocks")]
    pub max_blocks: usize,
}

fn default_initial_blocks() -> usize {
    32
}

fn default_payload_size() -> usize {
    MAX_PAYLOAD_SIZE
}

fn default_max_blocks() -> usize {
    65536
}

impl Default for SendConfig {
    fn default() -> Self {
        SendConfig {
            initial_blocks: default_initial_blocks(),
            payload_size: default_payload_size(),
            max_blocks: default_max_blocks(),
        }
    }
}

/// Receive buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecvConfig {
    /// Slots in the receive window
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Units in the pool; defaults to the capacity
    #[serde(default)]
    pub unit_pool_size: Option<usize>,
    /// Payload bytes per unit
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
}

fn default_capacity() -> usize {
    8192
}

impl RecvConfig {
    pub fn unit_pool_size(&self) -> usize {
        self.unit_pool_size.unwrap_or(self.capacity)
    }
}

impl Default for RecvConfig {
    fn default() -> Self {
        RecvConfig {
            capacity: default_capacity(),
            unit_pool_size: None,
            payload_size: default_payload_size(),
        }
    }
}

/// Loss list configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LossConfig {
    #[serde(default = "default_list_size")]
    pub send_list_size: usize,
    #[serde(default = "default_list_size")]
    pub recv_list_size: usize,
    /// Loss report cycles a fresh gap waits before it is reported
    #[serde(default)]
    pub reorder_tolerance: u32,
}

fn default_list_size() -> usize {
    8192
}

impl Default for LossConfig {
    fn default() -> Self {
        LossConfig {
            send_list_size: default_list_size(),
            recv_list_size: default_list_size(),
            reorder_tolerance: 0,
        }
    }
}

/// Timestamp-based delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TsbpdConfig {
    #[serde(default = "default_tsbpd_enabled")]
    pub enabled: bool,
    /// Receiver latency in milliseconds
    #[serde(default = "default_latency")]
    pub latency_ms: u64,
    /// Drift samples averaged per correction
    #[serde(default = "default_drift_span")]
    pub drift_span: u32,
    /// Largest drift kept out of the time base, in microseconds
    #[serde(default = "default_max_drift")]
    pub max_drift_us: i64,
}

fn default_tsbpd_enabled() -> bool {
    true
}

fn default_latency() -> u64 {
    120
}

fn default_drift_span() -> u32 {
    1000
}

fn default_max_drift() -> i64 {
    5000
}

impl TsbpdConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn drift_tracer(&self) -> DriftTracer {
        DriftTracer::new(self.drift_span, self.max_drift_us)
    }
}

impl Default for TsbpdConfig {
    fn default() -> Self {
        TsbpdConfig {
            enabled: default_tsbpd_enabled(),
            latency_ms: default_latency(),
            drift_span: default_drift_span(),
            max_drift_us: default_max_drift(),
        }
    }
}

/// Combined buffer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BufferConfig {
    #[serde(default)]
    pub send: SendConfig,
    #[serde(default)]
    pub recv: RecvConfig,
    #[serde(default)]
    pub loss: LossConfig,
    #[serde(default)]
    pub tsbpd: TsbpdConfig,
}

impl BufferConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: BufferConfig = toml::from_str(contents)?;
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
        let sizes = [
            ("send.initial_blocks", self.send.initial_blocks),
            ("send.payload_size", self.send.payload_size),
            ("send.max_blocks", self.send.max_blocks),
            ("recv.payload_size", self.recv.payload_size),
            ("loss.send_list_size", self.loss.send_list_size),
            ("loss.recv_list_size", self.loss.recv_list_size),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{} must not be zero", name)));
        }

        if self.send.max_blocks < self.send.initial_blocks {
            return Err(ConfigError::Invalid(format!(
                "send.max_blocks ({}) is below send.initial_blocks ({})",
                self.send.max_blocks, self.send.initial_blocks
            )));
        }
        if self.recv.capacity < 2 {
            return Err(ConfigError::Invalid(format!(
                "recv.capacity must be at least 2, got {}",
                self.recv.capacity
            )));
        }
        if self.recv.unit_pool_size() < self.recv.capacity {
            return Err(ConfigError::Invalid(format!(
                "recv.unit_pool_size ({}) is smaller than recv.capacity ({})",
                self.recv.unit_pool_size(),
                self.recv.capacity
            )));
        }
        if self.tsbpd.drift_span == 0 {
            return Err(ConfigError::Invalid("tsbpd.drift_span must not be zero".into()));
        }
        Ok(())
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

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
