//! SRT Loopback Library
//!
//! Shared functionality for the loopback tool: configuration, the simulated
//! link driving the buffers, and statistics display.

pub mod config;
pub mod loopback;
pub mod stats;

pub use config::{ChannelConfig, ConfigError, LoopbackConfig};
pub use loopback::{LinkSnapshot, LinkStats, Loopback};
pub use stats::{display_compact_stats, display_link_stats, format_bandwidth, format_bytes};
