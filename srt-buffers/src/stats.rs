//! Buffer instrumentation
//!
//! Moving averages of buffer occupancy and the input-rate estimate consumed
//! by the external flow controller.

use crate::packet::DATA_HEADER_OVERHEAD;
use std::time::{Duration, Instant};

/// Samples per second taken by [`AvgBufSize`]
const SAMPLING_RATE: u32 = 40;

/// Fast-start sampling period of the input-rate estimator
pub const INPUT_RATE_FAST_START: Duration = Duration::from_millis(500);

/// Steady-state sampling period of the input-rate estimator
pub const INPUT_RATE_RUNNING: Duration = Duration::from_secs(1);

/// Packet count that closes a fast-start period early
const INPUT_RATE_MAX_PACKETS: u64 = 2000;

/// Initial input rate estimate: 1 Gbps expressed in bytes per second
pub const INPUT_RATE_INITIAL: u64 = 1_000_000_000 / 8;

/// Occupancy snapshot of a buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferSize {
    pub packets: usize,
    pub bytes: usize,
    /// Span between the oldest and newest buffered packet, plus one
    /// millisecond when the buffer is not empty
    pub timespan_ms: u64,
}

/// Moving average of a buffer's occupancy
///
/// Sampled at most [`SAMPLING_RATE`] times per second. Each sample is weighted
/// by the milliseconds elapsed since the previous one; after more than a
/// second of silence the average restarts from the current value.
#[derive(Debug, Clone, Default)]
pub struct AvgBufSize {
    last_sample: Option<Instant>,
    packets: f64,
    bytes: f64,
    timespan_ms: f64,
}

impl AvgBufSize {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether enough time has passed since the previous sample
    pub fn is_time_to_update(&self, now: Instant) -> bool {
        let period = Duration::from_secs(1) / SAMPLING_RATE;
        match self.last_sample {
            Some(last) => now.saturating_duration_since(last) >= period,
            None => true,
        }
    }

    pub fn update(&mut self, now: Instant, current: BufferSize) {
        let elapsed_ms = self
            .last_sample
            .map(|last| now.saturating_duration_since(last).as_millis() as u64);
        self.last_sample = Some(now);

        match elapsed_ms {
            Some(w) if w <= 1000 => {
                self.packets = avg_iir_w(self.packets, current.packets as f64, w);
                self.bytes = avg_iir_w(self.bytes, current.bytes as f64, w);
                self.timespan_ms = avg_iir_w(self.timespan_ms, current.timespan_ms as f64, w);
            }
            _ => {
                self.packets = current.packets as f64;
                self.bytes = current.bytes as f64;
                self.timespan_ms = current.timespan_ms as f64;
            }
        }
    }

    /// Current averages, rounded
    pub fn get(&self) -> BufferSize {
        BufferSize {
            packets: self.packets.round() as usize,
            bytes: self.bytes.round() as usize,
            timespan_ms: self.timespan_ms.round() as u64,
        }
    }
}

/// Weighted average over a 1000-unit window
fn avg_iir_w(old: f64, new: f64, weight: u64) -> f64 {
    let w = weight as f64;
    (old * (1000.0 - w) + new * w) / 1000.0
}

/// Input rate estimator for the send buffer
///
/// Accumulates appended packets and bytes over a sampling period and
/// recomputes the rate when the period elapses. The first period is short
/// (fast start) and can close early once enough packets were seen; later
/// periods use the steady-state length.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    packets: u64,
    bytes: u64,
    start: Option<Instant>,
    period: Duration,
    rate_bps: u64,
}

impl RateEstimator {
    pub fn new() -> Self {
        RateEstimator {
            packets: 0,
            bytes: 0,
            start: None,
            period: INPUT_RATE_FAST_START,
            rate_bps: INPUT_RATE_INITIAL,
        }
    }

    /// Estimated input rate in bytes per second, headers included
    pub fn rate(&self) -> u64 {
        self.rate_bps
    }

    /// Set the sampling period; zero disables estimation
    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Record `packets` packets carrying `bytes` payload bytes at `time`
    pub fn update(&mut self, time: Instant, packets: usize, bytes: usize) {
        if self.period.is_zero() {
            return;
        }

        let start = match self.start {
            None => {
                self.start = Some(time);
                return;
            }
            Some(start) if time < start => return,
            Some(start) => start,
        };

        self.packets += packets as u64;
        self.bytes += bytes as u64;

        let early_update =
            self.period < INPUT_RATE_RUNNING && self.packets > INPUT_RATE_MAX_PACKETS;
        let period = time.duration_since(start);

        if (early_update || period > self.period) && !period.is_zero() {
            let total = self.bytes + self.packets * DATA_HEADER_OVERHEAD as u64;
            self.rate_bps = (total as u128 * 1_000_000 / period.as_micros()) as u64;

            tracing::trace!(
                packets = self.packets,
                bytes = self.bytes,
                rate_kbps = self.rate_bps * 8 / 1000,
                interval_us = period.as_micros() as u64,
                "input rate updated"
            );

            self.packets = 0;
            self.bytes = 0;
            self.start = Some(time);
            self.period = INPUT_RATE_RUNNING;
        }
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(packets: usize, bytes: usize, timespan_ms: u64) -> BufferSize {
        BufferSize {
            packets,
            bytes,
            timespan_ms,
        }
    }

    #[test]
    fn test_avg_first_sample_resets() {
        let now = Instant::now();
        let mut avg = AvgBufSize::new();
        assert!(avg.is_time_to_update(now));
        avg.update(now, size(10, 1000, 5));
        assert_eq!(avg.get(), size(10, 1000, 5));
    }

    #[test]
    fn test_avg_sampling_period() {
        let now = Instant::now();
        let mut avg = AvgBufSize::new();
        avg.update(now, size(1, 1, 1));
        assert!(!avg.is_time_to_update(now + Duration::from_millis(10)));
        assert!(avg.is_time_to_update(now + Duration::from_millis(25)));
    }

    #[test]
    fn test_avg_weighted_by_elapsed() {
        let now = Instant::now();
        let mut avg = AvgBufSize::new();
        avg.update(now, size(0, 0, 0));
        avg.update(now + Duration::from_millis(500), size(100, 1000, 10));
        assert_eq!(avg.get(), size(50, 500, 5));
    }

    #[test]
    fn test_avg_resets_after_idle() {
        let now = Instant::now();
        let mut avg = AvgBufSize::new();
        avg.update(now, size(0, 0, 0));
        avg.update(now + Duration::from_millis(1500), size(100, 1000, 10));
        assert_eq!(avg.get(), size(100, 1000, 10));
    }

    #[test]
    fn test_rate_initial() {
        let est = RateEstimator::new();
        assert_eq!(est.rate(), INPUT_RATE_INITIAL);
        assert_eq!(est.period(), INPUT_RATE_FAST_START);
    }

    #[test]
    fn test_rate_after_fast_start() {
        let start = Instant::now();
        let mut est = RateEstimator::new();
        est.update(start, 1, 1000);
        est.update(start + Duration::from_millis(100), 100, 100_000);
        assert_eq!(est.rate(), INPUT_RATE_INITIAL);

        // 200 packets of 956 bytes over 600 ms: 200 * 1000 bytes incl. overhead
        est.update(start + Duration::from_millis(600), 100, 91_200);
        assert_eq!(est.rate(), 200_000 * 1_000_000 / 600_000);
        assert_eq!(est.period(), INPUT_RATE_RUNNING);
    }

    #[test]
    fn test_rate_early_update() {
        let start = Instant::now();
        let mut est = RateEstimator::new();
        est.update(start, 0, 0);
        est.update(start + Duration::from_millis(100), 2001, 0);
        assert_eq!(est.rate(), 2001 * 44 * 10);
    }

    #[test]
    fn test_rate_disabled() {
        let start = Instant::now();
        let mut est = RateEstimator::new();
        est.set_period(Duration::ZERO);
        est.update(start, 10, 10_000);
        est.update(start + Duration::from_secs(2), 10, 10_000);
        assert_eq!(est.rate(), INPUT_RATE_INITIAL);
    }
}
