//! Timestamp-based packet delivery (TSBPD) time model
//!
//! Maps 32-bit sender timestamps (microseconds, wrapping roughly every 71
//! minutes) onto the local monotonic clock. The mapping is anchored at a
//! time base taken during the handshake, extended by one timestamp period on
//! every wrap, and continuously corrected by a drift tracer fed with
//! round-trip samples.

use crate::packet::MAX_TIMESTAMP;
use std::time::{Duration, Instant};

/// Width of the window on either side of a timestamp wrap, in microseconds
pub const TSBPD_WRAP_PERIOD_US: u32 = 30_000_000;

/// Microseconds added to the time base each time the timestamp wraps
const TIMESTAMP_PERIOD_US: u64 = MAX_TIMESTAMP as u64 + 1;

/// Shift an instant by a signed number of microseconds
pub(crate) fn shift_us(t: Instant, us: i64) -> Instant {
    let d = Duration::from_micros(us.unsigned_abs());
    if us >= 0 {
        t + d
    } else {
        t.checked_sub(d).unwrap_or(t)
    }
}

/// Signed `a - b` in microseconds
pub(crate) fn signed_us(a: Instant, b: Instant) -> i64 {
    if a >= b {
        a.duration_since(b).as_micros() as i64
    } else {
        -(b.duration_since(a).as_micros() as i64)
    }
}

/// Averages clock drift samples and reports corrections beyond a bound
///
/// Samples are summed until `span` of them have been collected, then the
/// average becomes the current drift. An average larger than `max_drift`
/// in magnitude is split: the excess (clamped to `±max_drift`) is reported
/// as overdrift, to be folded into the time base by the caller.
#[derive(Debug, Clone)]
pub struct DriftTracer {
    span: u32,
    max_drift: i64,
    drift: i64,
    overdrift: i64,
    sum: i64,
    count: u32,
}

impl DriftTracer {
    pub fn new(span: u32, max_drift_us: i64) -> Self {
        DriftTracer {
            span: span.max(1),
            max_drift: max_drift_us,
            drift: 0,
            overdrift: 0,
            sum: 0,
            count: 0,
        }
    }

    /// Add a sample; returns true when a new average was computed
    pub fn update(&mut self, sample_us: i64) -> bool {
        self.sum += sample_us;
        self.count += 1;
        self.overdrift = 0;

        if self.count < self.span {
            return false;
        }

        self.drift = self.sum / self.count as i64;
        self.sum = 0;
        self.count = 0;

        if self.drift.abs() > self.max_drift {
            self.overdrift = if self.drift < 0 {
                -self.max_drift
            } else {
                self.max_drift
            };
            self.drift -= self.overdrift;
        }

        true
    }

    /// Override the drift, used to keep group members in sync
    pub fn force_drift(&mut self, drift_us: i64) {
        self.drift = drift_us;
    }

    /// Current drift in microseconds
    pub fn drift(&self) -> i64 {
        self.drift
    }

    /// Overdrift produced by the last `update`, zero otherwise
    pub fn overdrift(&self) -> i64 {
        self.overdrift
    }
}

/// Snapshot of the internal time base, shared between group members
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub base: Instant,
    pub wrap_check: bool,
    pub drift_us: i64,
}

/// TSBPD time base with wrap tracking and drift correction
#[derive(Debug, Clone)]
pub struct TsbpdTime {
    time_base: Instant,
    wrap_check: bool,
    delay: Duration,
    first_rtt: Option<Duration>,
    drift: DriftTracer,
}

impl TsbpdTime {
    /// # Arguments
    /// * `time_base` - local time corresponding to sender timestamp 0
    /// * `wrap_check` - whether timestamps are currently near a wrap
    /// * `delay` - configured receiver latency
    /// * `drift` - drift tracer parameters
    pub fn new(time_base: Instant, wrap_check: bool, delay: Duration, drift: DriftTracer) -> Self {
        TsbpdTime {
            time_base,
            wrap_check,
            delay,
            first_rtt: None,
            drift,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn drift_us(&self) -> i64 {
        self.drift.drift()
    }

    pub fn in_wrap_period(&self) -> bool {
        self.wrap_check
    }

    /// Time base applicable to `timestamp`
    ///
    /// While a wrap is in progress, timestamps in the first two wrap periods
    /// already belong to the next timestamp cycle.
    pub fn time_base(&self, timestamp: u32) -> Instant {
        if self.wrap_check && timestamp <= 2 * TSBPD_WRAP_PERIOD_US {
            self.time_base + Duration::from_micros(TIMESTAMP_PERIOD_US)
        } else {
            self.time_base
        }
    }

    /// Local time at which the sender emitted `timestamp`
    pub fn pkt_base_time(&self, timestamp: u32) -> Instant {
        self.time_base(timestamp) + Duration::from_micros(timestamp as u64)
    }

    /// Scheduled delivery time of a packet carrying `timestamp`
    pub fn pkt_time(&self, timestamp: u32) -> Instant {
        shift_us(
            self.pkt_base_time(timestamp) + self.delay,
            self.drift.drift(),
        )
    }

    /// Track the wrap state machine for the packet at the head of delivery
    pub fn update_time_base(&mut self, timestamp: u32) {
        if self.wrap_check {
            if (TSBPD_WRAP_PERIOD_US..=2 * TSBPD_WRAP_PERIOD_US).contains(&timestamp) {
                self.wrap_check = false;
                self.time_base += Duration::from_micros(TIMESTAMP_PERIOD_US);
                tracing::debug!(
                    timestamp,
                    drift_us = self.drift.drift(),
                    "tsbpd wrap period ends"
                );
            }
            return;
        }

        if timestamp > MAX_TIMESTAMP - TSBPD_WRAP_PERIOD_US {
            self.wrap_check = true;
            tracing::debug!(
                timestamp,
                drift_us = self.drift.drift(),
                "tsbpd wrap period begins"
            );
        }
    }

    /// Feed a drift sample taken when a round-trip probe came back
    ///
    /// Half of the RTT change since the first sample is attributed to the
    /// one-way network delay and removed from the measured drift. Returns
    /// true when the tracer produced a new drift value.
    pub fn add_drift_sample(
        &mut self,
        timestamp: u32,
        arrival: Instant,
        rtt: Option<Duration>,
    ) -> bool {
        if self.first_rtt.is_none() {
            self.first_rtt = rtt;
        }

        let rtt_delta_us = match (rtt, self.first_rtt) {
            (Some(rtt), Some(first)) => (rtt.as_micros() as i64 - first.as_micros() as i64) / 2,
            _ => 0,
        };
        let sample = signed_us(arrival, self.pkt_base_time(timestamp)) - rtt_delta_us;

        let updated = self.drift.update(sample);
        if updated {
            let overdrift = self.drift.overdrift();
            self.time_base = shift_us(self.time_base, overdrift);
            tracing::debug!(
                sample_us = sample,
                drift_us = self.drift.drift(),
                overdrift_us = overdrift,
                "tsbpd drift updated"
            );
        } else {
            tracing::trace!(sample_us = sample, "tsbpd drift sample");
        }
        updated
    }

    /// Adopt another member's time base and delay
    pub fn apply_group_time(&mut self, base: TimeBase, delay: Duration) {
        self.time_base = base.base;
        self.wrap_check = base.wrap_check;
        self.delay = delay;
        self.drift.force_drift(base.drift_us);
    }

    /// Adopt another member's time base after its drift changed
    pub fn apply_group_drift(&mut self, base: TimeBase) {
        tracing::debug!(
            from_us = self.drift.drift(),
            to_us = base.drift_us,
            "group drift synchronized"
        );
        self.time_base = base.base;
        self.wrap_check = base.wrap_check;
        self.drift.force_drift(base.drift_us);
    }

    pub fn internal_time_base(&self) -> TimeBase {
        TimeBase {
            base: self.time_base,
            wrap_check: self.wrap_check,
            drift_us: self.drift.drift(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tsbpd(base: Instant) -> TsbpdTime {
        TsbpdTime::new(
            base,
            false,
            Duration::from_millis(120),
            DriftTracer::new(10, 5000),
        )
    }

    #[test]
    fn test_drift_tracer_averages_over_span() {
        let mut tracer = DriftTracer::new(4, 5000);
        assert!(!tracer.update(100));
        assert!(!tracer.update(200));
        assert!(!tracer.update(300));
        assert!(tracer.update(400));
        assert_eq!(tracer.drift(), 250);
        assert_eq!(tracer.overdrift(), 0);
    }

    #[test]
    fn test_drift_tracer_overdrift() {
        let mut tracer = DriftTracer::new(2, 5000);
        tracer.update(-8000);
        assert!(tracer.update(-8000));
        assert_eq!(tracer.overdrift(), -5000);
        assert_eq!(tracer.drift(), -3000);

        tracer.update(0);
        assert_eq!(tracer.overdrift(), 0);
    }

    #[test]
    fn test_pkt_time() {
        let base = Instant::now();
        let t = tsbpd(base);
        assert_eq!(
            t.pkt_time(1_000_000),
            base + Duration::from_secs(1) + Duration::from_millis(120)
        );
    }

    #[test]
    fn test_wrap_state_machine() {
        let base = Instant::now();
        let mut t = tsbpd(base);
        let period = Duration::from_micros(TIMESTAMP_PERIOD_US);

        t.update_time_base(MAX_TIMESTAMP - 1000);
        assert!(t.in_wrap_period());
        assert_eq!(t.time_base(MAX_TIMESTAMP - 1000), base);
        assert_eq!(t.time_base(10), base + period);

        // Still in the first wrap period: no change yet
        t.update_time_base(10);
        assert!(t.in_wrap_period());

        t.update_time_base(TSBPD_WRAP_PERIOD_US);
        assert!(!t.in_wrap_period());
        assert_eq!(t.time_base(10), base + period);
    }

    #[test]
    fn test_delivery_time_monotonic_across_wrap() {
        let base = Instant::now();
        let mut t = tsbpd(base);
        let step = 7_000_000u32;
        let mut ts = MAX_TIMESTAMP - 5 * step;
        let mut last = t.pkt_time(ts);

        for _ in 0..20 {
            ts = ts.wrapping_add(step);
            t.update_time_base(ts);
            let now = t.pkt_time(ts);
            assert!(now >= last, "delivery time went backwards at ts={}", ts);
            last = now;
        }
    }

    #[test]
    fn test_drift_correction_bounded() {
        let base = Instant::now();
        let mut t = tsbpd(base);
        let arrival = base + Duration::from_secs(1);

        // Drift far beyond the bound: only max_drift moves into the base
        for _ in 0..9 {
            assert!(!t.add_drift_sample(0, arrival + Duration::from_millis(980), None));
        }
        assert!(t.add_drift_sample(0, arrival + Duration::from_millis(980), None));
        let tb = t.internal_time_base();
        assert_eq!(tb.base, base + Duration::from_micros(5000));
        assert_eq!(tb.drift_us, 1_980_000 - 5000);
    }

    #[test]
    fn test_drift_removes_rtt_change() {
        let base = Instant::now();
        let mut t = TsbpdTime::new(base, false, Duration::ZERO, DriftTracer::new(2, 5000));
        let rtt0 = Duration::from_millis(10);
        let rtt1 = Duration::from_millis(14);

        t.add_drift_sample(1000, base + Duration::from_micros(1000), Some(rtt0));
        // Arrived 2 ms later, fully explained by the RTT growth
        assert!(t.add_drift_sample(
            1000,
            base + Duration::from_micros(3000),
            Some(rtt1)
        ));
        assert_eq!(t.drift_us(), 0);
    }

    #[test]
    fn test_group_time() {
        let base = Instant::now();
        let mut t = tsbpd(base);
        let other = TimeBase {
            base: base + Duration::from_secs(3),
            wrap_check: true,
            drift_us: 42,
        };
        t.apply_group_time(other, Duration::from_millis(200));
        assert_eq!(t.internal_time_base(), other);
        assert_eq!(t.delay(), Duration::from_millis(200));
    }
}
