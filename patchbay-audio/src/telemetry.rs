//! Latency telemetry for the device probe and for dispatched operations.
//!
//! Both collectors are allocation-free and cheap enough to update on every
//! poll or operation.

use std::time::Duration;

/// Weight of the newest sample in the probe latency moving average.
pub const PROBE_EMA_ALPHA: f64 = 0.1;

/// Probe latency tracker: exponentially weighted moving average plus running maximum.
#[derive(Debug, Clone, Default)]
pub struct ProbeTelemetry {
    ema_us: f64,
    max: Duration,
    samples: u64,
    over_budget: u64,
    failures: u64,
}

/// Snapshot of `ProbeTelemetry`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProbeSummary {
    pub average: Duration,
    pub max: Duration,
    pub samples: u64,
    pub over_budget: u64,
    pub failures: u64,
}

impl ProbeTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one probe. Returns `true` when it exceeded `budget`.
    pub fn record(&mut self, duration: Duration, budget: Duration) -> bool {
        let us = duration.as_secs_f64() * 1_000_000.0;
        if self.samples == 0 {
            self.ema_us = us;
        } else {
            self.ema_us = PROBE_EMA_ALPHA * us + (1.0 - PROBE_EMA_ALPHA) * self.ema_us;
        }
        self.samples += 1;
        if duration > self.max {
            self.max = duration;
        }
        let over = duration > budget;
        if over {
            self.over_budget += 1;
        }
        over
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn summary(&self) -> ProbeSummary {
        ProbeSummary {
            average: Duration::from_secs_f64(self.ema_us.max(0.0) / 1_000_000.0),
            max: self.max,
            samples: self.samples,
            over_budget: self.over_budget,
            failures: self.failures,
        }
    }
}

/// Dispatched-operation latency: last and maximum, plus outcome counters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OperationTelemetry {
    pub last: Duration,
    pub max: Duration,
    pub executed: u64,
    pub failed: u64,
    pub panicked: u64,
    pub over_budget: u64,
}

impl OperationTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one operation. Returns `true` when it exceeded `budget`.
    pub fn record(&mut self, duration: Duration, budget: Duration, succeeded: bool) -> bool {
        self.last = duration;
        if duration > self.max {
            self.max = duration;
        }
        self.executed += 1;
        if !succeeded {
            self.failed += 1;
        }
        let over = duration > budget;
        if over {
            self.over_budget += 1;
        }
        over
    }

    pub fn record_panic(&mut self) {
        self.panicked += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_the_average() {
        let mut t = ProbeTelemetry::new();
        t.record(Duration::from_micros(40), Duration::from_micros(50));
        let s = t.summary();
        assert!((s.average.as_secs_f64() * 1_000_000.0 - 40.0).abs() < 0.01);
        assert_eq!(s.max, Duration::from_micros(40));
        assert_eq!(s.samples, 1);
    }

    #[test]
    fn average_moves_by_alpha() {
        let mut t = ProbeTelemetry::new();
        t.record(Duration::from_micros(100), Duration::from_micros(50));
        t.record(Duration::from_micros(200), Duration::from_micros(50));
        // 0.1 * 200 + 0.9 * 100
        let avg = t.summary().average.as_secs_f64() * 1_000_000.0;
        assert!((avg - 110.0).abs() < 0.01);
        assert_eq!(t.summary().max, Duration::from_micros(200));
        assert_eq!(t.summary().over_budget, 2);
    }

    #[test]
    fn failures_are_counted_separately() {
        let mut t = ProbeTelemetry::new();
        t.record_failure();
        assert_eq!(t.summary().failures, 1);
        assert_eq!(t.summary().samples, 0);
    }

    #[test]
    fn operation_latency_tracks_last_and_max() {
        let mut t = OperationTelemetry::new();
        let budget = Duration::from_millis(300);
        assert!(!t.record(Duration::from_millis(20), budget, true));
        assert!(t.record(Duration::from_millis(400), budget, false));
        t.record(Duration::from_millis(5), budget, true);

        assert_eq!(t.last, Duration::from_millis(5));
        assert_eq!(t.max, Duration::from_millis(400));
        assert_eq!(t.executed, 3);
        assert_eq!(t.failed, 1);
        assert_eq!(t.over_budget, 1);
    }
}
