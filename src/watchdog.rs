//! Staleness watchdog for the reading session.
//!
//! Each tick the driver hands the watchdog a progress snapshot. The time
//! since the last successful telemetry report is classified against an
//! ordered threshold table; the highest tier reached decides the recovery
//! action.
use crate::config::WatchdogConfig;
use crate::progress::SessionProgress;
use std::time::Duration;
use tokio::time::Instant;

/// Recovery action requested by the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Directive {
    /// Telemetry is fresh, keep reading.
    Continue,
    /// Save a snapshot of the page, then keep reading.
    DiagnosticCapture,
    /// Re-open the target page and let it settle before reading on.
    SoftReload,
    /// The session has stalled for good.
    Terminate,
}

impl Directive {
    pub fn as_str(&self) -> &'static str {
        match self {
            Directive::Continue => "continue",
            Directive::DiagnosticCapture => "diagnostic_capture",
            Directive::SoftReload => "soft_reload",
            Directive::Terminate => "terminate",
        }
    }
}

/// Ordered threshold classifier. Tiers are stored in ascending order.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    tiers: [(Duration, Directive); 3],
}

impl EscalationPolicy {
    /// Build from config. Thresholds are expected to be strictly ascending;
    /// `HarnessConfig::validate` enforces this before a session starts.
    pub fn new(config: &WatchdogConfig) -> Self {
        Self {
            tiers: [
                (
                    Duration::from_secs(config.diagnostic_after_secs),
                    Directive::DiagnosticCapture,
                ),
                (
                    Duration::from_secs(config.reload_after_secs),
                    Directive::SoftReload,
                ),
                (
                    Duration::from_secs(config.terminate_after_secs),
                    Directive::Terminate,
                ),
            ],
        }
    }

    /// Pick the directive for the current tick.
    pub fn evaluate(&self, progress: &SessionProgress, now: Instant) -> Directive {
        let elapsed = now.saturating_duration_since(progress.last_success_at);
        self.classify(elapsed)
    }

    /// Highest tier whose threshold `elapsed` meets.
    pub fn classify(&self, elapsed: Duration) -> Directive {
        self.tiers
            .iter()
            .rev()
            .find(|(threshold, _)| elapsed >= *threshold)
            .map(|(_, directive)| *directive)
            .unwrap_or(Directive::Continue)
    }
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self::new(&WatchdogConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressAccumulator;
    use crate::telemetry::Observation;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_tier_boundaries() {
        let policy = EscalationPolicy::default();
        let cases = [
            (0, Directive::Continue),
            (59, Directive::Continue),
            (60, Directive::DiagnosticCapture),
            (119, Directive::DiagnosticCapture),
            (120, Directive::SoftReload),
            (599, Directive::SoftReload),
            (600, Directive::Terminate),
            (86_400, Directive::Terminate),
        ];
        for (elapsed, expected) in cases {
            assert_eq!(policy.classify(secs(elapsed)), expected, "elapsed={elapsed}");
        }
    }

    #[test]
    fn test_sub_second_below_threshold_continues() {
        let policy = EscalationPolicy::default();
        assert_eq!(
            policy.classify(Duration::from_millis(59_999)),
            Directive::Continue
        );
    }

    #[test]
    fn test_first_tick_always_continues() {
        let start = Instant::now();
        let acc = ProgressAccumulator::new(start);
        let policy = EscalationPolicy::default();
        assert_eq!(policy.evaluate(&acc.snapshot(), start), Directive::Continue);
    }

    #[test]
    fn test_no_observations_for_ten_minutes_terminates() {
        let start = Instant::now();
        let acc = ProgressAccumulator::new(start);
        let policy = EscalationPolicy::default();
        assert_eq!(
            policy.evaluate(&acc.snapshot(), start + secs(600)),
            Directive::Terminate
        );
    }

    #[test]
    fn test_successful_observation_resets_staleness() {
        let start = Instant::now();
        let mut acc = ProgressAccumulator::new(start);
        let policy = EscalationPolicy::default();
        acc.record(
            Observation {
                duration_seconds: 30,
                has_auxiliary_event: false,
            },
            start + secs(500),
        );
        assert_eq!(
            policy.evaluate(&acc.snapshot(), start + secs(550)),
            Directive::Continue
        );
    }

    #[test]
    fn test_zero_duration_does_not_reset_staleness() {
        let start = Instant::now();
        let mut acc = ProgressAccumulator::new(start);
        let policy = EscalationPolicy::default();
        acc.record(
            Observation {
                duration_seconds: 0,
                has_auxiliary_event: true,
            },
            start + secs(100),
        );
        assert_eq!(
            policy.evaluate(&acc.snapshot(), start + secs(130)),
            Directive::SoftReload
        );
    }

    #[test]
    fn test_clock_before_last_success_continues() {
        let start = Instant::now();
        let acc = ProgressAccumulator::new(start + secs(10));
        let policy = EscalationPolicy::default();
        assert_eq!(policy.evaluate(&acc.snapshot(), start), Directive::Continue);
    }

    #[test]
    fn test_custom_thresholds() {
        let policy = EscalationPolicy::new(&WatchdogConfig {
            diagnostic_after_secs: 10,
            reload_after_secs: 20,
            terminate_after_secs: 30,
        });
        assert_eq!(policy.classify(secs(9)), Directive::Continue);
        assert_eq!(policy.classify(secs(10)), Directive::DiagnosticCapture);
        assert_eq!(policy.classify(secs(25)), Directive::SoftReload);
        assert_eq!(policy.classify(secs(30)), Directive::Terminate);
    }

    #[test]
    fn test_directive_ordering_matches_severity() {
        assert!(Directive::Continue < Directive::DiagnosticCapture);
        assert!(Directive::DiagnosticCapture < Directive::SoftReload);
        assert!(Directive::SoftReload < Directive::Terminate);
    }
}
