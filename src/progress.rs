//! Reading-time accumulator fed by telemetry observations.
use crate::telemetry::Observation;
use tokio::time::Instant;

/// Reading duration the session must accumulate before it stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    target_duration_seconds: u64,
}

impl Target {
    /// Returns `None` for a zero-length target.
    pub fn from_seconds(seconds: u64) -> Option<Self> {
        (seconds > 0).then_some(Self {
            target_duration_seconds: seconds,
        })
    }

    pub fn from_minutes(minutes: u64) -> Option<Self> {
        Self::from_seconds(minutes.saturating_mul(60))
    }

    pub fn seconds(&self) -> u64 {
        self.target_duration_seconds
    }
}

/// Read-only snapshot of the accumulator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    pub cumulative_seconds: u64,
    pub success_count: u64,
    pub last_success_at: Instant,
}

impl SessionProgress {
    /// Whole minutes read so far.
    pub fn minutes(&self) -> u64 {
        self.cumulative_seconds / 60
    }
}

/// What a single `record` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    /// True when the observation advanced the counters.
    pub counted: bool,
    /// True when the payload carried an auxiliary event, counted or not.
    pub auxiliary_event: bool,
}

/// Sole owner of `SessionProgress`. Counters only move forward.
#[derive(Debug)]
pub struct ProgressAccumulator {
    progress: SessionProgress,
}

impl ProgressAccumulator {
    /// Start a fresh session; staleness is measured from `started_at` until
    /// the first successful observation.
    pub fn new(started_at: Instant) -> Self {
        Self {
            progress: SessionProgress {
                cumulative_seconds: 0,
                success_count: 0,
                last_success_at: started_at,
            },
        }
    }

    pub fn record(&mut self, observation: Observation, now: Instant) -> RecordOutcome {
        if observation.has_auxiliary_event {
            tracing::info!(
                duration_secs = observation.duration_seconds,
                "telemetry carried an auxiliary event"
            );
        }

        if observation.duration_seconds == 0 {
            tracing::debug!("zero-duration telemetry, not counted");
            return RecordOutcome {
                counted: false,
                auxiliary_event: observation.has_auxiliary_event,
            };
        }

        let p = &mut self.progress;
        p.cumulative_seconds = p
            .cumulative_seconds
            .saturating_add(observation.duration_seconds);
        p.success_count += 1;
        p.last_success_at = p.last_success_at.max(now);

        tracing::info!(
            attempt = p.success_count,
            read_secs = observation.duration_seconds,
            total_mins = p.minutes(),
            "reading time reported"
        );

        RecordOutcome {
            counted: true,
            auxiliary_event: observation.has_auxiliary_event,
        }
    }

    pub fn reached_target(&self, target: Target) -> bool {
        self.progress.cumulative_seconds >= target.seconds()
    }

    pub fn snapshot(&self) -> SessionProgress {
        self.progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn obs(duration_seconds: u64) -> Observation {
        Observation {
            duration_seconds,
            has_auxiliary_event: false,
        }
    }

    #[test]
    fn test_new_session_is_zeroed() {
        let start = Instant::now();
        let acc = ProgressAccumulator::new(start);
        let p = acc.snapshot();
        assert_eq!(p.cumulative_seconds, 0);
        assert_eq!(p.success_count, 0);
        assert_eq!(p.last_success_at, start);
    }

    #[test]
    fn test_zero_duration_leaves_state_untouched() {
        let start = Instant::now();
        let mut acc = ProgressAccumulator::new(start);
        let outcome = acc.record(obs(0), start + Duration::from_secs(30));
        assert!(!outcome.counted);
        assert_eq!(acc.snapshot(), ProgressAccumulator::new(start).snapshot());
    }

    #[test]
    fn test_zero_duration_still_surfaces_auxiliary_event() {
        let start = Instant::now();
        let mut acc = ProgressAccumulator::new(start);
        let outcome = acc.record(
            Observation {
                duration_seconds: 0,
                has_auxiliary_event: true,
            },
            start + Duration::from_secs(5),
        );
        assert_eq!(
            outcome,
            RecordOutcome {
                counted: false,
                auxiliary_event: true
            }
        );
        assert_eq!(acc.snapshot().success_count, 0);
        assert_eq!(acc.snapshot().last_success_at, start);
    }

    #[test]
    fn test_sequence_sums_durations() {
        let start = Instant::now();
        let mut acc = ProgressAccumulator::new(start);
        let durations = [30, 31, 0, 29, 40];
        for (i, d) in durations.iter().enumerate() {
            acc.record(obs(*d), start + Duration::from_secs(30 * i as u64));
        }
        let p = acc.snapshot();
        assert_eq!(p.cumulative_seconds, 130);
        assert_eq!(p.success_count, 4);
        assert_eq!(p.last_success_at, start + Duration::from_secs(120));
    }

    #[test]
    fn test_replaying_same_observation_counts_each_time() {
        let start = Instant::now();
        let mut acc = ProgressAccumulator::new(start);
        acc.record(obs(30), start);
        acc.record(obs(30), start);
        assert_eq!(acc.snapshot().cumulative_seconds, 60);
        assert_eq!(acc.snapshot().success_count, 2);
    }

    #[test]
    fn test_last_success_never_moves_backward() {
        let start = Instant::now();
        let mut acc = ProgressAccumulator::new(start);
        let later = start + Duration::from_secs(100);
        acc.record(obs(10), later);
        acc.record(obs(10), start + Duration::from_secs(50));
        assert_eq!(acc.snapshot().last_success_at, later);
    }

    #[test]
    fn test_reached_target_is_inclusive() {
        let start = Instant::now();
        let target = Target::from_seconds(60).unwrap();

        let mut acc = ProgressAccumulator::new(start);
        acc.record(obs(59), start);
        assert!(!acc.reached_target(target));

        let mut acc = ProgressAccumulator::new(start);
        acc.record(obs(60), start);
        assert!(acc.reached_target(target));

        let mut acc = ProgressAccumulator::new(start);
        acc.record(obs(65), start);
        assert!(acc.reached_target(target));
    }

    #[test]
    fn test_target_rejects_zero() {
        assert!(Target::from_seconds(0).is_none());
        assert!(Target::from_minutes(0).is_none());
        assert_eq!(Target::from_minutes(2).unwrap().seconds(), 120);
    }

    #[test]
    fn test_minutes_rounds_down() {
        let start = Instant::now();
        let mut acc = ProgressAccumulator::new(start);
        acc.record(obs(119), start);
        assert_eq!(acc.snapshot().minutes(), 1);
    }
}
