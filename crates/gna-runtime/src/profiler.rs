//! Per-request timing
//!
//! Requests whose configuration enables profiling record when they were
//! queued, started and finished. The durations are available after the
//! request reached a terminal state.

use gna_kernels::AccelerationMode;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Timestamps collected while a request moves through the scheduler.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timeline {
    pub queued: Instant,
    pub started: Option<Instant>,
    pub finished: Option<Instant>,
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            queued: Instant::now(),
            started: None,
            finished: None,
        }
    }
}

/// Durations of one executed request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestProfile {
    pub request_id: u32,
    /// Time spent waiting for a worker.
    pub queue_us: u64,
    /// Time spent running kernels.
    pub execute_us: u64,
    pub operations: usize,
    pub saturations: u32,
    /// Mode selected for each operation.
    pub acceleration_modes: Vec<AccelerationMode>,
}

fn micros(duration: Duration) -> u64 {
    duration.as_micros() as u64
}

impl RequestProfile {
    pub(crate) fn from_timeline(
        request_id: u32,
        timeline: &Timeline,
        saturations: u32,
        acceleration_modes: Vec<AccelerationMode>,
    ) -> Option<Self> {
        let started = timeline.started?;
        let finished = timeline.finished?;
        Some(Self {
            request_id,
            queue_us: micros(started.saturating_duration_since(timeline.queued)),
            execute_us: micros(finished.saturating_duration_since(started)),
            operations: acceleration_modes.len(),
            saturations,
            acceleration_modes,
        })
    }

    pub fn total_us(&self) -> u64 {
        self.queue_us + self.execute_us
    }

    /// Operations per second of kernel time.
    pub fn throughput(&self) -> f64 {
        if self.execute_us == 0 {
            return 0.0;
        }
        self.operations as f64 * 1_000_000.0 / self.execute_us as f64
    }

    /// Log the profile via tracing
    pub fn log(&self) {
        tracing::debug!(
            request_id = self.request_id,
            queue_us = self.queue_us,
            execute_us = self.execute_us,
            total_us = self.total_us(),
            operations = self.operations,
            saturations = self.saturations,
            throughput = self.throughput(),
            "request_profile"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_requires_finished_timeline() {
        let mut timeline = Timeline::new();
        assert!(RequestProfile::from_timeline(1, &timeline, 0, vec![]).is_none());

        let started = timeline.queued + Duration::from_micros(40);
        timeline.started = Some(started);
        timeline.finished = Some(started + Duration::from_micros(250));

        let profile =
            RequestProfile::from_timeline(1, &timeline, 3, vec![AccelerationMode::Generic; 2]).unwrap();
        assert_eq!(profile.queue_us, 40);
        assert_eq!(profile.execute_us, 250);
        assert_eq!(profile.total_us(), 290);
        assert_eq!(profile.operations, 2);
        assert_eq!(profile.throughput(), 8_000.0);
    }

    #[test]
    fn test_profile_serializes() {
        let mut timeline = Timeline::new();
        timeline.started = Some(timeline.queued);
        timeline.finished = Some(timeline.queued);
        let profile = RequestProfile::from_timeline(9, &timeline, 0, vec![AccelerationMode::Avx2]).unwrap();
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["request_id"], 9);
        assert_eq!(json["acceleration_modes"][0], "avx2");
    }
}
