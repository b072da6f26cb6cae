//! Per-second frame rate and outcome counts for the frame pump.

use crate::pump::PumpOutcome;
use std::fmt;
use std::time::{Duration, Instant};

/// Frame counts for one reporting window (or the whole run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub filtered: u64,
    pub unfiltered: u64,
    pub fell_back: u64,
    pub dropped: u64,
}

impl OutcomeCounts {
    fn add(&mut self, outcome: PumpOutcome) {
        match outcome {
            PumpOutcome::Filtered => self.filtered += 1,
            PumpOutcome::Unfiltered => self.unfiltered += 1,
            PumpOutcome::FellBack => self.fell_back += 1,
            PumpOutcome::Dropped => self.dropped += 1,
        }
    }

    /// Frames that reached the current-texture slot.
    pub fn presented(&self) -> u64 {
        self.filtered + self.unfiltered + self.fell_back
    }

    pub fn total(&self) -> u64 {
        self.presented() + self.dropped
    }
}

/// Emitted once per reporting interval.
#[derive(Debug, Clone, Copy)]
pub struct StatsReport {
    pub fps: f32,
    pub counts: OutcomeCounts,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2} FPS (filtered {}, unfiltered {}, fallback {}, dropped {})",
            self.fps, self.counts.filtered, self.counts.unfiltered, self.counts.fell_back, self.counts.dropped
        )
    }
}

/// Tracks pump throughput and outcome counts.
pub struct PumpStats {
    window: OutcomeCounts,
    totals: OutcomeCounts,
    window_start: Instant,
    interval: Duration,
}

impl PumpStats {
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(1))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            window: OutcomeCounts::default(),
            totals: OutcomeCounts::default(),
            window_start: Instant::now(),
            interval,
        }
    }

    /// Records one frame. Returns a report when the interval has passed.
    pub fn record(&mut self, outcome: PumpOutcome) -> Option<StatsReport> {
        self.record_at(outcome, Instant::now())
    }

    fn record_at(&mut self, outcome: PumpOutcome, now: Instant) -> Option<StatsReport> {
        self.window.add(outcome);
        self.totals.add(outcome);

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }
        let report = StatsReport {
            fps: self.window.presented() as f32 / elapsed.as_secs_f32(),
            counts: self.window,
        };
        self.window = OutcomeCounts::default();
        self.window_start = now;
        Some(report)
    }

    /// Counts since construction.
    pub fn totals(&self) -> OutcomeCounts {
        self.totals
    }
}

impl Default for PumpStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_after_interval() {
        let mut stats = PumpStats::with_interval(Duration::from_secs(1));
        let start = stats.window_start;

        assert!(stats.record_at(PumpOutcome::Filtered, start).is_none());
        assert!(stats.record_at(PumpOutcome::Dropped, start + Duration::from_millis(500)).is_none());
        let report = stats
            .record_at(PumpOutcome::FellBack, start + Duration::from_secs(2))
            .unwrap();

        // Dropped frames do not count towards fps.
        assert!((report.fps - 1.0).abs() < 1e-6);
        assert_eq!(
            report.counts,
            OutcomeCounts {
                filtered: 1,
                unfiltered: 0,
                fell_back: 1,
                dropped: 1
            }
        );
    }

    #[test]
    fn test_window_resets_but_totals_accumulate() {
        let mut stats = PumpStats::with_interval(Duration::from_secs(1));
        let start = stats.window_start;
        stats.record_at(PumpOutcome::Unfiltered, start + Duration::from_secs(1)).unwrap();
        stats.record_at(PumpOutcome::Unfiltered, start + Duration::from_millis(1500));

        let report = stats
            .record_at(PumpOutcome::Filtered, start + Duration::from_secs(2))
            .unwrap();
        assert_eq!(report.counts.total(), 2);
        assert_eq!(stats.totals().total(), 3);
        assert_eq!(stats.totals().unfiltered, 2);
    }
}
