//! Rate-limited progress reporting

use crate::models::{MeasurementProgress, TestDirection};
use crate::session::ProgressHandler;
use std::time::Duration;
use tokio::time::Instant;

/// Emits [`MeasurementProgress`] snapshots at most once per interval.
///
/// The interval is measured from the last emitted snapshot (initially the
/// session open time) on the monotonic tokio clock. Byte counts handed to
/// the sampler are clamped so that emitted `num_bytes` never decreases.
pub struct ProgressSampler {
    direction: TestDirection,
    interval: Duration,
    opened_at: Instant,
    last_emit: Instant,
    last_bytes: u64,
    handler: Option<ProgressHandler>,
}

impl ProgressSampler {
    pub fn new(
        direction: TestDirection,
        interval: Duration,
        opened_at: Instant,
        handler: Option<ProgressHandler>,
    ) -> Self {
        Self {
            direction,
            interval,
            opened_at,
            last_emit: opened_at,
            last_bytes: 0,
            handler,
        }
    }

    /// Deliver a snapshot if a full interval has passed since the last one.
    /// Returns whether a snapshot was delivered.
    pub fn maybe_emit(&mut self, num_bytes: u64) -> bool {
        let now = Instant::now();
        self.last_bytes = self.last_bytes.max(num_bytes);

        let Some(handler) = self.handler.as_ref() else {
            return false;
        };
        if now.duration_since(self.last_emit) < self.interval {
            return false;
        }

        self.last_emit = now;
        handler(self.snapshot_at(now, self.last_bytes));
        true
    }

    /// Snapshot for the final `onFinish` report
    pub fn finish(&mut self, num_bytes: u64) -> MeasurementProgress {
        self.last_bytes = self.last_bytes.max(num_bytes);
        self.snapshot_at(Instant::now(), self.last_bytes)
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    fn snapshot_at(&self, now: Instant, num_bytes: u64) -> MeasurementProgress {
        let elapsed = now.saturating_duration_since(self.opened_at);
        MeasurementProgress::new(
            i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX),
            i64::try_from(num_bytes).unwrap_or(i64::MAX),
            self.direction,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_sampler(interval_ms: u64) -> (ProgressSampler, Arc<Mutex<Vec<MeasurementProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: ProgressHandler = Arc::new(move |progress| sink.lock().unwrap().push(progress));
        let sampler = ProgressSampler::new(
            TestDirection::Download,
            Duration::from_millis(interval_ms),
            Instant::now(),
            Some(handler),
        );
        (sampler, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_snapshot_before_first_interval() {
        let (mut sampler, seen) = recording_sampler(250);

        assert!(!sampler.maybe_emit(100));
        tokio::time::advance(Duration::from_millis(249)).await;
        assert!(!sampler.maybe_emit(200));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(sampler.maybe_emit(300));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].num_bytes(), 300);
        assert_eq!(seen[0].elapsed_micros(), 250_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_is_measured_from_last_snapshot() {
        let (mut sampler, seen) = recording_sampler(250);

        for step in 1..=20u64 {
            tokio::time::advance(Duration::from_millis(100)).await;
            sampler.maybe_emit(step * 1000);
        }

        let seen = seen.lock().unwrap();
        // Emitted at 300ms, 600ms, ... 1800ms
        assert_eq!(seen.len(), 6);
        for pair in seen.windows(2) {
            let gap = pair[1].elapsed_micros() - pair[0].elapsed_micros();
            assert!(gap >= 250_000, "gap was {}us", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bytes_never_decrease() {
        let (mut sampler, seen) = recording_sampler(10);

        tokio::time::advance(Duration::from_millis(10)).await;
        sampler.maybe_emit(5000);
        tokio::time::advance(Duration::from_millis(10)).await;
        sampler.maybe_emit(4000);

        let final_snapshot = sampler.finish(3000);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].num_bytes(), 5000);
        assert_eq!(seen[1].num_bytes(), 5000);
        assert_eq!(final_snapshot.num_bytes(), 5000);
        assert!(final_snapshot.elapsed_micros() >= seen[1].elapsed_micros());
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_handler_nothing_is_emitted() {
        let mut sampler = ProgressSampler::new(
            TestDirection::Upload,
            Duration::from_millis(1),
            Instant::now(),
            None,
        );
        tokio::time::advance(Duration::from_millis(5)).await;
        assert!(!sampler.maybe_emit(10));
        assert_eq!(sampler.finish(0).num_bytes(), 10);
    }
}
