// Usage metrics module
//
// Lightweight counters for conversions and update checks, logged on shutdown

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Process-wide usage metrics
///
/// Uses atomic operations so workers and the interactive side can record
/// without locks. The summary is logged once when the process exits.
#[derive(Debug)]
pub struct Metrics {
    /// Conversions accepted by the busy guard
    pub conversions_started: AtomicUsize,

    pub conversions_succeeded: AtomicUsize,

    /// Conversions that failed to launch, exited non-zero or timed out
    pub conversions_failed: AtomicUsize,

    /// Total time spent inside the external tool in milliseconds
    pub total_conversion_time_ms: AtomicU64,

    pub update_checks: AtomicUsize,

    /// Checks that ended in `CheckFailed`
    pub update_check_failures: AtomicUsize,

    /// Application start time
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            conversions_started: AtomicUsize::new(0),
            conversions_succeeded: AtomicUsize::new(0),
            conversions_failed: AtomicUsize::new(0),
            total_conversion_time_ms: AtomicU64::new(0),
            update_checks: AtomicUsize::new(0),
            update_check_failures: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_conversion_started(&self) {
        self.conversions_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished conversion and the time it took
    pub fn record_conversion_finished(&self, success: bool, duration: Duration) {
        if success {
            self.conversions_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.conversions_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_conversion_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_update_check(&self, failed: bool) {
        self.update_checks.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.update_check_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get total uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average time per finished conversion in milliseconds
    pub fn avg_conversion_time_ms(&self) -> f64 {
        let total = self.total_conversion_time_ms.load(Ordering::Relaxed);
        let count = self.conversions_succeeded.load(Ordering::Relaxed)
            + self.conversions_failed.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Usage Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Conversions: {} started, {} succeeded, {} failed",
            self.conversions_started.load(Ordering::Relaxed),
            self.conversions_succeeded.load(Ordering::Relaxed),
            self.conversions_failed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Total conversion time: {:.2}s (avg: {:.2}ms per conversion)",
            self.total_conversion_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_conversion_time_ms()
        );
        tracing::info!(
            "Update checks: {} ({} failed)",
            self.update_checks.load(Ordering::Relaxed),
            self.update_check_failures.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.conversions_started.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.update_checks.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_conversions() {
        let metrics = Metrics::new();

        metrics.record_conversion_started();
        metrics.record_conversion_finished(true, Duration::from_millis(100));
        metrics.record_conversion_started();
        metrics.record_conversion_finished(false, Duration::from_millis(300));

        assert_eq!(metrics.conversions_started.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.conversions_succeeded.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.conversions_failed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.total_conversion_time_ms.load(Ordering::Relaxed), 400);
        assert_eq!(metrics.avg_conversion_time_ms(), 200.0);
    }

    #[test]
    fn test_avg_conversion_time_none_finished() {
        let metrics = Metrics::new();
        assert_eq!(metrics.avg_conversion_time_ms(), 0.0);
    }

    #[test]
    fn test_update_check_counters() {
        let metrics = Metrics::new();
        metrics.record_update_check(false);
        metrics.record_update_check(true);

        assert_eq!(metrics.update_checks.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.update_check_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_uptime() {
        let metrics = Metrics::new();
        thread::sleep(Duration::from_millis(10));
        assert!(metrics.uptime().as_millis() >= 10);
    }
}
