//! Per-operator metrics, copied to the plan at completion via the `Eval`
//! round trip (§5 "Shared resources").
//!
//! Grounded in `s3filter`'s `OpMetrics`/`SQLTableScanMetrics` (`op_metrics.py`,
//! `sql_table_scan.py`): a start/stop timer plus row counters every operator
//! carries, and scan operators carry the extended accounting fields from
//! §4.1 on top (see `qflow-ops::scan::ScanMetrics`).

use std::time::{Duration, Instant};

/// Base metrics every operator accumulates: elapsed wall-clock time and row
/// counts in/out.
#[derive(Debug, Clone)]
pub struct OpMetrics {
    start: Option<Instant>,
    elapsed: Duration,
    pub rows_in: u64,
    pub rows_out: u64,
}

impl Default for OpMetrics {
    fn default() -> Self {
        Self {
            start: None,
            elapsed: Duration::ZERO,
            rows_in: 0,
            rows_out: 0,
        }
    }
}

impl OpMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timer_start(&mut self) {
        self.start = Some(Instant::now());
    }

    pub fn timer_stop(&mut self) {
        if let Some(start) = self.start.take() {
            self.elapsed += start.elapsed();
        }
    }

    /// Elapsed time so far; if the timer is still running, includes the
    /// time since the last `timer_start`.
    pub fn elapsed_time(&self) -> Duration {
        match self.start {
            Some(start) => self.elapsed + start.elapsed(),
            None => self.elapsed,
        }
    }

    pub fn record_in(&mut self, n: u64) {
        self.rows_in += n;
    }

    pub fn record_out(&mut self, n: u64) {
        self.rows_out += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn elapsed_accumulates_across_start_stop() {
        let mut m = OpMetrics::new();
        m.timer_start();
        sleep(Duration::from_millis(5));
        m.timer_stop();
        let first = m.elapsed_time();
        assert!(first >= Duration::from_millis(5));

        m.timer_start();
        sleep(Duration::from_millis(5));
        m.timer_stop();
        assert!(m.elapsed_time() >= first + Duration::from_millis(5));
    }

    #[test]
    fn row_counters() {
        let mut m = OpMetrics::new();
        m.record_in(10);
        m.record_out(7);
        assert_eq!(m.rows_in, 10);
        assert_eq!(m.rows_out, 7);
    }
}
