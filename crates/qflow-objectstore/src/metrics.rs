//! Per-scan accounting (§4.1, §6). Mirrors `s3filter`'s
//! `SQLTableScanMetrics`: every `Scan` reports these alongside the generic
//! [`qflow_core::OpMetrics`] so the cost of push-down can be compared
//! against a naive full-object fetch.

use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ScanMetrics {
    /// Size of the object before any server-side push-down, taken from the
    /// store's response headers.
    pub bytes_scanned: u64,
    /// Bytes actually transferred over the wire for this request (after
    /// server-side projection/predicate push-down).
    pub bytes_processed: u64,
    /// Bytes of decoded row data handed to the caller.
    pub bytes_returned: u64,
    pub rows_returned: u64,
    pub time_to_first_byte: Option<Duration>,
    pub time_to_first_record: Option<Duration>,
    /// Elapsed time until the last record of the response was decoded.
    /// Equal to `time_to_first_record` when the response carries exactly
    /// one record.
    pub time_to_last_record: Option<Duration>,
    pub num_http_requests: u32,
}

impl ScanMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: &ScanMetrics) {
        self.bytes_scanned += other.bytes_scanned;
        self.bytes_processed += other.bytes_processed;
        self.bytes_returned += other.bytes_returned;
        self.rows_returned += other.rows_returned;
        self.num_http_requests += other.num_http_requests;
        if self.time_to_first_byte.is_none() {
            self.time_to_first_byte = other.time_to_first_byte;
        }
        if self.time_to_first_record.is_none() {
            self.time_to_first_record = other.time_to_first_record;
        }
        if other.time_to_last_record.is_some() {
            self.time_to_last_record = other.time_to_last_record;
        }
    }

    /// Fraction of the object's bytes that push-down avoided transferring.
    /// `None` if the store never reported an object size.
    pub fn bytes_saved_ratio(&self) -> Option<f64> {
        if self.bytes_scanned == 0 {
            return None;
        }
        Some(1.0 - (self.bytes_processed as f64 / self.bytes_scanned as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_accumulates_counters() {
        let mut a = ScanMetrics {
            bytes_scanned: 100,
            bytes_processed: 50,
            bytes_returned: 40,
            rows_returned: 4,
            num_http_requests: 1,
            ..Default::default()
        };
        let b = ScanMetrics {
            bytes_scanned: 200,
            bytes_processed: 80,
            bytes_returned: 60,
            rows_returned: 6,
            num_http_requests: 1,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.bytes_scanned, 300);
        assert_eq!(a.rows_returned, 10);
        assert_eq!(a.num_http_requests, 2);
    }

    #[test]
    fn bytes_saved_ratio_reflects_pushdown() {
        let m = ScanMetrics {
            bytes_scanned: 1000,
            bytes_processed: 100,
            ..Default::default()
        };
        assert!((m.bytes_saved_ratio().unwrap() - 0.9).abs() < 1e-9);
    }
}
