//! Fixed-false-positive-rate bloom filter, used as a join side-channel
//! between `BloomCreate`/`HashJoinBuild` and the probe-side scan (§3, §4.8).

use twox_hash::XxHash64;
use std::hash::Hasher;

use crate::scalar::ScalarValue;

/// How many distinct keys `BloomFilter` will remember exactly, in addition
/// to the probabilistic bits, so a tiny probe set can be pushed down as a
/// precise `IN (...)` predicate instead of the lossier bit-based one (§4.2).
const SAMPLE_CAP: usize = 64;

/// A bit-array membership filter sized from an expected element count `n`
/// and a target false-positive rate `p`, using the standard formulas:
///
/// ```text
/// m = -n * ln(p) / (ln 2)^2
/// k = (m / n) * ln 2
/// ```
///
/// Never false-negatives: `insert`ed values always `contains` as true.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
    sample: Vec<ScalarValue>,
    sample_overflowed: bool,
    cardinality: usize,
}

impl BloomFilter {
    /// Builds a filter sized for `expected_items` insertions at false
    /// positive rate `false_positive_rate` (0, 1).
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = (expected_items.max(1)) as f64;
        let p = false_positive_rate.clamp(f64::MIN_POSITIVE, 0.5);

        let m = (-n * p.ln() / (std::f64::consts::LN_2 * std::f64::consts::LN_2)).ceil();
        let m = m.max(64.0) as u64;
        let k = ((m as f64 / n) * std::f64::consts::LN_2).round().max(1.0) as u32;

        let num_words = m.div_ceil(64) as usize;
        Self {
            bits: vec![0u64; num_words],
            num_bits: num_words as u64 * 64,
            num_hashes: k,
            sample: Vec::new(),
            sample_overflowed: false,
            cardinality: 0,
        }
    }

    /// A filter that contains nothing and will never match — used when a
    /// `BloomCreate` observed zero distinct values (§4.2 short-circuit).
    pub fn empty() -> Self {
        Self {
            bits: Vec::new(),
            num_bits: 0,
            num_hashes: 0,
            sample: Vec::new(),
            sample_overflowed: false,
            cardinality: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_bits == 0
    }

    pub fn insert(&mut self, key: &[u8]) {
        if self.num_bits == 0 {
            return;
        }
        for i in 0..self.num_hashes {
            let bit = self.bit_index(key, i);
            self.bits[(bit / 64) as usize] |= 1u64 << (bit % 64);
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        if self.num_bits == 0 {
            return false;
        }
        (0..self.num_hashes).all(|i| {
            let bit = self.bit_index(key, i);
            self.bits[(bit / 64) as usize] & (1u64 << (bit % 64)) != 0
        })
    }

    /// Double hashing (Kirsch-Mitzenmacher): `h_i(x) = h1(x) + i*h2(x)`.
    fn bit_index(&self, key: &[u8], i: u32) -> u64 {
        let mut h1 = XxHash64::with_seed(0);
        h1.write(key);
        let h1 = h1.finish();

        let mut h2 = XxHash64::with_seed(0x9E37_79B9_7F4A_7C15);
        h2.write(key);
        let h2 = h2.finish();

        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Records one of the distinct values inserted into this filter, kept
    /// verbatim as long as the observed cardinality stays within
    /// `SAMPLE_CAP`. Once it overflows the sample is dropped for good —
    /// past that point the probe set is no longer "tiny" and a caller
    /// should fall back to the bit-based predicate instead.
    pub fn insert_sample(&mut self, value: &ScalarValue) {
        self.cardinality += 1;
        if self.sample_overflowed {
            return;
        }
        if self.sample.len() < SAMPLE_CAP {
            self.sample.push(value.clone());
        } else {
            self.sample_overflowed = true;
            self.sample.clear();
        }
    }

    /// The exact probe set, if the observed cardinality never exceeded
    /// `SAMPLE_CAP`. `None` once the filter has seen too many distinct
    /// values to push down as a literal `IN (...)` list.
    pub fn sample_keys(&self) -> Option<&[ScalarValue]> {
        if self.sample_overflowed || self.sample.is_empty() {
            None
        } else {
            Some(&self.sample)
        }
    }

    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    /// Hex encoding of the raw bit array, for a scan that has to attach the
    /// filter itself as a side predicate rather than an `IN (...)` list.
    pub fn bits_hex(&self) -> String {
        self.bits.iter().map(|w| format!("{w:016x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_false_negative() {
        let mut f = BloomFilter::new(1000, 0.01);
        let keys: Vec<Vec<u8>> = (0..1000).map(|i: i32| i.to_le_bytes().to_vec()).collect();
        for k in &keys {
            f.insert(k);
        }
        for k in &keys {
            assert!(f.contains(k));
        }
    }

    #[test]
    fn false_positive_rate_within_bound() {
        let n = 5000;
        let p = 0.02;
        let mut f = BloomFilter::new(n, p);
        for i in 0..n {
            f.insert(&(i as i64).to_le_bytes());
        }

        let mut false_positives = 0;
        let trials = 20_000;
        for i in 0..trials {
            let probe = (i as i64 + n as i64 * 10).to_le_bytes();
            if f.contains(&probe) {
                false_positives += 1;
            }
        }
        let observed_rate = false_positives as f64 / trials as f64;
        assert!(
            observed_rate <= 2.0 * p,
            "observed fp rate {} exceeded 2x target {}",
            observed_rate,
            p
        );
    }

    #[test]
    fn empty_filter_never_matches() {
        let f = BloomFilter::empty();
        assert!(f.is_empty());
        assert!(!f.contains(b"anything"));
    }
}
