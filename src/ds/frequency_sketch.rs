//! Frequency estimators used by TinyLFU admission.
//!
//! ## Architecture
//!
//! ```text
//!   key ──► spread(hash) ──► start = (h & 3) << 2
//!                 │
//!                 ├── row 0: table[index_of(h, 0)] counter (start + 0)
//!                 ├── row 1: table[index_of(h, 1)] counter (start + 1)
//!                 ├── row 2: table[index_of(h, 2)] counter (start + 2)
//!                 └── row 3: table[index_of(h, 3)] counter (start + 3)
//!
//!   table[i]: u64 = sixteen 4-bit counters
//!   ┌────┬────┬────┬─────┬────┐
//!   │ c0 │ c1 │ c2 │ ... │ c15│   each saturates at 15
//!   └────┴────┴────┴─────┴────┘
//! ```
//!
//! The estimate is the minimum of the four selected counters. After `period`
//! successful increments every counter is halved so that old popularity ages
//! out.
//!
//! ## Key Components
//!
//! - [`Frequency`]: the estimator contract shared by every sketch-driven policy
//! - [`CountMin4`]: the compact 4-bit count-min sketch with periodic reset
//! - [`PerfectFrequency`]: exact per-key counts with the same aging rule, for
//!   tests and for measuring how much the sketch's error costs
//!
//! ## Operations
//!
//! | Operation           | CountMin4 | PerfectFrequency |
//! |---------------------|-----------|------------------|
//! | `increment`         | O(1)      | O(1) amortized   |
//! | `frequency`         | O(1)      | O(1)             |
//! | `reset`             | O(table)  | O(keys)          |
//! | `ensure_capacity`   | O(table)  | O(1)             |

use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Per-row hashing seeds.
const SEED: [u64; 4] = [
    0xc3a5_c85c_97cb_3127,
    0xb492_b66f_be98_f273,
    0x9ae1_6a3b_2f90_404f,
    0xcbf2_9ce4_8422_2325,
];
const RESET_MASK: u64 = 0x7777_7777_7777_7777;
const ONE_MASK: u64 = 0x1111_1111_1111_1111;

/// Upper bound on the number of table words.
const MAXIMUM_TABLE: usize = 1 << 22;

/// Estimates how often a key has been seen recently.
pub trait Frequency: fmt::Debug + Send {
    /// Records one access of `key`.
    fn increment(&mut self, key: u64);

    /// Returns the estimated access count of `key`.
    fn frequency(&self, key: u64) -> u32;

    /// Prepares the estimator for about `expected` distinct keys.
    fn ensure_capacity(&mut self, expected: usize);

    /// Ages every count by half.
    fn reset(&mut self);

    /// Returns `true` when the next counted increment triggers [`reset`](Self::reset).
    fn is_going_to_reset(&self) -> bool;
}

/// Which estimator a policy is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SketchKind {
    #[default]
    CountMin4,
    Perfect,
}

impl SketchKind {
    /// Builds an estimator sized for `expected` keys.
    pub fn build(self, expected: usize, seed: u64) -> Box<dyn Frequency> {
        match self {
            SketchKind::CountMin4 => Box::new(CountMin4::new(expected, seed)),
            SketchKind::Perfect => Box::new(PerfectFrequency::new(expected)),
        }
    }
}

#[inline]
fn key_hash(key: u64) -> u32 {
    (key ^ (key >> 32)) as u32
}

// ---------------------------------------------------------------------------
// CountMin4
// ---------------------------------------------------------------------------

/// 4-bit count-min sketch with depth four and periodic halving.
#[derive(Clone)]
pub struct CountMin4 {
    table: Vec<u64>,
    table_mask: usize,
    random_seed: u32,
    period: u64,
    additions: u64,
}

impl CountMin4 {
    /// Creates a sketch sized for `expected` keys; `seed` perturbs the hash.
    pub fn new(expected: usize, seed: u64) -> Self {
        let seed = seed as u32;
        let mut sketch = Self {
            table: Vec::new(),
            table_mask: 0,
            random_seed: if seed & 1 == 0 { seed.wrapping_add(1) } else { seed },
            period: 10,
            additions: 0,
        };
        sketch.resize(expected);
        sketch
    }

    /// Number of `u64` words in the table.
    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    /// Successful increments since the last reset (after aging).
    pub fn additions(&self) -> u64 {
        self.additions
    }

    /// Increments between two resets.
    pub fn period(&self) -> u64 {
        self.period
    }

    fn resize(&mut self, expected: usize) {
        let len = expected.clamp(1, MAXIMUM_TABLE).next_power_of_two();
        self.table = vec![0; len];
        self.table_mask = len - 1;
        self.period = 10 * len as u64;
        self.additions = 0;
    }

    fn spread(&self, hash: u32) -> u32 {
        let mut x = ((hash >> 16) ^ hash).wrapping_mul(0x045d_9f3b);
        x = ((x >> 16) ^ x).wrapping_mul(self.random_seed);
        (x >> 16) ^ x
    }

    fn index_of(&self, item: u32, row: usize) -> usize {
        let item = item as i32 as i64 as u64;
        let mut hash = item.wrapping_add(SEED[row]).wrapping_mul(SEED[row]);
        hash = hash.wrapping_add(hash >> 32);
        (hash as u32 as usize) & self.table_mask
    }

    fn increment_at(&mut self, index: usize, counter: u32) -> bool {
        let offset = counter << 2;
        let mask = 0xF_u64 << offset;
        if self.table[index] & mask != mask {
            self.table[index] += 1 << offset;
            true
        } else {
            false
        }
    }
}

impl Frequency for CountMin4 {
    fn increment(&mut self, key: u64) {
        let hash = self.spread(key_hash(key));
        let start = (hash & 3) << 2;

        let mut added = false;
        for row in 0..4 {
            let index = self.index_of(hash, row);
            added |= self.increment_at(index, start + row as u32);
        }

        if added {
            self.additions += 1;
            if self.additions >= self.period {
                self.reset();
            }
        }
    }

    fn frequency(&self, key: u64) -> u32 {
        let hash = self.spread(key_hash(key));
        let start = (hash & 3) << 2;
        (0..4)
            .map(|row| {
                let index = self.index_of(hash, row);
                let offset = (start + row as u32) << 2;
                ((self.table[index] >> offset) & 0xF) as u32
            })
            .min()
            .unwrap_or(0)
    }

    fn ensure_capacity(&mut self, expected: usize) {
        if expected > self.table.len() && self.table.len() < MAXIMUM_TABLE {
            self.resize(expected);
        }
    }

    fn reset(&mut self) {
        let mut odd = 0u64;
        for word in &mut self.table {
            odd += u64::from((*word & ONE_MASK).count_ones());
            *word = (*word >> 1) & RESET_MASK;
        }
        self.additions = (self.additions >> 1).saturating_sub(odd >> 2);
    }

    fn is_going_to_reset(&self) -> bool {
        self.additions + 1 >= self.period
    }
}

impl fmt::Debug for CountMin4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountMin4")
            .field("table_len", &self.table.len())
            .field("period", &self.period)
            .field("additions", &self.additions)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PerfectFrequency
// ---------------------------------------------------------------------------

/// Exact access counts, halved every `10 * capacity` increments.
#[derive(Debug, Clone, Default)]
pub struct PerfectFrequency {
    counts: FxHashMap<u64, u32>,
    period: u64,
    additions: u64,
}

impl PerfectFrequency {
    pub fn new(expected: usize) -> Self {
        Self {
            counts: FxHashMap::default(),
            period: 10 * expected.max(1) as u64,
            additions: 0,
        }
    }
}

impl Frequency for PerfectFrequency {
    fn increment(&mut self, key: u64) {
        *self.counts.entry(key).or_insert(0) += 1;
        self.additions += 1;
        if self.additions >= self.period {
            self.reset();
        }
    }

    fn frequency(&self, key: u64) -> u32 {
        self.counts.get(&key).copied().unwrap_or(0)
    }

    fn ensure_capacity(&mut self, expected: usize) {
        self.period = self.period.max(10 * expected as u64);
    }

    fn reset(&mut self) {
        self.counts.retain(|_, count| {
            *count >>= 1;
            *count > 0
        });
        self.additions >>= 1;
    }

    fn is_going_to_reset(&self) -> bool {
        self.additions + 1 >= self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==============================================
    // CountMin4
    // ==============================================

    mod count_min4 {
        use super::*;

        #[test]
        fn unseen_key_has_zero_frequency() {
            let sketch = CountMin4::new(64, 1);
            assert_eq!(sketch.frequency(42), 0);
        }

        #[test]
        fn increments_are_counted() {
            let mut sketch = CountMin4::new(64, 7);
            for _ in 0..5 {
                sketch.increment(42);
            }
            assert_eq!(sketch.frequency(42), 5);
        }

        #[test]
        fn counters_saturate_at_fifteen() {
            let mut sketch = CountMin4::new(1024, 3);
            for _ in 0..40 {
                sketch.increment(9);
            }
            assert_eq!(sketch.frequency(9), 15);
        }

        #[test]
        fn table_is_power_of_two() {
            let sketch = CountMin4::new(100, 1);
            assert_eq!(sketch.table_len(), 128);
            assert_eq!(sketch.period(), 1280);
        }

        #[test]
        fn ensure_capacity_grows_and_clears() {
            let mut sketch = CountMin4::new(16, 1);
            sketch.increment(1);
            sketch.ensure_capacity(8);
            assert_eq!(sketch.table_len(), 16);
            assert_eq!(sketch.frequency(1), 1);

            sketch.ensure_capacity(100);
            assert_eq!(sketch.table_len(), 128);
            assert_eq!(sketch.frequency(1), 0);
        }

        #[test]
        fn reset_halves_counters() {
            let mut sketch = CountMin4::new(64, 5);
            for _ in 0..8 {
                sketch.increment(3);
            }
            sketch.reset();
            assert_eq!(sketch.frequency(3), 4);
        }

        #[test]
        fn period_triggers_reset() {
            let mut sketch = CountMin4::new(1, 11);
            assert_eq!(sketch.period(), 10);
            for key in 0..9u64 {
                sketch.increment(key);
            }
            assert!(sketch.is_going_to_reset() || sketch.additions() < 9);
            for key in 100..200u64 {
                sketch.increment(key);
            }
            assert!(sketch.additions() < sketch.period());
        }

        #[test]
        fn same_seed_is_deterministic() {
            let mut a = CountMin4::new(256, 99);
            let mut b = CountMin4::new(256, 99);
            for key in (0..2_000u64).map(|k| k * 31 % 97) {
                a.increment(key);
                b.increment(key);
            }
            for key in 0..97u64 {
                assert_eq!(a.frequency(key), b.frequency(key));
            }
        }
    }

    // ==============================================
    // PerfectFrequency
    // ==============================================

    mod perfect {
        use super::*;

        #[test]
        fn counts_exactly() {
            let mut freq = PerfectFrequency::new(100);
            for _ in 0..20 {
                freq.increment(1);
            }
            freq.increment(2);
            assert_eq!(freq.frequency(1), 20);
            assert_eq!(freq.frequency(2), 1);
            assert_eq!(freq.frequency(3), 0);
        }

        #[test]
        fn halves_after_period() {
            let mut freq = PerfectFrequency::new(1);
            for _ in 0..9 {
                freq.increment(1);
            }
            assert!(freq.is_going_to_reset());
            freq.increment(1);
            assert_eq!(freq.frequency(1), 5);
        }

        #[test]
        fn reset_drops_single_hits() {
            let mut freq = PerfectFrequency::new(100);
            freq.increment(8);
            freq.reset();
            assert_eq!(freq.frequency(8), 0);
        }
    }

    #[test]
    fn sketch_kind_builds_matching_estimator() {
        let mut exact = SketchKind::Perfect.build(10, 0);
        for _ in 0..30 {
            exact.increment(5);
        }
        assert_eq!(exact.frequency(5), 30);

        let mut approx = SketchKind::CountMin4.build(10, 0);
        for _ in 0..30 {
            approx.increment(5);
        }
        assert_eq!(approx.frequency(5), 15);
    }
}
