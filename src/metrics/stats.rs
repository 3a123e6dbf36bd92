use std::collections::BTreeMap;

use crate::metrics::snapshot::{LevelSnapshot, PolicyStatsSnapshot};
use crate::metrics::traits::{
    CoreMetricsRecorder, LevelMetricsRecorder, MetricsSnapshotProvider, NamedMetricsRecorder,
};

/// Monotonic outcome counters of one policy instance.
#[derive(Debug, Clone, Default)]
pub struct PolicyStats {
    name: String,
    operations: u64,
    hits: u64,
    misses: u64,
    hit_bytes: u64,
    miss_bytes: u64,
    admissions: u64,
    rejections: u64,
    evictions: u64,
    victims_examined: u64,
    level_hits: Vec<u64>,
    level_misses: Vec<u64>,
    counters: BTreeMap<&'static str, u64>,
}

impl PolicyStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn operations(&self) -> u64 {
        self.operations
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_bytes(&self) -> u64 {
        self.hit_bytes
    }

    pub fn miss_bytes(&self) -> u64 {
        self.miss_bytes
    }

    pub fn admissions(&self) -> u64 {
        self.admissions
    }

    pub fn rejections(&self) -> u64 {
        self.rejections
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn victims_examined(&self) -> u64 {
        self.victims_examined
    }

    pub fn level_hits(&self, level: usize) -> u64 {
        self.level_hits.get(level).copied().unwrap_or(0)
    }

    pub fn level_misses(&self, level: usize) -> u64 {
        self.level_misses.get(level).copied().unwrap_or(0)
    }

    /// Value of a named counter, zero if never recorded.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.requests())
    }

    pub fn miss_rate(&self) -> f64 {
        ratio(self.misses, self.requests())
    }

    /// Fraction of requested bytes served from the cache.
    pub fn weighted_hit_rate(&self) -> f64 {
        ratio(self.hit_bytes, self.hit_bytes + self.miss_bytes)
    }

    fn level_slot(levels: &mut Vec<u64>, level: usize) -> &mut u64 {
        if levels.len() <= level {
            levels.resize(level + 1, 0);
        }
        &mut levels[level]
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

impl CoreMetricsRecorder for PolicyStats {
    #[inline]
    fn record_operation(&mut self) {
        self.operations += 1;
    }

    #[inline]
    fn record_hit(&mut self, weight: u32) {
        self.hits += 1;
        self.hit_bytes += u64::from(weight);
    }

    #[inline]
    fn record_miss(&mut self, weight: u32) {
        self.misses += 1;
        self.miss_bytes += u64::from(weight);
    }

    #[inline]
    fn record_admission(&mut self) {
        self.admissions += 1;
    }

    #[inline]
    fn record_rejection(&mut self) {
        self.rejections += 1;
    }

    #[inline]
    fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    #[inline]
    fn record_victims_examined(&mut self, count: u64) {
        self.victims_examined += count;
    }
}

impl LevelMetricsRecorder for PolicyStats {
    fn record_level_hit(&mut self, level: usize) {
        *Self::level_slot(&mut self.level_hits, level) += 1;
    }

    fn record_level_miss(&mut self, level: usize) {
        *Self::level_slot(&mut self.level_misses, level) += 1;
    }
}

impl NamedMetricsRecorder for PolicyStats {
    fn record_counter(&mut self, name: &'static str, delta: u64) {
        *self.counters.entry(name).or_insert(0) += delta;
    }
}

impl MetricsSnapshotProvider<PolicyStatsSnapshot> for PolicyStats {
    fn snapshot(&self) -> PolicyStatsSnapshot {
        let depth = self.level_hits.len().max(self.level_misses.len());
        let levels = (0..depth)
            .map(|level| {
                let hits = self.level_hits(level);
                let misses = self.level_misses(level);
                LevelSnapshot {
                    level,
                    hits,
                    misses,
                    hit_rate: ratio(hits, hits + misses),
                }
            })
            .collect();

        PolicyStatsSnapshot {
            policy: self.name.clone(),
            operations: self.operations,
            hits: self.hits,
            misses: self.misses,
            hit_bytes: self.hit_bytes,
            miss_bytes: self.miss_bytes,
            admissions: self.admissions,
            rejections: self.rejections,
            evictions: self.evictions,
            victims_examined: self.victims_examined,
            hit_rate: self.hit_rate(),
            miss_rate: self.miss_rate(),
            weighted_hit_rate: self.weighted_hit_rate(),
            levels,
            counters: self
                .counters
                .iter()
                .map(|(name, value)| ((*name).to_string(), *value))
                .collect(),
        }
    }
}
