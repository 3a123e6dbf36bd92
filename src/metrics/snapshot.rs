use std::collections::BTreeMap;

use serde::Serialize;

/// Point-in-time copy of a policy's counters with derived rates.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct PolicyStatsSnapshot {
    pub policy: String,
    pub operations: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_bytes: u64,
    pub miss_bytes: u64,
    pub admissions: u64,
    pub rejections: u64,
    pub evictions: u64,
    pub victims_examined: u64,

    // derived at snapshot time
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub weighted_hit_rate: f64,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub levels: Vec<LevelSnapshot>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, u64>,
}

/// Hit/miss counts of one tier.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct LevelSnapshot {
    pub level: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}
