//! Tiered LRU with probabilistic upward promotion.
//!
//! Each tier is an LRU list stamped with a logical clock. Tier 0 is the
//! fastest. Entries never cascade downward: whatever a tier evicts leaves the
//! cache. Instead entries climb:
//!
//! ```text
//!   hit at tier L ──► with probability p[L]: leave L and walk upward
//!   miss          ──► walk upward from the last tier
//!
//!   walk: for level = start-1 down to 0
//!           if draw fails at `level` (always at 0): insert at `level`, stop
//! ```
//!
//! `p[L]` starts at the share of capacity above `L` and adapts from the ratio
//! of cache lifetimes (timestamp span of a tier) between `L - 1` and `L`,
//! never exceeding its starting value.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

use crate::admission::{AdmissionKind, Admittor};
use crate::config::SimulatorSettings;
use crate::ds::{SegmentList, SlotId};
use crate::error::{ConfigError, InvariantError, debit, ensure};
use crate::event::AccessEvent;
use crate::metrics::{CoreMetricsRecorder, LevelMetricsRecorder, NamedMetricsRecorder};
use crate::observer::{PolicyEvent, Telemetry};
use crate::traits::Policy;

/// Fraction of a tier's lifetime between two adaptations.
const HINT_FREQ: f64 = 0.05;

#[derive(Debug)]
struct Entry {
    key: u64,
    weight: u32,
    level: usize,
    timestamp: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct TierAdaptation {
    probability: f64,
    size_ratio: f64,
    previous_ratio: f64,
    adjust: bool,
    last_adjust: u64,
}

/// Tiered LRU whose entries move up by random draws.
#[derive(Debug)]
pub struct Promote {
    telemetry: Telemetry,
    data: FxHashMap<u64, SlotId>,
    entries: SegmentList<Entry>,
    admittor: Box<dyn Admittor>,
    rng: SmallRng,
    tiers: Vec<SlotId>,
    maximum_sizes: Vec<u64>,
    current_sizes: Vec<u64>,
    adaptation: Vec<TierAdaptation>,
    timestamp: u64,
}

impl Promote {
    pub fn new(settings: &SimulatorSettings, admission: AdmissionKind) -> Result<Self, ConfigError> {
        settings.validate()?;
        if settings.multilevel_maximum_size.is_empty() {
            return Err(ConfigError::new(
                "multilevel-maximum-size must list at least one tier",
            ));
        }

        let mut entries = SegmentList::new();
        let tiers: Vec<SlotId> = settings
            .multilevel_maximum_size
            .iter()
            .map(|_| entries.new_sentinel())
            .collect();

        let mut above = 0u64;
        let adaptation = settings
            .multilevel_maximum_size
            .iter()
            .map(|&maximum| {
                let size_ratio = above as f64 / (above + maximum) as f64;
                above += maximum;
                TierAdaptation {
                    probability: size_ratio,
                    size_ratio,
                    ..TierAdaptation::default()
                }
            })
            .collect();

        let sketch = settings
            .sketch
            .build(usize::try_from(above).unwrap_or(usize::MAX), settings.seed);

        Ok(Self {
            telemetry: Telemetry::new(admission.format("multi.Promote")),
            data: FxHashMap::default(),
            entries,
            admittor: admission.build(sketch),
            rng: SmallRng::seed_from_u64(settings.seed),
            tiers,
            maximum_sizes: settings.multilevel_maximum_size.clone(),
            current_sizes: vec![0; settings.multilevel_maximum_size.len()],
            adaptation,
            timestamp: 0,
        })
    }

    pub fn levels(&self) -> usize {
        self.tiers.len()
    }

    pub fn contains(&self, key: u64) -> bool {
        self.data.contains_key(&key)
    }

    pub fn tier_of(&self, key: u64) -> Option<usize> {
        let id = self.data.get(&key)?;
        self.entries.get(*id).map(|entry| entry.level)
    }

    pub fn tier_size(&self, level: usize) -> u64 {
        self.current_sizes.get(level).copied().unwrap_or(0)
    }

    /// Current chance that an entry at `level` moves upward.
    pub fn promotion_probability(&self, level: usize) -> f64 {
        self.adaptation.get(level).map_or(0.0, |tier| tier.probability)
    }

    fn entry(&self, id: SlotId) -> Result<&Entry, InvariantError> {
        self.entries
            .get(id)
            .ok_or_else(|| InvariantError::new(format!("slot {} holds no entry", id.index())))
    }

    /// Timestamp span between a tier's MRU and LRU entries.
    fn cache_life(&self, level: usize) -> u64 {
        let tier = self.tiers[level];
        let stamp = |id: Option<SlotId>| {
            id.and_then(|id| self.entries.get(id))
                .map_or(0, |entry| entry.timestamp)
        };
        stamp(self.entries.last(tier)).saturating_sub(stamp(self.entries.first(tier)))
    }

    fn adjust_if_needed(&mut self) {
        for level in 1..self.levels() {
            let life = self.cache_life(level);
            let since = self.timestamp - self.adaptation[level].last_adjust;
            if life <= self.maximum_sizes[level] / 2 || life as f64 * HINT_FREQ >= since as f64 {
                continue;
            }

            let upper = self.cache_life(level - 1) as f64;
            let tier = &mut self.adaptation[level];
            tier.last_adjust = self.timestamp;
            tier.adjust = !tier.adjust;
            if !tier.adjust {
                continue;
            }

            let previous = tier.previous_ratio;
            let current = upper / (life as f64 + upper);
            let direction = 2.0 * current - 1.0;
            let settled = (direction > 0.0 && previous - current < HINT_FREQ * (previous - 0.5))
                || (direction < 0.0 && current - previous < HINT_FREQ * (0.5 - previous));
            if settled {
                let p = tier.probability;
                tier.probability = (p + (1.0 - p) * p * direction).min(tier.size_ratio);
            }
            tier.previous_ratio = current;
        }
    }

    fn should_promote(&mut self, level: usize) -> bool {
        level != 0 && self.adaptation[level].probability >= self.rng.random::<f64>()
    }

    fn remove(&mut self, id: SlotId, level: usize) -> Result<Entry, InvariantError> {
        self.entries.unlink(id)?;
        let entry = self.entries.free(id)?;
        debit(&mut self.current_sizes[level], u64::from(entry.weight), "tier")?;
        self.data.remove(&entry.key);
        Ok(entry)
    }

    fn insert(&mut self, key: u64, weight: u32, level: usize) -> Result<(), InvariantError> {
        if level == 1 {
            self.telemetry.stats_mut().record_counter("level_two_writes", 1);
        }
        let id = self.entries.insert(Entry {
            key,
            weight,
            level,
            timestamp: self.timestamp,
        });
        self.entries.append_tail(id, self.tiers[level])?;
        self.data.insert(key, id);
        self.current_sizes[level] += u64::from(weight);

        while self.current_sizes[level] > self.maximum_sizes[level] {
            let victim = self
                .entries
                .first(self.tiers[level])
                .ok_or_else(|| InvariantError::new(format!("tier {level} is over budget but empty")))?;
            self.telemetry.stats_mut().record_counter("tier_operations", 1);
            let victim_key = self.entry(victim)?.key;
            let leaving = if self.admittor.admit(key, victim_key) {
                self.telemetry.admitted(key, weight);
                victim
            } else {
                self.telemetry.rejected(key, weight);
                id
            };
            let gone = self.remove(leaving, level)?;
            self.telemetry.evicted(gone.key, gone.weight);
        }
        Ok(())
    }
}

impl Policy for Promote {
    fn record(&mut self, event: AccessEvent) -> Result<(), InvariantError> {
        let AccessEvent { key, weight } = event;
        self.timestamp += 1;
        self.adjust_if_needed();
        self.telemetry.stats_mut().record_operation();
        self.admittor.record(key);

        let mut start = self.levels();
        let mut promote = true;
        let mut promoted_from = None;
        match self.data.get(&key).copied() {
            None => {
                let stats = self.telemetry.stats_mut();
                stats.record_miss(weight);
                for level in 0..start {
                    stats.record_level_miss(level);
                }
            },
            Some(id) => {
                let level = self.entry(id)?.level;
                let stats = self.telemetry.stats_mut();
                stats.record_hit(weight);
                for missed in 0..level {
                    stats.record_level_miss(missed);
                }
                stats.record_level_hit(level);
                self.telemetry.stats_mut().record_counter("tier_operations", 1);

                start = level;
                promote = self.should_promote(level);
                if promote {
                    self.remove(id, level)?;
                    self.telemetry.stats_mut().record_eviction();
                    promoted_from = Some(level);
                } else {
                    self.entries.move_to_tail(id, self.tiers[level])?;
                    if let Some(entry) = self.entries.get_mut(id) {
                        entry.timestamp = self.timestamp;
                    }
                }
            },
        }

        if !promote {
            return Ok(());
        }
        for level in (0..start).rev() {
            if self.should_promote(level) {
                continue;
            }
            if u64::from(weight) <= self.maximum_sizes[level] {
                self.insert(key, weight, level)?;
                if let Some(from) = promoted_from {
                    self.telemetry.stats_mut().record_counter("promotions", 1);
                    self.telemetry.emit(PolicyEvent::Promoted {
                        key,
                        from,
                        to: level,
                    });
                }
            } else {
                self.telemetry.rejected(key, weight);
            }
            break;
        }
        Ok(())
    }

    fn check_invariants(&self) -> Result<(), InvariantError> {
        let mut linked = 0usize;
        for (level, &tier) in self.tiers.iter().enumerate() {
            linked += self.entries.validate(tier)?;
            let mut size = 0u64;
            let mut last_stamp = 0u64;
            for (id, entry) in self.entries.iter(tier) {
                ensure(entry.level == level, || {
                    format!("key {} in tier {} tagged {}", entry.key, level, entry.level)
                })?;
                ensure(self.data.get(&entry.key) == Some(&id), || {
                    format!("key {} is linked but not mapped", entry.key)
                })?;
                ensure(entry.timestamp >= last_stamp, || {
                    format!("tier {level} is out of recency order at key {}", entry.key)
                })?;
                last_stamp = entry.timestamp;
                size += u64::from(entry.weight);
            }
            ensure(size == self.current_sizes[level], || {
                format!("tier {}: {} != {}", level, self.current_sizes[level], size)
            })?;
            ensure(size <= self.maximum_sizes[level], || {
                format!("tier {}: {} > max {}", level, size, self.maximum_sizes[level])
            })?;
        }
        ensure(
            linked == self.data.len() && linked == self.entries.len(),
            || {
                format!(
                    "{} linked entries, {} mapped keys, {} allocated",
                    linked,
                    self.data.len(),
                    self.entries.len()
                )
            },
        )
    }

    fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    fn telemetry_mut(&mut self) -> &mut Telemetry {
        &mut self.telemetry
    }
}
