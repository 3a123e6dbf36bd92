//! Tiered cache with a cascading miss path.
//!
//! Tiers `0..n` each hold at most `multilevel-maximum-size[i]` bytes and an
//! entry lives in exactly one tier. A miss starts as a candidate for tier 0;
//! whatever a tier pushes out (a victim, or the candidate itself when the
//! admission filter prefers the victim) becomes a candidate for the next
//! tier. What falls off the last tier leaves the cache.
//!
//! ```text
//!   miss ──► candidates ──► TIER 0 ──departures──► TIER 1 ── ... ──► gone
//!                            │  while over budget:
//!                            │    victim = TierEviction::find_victim
//!                            │    admittor.admit(candidate, victim)
//!                            │      ? victim departs : candidate departs
//! ```
//!
//! | `TierEviction` | Victim                       | On hit               |
//! |----------------|------------------------------|----------------------|
//! | `Fifo`         | head                         | nothing              |
//! | `Clock`        | first unmarked from the head | mark                 |
//! | `Mru`          | entry before the tail        | move to tail         |
//! | `Lru`          | head                         | move to tail         |
//!
//! A hit at tier `L` is a level miss for tiers `0..L` and a level hit at `L`.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::admission::{AdmissionKind, Admittor};
use crate::config::SimulatorSettings;
use crate::ds::{SegmentList, SlotId};
use crate::error::{ConfigError, InvariantError, debit, ensure};
use crate::event::AccessEvent;
use crate::metrics::{CoreMetricsRecorder, LevelMetricsRecorder, NamedMetricsRecorder};
use crate::observer::Telemetry;
use crate::traits::Policy;

/// Per-tier replacement order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TierEviction {
    Fifo,
    Clock,
    Mru,
    #[default]
    Lru,
}

impl TierEviction {
    pub fn label(self) -> &'static str {
        match self {
            TierEviction::Fifo => "Fifo",
            TierEviction::Clock => "Clock",
            TierEviction::Mru => "Mru",
            TierEviction::Lru => "Lru",
        }
    }
}

#[derive(Debug)]
struct Entry {
    key: u64,
    weight: u32,
    /// Resident tier, or for a candidate the first tier it may enter.
    level: usize,
    marked: bool,
}

/// Exclusive tiers fed by a cascade of departures.
#[derive(Debug)]
pub struct MultilevelLinked {
    telemetry: Telemetry,
    data: FxHashMap<u64, SlotId>,
    entries: SegmentList<Entry>,
    admittor: Box<dyn Admittor>,
    eviction: TierEviction,
    tiers: Vec<SlotId>,
    candidates: SlotId,
    maximum_sizes: Vec<u64>,
    current_sizes: Vec<u64>,
}

impl MultilevelLinked {
    pub fn new(
        settings: &SimulatorSettings,
        eviction: TierEviction,
        admission: AdmissionKind,
    ) -> Result<Self, ConfigError> {
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
        let candidates = entries.new_sentinel();
        let total: u64 = settings.multilevel_maximum_size.iter().sum();
        let sketch = settings
            .sketch
            .build(usize::try_from(total).unwrap_or(usize::MAX), settings.seed);

        Ok(Self {
            telemetry: Telemetry::new(admission.format(&format!("multi.{}", eviction.label()))),
            data: FxHashMap::default(),
            entries,
            admittor: admission.build(sketch),
            eviction,
            tiers,
            candidates,
            maximum_sizes: settings.multilevel_maximum_size.clone(),
            current_sizes: vec![0; settings.multilevel_maximum_size.len()],
        })
    }

    pub fn levels(&self) -> usize {
        self.tiers.len()
    }

    pub fn contains(&self, key: u64) -> bool {
        self.data.contains_key(&key)
    }

    /// Tier currently holding `key`.
    pub fn tier_of(&self, key: u64) -> Option<usize> {
        let id = self.data.get(&key)?;
        self.entries.get(*id).map(|entry| entry.level)
    }

    pub fn tier_size(&self, level: usize) -> u64 {
        self.current_sizes.get(level).copied().unwrap_or(0)
    }

    fn entry(&self, id: SlotId) -> Result<&Entry, InvariantError> {
        self.entries
            .get(id)
            .ok_or_else(|| InvariantError::new(format!("slot {} holds no entry", id.index())))
    }

    fn entry_mut(&mut self, id: SlotId) -> Result<&mut Entry, InvariantError> {
        self.entries
            .get_mut(id)
            .ok_or_else(|| InvariantError::new(format!("slot {} holds no entry", id.index())))
    }

    fn on_access(&mut self, id: SlotId, level: usize) -> Result<(), InvariantError> {
        self.telemetry.stats_mut().record_counter("tier_operations", 1);
        match self.eviction {
            TierEviction::Fifo => Ok(()),
            TierEviction::Clock => {
                self.entry_mut(id)?.marked = true;
                Ok(())
            },
            TierEviction::Mru | TierEviction::Lru => self.entries.move_to_tail(id, self.tiers[level]),
        }
    }

    fn find_victim(&mut self, level: usize) -> Result<SlotId, InvariantError> {
        let tier = self.tiers[level];
        let empty = || InvariantError::new(format!("tier {level} is over budget but empty"));
        match self.eviction {
            TierEviction::Fifo | TierEviction::Lru => {
                self.telemetry.stats_mut().record_counter("tier_operations", 1);
                self.entries.first(tier).ok_or_else(empty)
            },
            TierEviction::Mru => {
                self.telemetry.stats_mut().record_counter("tier_operations", 1);
                let last = self.entries.last(tier).ok_or_else(empty)?;
                // the tail is the entry just placed
                Ok(self.entries.prev_entry(last).unwrap_or(last))
            },
            TierEviction::Clock => loop {
                self.telemetry.stats_mut().record_counter("tier_operations", 1);
                let head = self.entries.first(tier).ok_or_else(empty)?;
                let entry = self.entry_mut(head)?;
                if !entry.marked {
                    return Ok(head);
                }
                entry.marked = false;
                self.entries.move_to_tail(head, tier)?;
            },
        }
    }

    /// Moves a resident of `level` onto the candidate list for the next tier.
    fn depart(&mut self, id: SlotId, level: usize) -> Result<(), InvariantError> {
        let entry = self.entry_mut(id)?;
        entry.level = level + 1;
        let (key, weight) = (entry.key, entry.weight);
        debit(&mut self.current_sizes[level], u64::from(weight), "tier")?;
        self.data.remove(&key);
        self.entries.unlink(id)?;
        self.entries.append_tail(id, self.candidates)?;
        self.telemetry.evicted(key, weight);
        Ok(())
    }

    fn place(&mut self, level: usize) -> Result<(), InvariantError> {
        let maximum = self.maximum_sizes[level];
        while let Some(candidate) = self.entries.first(self.candidates) {
            let entry = self.entry_mut(candidate)?;
            if entry.level > level {
                break;
            }
            let (key, weight) = (entry.key, u64::from(entry.weight));
            if weight > maximum {
                entry.level = level + 1;
                self.entries.move_to_tail(candidate, self.candidates)?;
                continue;
            }

            entry.level = level;
            self.entries.unlink(candidate)?;
            self.entries.append_tail(candidate, self.tiers[level])?;
            self.data.insert(key, candidate);
            self.current_sizes[level] += weight;

            while self.current_sizes[level] > maximum {
                let victim = self.find_victim(level)?;
                let victim_entry = self.entry(victim)?;
                let victim_key = victim_entry.key;
                let candidate_weight = self.entry(candidate)?.weight;
                if self.admittor.admit(key, victim_key) {
                    self.telemetry.admitted(key, candidate_weight);
                    self.depart(victim, level)?;
                } else {
                    self.telemetry.rejected(key, candidate_weight);
                    self.depart(candidate, level)?;
                }
            }
        }
        Ok(())
    }

    fn on_miss(&mut self, key: u64, weight: u32) -> Result<(), InvariantError> {
        if self.maximum_sizes.iter().all(|&maximum| u64::from(weight) > maximum) {
            for level in 0..self.levels() {
                self.telemetry.stats_mut().record_level_miss(level);
            }
            self.telemetry.rejected(key, weight);
            return Ok(());
        }

        let id = self.entries.insert(Entry {
            key,
            weight,
            level: 0,
            marked: false,
        });
        self.entries.append_tail(id, self.candidates)?;

        for level in 0..self.levels() {
            self.telemetry.stats_mut().record_level_miss(level);
            self.place(level)?;
        }

        while let Some(gone) = self.entries.first(self.candidates) {
            self.entries.unlink(gone)?;
            self.entries.free(gone)?;
        }
        Ok(())
    }
}

impl Policy for MultilevelLinked {
    fn record(&mut self, event: AccessEvent) -> Result<(), InvariantError> {
        let AccessEvent { key, weight } = event;
        self.telemetry.stats_mut().record_operation();
        self.admittor.record(key);

        match self.data.get(&key).copied() {
            None => {
                self.telemetry.stats_mut().record_miss(weight);
                self.on_miss(key, weight)
            },
            Some(id) => {
                let level = self.entry(id)?.level;
                let stats = self.telemetry.stats_mut();
                stats.record_hit(weight);
                for missed in 0..level {
                    stats.record_level_miss(missed);
                }
                stats.record_level_hit(level);
                self.on_access(id, level)
            },
        }
    }

    fn check_invariants(&self) -> Result<(), InvariantError> {
        let mut linked = 0usize;
        for (level, &tier) in self.tiers.iter().enumerate() {
            linked += self.entries.validate(tier)?;
            let mut size = 0u64;
            for (id, entry) in self.entries.iter(tier) {
                ensure(entry.level == level, || {
                    format!("key {} in tier {} tagged {}", entry.key, level, entry.level)
                })?;
                ensure(self.data.get(&entry.key) == Some(&id), || {
                    format!("key {} is linked but not mapped", entry.key)
                })?;
                size += u64::from(entry.weight);
            }
            ensure(size == self.current_sizes[level], || {
                format!("tier {}: {} != {}", level, self.current_sizes[level], size)
            })?;
            ensure(size <= self.maximum_sizes[level], || {
                format!("tier {}: {} > max {}", level, size, self.maximum_sizes[level])
            })?;
        }
        ensure(self.entries.is_segment_empty(self.candidates), || {
            "candidates left behind".to_string()
        })?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ds::SketchKind;

    fn policy(tiers: &[u64], eviction: TierEviction, admission: AdmissionKind) -> MultilevelLinked {
        let settings = SimulatorSettings {
            multilevel_maximum_size: tiers.to_vec(),
            sketch: SketchKind::Perfect,
            ..Default::default()
        };
        MultilevelLinked::new(&settings, eviction, admission).unwrap()
    }

    fn replay(policy: &mut MultilevelLinked, keys: &[u64]) {
        for &key in keys {
            policy.record(AccessEvent::new(key, 10)).unwrap();
            policy.check_invariants().unwrap();
        }
    }

    // ==============================================
    // Cascade
    // ==============================================

    mod cascade {
        use super::*;

        #[test]
        fn miss_lands_in_first_tier() {
            let mut policy = policy(&[20, 20], TierEviction::Lru, AdmissionKind::Always);
            replay(&mut policy, &[1]);

            assert_eq!(policy.tier_of(1), Some(0));
            assert_eq!(policy.tier_size(0), 10);
            assert_eq!(policy.stats().level_misses(0), 1);
            assert_eq!(policy.stats().level_misses(1), 1);
        }

        #[test]
        fn victim_moves_down_a_tier() {
            let mut policy = policy(&[20, 20], TierEviction::Lru, AdmissionKind::Always);
            replay(&mut policy, &[1, 2, 3]);

            assert_eq!(policy.tier_of(1), Some(1));
            assert_eq!(policy.tier_of(3), Some(0));
            assert_eq!(policy.stats().evictions(), 1);
            assert_eq!(policy.stats().admissions(), 1);
        }

        #[test]
        fn last_tier_drops_out_of_the_cache() {
            let mut policy = policy(&[10, 10], TierEviction::Lru, AdmissionKind::Always);
            replay(&mut policy, &[1, 2, 3]);

            assert!(!policy.contains(1));
            assert_eq!(policy.tier_of(2), Some(1));
            assert_eq!(policy.tier_of(3), Some(0));
            assert_eq!(policy.stats().evictions(), 3);
        }

        #[test]
        fn heavy_candidate_skips_small_tier() {
            let mut policy = policy(&[10, 50], TierEviction::Lru, AdmissionKind::Always);
            policy.record(AccessEvent::new(1, 30)).unwrap();
            policy.check_invariants().unwrap();

            assert_eq!(policy.tier_of(1), Some(1));
            assert_eq!(policy.tier_size(0), 0);
        }

        #[test]
        fn too_heavy_for_every_tier_is_dropped() {
            let mut policy = policy(&[10, 10], TierEviction::Lru, AdmissionKind::Always);
            policy.record(AccessEvent::new(1, 30)).unwrap();
            policy.check_invariants().unwrap();
            assert!(!policy.contains(1));
            assert_eq!(policy.stats().rejections(), 1);
            assert_eq!(policy.stats().evictions(), 0);
        }

        #[test]
        fn tinylfu_sends_cold_candidate_down() {
            let mut policy = policy(&[20, 20], TierEviction::Lru, AdmissionKind::TinyLfu);
            replay(&mut policy, &[1, 1, 2, 3]);

            assert_eq!(policy.tier_of(3), Some(1));
            assert_eq!(policy.tier_of(2), Some(0));
            assert_eq!(policy.stats().rejections(), 1);
            assert_eq!(policy.name(), "multi.Lru_TinyLfu");
        }

        #[test]
        fn hit_in_lower_tier_counts_level_misses_above() {
            let mut policy = policy(&[20, 20], TierEviction::Lru, AdmissionKind::Always);
            replay(&mut policy, &[1, 2, 3, 1]);

            assert_eq!(policy.stats().hits(), 1);
            assert_eq!(policy.stats().level_hits(1), 1);
            assert_eq!(policy.stats().level_misses(0), 4);
            assert_eq!(policy.stats().level_hits(0), 0);
        }
    }

    // ==============================================
    // Tier Eviction Orders
    // ==============================================

    mod tier_eviction {
        use super::*;

        #[test]
        fn fifo_ignores_hits() {
            let mut policy = policy(&[20, 20], TierEviction::Fifo, AdmissionKind::Always);
            replay(&mut policy, &[1, 2, 1, 3]);
            assert_eq!(policy.tier_of(1), Some(1));
        }

        #[test]
        fn lru_protects_recent_hits() {
            let mut policy = policy(&[20, 20], TierEviction::Lru, AdmissionKind::Always);
            replay(&mut policy, &[1, 2, 1, 3]);
            assert_eq!(policy.tier_of(1), Some(0));
            assert_eq!(policy.tier_of(2), Some(1));
        }

        #[test]
        fn mru_skips_the_new_entry() {
            let mut policy = policy(&[20, 20], TierEviction::Mru, AdmissionKind::Always);
            replay(&mut policy, &[1, 2, 3]);
            assert_eq!(policy.tier_of(2), Some(1));
            assert_eq!(policy.tier_of(1), Some(0));
            assert_eq!(policy.tier_of(3), Some(0));
        }

        #[test]
        fn clock_gives_marked_entries_a_second_chance() {
            let mut policy = policy(&[20, 20], TierEviction::Clock, AdmissionKind::Always);
            replay(&mut policy, &[1, 2, 1, 3]);
            assert_eq!(policy.tier_of(1), Some(0));
            assert_eq!(policy.tier_of(2), Some(1));
            assert!(policy.stats().counter("tier_operations") >= 3);
        }
    }

    // ==============================================
    // Property Tests
    // ==============================================

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn evictions() -> impl Strategy<Value = TierEviction> {
            prop_oneof![
                Just(TierEviction::Fifo),
                Just(TierEviction::Clock),
                Just(TierEviction::Mru),
                Just(TierEviction::Lru),
            ]
        }

        proptest! {
            #[test]
            fn prop_tiers_stay_within_budget(
                eviction in evictions(),
                tinylfu in any::<bool>(),
                trace in prop::collection::vec((0u64..30, 1u32..40), 1..300),
            ) {
                let admission = if tinylfu { AdmissionKind::TinyLfu } else { AdmissionKind::Always };
                let mut policy = policy(&[40, 100], eviction, admission);
                for (key, weight) in trace {
                    policy.record(AccessEvent::new(key, weight)).unwrap();
                    prop_assert!(policy.check_invariants().is_ok());
                }
            }
        }
    }
}
