//! Two-level W-TinyLFU with a veterans region.
//!
//! An unweighted (entry-count) cache split over two levels:
//!
//! ```text
//!   LEVEL ONE (multilevel-maximum-size[0])    LEVEL TWO (multilevel-maximum-size[1])
//!   ┌───────────────┬───────────────────┐     ┌─────────────┬──────────────┐
//!   │ WINDOW (LRU)  │ VETERANS (LRU)    │     │ PROBATION   │ PROTECTED    │
//!   └──────┬────────┴─────────▲─────────┘     └──────▲──────┴──────┬───────┘
//!          │ overflow         │ swap if TinyLFU prefers            │
//!          ├──────────────────┘ the level-two entry                │
//!          └─► veterans while room, else probation ────────────────┘
//! ```
//!
//! A level-two hit first tries to swap places with the veterans' LRU entry;
//! the TinyLFU admittor decides. When level two is full, a window departure
//! competes with the probation head for its slot.

use rustc_hash::FxHashMap;

use crate::admission::{Admittor, TinyLfuAdmittor};
use crate::config::{SimulatorSettings, check_fraction};
use crate::ds::{SegmentList, SlotId};
use crate::error::{ConfigError, InvariantError, debit, ensure};
use crate::event::AccessEvent;
use crate::metrics::{CoreMetricsRecorder, LevelMetricsRecorder, NamedMetricsRecorder};
use crate::observer::{PolicyEvent, Telemetry};
use crate::traits::Policy;

/// Region an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BidiRegion {
    Window,
    Veteran,
    Probation,
    Protected,
}

#[derive(Debug)]
struct Entry {
    key: u64,
    region: BidiRegion,
}

/// Two-level TinyLFU counted in entries.
#[derive(Debug)]
pub struct BidiTinyLfu {
    telemetry: Telemetry,
    data: FxHashMap<u64, SlotId>,
    entries: SegmentList<Entry>,
    admittor: TinyLfuAdmittor,

    window: SlotId,
    veterans: SlotId,
    probation: SlotId,
    protected: SlotId,

    maximum_first: u64,
    maximum_second: u64,
    max_window: u64,
    max_veterans: u64,
    max_protected: u64,
    size_window: u64,
    size_veterans: u64,
    size_probation: u64,
    size_protected: u64,
}

impl BidiTinyLfu {
    pub fn new(settings: &SimulatorSettings, percent_veterans: f64) -> Result<Self, ConfigError> {
        settings.validate()?;
        check_fraction("percent-veterans", percent_veterans)?;
        let (first, second) = match settings.multilevel_maximum_size.as_slice() {
            [first, second, ..] => (*first, *second),
            _ => {
                return Err(ConfigError::new(
                    "multilevel-maximum-size must list two levels",
                ));
            },
        };

        let max_veterans = (first as f64 * percent_veterans) as u64;
        let mut entries = SegmentList::new();
        let window = entries.new_sentinel();
        let veterans = entries.new_sentinel();
        let probation = entries.new_sentinel();
        let protected = entries.new_sentinel();
        let sketch = settings
            .sketch
            .build(usize::try_from(second).unwrap_or(usize::MAX), settings.seed);

        Ok(Self {
            telemetry: Telemetry::new(format!(
                "multi.BidiTinyLfu ({:.0}%)",
                100.0 * (1.0 - percent_veterans)
            )),
            data: FxHashMap::default(),
            entries,
            admittor: TinyLfuAdmittor::new(sketch),
            window,
            veterans,
            probation,
            protected,
            maximum_first: first,
            maximum_second: second,
            max_window: first - max_veterans,
            max_veterans,
            max_protected: (second as f64 * settings.percent_main_protected) as u64,
            size_window: 0,
            size_veterans: 0,
            size_probation: 0,
            size_protected: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, key: u64) -> bool {
        self.data.contains_key(&key)
    }

    pub fn region_of(&self, key: u64) -> Option<BidiRegion> {
        let id = self.data.get(&key)?;
        self.entries.get(*id).map(|entry| entry.region)
    }

    fn entry(&self, id: SlotId) -> Result<&Entry, InvariantError> {
        self.entries
            .get(id)
            .ok_or_else(|| InvariantError::new(format!("slot {} holds no entry", id.index())))
    }

    fn relink(&mut self, id: SlotId, region: BidiRegion) -> Result<(), InvariantError> {
        let sentinel = match region {
            BidiRegion::Window => self.window,
            BidiRegion::Veteran => self.veterans,
            BidiRegion::Probation => self.probation,
            BidiRegion::Protected => self.protected,
        };
        self.entries.unlink(id)?;
        self.entries
            .get_mut(id)
            .ok_or_else(|| InvariantError::new(format!("slot {} holds no entry", id.index())))?
            .region = region;
        self.entries.append_tail(id, sentinel)
    }

    /// Swaps a level-two entry with the veterans' LRU entry if TinyLFU agrees.
    fn promote(&mut self, id: SlotId) -> Result<bool, InvariantError> {
        let Some(victim) = self.entries.first(self.veterans) else {
            return Ok(false);
        };
        let node = self.entry(id)?;
        let (key, region) = (node.key, node.region);
        let victim_key = self.entry(victim)?.key;
        if !self.admittor.admit(key, victim_key) {
            return Ok(false);
        }

        if region == BidiRegion::Protected {
            self.size_probation += 1;
            debit(&mut self.size_protected, 1, "protected")?;
        }
        self.relink(id, BidiRegion::Veteran)?;
        self.relink(victim, BidiRegion::Probation)?;
        self.telemetry
            .stats_mut()
            .record_counter("level_two_promotions", 1);
        self.telemetry.emit(PolicyEvent::Promoted { key, from: 1, to: 0 });
        Ok(true)
    }

    fn on_probation_hit(&mut self, id: SlotId) -> Result<(), InvariantError> {
        if self.promote(id)? {
            return Ok(());
        }
        self.relink(id, BidiRegion::Protected)?;
        debit(&mut self.size_probation, 1, "probation")?;
        self.size_protected += 1;
        if self.size_protected > self.max_protected {
            if let Some(demote) = self.entries.first(self.protected) {
                self.relink(demote, BidiRegion::Probation)?;
                self.size_probation += 1;
                debit(&mut self.size_protected, 1, "protected")?;
            }
        }
        Ok(())
    }

    fn on_protected_hit(&mut self, id: SlotId) -> Result<(), InvariantError> {
        if self.promote(id)? {
            return Ok(());
        }
        self.entries.move_to_tail(id, self.protected)
    }

    fn on_miss(&mut self, key: u64) -> Result<(), InvariantError> {
        let id = self.entries.insert(Entry {
            key,
            region: BidiRegion::Window,
        });
        self.entries.append_tail(id, self.window)?;
        self.data.insert(key, id);
        self.size_window += 1;
        self.evict()
    }

    fn evict(&mut self) -> Result<(), InvariantError> {
        if self.size_window <= self.max_window {
            return Ok(());
        }
        let candidate = self
            .entries
            .first(self.window)
            .ok_or_else(|| InvariantError::new("window over budget but empty"))?;
        debit(&mut self.size_window, 1, "window")?;
        if self.size_veterans < self.max_veterans {
            self.relink(candidate, BidiRegion::Veteran)?;
            self.size_veterans += 1;
            return Ok(());
        }

        self.relink(candidate, BidiRegion::Probation)?;
        if self.size_probation + self.size_protected < self.maximum_second {
            self.size_probation += 1;
            return Ok(());
        }

        let victim = self
            .entries
            .first(self.probation)
            .ok_or_else(|| InvariantError::new("probation is empty"))?;
        let candidate_key = self.entry(candidate)?.key;
        let victim_key = self.entry(victim)?.key;
        let admit = victim != candidate && self.admittor.admit(candidate_key, victim_key);
        if admit {
            self.telemetry.admitted(candidate_key, 1);
            self.telemetry
                .stats_mut()
                .record_counter("level_two_evictions", 1);
        }
        let evict = if admit { victim } else { candidate };
        self.entries.unlink(evict)?;
        let gone = self.entries.free(evict)?;
        self.data.remove(&gone.key);
        if admit {
            self.telemetry.evicted(gone.key, 1);
        } else {
            self.telemetry.discarded(gone.key, 1);
        }
        Ok(())
    }
}

impl Policy for BidiTinyLfu {
    fn record(&mut self, event: AccessEvent) -> Result<(), InvariantError> {
        let key = event.key;
        self.telemetry.stats_mut().record_operation();
        self.admittor.record(key);

        let Some(id) = self.data.get(&key).copied() else {
            self.on_miss(key)?;
            let stats = self.telemetry.stats_mut();
            stats.record_miss(1);
            stats.record_level_miss(0);
            stats.record_level_miss(1);
            return Ok(());
        };

        let region = self.entry(id)?.region;
        match region {
            BidiRegion::Window => self.entries.move_to_tail(id, self.window)?,
            BidiRegion::Veteran => self.entries.move_to_tail(id, self.veterans)?,
            BidiRegion::Probation => self.on_probation_hit(id)?,
            BidiRegion::Protected => self.on_protected_hit(id)?,
        }

        let stats = self.telemetry.stats_mut();
        stats.record_hit(1);
        match region {
            BidiRegion::Window => {
                stats.record_level_hit(0);
                stats.record_counter("window_hits", 1);
            },
            BidiRegion::Veteran => {
                stats.record_level_hit(0);
                stats.record_counter("veterans_hits", 1);
            },
            BidiRegion::Probation | BidiRegion::Protected => {
                stats.record_level_miss(0);
                stats.record_level_hit(1);
            },
        }
        Ok(())
    }

    fn check_invariants(&self) -> Result<(), InvariantError> {
        let mut linked = 0usize;
        for (sentinel, region, expected) in [
            (self.window, BidiRegion::Window, self.size_window),
            (self.veterans, BidiRegion::Veteran, self.size_veterans),
            (self.probation, BidiRegion::Probation, self.size_probation),
            (self.protected, BidiRegion::Protected, self.size_protected),
        ] {
            let count = self.entries.validate(sentinel)?;
            for (id, entry) in self.entries.iter(sentinel) {
                ensure(entry.region == region, || {
                    format!("key {} tagged {:?} but linked in {:?}", entry.key, entry.region, region)
                })?;
                ensure(self.data.get(&entry.key) == Some(&id), || {
                    format!("key {} is linked but not mapped", entry.key)
                })?;
            }
            ensure(count as u64 == expected, || {
                format!("{region:?}: {expected} != {count}")
            })?;
            linked += count;
        }

        ensure(
            linked == self.data.len() && linked == self.entries.len(),
            || format!("{} linked entries, {} mapped keys", linked, self.data.len()),
        )?;
        ensure(self.size_window <= self.max_window, || {
            format!("window: {} > max {}", self.size_window, self.max_window)
        })?;
        ensure(self.size_veterans <= self.max_veterans, || {
            format!("veterans: {} > max {}", self.size_veterans, self.max_veterans)
        })?;
        ensure(
            self.size_probation + self.size_protected <= self.maximum_second,
            || format!("level two holds {} entries", self.size_probation + self.size_protected),
        )?;
        ensure(
            self.data.len() as u64 <= self.maximum_first + self.maximum_second,
            || format!("{} entries exceed both levels", self.data.len()),
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

    /// Level one: window 3 + veterans 2; level two: 4 entries, 2 protected.
    fn policy() -> BidiTinyLfu {
        let settings = SimulatorSettings {
            multilevel_maximum_size: vec![5, 4],
            percent_main_protected: 0.5,
            sketch: SketchKind::Perfect,
            ..Default::default()
        };
        BidiTinyLfu::new(&settings, 0.4).unwrap()
    }

    fn replay(policy: &mut BidiTinyLfu, keys: &[u64]) {
        for &key in keys {
            policy.record(AccessEvent::key_only(key)).unwrap();
            policy.check_invariants().unwrap();
        }
    }

    #[test]
    fn window_departures_fill_veterans_first() {
        let mut policy = policy();
        replay(&mut policy, &[1, 2, 3, 4, 5, 6]);

        assert_eq!(policy.region_of(1), Some(BidiRegion::Veteran));
        assert_eq!(policy.region_of(2), Some(BidiRegion::Veteran));
        assert_eq!(policy.region_of(3), Some(BidiRegion::Probation));
        assert_eq!(policy.region_of(6), Some(BidiRegion::Window));
        assert_eq!(policy.name(), "multi.BidiTinyLfu (60%)");
    }

    #[test]
    fn level_one_hits_are_split_by_region() {
        let mut policy = policy();
        replay(&mut policy, &[1, 2, 3, 4, 5, 6, 1, 6]);

        let stats = policy.stats();
        assert_eq!(stats.level_hits(0), 2);
        assert_eq!(stats.counter("veterans_hits"), 1);
        assert_eq!(stats.counter("window_hits"), 1);
        assert_eq!(stats.level_misses(1), 6);
    }

    #[test]
    fn frequent_level_two_entry_swaps_with_veteran() {
        let mut policy = policy();
        replay(&mut policy, &[1, 2, 3, 4, 5, 6, 3]);

        assert_eq!(policy.region_of(3), Some(BidiRegion::Veteran));
        assert_eq!(policy.region_of(1), Some(BidiRegion::Probation));
        assert_eq!(policy.stats().counter("level_two_promotions"), 1);
        assert_eq!(policy.stats().level_hits(1), 1);
    }

    #[test]
    fn losing_swap_protects_the_entry() {
        let mut policy = policy();
        replay(&mut policy, &[1, 2, 3, 4, 5, 6, 1, 2, 3]);

        assert_eq!(policy.region_of(3), Some(BidiRegion::Protected));
        assert_eq!(policy.stats().counter("level_two_promotions"), 0);
    }

    #[test]
    fn full_level_two_rejects_cold_candidate() {
        let mut policy = policy();
        replay(&mut policy, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);

        assert!(!policy.contains(7));
        assert_eq!(policy.region_of(3), Some(BidiRegion::Probation));
        assert_eq!(policy.stats().evictions(), 1);
        assert_eq!(policy.stats().counter("level_two_evictions"), 0);
        assert_eq!(policy.len(), 9);
    }

    #[test]
    fn full_level_two_admits_frequent_candidate() {
        let mut policy = policy();
        // 7 loses its first attempt but keeps its frequency
        replay(&mut policy, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 7, 11, 12, 13]);

        assert_eq!(policy.region_of(7), Some(BidiRegion::Probation));
        assert!(!policy.contains(3));
        assert_eq!(policy.stats().counter("level_two_evictions"), 1);
    }

    #[test]
    fn needs_two_levels() {
        let settings = SimulatorSettings {
            multilevel_maximum_size: vec![5],
            ..Default::default()
        };
        assert!(BidiTinyLfu::new(&settings, 0.2).is_err());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_regions_stay_consistent(
                percent_veterans in 0.0f64..=1.0,
                trace in prop::collection::vec(0u64..40, 1..400),
            ) {
                let settings = SimulatorSettings {
                    multilevel_maximum_size: vec![8, 12],
                    ..Default::default()
                };
                let mut policy = BidiTinyLfu::new(&settings, percent_veterans).unwrap();
                for key in trace {
                    policy.record(AccessEvent::key_only(key)).unwrap();
                    prop_assert!(policy.check_invariants().is_ok());
                }
            }
        }
    }
}
