//! Weighted W-TinyLFU with a sampled main region.
//!
//! The window is an LRU list as in [`window_tinylfu`](super::window_tinylfu),
//! but main keeps no recency order at all: its entries sit in an unordered
//! vector and victims are picked from a small random sample.
//!
//! ```text
//!   miss ──► WINDOW (LRU) ──candidates (LIFO)──► MAIN: [e0, e1, e2, ... en]
//!                                                 │
//!                                  sample-size random draws (with replacement)
//!                                                 │
//!                                                 ▼
//!                                    best draw per SampleStrategy
//!                                    swap-removed from the vector
//! ```
//!
//! | `SampleStrategy` | Victim among the draws             |
//! |------------------|------------------------------------|
//! | `Rand`           | a single uniform draw              |
//! | `Freq`           | lowest frequency                   |
//! | `Size`           | largest weight                     |
//! | `FreqToSize`     | lowest frequency per byte          |
//! | `SizeDist`       | weight closest to the space needed |
//!
//! A spared victim goes back into the vector. Draws come from a [`SmallRng`]
//! seeded from the settings, so a replay is deterministic.

use std::fmt;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::config::{SimulatorSettings, check_fraction};
use crate::ds::{Frequency, SegmentList, SlotId};
use crate::error::{ConfigError, InvariantError, debit, ensure};
use crate::event::AccessEvent;
use crate::metrics::CoreMetricsRecorder;
use crate::observer::Telemetry;
use crate::policy::AdmissionRule;
use crate::traits::Policy;

/// Victim heuristic applied to a random sample of main.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleStrategy {
    Rand,
    #[default]
    Freq,
    Size,
    FreqToSize,
    SizeDist,
}

impl fmt::Display for SampleStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleStrategy::Rand => "Rand",
            SampleStrategy::Freq => "Freq",
            SampleStrategy::Size => "Size",
            SampleStrategy::FreqToSize => "FreqToSize",
            SampleStrategy::SizeDist => "SizeDist",
        };
        f.write_str(name)
    }
}

/// How many sampled victims a candidate is judged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampledSelection {
    /// One victim decides; a winner keeps evicting until it fits.
    Single,
    /// Victims are drawn until their weight covers the space needed.
    Sum,
}

/// Region an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Window,
    Main,
}

#[derive(Debug)]
struct Entry {
    key: u64,
    weight: u32,
    region: Region,
}

impl Entry {
    fn weight(&self) -> u64 {
        u64::from(self.weight)
    }
}

/// W-TinyLFU whose main region is evicted by sampling.
#[derive(Debug)]
pub struct SampledTinyLfu {
    telemetry: Telemetry,
    data: FxHashMap<u64, SlotId>,
    entries: SegmentList<Entry>,
    main: Vec<SlotId>,
    sketch: Box<dyn Frequency>,
    rng: SmallRng,

    window: SlotId,
    candidates: SlotId,

    selection: SampledSelection,
    sample: SampleStrategy,
    sample_size: usize,
    rule: AdmissionRule,
    prune: bool,

    maximum_size: u64,
    max_window: u64,
    max_main: u64,
    size_window: u64,
    size_main: u64,
    size_data: u64,
}

impl SampledTinyLfu {
    pub fn new(
        settings: &SimulatorSettings,
        percent_main: f64,
        selection: SampledSelection,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        check_fraction("percent-main", percent_main)?;

        let name = format!(
            "sized.{}{}SampledTinyLfu ({} {:.0}%)",
            if settings.scaled { "Scaled" } else { "" },
            match selection {
                SampledSelection::Single => "",
                SampledSelection::Sum => "Sum",
            },
            settings.sample,
            100.0 * (1.0 - percent_main)
        );
        let split = settings.split(percent_main);
        let mut entries = SegmentList::new();
        let window = entries.new_sentinel();
        let candidates = entries.new_sentinel();
        let expected = usize::try_from(settings.maximum_size).unwrap_or(usize::MAX);

        Ok(Self {
            telemetry: Telemetry::new(name),
            data: FxHashMap::default(),
            entries,
            main: Vec::new(),
            sketch: settings.sketch.build(expected, settings.seed),
            rng: SmallRng::seed_from_u64(settings.seed),
            window,
            candidates,
            selection,
            sample: settings.sample,
            sample_size: settings.sample_size,
            rule: AdmissionRule::select(settings.scaled, AdmissionRule::GreaterOrEqual),
            prune: settings.prune,
            maximum_size: settings.maximum_size,
            max_window: split.max_window,
            max_main: split.max_main,
            size_window: 0,
            size_main: 0,
            size_data: 0,
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

    pub fn region_of(&self, key: u64) -> Option<Region> {
        let id = self.data.get(&key)?;
        self.entries.get(*id).map(|entry| entry.region)
    }

    pub fn size_window(&self) -> u64 {
        self.size_window
    }

    pub fn size_main(&self) -> u64 {
        self.size_main
    }

    pub fn size_data(&self) -> u64 {
        self.size_data
    }

    fn entry(&self, id: SlotId) -> Result<&Entry, InvariantError> {
        self.entries
            .get(id)
            .ok_or_else(|| InvariantError::new(format!("slot {} holds no entry", id.index())))
    }

    fn frequency_of(&self, id: SlotId) -> Result<u64, InvariantError> {
        Ok(u64::from(self.sketch.frequency(self.entry(id)?.key)))
    }

    fn overflows_main(&self, weight: u64) -> bool {
        self.size_main + weight > self.max_main
    }

    fn on_miss(&mut self, key: u64, weight: u32) -> Result<(), InvariantError> {
        if self.size_data >= self.maximum_size / 2 {
            self.sketch.ensure_capacity(self.data.len());
        }
        self.sketch.increment(key);

        let w = u64::from(weight);
        if w > self.max_main {
            self.telemetry.rejected(key, weight);
            return Ok(());
        }

        let id = self.entries.insert(Entry {
            key,
            weight,
            region: Region::Window,
        });
        if w > self.max_window {
            self.entries.append_head(id, self.window)?;
        } else {
            self.entries.append_tail(id, self.window)?;
        }
        self.data.insert(key, id);
        self.size_window += w;
        self.size_data += w;
        self.evict()
    }

    fn evict(&mut self) -> Result<(), InvariantError> {
        while self.size_window > self.max_window {
            let id = self.entries.first(self.window).ok_or_else(|| {
                InvariantError::new(format!(
                    "window size {} with an empty window",
                    self.size_window
                ))
            })?;
            self.entries.unlink(id)?;
            let entry = self
                .entries
                .get_mut(id)
                .ok_or_else(|| InvariantError::new("window head holds no entry"))?;
            entry.region = Region::Main;
            let w = entry.weight();
            debit(&mut self.size_window, w, "window")?;
            debit(&mut self.size_data, w, "data")?;
            self.entries.append_tail(id, self.candidates)?;
        }

        while let Some(candidate) = self.entries.last(self.candidates) {
            self.entries.unlink(candidate)?;
            let w = self.entry(candidate)?.weight();
            if self.overflows_main(w) {
                match self.selection {
                    SampledSelection::Single => self.evict_single(candidate)?,
                    SampledSelection::Sum => self.evict_sum(candidate)?,
                }
            } else {
                self.admit(candidate)?;
            }
        }
        Ok(())
    }

    /// Draws a victim and takes it out of the main vector.
    fn victim(&mut self, needed: u64) -> Result<SlotId, InvariantError> {
        if self.main.is_empty() {
            return Err(InvariantError::new("main region has no victim"));
        }
        let draws = match self.sample {
            SampleStrategy::Rand => 1,
            _ => self.sample_size,
        };

        let mut best: Option<(f64, usize)> = None;
        for _ in 0..draws {
            let index = self.rng.random_range(0..self.main.len());
            let entry = self.entry(self.main[index])?;
            let score = self.score(entry, needed);
            if best.is_none_or(|(lowest, _)| score < lowest) {
                best = Some((score, index));
            }
        }
        let (_, index) = best.ok_or_else(|| InvariantError::new("empty sample"))?;
        Ok(self.main.swap_remove(index))
    }

    /// Lower is a better victim.
    fn score(&self, entry: &Entry, needed: u64) -> f64 {
        match self.sample {
            SampleStrategy::Rand => 0.0,
            SampleStrategy::Freq => f64::from(self.sketch.frequency(entry.key)),
            SampleStrategy::Size => -f64::from(entry.weight),
            SampleStrategy::FreqToSize => {
                f64::from(self.sketch.frequency(entry.key)) / f64::from(entry.weight.max(1))
            },
            SampleStrategy::SizeDist => needed.abs_diff(entry.weight()) as f64,
        }
    }

    fn evict_single(&mut self, candidate: SlotId) -> Result<(), InvariantError> {
        let w = self.entry(candidate)?.weight();
        let victim = self.victim(self.size_main + w - self.max_main)?;
        self.telemetry.stats_mut().record_victims_examined(1);

        let wins = self.rule.admits(
            self.frequency_of(candidate)?,
            w,
            self.frequency_of(victim)?,
            self.entry(victim)?.weight(),
        );
        if !wins {
            self.reject(candidate)?;
            self.main.push(victim);
            return Ok(());
        }

        self.evict_entry(victim)?;
        while self.overflows_main(w) {
            let evict = self.victim(self.size_main + w - self.max_main)?;
            self.telemetry.stats_mut().record_victims_examined(1);
            self.evict_entry(evict)?;
        }
        self.admit(candidate)
    }

    fn evict_sum(&mut self, candidate: SlotId) -> Result<(), InvariantError> {
        let candidate_freq = self.frequency_of(candidate)?;
        let candidate_weight = self.entry(candidate)?.weight();
        let needed = self.size_main + candidate_weight - self.max_main;
        let prune = self.prune && !self.rule.is_scaled();

        let mut victims = Vec::new();
        let mut victims_weight = 0u64;
        let mut victims_freq = 0u64;
        while victims_weight < needed {
            let victim = match self.victim(needed - victims_weight) {
                Ok(victim) => victim,
                Err(err) => {
                    self.main.extend(victims);
                    return Err(err);
                },
            };
            victims_weight += self.entry(victim)?.weight();
            victims_freq += self.frequency_of(victim)?;
            victims.push(victim);
            if prune && victims_freq > candidate_freq {
                break;
            }
        }
        self.telemetry
            .stats_mut()
            .record_victims_examined(victims.len() as u64);

        if self
            .rule
            .admits(candidate_freq, candidate_weight, victims_freq, victims_weight)
        {
            for victim in victims {
                self.evict_entry(victim)?;
            }
            self.admit(candidate)
        } else {
            self.reject(candidate)?;
            self.main.extend(victims);
            Ok(())
        }
    }

    fn admit(&mut self, candidate: SlotId) -> Result<(), InvariantError> {
        let entry = self.entry(candidate)?;
        let (key, weight) = (entry.key, entry.weight);
        self.main.push(candidate);
        self.size_data += u64::from(weight);
        self.size_main += u64::from(weight);
        self.telemetry.admitted(key, weight);
        Ok(())
    }

    fn reject(&mut self, candidate: SlotId) -> Result<(), InvariantError> {
        let entry = self.entries.free(candidate)?;
        self.data.remove(&entry.key);
        self.telemetry.discarded(entry.key, entry.weight);
        Ok(())
    }

    /// Evicts an entry already taken out of the main vector.
    fn evict_entry(&mut self, id: SlotId) -> Result<(), InvariantError> {
        let entry = self.entries.free(id)?;
        self.data.remove(&entry.key);
        debit(&mut self.size_data, entry.weight(), "data")?;
        if entry.region == Region::Main {
            debit(&mut self.size_main, entry.weight(), "main")?;
        }
        self.telemetry.evicted(entry.key, entry.weight);
        Ok(())
    }
}

impl Policy for SampledTinyLfu {
    fn record(&mut self, event: AccessEvent) -> Result<(), InvariantError> {
        let AccessEvent { key, weight } = event;
        self.telemetry.stats_mut().record_operation();

        match self.data.get(&key).copied() {
            None => {
                self.on_miss(key, weight)?;
                self.telemetry.stats_mut().record_miss(weight);
            },
            Some(id) => {
                self.sketch.increment(key);
                if self.entry(id)?.region == Region::Window {
                    self.entries.move_to_tail(id, self.window)?;
                }
                self.telemetry.stats_mut().record_hit(weight);
            },
        }
        Ok(())
    }

    fn check_invariants(&self) -> Result<(), InvariantError> {
        let mut size_window = 0u64;
        let linked = self.entries.validate(self.window)?;
        for (id, entry) in self.entries.iter(self.window) {
            ensure(entry.region == Region::Window, || {
                format!("key {} in the window tagged {:?}", entry.key, entry.region)
            })?;
            ensure(self.data.get(&entry.key) == Some(&id), || {
                format!("key {} is linked but not mapped", entry.key)
            })?;
            size_window += entry.weight();
        }

        let mut size_main = 0u64;
        for &id in &self.main {
            let entry = self.entry(id)?;
            ensure(entry.region == Region::Main && !self.entries.is_linked(id), || {
                format!("key {} in main is linked or tagged {:?}", entry.key, entry.region)
            })?;
            ensure(self.data.get(&entry.key) == Some(&id), || {
                format!("key {} is sampled but not mapped", entry.key)
            })?;
            size_main += entry.weight();
        }

        ensure(self.entries.is_segment_empty(self.candidates), || {
            "candidate batch left behind".to_string()
        })?;
        ensure(
            linked + self.main.len() == self.data.len() && self.data.len() == self.entries.len(),
            || {
                format!(
                    "{} window + {} main entries, {} mapped keys, {} allocated",
                    linked,
                    self.main.len(),
                    self.data.len(),
                    self.entries.len()
                )
            },
        )?;
        ensure(size_window == self.size_window, || {
            format!("window: {} != {}", self.size_window, size_window)
        })?;
        ensure(size_main == self.size_main, || {
            format!("main: {} != {}", self.size_main, size_main)
        })?;
        ensure(size_window + size_main == self.size_data, || {
            format!("data: {} != {}", self.size_data, size_window + size_main)
        })?;
        ensure(self.size_data <= self.maximum_size, || {
            format!("maximum: {} > {}", self.size_data, self.maximum_size)
        })
    }

    fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    fn telemetry_mut(&mut self) -> &mut Telemetry {
        &mut self.telemetry
    }
}
