//! Weighted Window-TinyLFU.
//!
//! New entries land in a small LRU admission window. Entries pushed out of
//! the window become admission candidates for the main region, a segmented
//! LRU (probation + protected). When main is full the TinyLFU sketch decides
//! whether the candidate is worth more than the entry (or entries) it would
//! displace.
//!
//! ## Architecture
//!
//! ```text
//!   miss ──► WINDOW (LRU)                       MAIN (segmented LRU)
//!            ┌─────────────────┐  candidates   ┌──────────────────────────┐
//!            │ head ...... tail│ ────────────► │ PROBATION  head ... tail │
//!            └─────────────────┘  (LIFO batch) │ PROTECTED  head ... tail │
//!              size_window <= max_window       └──────────────────────────┘
//!                                                size_data - size_window
//!                                                  <= maximum - max_window
//!
//!   probation hit ──► protected tail (protected overflow demotes its head
//!                     back to the probation tail)
//!   victim order  ──► probation head, then protected head
//! ```
//!
//! ## Core eviction
//!
//! | `VictimSelection` | Decision                                             |
//! |-------------------|------------------------------------------------------|
//! | `Single`          | candidate vs. first victim; winner evicts as many    |
//! |                   | victims as needed                                    |
//! | `Sum`             | candidate vs. the sum of victims covering its weight |
//! | `Ristretto`       | evict victims one by one while the candidate wins    |
//!
//! Comparison is an [`AdmissionRule`]: `cf > vf`, or per-byte when `scaled`.
//! With `bump`, a victim spared by a rejection is promoted.
//!
//! ## Hill climbing
//!
//! [`WindowTinyLfu::with_climber`] lets a [`HillClimber`] move capacity
//! between the window and the protected segment. Once the cache is full the
//! climber is consulted whenever the sketch is about to age its counters.
//!
//! ## Example Usage
//!
//! ```
//! use evictsim::config::SimulatorSettings;
//! use evictsim::event::AccessEvent;
//! use evictsim::policy::window_tinylfu::{Segment, VictimSelection, WindowTinyLfu};
//! use evictsim::traits::Policy;
//!
//! let settings = SimulatorSettings { maximum_size: 100, ..Default::default() };
//! let mut policy = WindowTinyLfu::new(&settings, 0.8, VictimSelection::Sum).unwrap();
//!
//! policy.record(AccessEvent::new(7, 10)).unwrap();
//! assert_eq!(policy.segment_of(7), Some(Segment::Window));
//! assert_eq!(policy.size_data(), 10);
//! policy.check_invariants().unwrap();
//! ```

use rustc_hash::FxHashMap;

use crate::config::{SimulatorSettings, check_fraction};
use crate::ds::{Frequency, SegmentList, SlotId};
use crate::error::{ConfigError, InvariantError, debit, ensure};
use crate::event::AccessEvent;
use crate::metrics::{CoreMetricsRecorder, NamedMetricsRecorder};
use crate::observer::{PolicyEvent, Telemetry};
use crate::policy::AdmissionRule;
use crate::policy::climber::{Adaptation, ClimberStrategy, HillClimber};
use crate::traits::Policy;

/// How core eviction picks and judges victims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VictimSelection {
    Single,
    Sum,
    Ristretto,
}

impl VictimSelection {
    fn prefix(self) -> &'static str {
        match self {
            VictimSelection::Single => "",
            VictimSelection::Sum => "Sum",
            VictimSelection::Ristretto => "Ristretto",
        }
    }
}

/// Region an entry currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    Window,
    Probation,
    Protected,
}

#[derive(Debug)]
struct Entry {
    key: u64,
    weight: u32,
    segment: Segment,
}

impl Entry {
    fn weight(&self) -> u64 {
        u64::from(self.weight)
    }
}

#[derive(Debug)]
struct Climbing {
    climber: Box<dyn HillClimber>,
    is_full: bool,
    /// Policy name without its closing parenthesis.
    label: String,
}

/// Weighted W-TinyLFU with pluggable victim selection.
#[derive(Debug)]
pub struct WindowTinyLfu {
    telemetry: Telemetry,
    data: FxHashMap<u64, SlotId>,
    entries: SegmentList<Entry>,
    sketch: Box<dyn Frequency>,

    window: SlotId,
    probation: SlotId,
    protected: SlotId,
    candidates: SlotId,

    selection: VictimSelection,
    rule: AdmissionRule,
    bump: bool,
    prune: bool,

    maximum_size: u64,
    max_window: u64,
    max_protected: u64,
    size_window: u64,
    size_protected: u64,
    size_data: u64,

    climbing: Option<Climbing>,
}

impl WindowTinyLfu {
    /// Creates a policy with a fixed window of `1 - percent_main` of capacity.
    pub fn new(
        settings: &SimulatorSettings,
        percent_main: f64,
        selection: VictimSelection,
    ) -> Result<Self, ConfigError> {
        let name = format!(
            "sized.{}{}WindowTinyLfu ({:.0}%)",
            if settings.scaled { "Scaled" } else { "" },
            selection.prefix(),
            100.0 * (1.0 - percent_main)
        );
        Self::build(settings, percent_main, selection, name, None)
    }

    /// Creates a policy whose window size is tuned by a hill climber.
    ///
    /// The name carries the initial window share; [`Policy::finished`]
    /// appends the final one, as in `(simple 20% -> 35%)`.
    pub fn with_climber(
        settings: &SimulatorSettings,
        percent_main: f64,
        selection: VictimSelection,
        strategy: ClimberStrategy,
    ) -> Result<Self, ConfigError> {
        let label = format!(
            "sized.{}{}HillClimberWindowTinyLfu ({} {:.0}%",
            if settings.scaled { "Scaled" } else { "" },
            selection.prefix(),
            strategy.label(),
            100.0 * (1.0 - percent_main)
        );
        let name = format!("{label})");
        let climbing = Climbing {
            climber: strategy.build(&settings.hill_climber, settings.maximum_size),
            is_full: false,
            label,
        };
        Self::build(settings, percent_main, selection, name, Some(climbing))
    }

    fn build(
        settings: &SimulatorSettings,
        percent_main: f64,
        selection: VictimSelection,
        name: String,
        climbing: Option<Climbing>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        check_fraction("percent-main", percent_main)?;

        let split = settings.split(percent_main);
        let mut entries = SegmentList::new();
        let window = entries.new_sentinel();
        let probation = entries.new_sentinel();
        let protected = entries.new_sentinel();
        let candidates = entries.new_sentinel();
        let expected = usize::try_from(settings.maximum_size).unwrap_or(usize::MAX);

        Ok(Self {
            telemetry: Telemetry::new(name),
            data: FxHashMap::default(),
            entries,
            sketch: settings.sketch.build(expected, settings.seed),
            window,
            probation,
            protected,
            candidates,
            selection,
            rule: AdmissionRule::select(settings.scaled, AdmissionRule::Greater),
            bump: settings.bump,
            prune: settings.prune,
            maximum_size: settings.maximum_size,
            max_window: split.max_window,
            max_protected: split.max_protected,
            size_window: 0,
            size_protected: 0,
            size_data: 0,
            climbing,
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

    pub fn segment_of(&self, key: u64) -> Option<Segment> {
        let id = self.data.get(&key)?;
        self.entries.get(*id).map(|entry| entry.segment)
    }

    /// Current sketch estimate for `key`.
    pub fn frequency(&self, key: u64) -> u32 {
        self.sketch.frequency(key)
    }

    pub fn max_window(&self) -> u64 {
        self.max_window
    }

    pub fn max_protected(&self) -> u64 {
        self.max_protected
    }

    pub fn max_main(&self) -> u64 {
        self.maximum_size - self.max_window
    }

    /// Current window budget as a percentage of capacity.
    pub fn window_percent(&self) -> f64 {
        100.0 * self.max_window as f64 / self.maximum_size as f64
    }

    pub fn size_window(&self) -> u64 {
        self.size_window
    }

    pub fn size_protected(&self) -> u64 {
        self.size_protected
    }

    pub fn size_main(&self) -> u64 {
        self.size_data.saturating_sub(self.size_window)
    }

    pub fn size_data(&self) -> u64 {
        self.size_data
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

    fn overflows_main(&self, weight: u64) -> bool {
        self.size_main() + weight > self.max_main()
    }

    fn frequency_of(&self, id: SlotId) -> Result<u64, InvariantError> {
        Ok(u64::from(self.sketch.frequency(self.entry(id)?.key)))
    }

    fn wins(&self, candidate: SlotId, victim: SlotId) -> Result<bool, InvariantError> {
        Ok(self.rule.admits(
            self.frequency_of(candidate)?,
            self.entry(candidate)?.weight(),
            self.frequency_of(victim)?,
            self.entry(victim)?.weight(),
        ))
    }

    // ---------------------------------------------------------------------
    // access handling
    // ---------------------------------------------------------------------

    fn on_miss(&mut self, key: u64, weight: u32) -> Result<(), InvariantError> {
        if self.climbing.is_none() {
            if self.size_data >= self.maximum_size / 2 {
                self.sketch.ensure_capacity(self.data.len());
            }
            self.sketch.increment(key);
        }

        let w = u64::from(weight);
        if w > self.max_main() {
            self.telemetry.rejected(key, weight);
            return Ok(());
        }

        let id = self.entries.insert(Entry {
            key,
            weight,
            segment: Segment::Window,
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

    /// Moves a probation entry to the protected tail.
    fn protect(&mut self, id: SlotId) -> Result<(), InvariantError> {
        self.entries.unlink(id)?;
        let entry = self.entry_mut(id)?;
        entry.segment = Segment::Protected;
        let w = entry.weight();
        self.entries.append_tail(id, self.protected)?;
        self.size_protected += w;
        self.demote_protected()
    }

    fn demote_protected(&mut self) -> Result<(), InvariantError> {
        while self.size_protected > self.max_protected {
            let demote = self.entries.first(self.protected).ok_or_else(|| {
                InvariantError::new(format!(
                    "protected size {} with an empty protected segment",
                    self.size_protected
                ))
            })?;
            self.entries.unlink(demote)?;
            let entry = self.entry_mut(demote)?;
            entry.segment = Segment::Probation;
            let w = entry.weight();
            self.entries.append_tail(demote, self.probation)?;
            debit(&mut self.size_protected, w, "protected")?;
        }
        Ok(())
    }

    /// Rewards a spared victim.
    fn promote(&mut self, id: SlotId) -> Result<(), InvariantError> {
        match self.entry(id)?.segment {
            Segment::Protected => self.entries.move_to_tail(id, self.protected),
            Segment::Probation => self.protect(id),
            Segment::Window => Ok(()),
        }
    }

    // ---------------------------------------------------------------------
    // eviction
    // ---------------------------------------------------------------------

    fn evict(&mut self) -> Result<(), InvariantError> {
        self.collect_candidates()?;
        while let Some(candidate) = self.entries.last(self.candidates) {
            self.entries.unlink(candidate)?;
            let w = self.entry(candidate)?.weight();
            if self.overflows_main(w) {
                match self.selection {
                    VictimSelection::Single => self.evict_single(candidate)?,
                    VictimSelection::Sum => self.evict_sum(candidate)?,
                    VictimSelection::Ristretto => self.evict_ristretto(candidate)?,
                }
            } else {
                self.admit(candidate)?;
            }
        }
        Ok(())
    }

    fn collect_candidates(&mut self) -> Result<(), InvariantError> {
        while self.size_window > self.max_window {
            let id = self.entries.first(self.window).ok_or_else(|| {
                InvariantError::new(format!(
                    "window size {} with an empty window",
                    self.size_window
                ))
            })?;
            self.entries.unlink(id)?;
            let w = self.entry(id)?.weight();
            debit(&mut self.size_window, w, "window")?;
            debit(&mut self.size_data, w, "data")?;

            if w > self.max_main() {
                self.reject(id)?;
            } else {
                self.entry_mut(id)?.segment = Segment::Probation;
                self.entries.append_tail(id, self.candidates)?;
            }
        }
        Ok(())
    }

    fn victim(&self) -> Result<SlotId, InvariantError> {
        self.entries
            .first(self.probation)
            .or_else(|| self.entries.first(self.protected))
            .ok_or_else(|| InvariantError::new("main region has no victim"))
    }

    fn admit(&mut self, candidate: SlotId) -> Result<(), InvariantError> {
        self.entries.append_tail(candidate, self.probation)?;
        let entry = self.entry(candidate)?;
        let (key, weight) = (entry.key, entry.weight);
        self.size_data += u64::from(weight);
        self.telemetry.admitted(key, weight);
        Ok(())
    }

    /// Drops an unlinked candidate.
    fn reject(&mut self, candidate: SlotId) -> Result<(), InvariantError> {
        let entry = self.entries.free(candidate)?;
        self.data.remove(&entry.key);
        self.telemetry.discarded(entry.key, entry.weight);
        Ok(())
    }

    fn evict_node(&mut self, id: SlotId) -> Result<(), InvariantError> {
        self.entries.unlink(id)?;
        let entry = self.entries.free(id)?;
        self.data.remove(&entry.key);
        debit(&mut self.size_data, entry.weight(), "data")?;
        if entry.segment == Segment::Protected {
            debit(&mut self.size_protected, entry.weight(), "protected")?;
        }
        self.telemetry.evicted(entry.key, entry.weight);
        Ok(())
    }

    fn evict_single(&mut self, candidate: SlotId) -> Result<(), InvariantError> {
        let victim = self.victim()?;
        self.telemetry.stats_mut().record_victims_examined(1);
        if self.wins(candidate, victim)? {
            let w = self.entry(candidate)?.weight();
            while self.overflows_main(w) {
                let evict = self.victim()?;
                self.evict_node(evict)?;
            }
            self.admit(candidate)
        } else {
            self.reject(candidate)?;
            if self.bump {
                let spared = self.victim()?;
                self.promote(spared)?;
            }
            Ok(())
        }
    }

    fn evict_sum(&mut self, candidate: SlotId) -> Result<(), InvariantError> {
        let candidate_freq = self.frequency_of(candidate)?;
        let candidate_weight = self.entry(candidate)?.weight();
        let needed = self.size_main() + candidate_weight - self.max_main();
        let prune = self.prune && !self.rule.is_scaled();

        let mut victims_weight = 0u64;
        let mut victims_freq = 0u64;
        let mut victims_num = 0u64;
        let mut walk = self
            .entries
            .iter(self.probation)
            .chain(self.entries.iter(self.protected));
        while victims_weight < needed {
            let (_, victim) = walk
                .next()
                .ok_or_else(|| InvariantError::new("main region cannot cover the candidate"))?;
            victims_weight += victim.weight();
            victims_freq += u64::from(self.sketch.frequency(victim.key));
            victims_num += 1;
            if prune && victims_freq > candidate_freq {
                break;
            }
        }
        self.telemetry
            .stats_mut()
            .record_victims_examined(victims_num);

        if self
            .rule
            .admits(candidate_freq, candidate_weight, victims_freq, victims_weight)
        {
            for _ in 0..victims_num {
                let evict = self.victim()?;
                self.evict_node(evict)?;
            }
            self.admit(candidate)
        } else {
            self.reject(candidate)?;
            if self.bump {
                for _ in 0..victims_num {
                    let spared = self.victim()?;
                    self.promote(spared)?;
                }
            }
            Ok(())
        }
    }

    fn evict_ristretto(&mut self, candidate: SlotId) -> Result<(), InvariantError> {
        let w = self.entry(candidate)?.weight();
        while self.overflows_main(w) {
            let victim = self.victim()?;
            self.telemetry.stats_mut().record_victims_examined(1);
            if !self.wins(candidate, victim)? {
                break;
            }
            self.evict_node(victim)?;
        }

        if self.overflows_main(w) {
            self.reject(candidate)?;
            if self.bump {
                let spared = self.victim()?;
                self.promote(spared)?;
            }
            Ok(())
        } else {
            self.admit(candidate)
        }
    }

    // ---------------------------------------------------------------------
    // hill climbing
    // ---------------------------------------------------------------------

    fn climb(&mut self, hit: bool) -> Result<(), InvariantError> {
        let Some(climbing) = self.climbing.as_mut() else {
            return Ok(());
        };
        let is_full = climbing.is_full;
        if hit {
            climbing.climber.on_hit(is_full);
        } else {
            climbing.climber.on_miss(is_full);
        }
        if !is_full || !self.sketch.is_going_to_reset() {
            return Ok(());
        }

        let adaptation = climbing.climber.adapt(is_full);
        match adaptation {
            Adaptation::Hold => Ok(()),
            Adaptation::IncreaseWindow(amount) => self.increase_window(amount),
            Adaptation::DecreaseWindow(amount) => self.decrease_window(amount),
        }
    }

    fn increase_window(&mut self, amount: u64) -> Result<(), InvariantError> {
        if self.max_protected == 0 {
            return Ok(());
        }
        let quota = amount.min(self.max_protected);
        self.max_window += quota;
        self.max_protected -= quota;
        self.demote_protected()?;

        while self.size_main() > self.max_main() {
            let id = self.victim()?;
            self.entries.unlink(id)?;
            let entry = self.entry_mut(id)?;
            let was = entry.segment;
            entry.segment = Segment::Window;
            let w = entry.weight();
            if was == Segment::Protected {
                debit(&mut self.size_protected, w, "protected")?;
            }
            self.entries.append_head(id, self.window)?;
            self.size_window += w;
        }
        self.evict()?;
        self.adapted(true, quota)
    }

    fn decrease_window(&mut self, amount: u64) -> Result<(), InvariantError> {
        if self.max_window == 0 {
            return Ok(());
        }
        let quota = amount.min(self.max_window);
        self.max_window -= quota;
        self.max_protected += quota;

        while self.size_window > self.max_window {
            let Some(id) = self.entries.first(self.window) else {
                break;
            };
            let w = self.entry(id)?.weight();
            if self.size_main() + w > self.max_main() {
                break;
            }
            self.entries.unlink(id)?;
            self.entry_mut(id)?.segment = Segment::Probation;
            self.entries.append_head(id, self.probation)?;
            debit(&mut self.size_window, w, "window")?;
        }
        self.evict()?;
        self.adapted(false, quota)
    }

    fn adapted(&mut self, increase: bool, amount: u64) -> Result<(), InvariantError> {
        ensure(self.size_data <= self.maximum_size, || {
            format!(
                "data size {} exceeds maximum {} after resize",
                self.size_data, self.maximum_size
            )
        })?;
        ensure(self.size_window <= self.max_window, || {
            format!(
                "window size {} exceeds its maximum {} after resize",
                self.size_window, self.max_window
            )
        })?;

        self.telemetry
            .stats_mut()
            .record_counter("window_adaptations", 1);
        self.telemetry.emit(PolicyEvent::WindowAdapted {
            increase,
            amount,
            max_window: self.max_window,
            max_protected: self.max_protected,
        });
        Ok(())
    }
}

impl Policy for WindowTinyLfu {
    fn record(&mut self, event: AccessEvent) -> Result<(), InvariantError> {
        let AccessEvent { key, weight } = event;
        self.telemetry.stats_mut().record_operation();

        if let Some(climbing) = self.climbing.as_mut() {
            if self.size_data >= self.maximum_size / 2 {
                self.sketch.ensure_capacity(self.data.len());
                if self.size_data + event.weight_u64() >= self.maximum_size {
                    climbing.is_full = true;
                }
            }
            self.sketch.increment(key);
        }

        let hit = match self.data.get(&key).copied() {
            None => {
                self.on_miss(key, weight)?;
                self.telemetry.stats_mut().record_miss(weight);
                false
            },
            Some(id) => {
                if self.climbing.is_none() {
                    self.sketch.increment(key);
                }
                match self.entry(id)?.segment {
                    Segment::Window => self.entries.move_to_tail(id, self.window)?,
                    Segment::Probation => self.protect(id)?,
                    Segment::Protected => self.entries.move_to_tail(id, self.protected)?,
                }
                self.telemetry.stats_mut().record_hit(weight);
                true
            },
        };
        self.climb(hit)
    }

    fn check_invariants(&self) -> Result<(), InvariantError> {
        let mut sizes = [0u64; 3];
        let mut linked = 0usize;
        for (sentinel, segment) in [
            (self.window, Segment::Window),
            (self.probation, Segment::Probation),
            (self.protected, Segment::Protected),
        ] {
            linked += self.entries.validate(sentinel)?;
            for (id, entry) in self.entries.iter(sentinel) {
                ensure(entry.segment == segment, || {
                    format!(
                        "key {} tagged {:?} but linked in {:?}",
                        entry.key, entry.segment, segment
                    )
                })?;
                ensure(self.data.get(&entry.key) == Some(&id), || {
                    format!("key {} is linked but not mapped", entry.key)
                })?;
                sizes[segment as usize] += entry.weight();
            }
        }

        ensure(self.entries.is_segment_empty(self.candidates), || {
            "candidate batch left behind".to_string()
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
        )?;
        ensure(sizes[0] == self.size_window, || {
            format!("window: {} != {}", self.size_window, sizes[0])
        })?;
        ensure(sizes[2] == self.size_protected, || {
            format!("protected: {} != {}", self.size_protected, sizes[2])
        })?;
        ensure(sizes.iter().sum::<u64>() == self.size_data, || {
            format!("data: {} != {}", self.size_data, sizes.iter().sum::<u64>())
        })?;
        ensure(self.size_data <= self.maximum_size, || {
            format!("maximum: {} > {}", self.size_data, self.maximum_size)
        })?;
        ensure(self.size_window <= self.max_window, || {
            format!("window: {} > max {}", self.size_window, self.max_window)
        })
    }

    fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    fn telemetry_mut(&mut self) -> &mut Telemetry {
        &mut self.telemetry
    }

    fn on_finished(&mut self) {
        if let Some(climbing) = &self.climbing {
            let name = format!("{} -> {:.0}%)", climbing.label, self.window_percent());
            self.telemetry.stats_mut().set_name(name);
        }
    }
}
