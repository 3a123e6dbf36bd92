//! Greedy-Dual-Size-Frequency.
//!
//! Every resident carries `priority = clock + frequency / weight` and sits in
//! an ordered set keyed by `(priority, key)`. The lowest priority is the next
//! victim. Whenever a candidate displaces residents, `clock` is raised to the
//! priority of the last victim, so long-idle entries age relative to newcomers.
//!
//! ```text
//!   queue: BTreeSet<(Priority, key)>
//!
//!   (0.10, 7) (0.25, 3) (0.50, 9) ... (clock + f/w, k)
//!       ▲
//!       lowest priority: examined first
//! ```
//!
//! The variants differ only in how a candidate that does not fit is judged:
//!
//! | Variant     | Admit when                                                   |
//! |-------------|--------------------------------------------------------------|
//! | `Gdsf`      | the last victim needed does not outrank the candidate        |
//! | `Avg`       | the mean priority of the victims needed does not outrank it  |
//! | `Caffeine`  | the lowest priority does not outrank it                      |
//! | `Ristretto` | victims are evicted while they do not outrank it, until fit  |

use std::cmp::Ordering;
use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::config::SimulatorSettings;
use crate::error::{ConfigError, InvariantError, debit, ensure};
use crate::event::AccessEvent;
use crate::metrics::CoreMetricsRecorder;
use crate::observer::Telemetry;
use crate::traits::Policy;

/// How a candidate that does not fit is weighed against the residents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GdsfVariant {
    Gdsf,
    Avg,
    Caffeine,
    Ristretto,
}

impl GdsfVariant {
    pub const ALL: [GdsfVariant; 4] = [
        GdsfVariant::Gdsf,
        GdsfVariant::Avg,
        GdsfVariant::Caffeine,
        GdsfVariant::Ristretto,
    ];

    fn name(self) -> &'static str {
        match self {
            GdsfVariant::Gdsf => "others.GDSF",
            GdsfVariant::Avg => "others.AvgGDSF",
            GdsfVariant::Caffeine => "others.CaffeineGDSF",
            GdsfVariant::Ristretto => "others.RistrettoGDSF",
        }
    }
}

/// Totally ordered priority.
#[derive(Debug, Clone, Copy)]
struct Priority(f64);

impl PartialEq for Priority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Priority {}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug)]
struct Node {
    weight: u32,
    frequency: u32,
    priority: f64,
}

/// Weighted GDSF cache.
#[derive(Debug)]
pub struct Gdsf {
    telemetry: Telemetry,
    variant: GdsfVariant,
    data: FxHashMap<u64, Node>,
    queue: BTreeSet<(Priority, u64)>,
    clock: f64,
    maximum_size: u64,
    used: u64,
}

impl Gdsf {
    pub fn new(settings: &SimulatorSettings, variant: GdsfVariant) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            telemetry: Telemetry::new(variant.name()),
            variant,
            data: FxHashMap::default(),
            queue: BTreeSet::new(),
            clock: 0.0,
            maximum_size: settings.maximum_size,
            used: 0,
        })
    }

    pub fn variant(&self) -> GdsfVariant {
        self.variant
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

    /// Total weight of the residents.
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Current inflation value.
    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn priority_of(&self, key: u64) -> Option<f64> {
        self.data.get(&key).map(|node| node.priority)
    }

    pub fn frequency_of(&self, key: u64) -> Option<u32> {
        self.data.get(&key).map(|node| node.frequency)
    }

    fn priority(&self, frequency: u32, weight: u32) -> f64 {
        self.clock + f64::from(frequency) / f64::from(weight)
    }

    fn fits(&self, weight: u32) -> bool {
        self.used + u64::from(weight) <= self.maximum_size
    }

    fn on_hit(&mut self, key: u64) -> Result<(), InvariantError> {
        let clock = self.clock;
        let node = self
            .data
            .get_mut(&key)
            .ok_or_else(|| InvariantError::new(format!("key {key} is not resident")))?;
        let stale = (Priority(node.priority), key);
        node.frequency = node.frequency.saturating_add(1);
        node.priority = clock + f64::from(node.frequency) / f64::from(node.weight);
        let fresh = (Priority(node.priority), key);

        ensure(self.queue.remove(&stale), || {
            format!("key {key} is missing from the priority queue")
        })?;
        self.queue.insert(fresh);
        Ok(())
    }

    fn on_miss(&mut self, key: u64, weight: u32) -> Result<(), InvariantError> {
        if u64::from(weight) > self.maximum_size {
            self.telemetry.rejected(key, weight);
            return Ok(());
        }

        let priority = self.priority(1, weight);
        if self.fits(weight) {
            self.admit(key, weight, priority);
            return Ok(());
        }

        let admitted = match self.variant {
            GdsfVariant::Gdsf => self.evict_gdsf(weight, priority)?,
            GdsfVariant::Avg => self.evict_avg(weight, priority)?,
            GdsfVariant::Caffeine => self.evict_caffeine(weight, priority)?,
            GdsfVariant::Ristretto => self.evict_ristretto(weight, priority)?,
        };
        if admitted {
            self.admit(key, weight, priority);
        } else {
            self.telemetry.rejected(key, weight);
        }
        Ok(())
    }

    /// Walks the queue from the lowest priority until the victims cover the
    /// space needed, stopping early at a victim that outranks the candidate.
    fn evict_gdsf(&mut self, weight: u32, priority: f64) -> Result<bool, InvariantError> {
        let needed = self.used + u64::from(weight) - self.maximum_size;
        let mut victims_size = 0u64;
        let mut examined = 0u64;
        let mut last = None;
        for &(Priority(victim), key) in &self.queue {
            if victims_size >= needed {
                break;
            }
            examined += 1;
            last = Some(victim);
            if victim > priority {
                break;
            }
            victims_size += self.resident_weight(key)?;
        }
        self.telemetry.stats_mut().record_victims_examined(examined);

        match last {
            Some(victim) if victim <= priority => {
                self.clock = victim;
                self.evict_until_fits(weight)?;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    /// Takes the victims needed to fit and compares their mean priority.
    fn evict_avg(&mut self, weight: u32, priority: f64) -> Result<bool, InvariantError> {
        let needed = self.used + u64::from(weight) - self.maximum_size;
        let mut victims_size = 0u64;
        let mut victims_priority = 0.0;
        let mut victims_num = 0u64;
        let mut last = None;
        for &(Priority(victim), key) in &self.queue {
            if victims_size >= needed {
                break;
            }
            victims_size += self.resident_weight(key)?;
            victims_priority += victim;
            victims_num += 1;
            last = Some(victim);
        }
        self.telemetry.stats_mut().record_victims_examined(victims_num);

        let Some(last) = last else {
            return Ok(false);
        };
        if victims_priority / victims_num as f64 > priority {
            return Ok(false);
        }
        self.clock = last;
        self.evict_until_fits(weight)?;
        Ok(true)
    }

    /// Judges only the lowest priority; a win evicts until the candidate fits.
    fn evict_caffeine(&mut self, weight: u32, priority: f64) -> Result<bool, InvariantError> {
        let Some(&(Priority(lowest), _)) = self.queue.first() else {
            return Ok(false);
        };
        self.telemetry.stats_mut().record_victims_examined(1);
        if lowest > priority {
            return Ok(false);
        }
        if let Some(last) = self.evict_until_fits(weight)? {
            self.clock = last;
        }
        Ok(self.fits(weight))
    }

    /// Evicts one victim at a time while it does not outrank the candidate.
    fn evict_ristretto(&mut self, weight: u32, priority: f64) -> Result<bool, InvariantError> {
        let mut last = None;
        while !self.fits(weight) {
            let Some(&(Priority(lowest), _)) = self.queue.first() else {
                break;
            };
            self.telemetry.stats_mut().record_victims_examined(1);
            if lowest > priority {
                break;
            }
            last = self.evict_victim()?;
        }
        if !self.fits(weight) {
            return Ok(false);
        }
        if let Some(last) = last {
            self.clock = last;
        }
        Ok(true)
    }

    /// Evicts the lowest priorities until `weight` fits; returns the last
    /// evicted priority.
    fn evict_until_fits(&mut self, weight: u32) -> Result<Option<f64>, InvariantError> {
        let mut last = None;
        while !self.fits(weight) {
            match self.evict_victim()? {
                Some(priority) => last = Some(priority),
                None => break,
            }
        }
        Ok(last)
    }

    fn evict_victim(&mut self) -> Result<Option<f64>, InvariantError> {
        let Some((Priority(priority), key)) = self.queue.pop_first() else {
            return Ok(None);
        };
        let node = self
            .data
            .remove(&key)
            .ok_or_else(|| InvariantError::new(format!("queued key {key} is not resident")))?;
        debit(&mut self.used, u64::from(node.weight), "used")?;
        self.telemetry.evicted(key, node.weight);
        Ok(Some(priority))
    }

    fn admit(&mut self, key: u64, weight: u32, priority: f64) {
        self.queue.insert((Priority(priority), key));
        self.data.insert(key, Node {
            weight,
            frequency: 1,
            priority,
        });
        self.used += u64::from(weight);
        self.telemetry.admitted(key, weight);
    }

    fn resident_weight(&self, key: u64) -> Result<u64, InvariantError> {
        self.data
            .get(&key)
            .map(|node| u64::from(node.weight))
            .ok_or_else(|| InvariantError::new(format!("queued key {key} is not resident")))
    }
}

impl Policy for Gdsf {
    fn record(&mut self, event: AccessEvent) -> Result<(), InvariantError> {
        let AccessEvent { key, weight } = event;
        self.telemetry.stats_mut().record_operation();

        if self.data.contains_key(&key) {
            self.telemetry.stats_mut().record_hit(weight);
            self.on_hit(key)
        } else {
            self.telemetry.stats_mut().record_miss(weight);
            self.on_miss(key, weight)
        }
    }

    fn check_invariants(&self) -> Result<(), InvariantError> {
        ensure(self.used <= self.maximum_size, || {
            format!("used {} exceeds maximum {}", self.used, self.maximum_size)
        })?;
        ensure(self.queue.len() == self.data.len(), || {
            format!(
                "queue holds {} keys but {} are resident",
                self.queue.len(),
                self.data.len()
            )
        })?;

        let mut used = 0u64;
        for &(Priority(priority), key) in &self.queue {
            let node = self
                .data
                .get(&key)
                .ok_or_else(|| InvariantError::new(format!("queued key {key} is not resident")))?;
            ensure(node.priority.total_cmp(&priority) == Ordering::Equal, || {
                format!("key {key} queued at {priority} but has priority {}", node.priority)
            })?;
            used += u64::from(node.weight);
        }
        ensure(used == self.used, || {
            format!("resident weight {used} does not match used {}", self.used)
        })
    }

    fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    fn telemetry_mut(&mut self) -> &mut Telemetry {
        &mut self.telemetry
    }
}
