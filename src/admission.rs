//! Admission filters for the tiered policies.
//!
//! An [`Admittor`] sees every access and, when a tier overflows, decides
//! whether the incoming candidate is worth more than the victim it would
//! push out.
//!
//! | Kind      | `admit(candidate, victim)`                              |
//! |-----------|---------------------------------------------------------|
//! | `Always`  | always `true`: the victim leaves                        |
//! | `TinyLfu` | `frequency(candidate) > frequency(victim)` per a sketch |
//!
//! ## Example Usage
//!
//! ```
//! use evictsim::admission::{Admittor, TinyLfuAdmittor};
//! use evictsim::ds::SketchKind;
//!
//! let mut admittor = TinyLfuAdmittor::new(SketchKind::Perfect.build(64, 0));
//! admittor.record(1);
//! admittor.record(1);
//! admittor.record(2);
//!
//! assert!(admittor.admit(1, 2));
//! assert!(!admittor.admit(2, 1));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ds::Frequency;

/// Which admission filter guards a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdmissionKind {
    Always,
    TinyLfu,
}

impl AdmissionKind {
    /// Decorates a policy name with the filter it runs under.
    pub fn format(self, name: &str) -> String {
        match self {
            AdmissionKind::Always => name.to_string(),
            AdmissionKind::TinyLfu => format!("{name}_TinyLfu"),
        }
    }

    /// Builds the filter; `sketch` is only used by `TinyLfu`.
    pub fn build(self, sketch: Box<dyn Frequency>) -> Box<dyn Admittor> {
        match self {
            AdmissionKind::Always => Box::new(AlwaysAdmit),
            AdmissionKind::TinyLfu => Box::new(TinyLfuAdmittor::new(sketch)),
        }
    }
}

/// Decides between a candidate and a victim.
pub trait Admittor: fmt::Debug + Send {
    /// Observes one access.
    fn record(&mut self, key: u64);

    /// Returns `true` if `candidate` should stay and `victim` should leave.
    fn admit(&mut self, candidate: u64, victim: u64) -> bool;
}

/// Admits every candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAdmit;

impl Admittor for AlwaysAdmit {
    fn record(&mut self, _key: u64) {}

    fn admit(&mut self, _candidate: u64, _victim: u64) -> bool {
        true
    }
}

/// Frequency-based filter.
#[derive(Debug)]
pub struct TinyLfuAdmittor {
    sketch: Box<dyn Frequency>,
}

impl TinyLfuAdmittor {
    pub fn new(sketch: Box<dyn Frequency>) -> Self {
        Self { sketch }
    }

    pub fn frequency(&self, key: u64) -> u32 {
        self.sketch.frequency(key)
    }
}

impl Admittor for TinyLfuAdmittor {
    fn record(&mut self, key: u64) {
        self.sketch.increment(key);
    }

    fn admit(&mut self, candidate: u64, victim: u64) -> bool {
        self.sketch.frequency(candidate) > self.sketch.frequency(victim)
    }
}
