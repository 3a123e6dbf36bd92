//! # Policy Trait
//!
//! Every simulated policy replays [`AccessEvent`]s and reports
//! [`PolicyStats`]. The simulator only talks to `dyn Policy`.
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────┐
//!   │                        Policy: Send                      │
//!   │                                                          │
//!   │  record(&mut, AccessEvent) → Result<(), InvariantError>  │
//!   │  check_invariants(&) → Result<(), InvariantError>        │
//!   │  telemetry(&) / telemetry_mut(&mut)                      │
//!   │                                                          │
//!   │  provided: name, stats, set_observer, on_finished,       │
//!   │            finished                                      │
//!   └──────────────────────────────────────────────────────────┘
//! ```
//!
//! `record` returns `Err` only when the policy's own bookkeeping is broken.
//! A rejected admission is an ordinary outcome counted in the stats.
//!
//! ## Example Usage
//!
//! ```
//! use evictsim::config::SimulatorSettings;
//! use evictsim::event::AccessEvent;
//! use evictsim::policy::window_tinylfu::{VictimSelection, WindowTinyLfu};
//! use evictsim::traits::Policy;
//!
//! let mut settings = SimulatorSettings::default();
//! settings.maximum_size = 100;
//! let mut policy = WindowTinyLfu::new(&settings, 0.8, VictimSelection::Single).unwrap();
//!
//! policy.record(AccessEvent::new(1, 10)).unwrap();
//! policy.record(AccessEvent::new(1, 10)).unwrap();
//! policy.finished();
//!
//! assert_eq!(policy.stats().hits(), 1);
//! assert_eq!(policy.stats().misses(), 1);
//! ```

use crate::error::InvariantError;
use crate::event::AccessEvent;
use crate::metrics::PolicyStats;
use crate::observer::{PolicyObserver, Telemetry};

/// A cache admission/eviction policy driven by a trace.
pub trait Policy: Send {
    /// Processes one access.
    fn record(&mut self, event: AccessEvent) -> Result<(), InvariantError>;

    /// Verifies size counters and segment membership.
    fn check_invariants(&self) -> Result<(), InvariantError>;

    fn telemetry(&self) -> &Telemetry;

    fn telemetry_mut(&mut self) -> &mut Telemetry;

    /// Display name including the configuration that distinguishes it.
    fn name(&self) -> &str {
        self.telemetry().stats().name()
    }

    fn stats(&self) -> &PolicyStats {
        self.telemetry().stats()
    }

    fn set_observer(&mut self, observer: Box<dyn PolicyObserver>) {
        self.telemetry_mut().set_observer(observer);
    }

    /// Runs once the invariants have been verified, before the final event.
    fn on_finished(&mut self) {}

    /// Ends a run.
    ///
    /// # Panics
    ///
    /// Panics if [`check_invariants`](Self::check_invariants) fails: the
    /// counters gathered so far would be meaningless.
    fn finished(&mut self) {
        if let Err(err) = self.check_invariants() {
            tracing::error!(policy = self.name(), error = %err, "invariant violated");
            panic!("{}: {err}", self.name());
        }
        self.on_finished();
        self.telemetry_mut().finished();
    }
}
