//! Trace replay.
//!
//! [`replay`] drives one policy through a trace. A [`Simulator`] owns a set of
//! independent policies and replays the same trace through each of them,
//! one scoped thread per policy.
//!
//! ```text
//!   trace: &[AccessEvent] (shared, read-only)
//!        │
//!        ├──► thread: policy 0 ──► Report
//!        ├──► thread: policy 1 ──► Report
//!        └──► thread: policy n ──► Report
//! ```
//!
//! A policy whose bookkeeping breaks mid-replay stops with
//! [`SimError::Invariant`] naming it; a zero-weight event stops the replay
//! with [`SimError::Trace`]. A policy that ends in an inconsistent state
//! panics in [`Policy::finished`]; the panic is propagated to the caller.
//!
//! ## Example
//!
//! ```rust
//! use evictsim::builder::{PolicyBuilder, PolicyKind};
//! use evictsim::config::SimulatorSettings;
//! use evictsim::event::AccessEvent;
//! use evictsim::policy::gdsf::GdsfVariant;
//! use evictsim::simulator::Simulator;
//!
//! let settings = SimulatorSettings { maximum_size: 50, ..Default::default() };
//! let simulator = Simulator::from_builder(
//!     &PolicyBuilder::new(settings),
//!     &[PolicyKind::Gdsf(GdsfVariant::Gdsf), PolicyKind::Gdsf(GdsfVariant::Avg)],
//! )
//! .unwrap();
//!
//! let trace: Vec<_> = (0..100u64).map(|i| AccessEvent::new(i % 7, 10)).collect();
//! let reports = simulator.run(&trace).unwrap();
//!
//! assert_eq!(reports.len(), 2);
//! assert_eq!(reports[0].snapshot.operations, 100);
//! ```

use std::panic::resume_unwind;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::builder::{PolicyBuilder, PolicyKind};
use crate::error::{ConfigError, InvariantError, SimError, TraceError};
use crate::event::AccessEvent;
use crate::metrics::{MetricsSnapshotProvider, PolicyStatsSnapshot};
use crate::observer::TracingObserver;
use crate::traits::Policy;

/// Outcome of replaying a trace through one policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub snapshot: PolicyStatsSnapshot,
    pub elapsed: Duration,
}

/// Replays `trace` through `policy` and finishes it.
pub fn replay(policy: &mut dyn Policy, trace: &[AccessEvent]) -> Result<Report, SimError> {
    let span = tracing::info_span!("replay", policy = policy.name(), events = trace.len());
    let _guard = span.enter();

    let start = Instant::now();
    for (position, &event) in trace.iter().enumerate() {
        if let Err(err) = event.validate() {
            tracing::error!(position, %err, "malformed trace");
            return Err(SimError::Trace(TraceError::new(format!(
                "{}: event {position}: {err}",
                policy.name()
            ))));
        }
        if let Err(err) = policy.record(event) {
            tracing::error!(position, key = event.key, %err, "replay aborted");
            return Err(SimError::Invariant(InvariantError::new(format!(
                "{}: event {position} (key {}): {err}",
                policy.name(),
                event.key
            ))));
        }
    }
    policy.finished();
    let elapsed = start.elapsed();

    let snapshot = policy.stats().snapshot();
    tracing::debug!(
        hit_rate = snapshot.hit_rate,
        evictions = snapshot.evictions,
        ?elapsed,
        "replay complete"
    );
    Ok(Report { snapshot, elapsed })
}

/// A set of independent policies fed the same trace.
pub struct Simulator {
    policies: Vec<Box<dyn Policy>>,
}

impl Simulator {
    pub fn new(policies: Vec<Box<dyn Policy>>) -> Self {
        Self { policies }
    }

    /// Builds every kind from one set of settings.
    pub fn from_builder(builder: &PolicyBuilder, kinds: &[PolicyKind]) -> Result<Self, ConfigError> {
        Ok(Self::new(builder.build_all(kinds)?))
    }

    /// Routes every policy's events to `tracing`.
    pub fn with_tracing(mut self) -> Self {
        for policy in &mut self.policies {
            policy.set_observer(Box::new(TracingObserver));
        }
        self
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// Replays `trace` through every policy in parallel.
    ///
    /// Reports come back in the order the policies were added. The first
    /// policy error, in that order, is returned.
    pub fn run(self, trace: &[AccessEvent]) -> Result<Vec<Report>, SimError> {
        tracing::info!(policies = self.policies.len(), events = trace.len(), "simulation started");

        let results: Vec<Result<Report, SimError>> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .policies
                .into_iter()
                .map(|mut policy| scope.spawn(move || replay(policy.as_mut(), trace)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|payload| resume_unwind(payload)))
                .collect()
        });

        results.into_iter().collect()
    }

    /// Replays `trace` through every policy on the calling thread.
    pub fn run_sequential(mut self, trace: &[AccessEvent]) -> Result<Vec<Report>, SimError> {
        self.policies
            .iter_mut()
            .map(|policy| replay(policy.as_mut(), trace))
            .collect()
    }
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("policies", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatorSettings;
    use crate::observer::{CollectingObserver, PolicyEvent};
    use crate::policy::gdsf::{Gdsf, GdsfVariant};
    use crate::policy::window_tinylfu::VictimSelection;

    fn trace() -> Vec<AccessEvent> {
        (0..500u64)
            .map(|i| AccessEvent::new((i * 7) % 31, 1 + (i % 5) as u32))
            .collect()
    }

    fn builder() -> PolicyBuilder {
        PolicyBuilder::new(SimulatorSettings {
            maximum_size: 40,
            multilevel_maximum_size: vec![16, 40],
            ..Default::default()
        })
    }

    #[test]
    fn parallel_matches_sequential() {
        let kinds = PolicyKind::all();
        let parallel = Simulator::from_builder(&builder(), &kinds)
            .unwrap()
            .run(&trace())
            .unwrap();
        let sequential = Simulator::from_builder(&builder(), &kinds)
            .unwrap()
            .run_sequential(&trace())
            .unwrap();

        assert_eq!(parallel.len(), sequential.len());
        for (a, b) in parallel.iter().zip(&sequential) {
            assert_eq!(a.snapshot, b.snapshot);
        }
    }

    #[test]
    fn reports_keep_input_order() {
        let kinds = [
            PolicyKind::Gdsf(GdsfVariant::Ristretto),
            PolicyKind::WindowTinyLfu(VictimSelection::Sum),
            PolicyKind::Promote,
        ];
        let simulator = Simulator::from_builder(&builder(), &kinds).unwrap();
        let names: Vec<String> = simulator.names().into_iter().map(String::from).collect();
        let reports = simulator.run(&trace()).unwrap();

        let reported: Vec<&str> = reports.iter().map(|r| r.snapshot.policy.as_str()).collect();
        assert_eq!(reported, names);
    }

    #[test]
    fn replay_emits_finished() {
        let settings = SimulatorSettings {
            maximum_size: 20,
            ..Default::default()
        };
        let observer = CollectingObserver::new();
        let mut policy = Gdsf::new(&settings, GdsfVariant::Gdsf).unwrap();
        policy.set_observer(Box::new(observer.clone()));

        let report = replay(&mut policy, &trace()).unwrap();
        assert_eq!(report.snapshot.operations, 500);
        assert_eq!(
            observer.count(|e| matches!(e, PolicyEvent::Finished { operations: 500, .. })),
            1
        );
    }

    #[test]
    fn tracing_observer_replays_under_a_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("evictsim=trace"))
            .with_test_writer()
            .try_init();

        let simulator = Simulator::from_builder(&builder(), &[PolicyKind::Multilevel])
            .unwrap()
            .with_tracing();
        let reports = simulator.run(&trace()).unwrap();
        assert_eq!(reports[0].snapshot.operations, 500);
    }

    #[test]
    fn zero_weight_event_stops_the_replay() {
        let settings = SimulatorSettings {
            maximum_size: 20,
            ..Default::default()
        };
        let mut policy = Gdsf::new(&settings, GdsfVariant::Gdsf).unwrap();
        let trace = [AccessEvent::new(1, 4), AccessEvent::new(2, 0), AccessEvent::new(3, 4)];

        let err = replay(&mut policy, &trace).unwrap_err();
        assert!(matches!(err, SimError::Trace(_)));
        assert!(err.message().contains("event 1"));
        assert!(err.message().contains("key 2 has zero weight"));
        assert_eq!(policy.stats().operations(), 1);
        assert!(!policy.contains(2));
    }

    #[test]
    fn zero_weight_fails_every_parallel_run() {
        let mut trace = trace();
        trace[250].weight = 0;
        let err = Simulator::from_builder(&builder(), &PolicyKind::all())
            .unwrap()
            .run(&trace)
            .unwrap_err();
        assert!(matches!(err, SimError::Trace(_)));
    }

    #[test]
    fn empty_trace_reports_zero() {
        let reports = Simulator::from_builder(&builder(), &[PolicyKind::BidiTinyLfu])
            .unwrap()
            .run(&[])
            .unwrap();
        assert_eq!(reports[0].snapshot.operations, 0);
        assert_eq!(reports[0].snapshot.hit_rate, 0.0);
    }
}
