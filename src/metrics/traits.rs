//! # Metrics Trait Hierarchy
//!
//! Recording and snapshotting are split into small traits so policy logic
//! only ever writes counters and the simulator only ever reads them.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────────────┐
//!                 │       CoreMetricsRecorder        │
//!                 │  operation / hit / miss          │
//!                 │  admission / rejection / evict   │
//!                 │  victims examined                │
//!                 └────────────────┬─────────────────┘
//!                                  │
//!              ┌───────────────────┴───────────────────┐
//!              ▼                                       ▼
//!   ┌──────────────────────┐               ┌──────────────────────┐
//!   │ LevelMetricsRecorder │               │ NamedMetricsRecorder │
//!   │ per-tier hit / miss  │               │ policy-specific      │
//!   │ (multilevel)         │               │ counters by name     │
//!   └──────────────────────┘               └──────────────────────┘
//!
//!   Consumption:
//!   ┌──────────────────────────────┐
//!   │ MetricsSnapshotProvider<S>   │  (simulator reports, tests)
//!   └──────────────────────────────┘
//! ```

/// Counters every policy maintains.
pub trait CoreMetricsRecorder {
    /// One `record` call.
    fn record_operation(&mut self);
    /// A resident key was accessed; `weight` bytes were served.
    fn record_hit(&mut self, weight: u32);
    /// The key was not resident; `weight` bytes had to be fetched.
    fn record_miss(&mut self, weight: u32);
    /// A candidate entered the main region (or a tier).
    fn record_admission(&mut self);
    /// A candidate lost admission or was too large to ever fit.
    fn record_rejection(&mut self);
    /// A resident entry left the cache.
    fn record_eviction(&mut self);
    /// Entries considered by one core-eviction decision.
    fn record_victims_examined(&mut self, count: u64);
}

/// Per-tier counters for multilevel policies.
pub trait LevelMetricsRecorder: CoreMetricsRecorder {
    fn record_level_hit(&mut self, level: usize);
    fn record_level_miss(&mut self, level: usize);
}

/// Free-form counters specific to one policy (promotions, window hits, ...).
pub trait NamedMetricsRecorder {
    fn record_counter(&mut self, name: &'static str, delta: u64);
}

/// Snapshot provider for reports and tests.
pub trait MetricsSnapshotProvider<S> {
    fn snapshot(&self) -> S;
}
