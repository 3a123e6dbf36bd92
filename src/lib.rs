//! evictsim: trace-replay simulator for weighted cache admission and
//! eviction policies.
//!
//! See `DESIGN.md` for the module map and the decisions behind each policy.

pub mod admission;
pub mod builder;
pub mod config;
pub mod ds;
pub mod error;
pub mod event;
pub mod metrics;
pub mod observer;
pub mod policy;
pub mod prelude;
pub mod simulator;
pub mod traits;
