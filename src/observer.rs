//! Structured event sink for policy decisions.
//!
//! Every policy owns a [`Telemetry`]: its [`PolicyStats`] plus a boxed
//! [`PolicyObserver`]. Counter updates and observer notifications go through
//! the same call so the two can never disagree.
//!
//! ```text
//!   policy ──► Telemetry::evicted(key, w) ──┬──► PolicyStats (evictions += 1)
//!                                           └──► observer.on_event(Evicted)
//! ```
//!
//! | Observer             | Behavior                                         |
//! |----------------------|--------------------------------------------------|
//! | [`NoopObserver`]     | default, discards events                         |
//! | [`TracingObserver`]  | forwards to `tracing` (trace/debug/info levels)  |
//! | [`CollectingObserver`] | appends to a shared log, for tests             |

use std::sync::Arc;

use parking_lot::Mutex;

use crate::metrics::{CoreMetricsRecorder, PolicyStats};

/// A decision taken by a policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PolicyEvent {
    Admitted { key: u64, weight: u32 },
    Rejected { key: u64, weight: u32 },
    Evicted { key: u64, weight: u32 },
    WindowAdapted {
        increase: bool,
        amount: u64,
        max_window: u64,
        max_protected: u64,
    },
    Promoted { key: u64, from: usize, to: usize },
    Finished { operations: u64, hit_rate: f64 },
}

/// Receives policy events.
pub trait PolicyObserver: Send {
    fn on_event(&mut self, policy: &str, event: &PolicyEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PolicyObserver for NoopObserver {
    #[inline]
    fn on_event(&mut self, _policy: &str, _event: &PolicyEvent) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PolicyObserver for TracingObserver {
    fn on_event(&mut self, policy: &str, event: &PolicyEvent) {
        match *event {
            PolicyEvent::Admitted { key, weight } => {
                tracing::trace!(policy, key, weight, "admitted");
            },
            PolicyEvent::Rejected { key, weight } => {
                tracing::trace!(policy, key, weight, "rejected");
            },
            PolicyEvent::Evicted { key, weight } => {
                tracing::trace!(policy, key, weight, "evicted");
            },
            PolicyEvent::Promoted { key, from, to } => {
                tracing::trace!(policy, key, from, to, "promoted");
            },
            PolicyEvent::WindowAdapted {
                increase,
                amount,
                max_window,
                max_protected,
            } => {
                tracing::debug!(
                    policy,
                    increase,
                    amount,
                    max_window,
                    max_protected,
                    "window adapted"
                );
            },
            PolicyEvent::Finished {
                operations,
                hit_rate,
            } => {
                tracing::info!(policy, operations, hit_rate, "finished");
            },
        }
    }
}

/// Appends events to a log shared with the caller.
#[derive(Debug, Default, Clone)]
pub struct CollectingObserver {
    events: Arc<Mutex<Vec<PolicyEvent>>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies out everything recorded so far.
    pub fn events(&self) -> Vec<PolicyEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&PolicyEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| matches(e)).count()
    }
}

impl PolicyObserver for CollectingObserver {
    fn on_event(&mut self, _policy: &str, event: &PolicyEvent) {
        self.events.lock().push(*event);
    }
}

/// Counters plus observer of one policy instance.
pub struct Telemetry {
    stats: PolicyStats,
    observer: Box<dyn PolicyObserver>,
}

impl Telemetry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            stats: PolicyStats::new(name),
            observer: Box::new(NoopObserver),
        }
    }

    pub fn stats(&self) -> &PolicyStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut PolicyStats {
        &mut self.stats
    }

    pub fn set_observer(&mut self, observer: Box<dyn PolicyObserver>) {
        self.observer = observer;
    }

    pub fn emit(&mut self, event: PolicyEvent) {
        self.observer.on_event(self.stats.name(), &event);
    }

    /// A candidate entered the main region.
    pub(crate) fn admitted(&mut self, key: u64, weight: u32) {
        self.stats.record_admission();
        self.emit(PolicyEvent::Admitted { key, weight });
    }

    /// A miss that never entered the cache.
    pub(crate) fn rejected(&mut self, key: u64, weight: u32) {
        self.stats.record_rejection();
        self.emit(PolicyEvent::Rejected { key, weight });
    }

    /// A candidate that had been inserted lost admission and was removed.
    pub(crate) fn discarded(&mut self, key: u64, weight: u32) {
        self.stats.record_rejection();
        self.stats.record_eviction();
        self.emit(PolicyEvent::Rejected { key, weight });
    }

    /// A resident entry left the cache.
    pub(crate) fn evicted(&mut self, key: u64, weight: u32) {
        self.stats.record_eviction();
        self.emit(PolicyEvent::Evicted { key, weight });
    }

    pub(crate) fn finished(&mut self) {
        let event = PolicyEvent::Finished {
            operations: self.stats.operations(),
            hit_rate: self.stats.hit_rate(),
        };
        self.emit(event);
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_is_default() {
        let mut telemetry = Telemetry::new("p");
        telemetry.admitted(1, 10);
        assert_eq!(telemetry.stats().admissions(), 1);
    }

    #[test]
    fn counters_and_events_agree() {
        let log = CollectingObserver::new();
        let mut telemetry = Telemetry::new("p");
        telemetry.set_observer(Box::new(log.clone()));

        telemetry.admitted(1, 10);
        telemetry.discarded(2, 20);
        telemetry.evicted(3, 30);
        telemetry.rejected(4, 999);

        let stats = telemetry.stats();
        assert_eq!(stats.admissions(), 1);
        assert_eq!(stats.rejections(), 2);
        assert_eq!(stats.evictions(), 2);
        assert_eq!(
            log.count(|e| matches!(e, PolicyEvent::Rejected { .. })),
            2
        );
        assert_eq!(
            log.events().last(),
            Some(&PolicyEvent::Rejected { key: 4, weight: 999 })
        );
    }

    #[test]
    fn tracing_observer_accepts_every_event() {
        let mut observer = TracingObserver;
        for event in [
            PolicyEvent::Admitted { key: 1, weight: 1 },
            PolicyEvent::WindowAdapted {
                increase: true,
                amount: 5,
                max_window: 10,
                max_protected: 70,
            },
            PolicyEvent::Finished {
                operations: 3,
                hit_rate: 0.5,
            },
        ] {
            observer.on_event("p", &event);
        }
    }
}
