//! Hill climbers deciding how to resize the admission window.
//!
//! A climber watches hits and misses once the cache is full and, when the
//! policy asks, answers with an [`Adaptation`]. The step carries its
//! direction: the climber keeps moving the same way while the sample hit
//! rate does not drop and turns around when it does.
//!
//! ```text
//!   sample hit rate change Δ
//!
//!   amount    = Δ >= 0 ? step : -step
//!   next step = |Δ| >= restart-threshold
//!                 ? ±initial (restart, same sign as amount)
//!                 : step-decay-rate * amount
//! ```
//!
//! | Strategy    | When `adapt` answers                                 |
//! |-------------|------------------------------------------------------|
//! | `Simple`    | once `sample-count` requests were seen while full    |
//! | `Triggered` | on every call with a non-empty sample                |
//!
//! The window policy only calls `adapt` when the frequency sketch is about
//! to age its counters, so `Triggered` samples exactly one sketch period.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::HillClimberSettings;

/// Which climber drives the window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClimberStrategy {
    #[default]
    Simple,
    Triggered,
}

impl ClimberStrategy {
    pub fn label(self) -> &'static str {
        match self {
            ClimberStrategy::Simple => "simple",
            ClimberStrategy::Triggered => "triggered",
        }
    }

    pub fn build(self, settings: &HillClimberSettings, maximum_size: u64) -> Box<dyn HillClimber> {
        let simple = SimpleClimber::new(settings, maximum_size);
        match self {
            ClimberStrategy::Simple => Box::new(simple),
            ClimberStrategy::Triggered => Box::new(TriggeredClimber { inner: simple }),
        }
    }
}

/// A window resize decision, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adaptation {
    Hold,
    IncreaseWindow(u64),
    DecreaseWindow(u64),
}

impl Adaptation {
    /// Converts a signed step into a decision; steps under one byte hold.
    pub fn adapt_by(amount: f64) -> Self {
        if amount >= 1.0 {
            Adaptation::IncreaseWindow(amount as u64)
        } else if amount <= -1.0 {
            Adaptation::DecreaseWindow((-amount) as u64)
        } else {
            Adaptation::Hold
        }
    }
}

/// Feedback controller for the window size.
pub trait HillClimber: fmt::Debug + Send {
    fn on_hit(&mut self, is_full: bool);
    fn on_miss(&mut self, is_full: bool);
    fn adapt(&mut self, is_full: bool) -> Adaptation;
}

/// Fixed-sample climber with a decaying, restartable step.
#[derive(Debug, Clone)]
pub struct SimpleClimber {
    sample_count: u64,
    hits_in_sample: u64,
    misses_in_sample: u64,
    previous_hit_rate: f64,
    initial_step: f64,
    step: f64,
    step_decay_rate: f64,
    restart_threshold: f64,
}

impl SimpleClimber {
    pub fn new(settings: &HillClimberSettings, maximum_size: u64) -> Self {
        let initial_step = settings.percent_pivot * maximum_size as f64;
        Self {
            sample_count: settings.sample_count,
            hits_in_sample: 0,
            misses_in_sample: 0,
            previous_hit_rate: 0.0,
            initial_step,
            step: initial_step,
            step_decay_rate: settings.step_decay_rate,
            restart_threshold: settings.restart_threshold,
        }
    }

    /// Current signed step size.
    pub fn step(&self) -> f64 {
        self.step
    }

    fn sampled(&self) -> u64 {
        self.hits_in_sample + self.misses_in_sample
    }

    fn adjust(&mut self, hit_rate: f64) -> f64 {
        let change = hit_rate - self.previous_hit_rate;
        let amount = if change >= 0.0 { self.step } else { -self.step };
        self.step = if change.abs() >= self.restart_threshold {
            self.initial_step.copysign(amount)
        } else {
            self.step_decay_rate * amount
        };
        amount
    }

    fn close_sample(&mut self) -> Adaptation {
        let hit_rate = self.hits_in_sample as f64 / self.sampled() as f64;
        let adaptation = Adaptation::adapt_by(self.adjust(hit_rate));
        self.previous_hit_rate = hit_rate;
        self.hits_in_sample = 0;
        self.misses_in_sample = 0;
        adaptation
    }
}

impl HillClimber for SimpleClimber {
    fn on_hit(&mut self, is_full: bool) {
        if is_full {
            self.hits_in_sample += 1;
        }
    }

    fn on_miss(&mut self, is_full: bool) {
        if is_full {
            self.misses_in_sample += 1;
        }
    }

    fn adapt(&mut self, is_full: bool) -> Adaptation {
        if !is_full || self.sampled() < self.sample_count {
            return Adaptation::Hold;
        }
        self.close_sample()
    }
}

/// Climber whose sample ends whenever the policy asks.
#[derive(Debug, Clone)]
pub struct TriggeredClimber {
    inner: SimpleClimber,
}

impl HillClimber for TriggeredClimber {
    fn on_hit(&mut self, is_full: bool) {
        self.inner.on_hit(is_full);
    }

    fn on_miss(&mut self, is_full: bool) {
        self.inner.on_miss(is_full);
    }

    fn adapt(&mut self, is_full: bool) -> Adaptation {
        if !is_full || self.inner.sampled() == 0 {
            return Adaptation::Hold;
        }
        self.inner.close_sample()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(sample_count: u64) -> HillClimberSettings {
        HillClimberSettings {
            sample_count,
            ..Default::default()
        }
    }

    fn feed(climber: &mut dyn HillClimber, hits: u64, misses: u64) {
        for _ in 0..hits {
            climber.on_hit(true);
        }
        for _ in 0..misses {
            climber.on_miss(true);
        }
    }

    #[test]
    fn adapt_by_rounds_toward_zero() {
        assert_eq!(Adaptation::adapt_by(0.4), Adaptation::Hold);
        assert_eq!(Adaptation::adapt_by(-0.9), Adaptation::Hold);
        assert_eq!(Adaptation::adapt_by(12.7), Adaptation::IncreaseWindow(12));
        assert_eq!(Adaptation::adapt_by(-3.2), Adaptation::DecreaseWindow(3));
    }

    #[test]
    fn simple_holds_until_full_sample() {
        let mut climber = SimpleClimber::new(&settings(10), 1600);
        feed(&mut climber, 5, 4);
        assert_eq!(climber.adapt(true), Adaptation::Hold);
        climber.on_hit(false);
        assert_eq!(climber.adapt(true), Adaptation::Hold);
        climber.on_miss(true);
        assert_eq!(climber.adapt(false), Adaptation::Hold);
        assert_eq!(climber.adapt(true), Adaptation::IncreaseWindow(100));
    }

    #[test]
    fn simple_reverses_and_decays() {
        // initial step = 0.0625 * 1600 = 100
        let mut climber = SimpleClimber::new(&settings(10), 1600);

        feed(&mut climber, 5, 5);
        assert_eq!(climber.adapt(true), Adaptation::IncreaseWindow(100));
        assert_eq!(climber.step(), 100.0);

        // hit rate drops by 0.3: reverse and restart
        feed(&mut climber, 2, 8);
        assert_eq!(climber.adapt(true), Adaptation::DecreaseWindow(100));
        assert_eq!(climber.step(), -100.0);

        // unchanged hit rate: keep direction, decay
        feed(&mut climber, 2, 8);
        assert_eq!(climber.adapt(true), Adaptation::DecreaseWindow(100));
        assert!((climber.step() + 98.0).abs() < 1e-9);
    }

    #[test]
    fn triggered_adapts_on_any_sample() {
        let mut climber = ClimberStrategy::Triggered.build(&settings(50_000), 1600);
        assert_eq!(climber.adapt(true), Adaptation::Hold);
        feed(climber.as_mut(), 1, 1);
        assert_eq!(climber.adapt(true), Adaptation::IncreaseWindow(100));
        assert_eq!(climber.adapt(true), Adaptation::Hold);
    }

    #[test]
    fn strategy_labels() {
        assert_eq!(ClimberStrategy::Simple.label(), "simple");
        assert_eq!(ClimberStrategy::Triggered.label(), "triggered");
    }
}
