//! Simulator settings.
//!
//! Settings deserialize from any serde format with kebab-case option names
//! (`maximum-size`, `percent-main`, ...); every field has a default so a
//! partial document is enough. List-valued options (`percent-main`,
//! `hill-climber.strategy`, `admission`, `percent-veterans`) describe a
//! sweep: [`PolicyBuilder`](crate::builder::PolicyBuilder) creates one
//! independent policy per value.
//!
//! ## Options
//!
//! | Option                        | Type       | Default        |
//! |-------------------------------|------------|----------------|
//! | `maximum-size`                | bytes      | 512            |
//! | `percent-main`                | `[f64]`    | `[0.99]`       |
//! | `percent-main-protected`      | `f64`      | 0.8            |
//! | `scaled` / `bump` / `prune`   | `bool`     | false          |
//! | `sample`                      | strategy   | `Freq`         |
//! | `sample-size`                 | `usize`    | 5              |
//! | `seed`                        | `u64`      | 1033096058     |
//! | `sketch`                      | kind       | `count-min-4`  |
//! | `hill-climber.*`              | table      | see below      |
//! | `multilevel-maximum-size`     | `[u64]`    | `[128, 512]`   |
//! | `multilevel-eviction`         | tier rule  | `lru`          |
//! | `admission`                   | `[kind]`   | `[tiny-lfu]`   |
//! | `percent-veterans`            | `[f64]`    | `[0.2]`        |
//!
//! `hill-climber`: `strategy` (`[simple | triggered]`), `percent-pivot`
//! (0.0625), `sample-count` (50 000), `step-decay-rate` (0.98),
//! `restart-threshold` (0.05).
//!
//! ## Example
//!
//! ```
//! use evictsim::config::SimulatorSettings;
//!
//! let settings: SimulatorSettings = serde_json::from_str(
//!     r#"{ "maximum-size": 100, "percent-main": [0.8], "scaled": true }"#,
//! )
//! .unwrap();
//! settings.validate().unwrap();
//!
//! let split = settings.split(0.8);
//! assert_eq!((split.max_window, split.max_main, split.max_protected), (20, 80, 64));
//! ```

use serde::{Deserialize, Serialize};

use crate::admission::AdmissionKind;
use crate::ds::SketchKind;
use crate::error::ConfigError;
use crate::policy::climber::ClimberStrategy;
use crate::policy::multilevel::TierEviction;
use crate::policy::sampled_tinylfu::SampleStrategy;

/// Seed used when none is configured.
pub const DEFAULT_SEED: u64 = 1_033_096_058;

/// Every recognized option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SimulatorSettings {
    pub maximum_size: u64,
    pub percent_main: Vec<f64>,
    pub percent_main_protected: f64,
    pub scaled: bool,
    pub bump: bool,
    pub prune: bool,
    pub sample: SampleStrategy,
    pub sample_size: usize,
    pub seed: u64,
    pub sketch: SketchKind,
    pub hill_climber: HillClimberSettings,
    pub multilevel_maximum_size: Vec<u64>,
    pub multilevel_eviction: TierEviction,
    pub admission: Vec<AdmissionKind>,
    pub percent_veterans: Vec<f64>,
}

/// Adaptive window sizing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HillClimberSettings {
    pub strategy: Vec<ClimberStrategy>,
    pub percent_pivot: f64,
    pub sample_count: u64,
    pub step_decay_rate: f64,
    pub restart_threshold: f64,
}

/// Byte budgets derived from `maximum-size` and one `percent-main` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSplit {
    pub max_window: u64,
    pub max_main: u64,
    pub max_protected: u64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            maximum_size: 512,
            percent_main: vec![0.99],
            percent_main_protected: 0.8,
            scaled: false,
            bump: false,
            prune: false,
            sample: SampleStrategy::Freq,
            sample_size: 5,
            seed: DEFAULT_SEED,
            sketch: SketchKind::CountMin4,
            hill_climber: HillClimberSettings::default(),
            multilevel_maximum_size: vec![128, 512],
            multilevel_eviction: TierEviction::Lru,
            admission: vec![AdmissionKind::TinyLfu],
            percent_veterans: vec![0.2],
        }
    }
}

impl Default for HillClimberSettings {
    fn default() -> Self {
        Self {
            strategy: vec![ClimberStrategy::Simple],
            percent_pivot: 0.0625,
            sample_count: 50_000,
            step_decay_rate: 0.98,
            restart_threshold: 0.05,
        }
    }
}

pub(crate) fn check_fraction(option: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::new(format!(
            "{option} must be within [0, 1], got {value}"
        )))
    }
}

fn check_sweep(option: &str, values: &[f64]) -> Result<(), ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::new(format!("{option} must list at least one value")));
    }
    values.iter().try_for_each(|&v| check_fraction(option, v))
}

impl SimulatorSettings {
    /// Checks every option; the error names the first offending one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.maximum_size == 0 {
            return Err(ConfigError::new("maximum-size must be greater than zero"));
        }
        check_sweep("percent-main", &self.percent_main)?;
        check_fraction("percent-main-protected", self.percent_main_protected)?;
        if self.sample_size == 0 {
            return Err(ConfigError::new("sample-size must be greater than zero"));
        }
        self.hill_climber.validate()?;
        if self.multilevel_maximum_size.contains(&0) {
            return Err(ConfigError::new(
                "multilevel-maximum-size entries must be greater than zero",
            ));
        }
        if self.admission.is_empty() {
            return Err(ConfigError::new("admission must list at least one filter"));
        }
        check_sweep("percent-veterans", &self.percent_veterans)
    }

    /// Splits the capacity into window, main and protected budgets.
    pub fn split(&self, percent_main: f64) -> RegionSplit {
        let max_main = (self.maximum_size as f64 * percent_main) as u64;
        RegionSplit {
            max_window: self.maximum_size - max_main,
            max_main,
            max_protected: (max_main as f64 * self.percent_main_protected) as u64,
        }
    }
}

impl HillClimberSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.strategy.is_empty() {
            return Err(ConfigError::new(
                "hill-climber.strategy must list at least one strategy",
            ));
        }
        if !(self.percent_pivot > 0.0 && self.percent_pivot <= 1.0) {
            return Err(ConfigError::new(format!(
                "hill-climber.percent-pivot must be within (0, 1], got {}",
                self.percent_pivot
            )));
        }
        if self.sample_count == 0 {
            return Err(ConfigError::new(
                "hill-climber.sample-count must be greater than zero",
            ));
        }
        if !(self.step_decay_rate > 0.0 && self.step_decay_rate <= 1.0) {
            return Err(ConfigError::new(format!(
                "hill-climber.step-decay-rate must be within (0, 1], got {}",
                self.step_decay_rate
            )));
        }
        if !(self.restart_threshold.is_finite() && self.restart_threshold >= 0.0) {
            return Err(ConfigError::new(format!(
                "hill-climber.restart-threshold must be non-negative, got {}",
                self.restart_threshold
            )));
        }
        Ok(())
    }
}
