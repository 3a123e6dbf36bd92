//! Expands settings into policy instances.
//!
//! A [`PolicyKind`] names a family; the list-valued options in
//! [`SimulatorSettings`] decide how many independent instances it becomes.
//!
//! | Kind                        | Swept over                            |
//! |-----------------------------|---------------------------------------|
//! | `WindowTinyLfu(_)`          | `percent-main`                        |
//! | `HillClimberWindowTinyLfu`  | `percent-main` x `hill-climber.strategy` |
//! | `SampledTinyLfu(_)`         | `percent-main`                        |
//! | `Gdsf(_)`                   | (single instance)                     |
//! | `Multilevel`, `Promote`     | `admission`                           |
//! | `BidiTinyLfu`               | `percent-veterans`                    |
//!
//! ## Example
//!
//! ```rust
//! use evictsim::builder::{PolicyBuilder, PolicyKind};
//! use evictsim::config::SimulatorSettings;
//! use evictsim::policy::window_tinylfu::VictimSelection;
//!
//! let settings = SimulatorSettings {
//!     maximum_size: 100,
//!     percent_main: vec![0.5, 0.8],
//!     ..Default::default()
//! };
//! let policies = PolicyBuilder::new(settings)
//!     .build(PolicyKind::WindowTinyLfu(VictimSelection::Single))
//!     .unwrap();
//!
//! assert_eq!(policies.len(), 2);
//! assert_eq!(policies[0].name(), "sized.WindowTinyLfu (50%)");
//! ```

use crate::config::SimulatorSettings;
use crate::error::ConfigError;
use crate::policy::bidi_tinylfu::BidiTinyLfu;
use crate::policy::gdsf::{Gdsf, GdsfVariant};
use crate::policy::multilevel::MultilevelLinked;
use crate::policy::promote::Promote;
use crate::policy::sampled_tinylfu::{SampledSelection, SampledTinyLfu};
use crate::policy::window_tinylfu::{VictimSelection, WindowTinyLfu};
use crate::traits::Policy;

/// Available policy families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// W-TinyLFU with a fixed window.
    WindowTinyLfu(VictimSelection),
    /// W-TinyLFU whose window is resized by a hill climber.
    HillClimberWindowTinyLfu(VictimSelection),
    /// W-TinyLFU with a sampled main region.
    SampledTinyLfu(SampledSelection),
    Gdsf(GdsfVariant),
    /// Tiered cascade evicting per `multilevel-eviction`.
    Multilevel,
    /// Tiered LRU with probabilistic promotion.
    Promote,
    /// Two-level W-TinyLFU with a veterans region.
    BidiTinyLfu,
}

impl PolicyKind {
    /// Every family and variant.
    pub fn all() -> Vec<PolicyKind> {
        let selections = [
            VictimSelection::Single,
            VictimSelection::Sum,
            VictimSelection::Ristretto,
        ];
        let mut kinds = Vec::new();
        kinds.extend(selections.map(PolicyKind::WindowTinyLfu));
        kinds.extend(selections.map(PolicyKind::HillClimberWindowTinyLfu));
        kinds.push(PolicyKind::SampledTinyLfu(SampledSelection::Single));
        kinds.push(PolicyKind::SampledTinyLfu(SampledSelection::Sum));
        kinds.extend(GdsfVariant::ALL.map(PolicyKind::Gdsf));
        kinds.extend([
            PolicyKind::Multilevel,
            PolicyKind::Promote,
            PolicyKind::BidiTinyLfu,
        ]);
        kinds
    }
}

/// Builds boxed policies from one set of settings.
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    settings: SimulatorSettings,
}

impl PolicyBuilder {
    pub fn new(settings: SimulatorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SimulatorSettings {
        &self.settings
    }

    /// Builds one instance per sweep value of `kind`.
    ///
    /// Fails on the first invalid option; nothing is built in that case.
    pub fn build(&self, kind: PolicyKind) -> Result<Vec<Box<dyn Policy>>, ConfigError> {
        let settings = &self.settings;
        settings.validate()?;

        let mut policies: Vec<Box<dyn Policy>> = Vec::new();
        match kind {
            PolicyKind::WindowTinyLfu(selection) => {
                for &percent_main in &settings.percent_main {
                    policies.push(Box::new(WindowTinyLfu::new(settings, percent_main, selection)?));
                }
            },
            PolicyKind::HillClimberWindowTinyLfu(selection) => {
                for &percent_main in &settings.percent_main {
                    for &strategy in &settings.hill_climber.strategy {
                        policies.push(Box::new(WindowTinyLfu::with_climber(
                            settings,
                            percent_main,
                            selection,
                            strategy,
                        )?));
                    }
                }
            },
            PolicyKind::SampledTinyLfu(selection) => {
                for &percent_main in &settings.percent_main {
                    policies.push(Box::new(SampledTinyLfu::new(settings, percent_main, selection)?));
                }
            },
            PolicyKind::Gdsf(variant) => {
                policies.push(Box::new(Gdsf::new(settings, variant)?));
            },
            PolicyKind::Multilevel => {
                for &admission in &settings.admission {
                    policies.push(Box::new(MultilevelLinked::new(
                        settings,
                        settings.multilevel_eviction,
                        admission,
                    )?));
                }
            },
            PolicyKind::Promote => {
                for &admission in &settings.admission {
                    policies.push(Box::new(Promote::new(settings, admission)?));
                }
            },
            PolicyKind::BidiTinyLfu => {
                for &percent_veterans in &settings.percent_veterans {
                    policies.push(Box::new(BidiTinyLfu::new(settings, percent_veterans)?));
                }
            },
        }

        tracing::debug!(?kind, count = policies.len(), "built policies");
        Ok(policies)
    }

    /// Builds every kind in order.
    pub fn build_all(&self, kinds: &[PolicyKind]) -> Result<Vec<Box<dyn Policy>>, ConfigError> {
        let mut policies = Vec::new();
        for &kind in kinds {
            policies.extend(self.build(kind)?);
        }
        Ok(policies)
    }
}
