pub use crate::admission::{AdmissionKind, Admittor};
pub use crate::builder::{PolicyBuilder, PolicyKind};
pub use crate::config::{HillClimberSettings, SimulatorSettings};
pub use crate::ds::{Frequency, SegmentList, SketchKind, SlotId};
pub use crate::error::{ConfigError, InvariantError, SimError, TraceError};
pub use crate::event::AccessEvent;
pub use crate::metrics::{MetricsSnapshotProvider, PolicyStats, PolicyStatsSnapshot};
pub use crate::observer::{CollectingObserver, PolicyEvent, PolicyObserver, TracingObserver};
pub use crate::policy::climber::ClimberStrategy;
pub use crate::policy::gdsf::GdsfVariant;
pub use crate::policy::multilevel::TierEviction;
pub use crate::policy::sampled_tinylfu::{SampleStrategy, SampledSelection};
pub use crate::policy::window_tinylfu::VictimSelection;
pub use crate::simulator::{Report, Simulator, replay};
pub use crate::traits::Policy;
