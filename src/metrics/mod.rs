pub mod snapshot;
pub mod stats;
pub mod traits;

pub use snapshot::{LevelSnapshot, PolicyStatsSnapshot};
pub use stats::PolicyStats;
pub use traits::{
    CoreMetricsRecorder, LevelMetricsRecorder, MetricsSnapshotProvider, NamedMetricsRecorder,
};
