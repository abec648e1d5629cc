// Metrics and KPI engine
// Rewards drive learning; KPIs measure domain outcomes and decide success

pub mod episode;
pub mod kpi;
pub mod training;

pub use episode::{EpisodeData, EpisodeOutcome, EpisodeRecord, MetricsEngine, TrajectoryStep};
pub use kpi::{KpiAggregation, KpiDefinition};
pub use training::{ClientStats, PopulationSummary, RollingWindow};
