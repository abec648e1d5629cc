// Configuration module for fedrl
// Every tunable of the engine lives here with serde defaults

#[allow(clippy::module_inception)]
pub mod config;

// Re-export main types for easier access
pub use config::{
    AgentConfig, AggregationWeighting, EngineConfig, EvaluationConfig, FederationConfig,
    MetricsConfig, PersistenceConfig, RenderConfig, TriggerStrategy,
};
