// fedrl - federated tabular Q-learning
// Parallel clients learn one task, merge their tables by FedAvg and get frozen for evaluation

pub mod config;
pub mod error;
pub mod federation;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod persistence;
pub mod reinforcement;
pub mod tasks;

pub use config::EngineConfig;
pub use error::{FedError, FedResult};
pub use lifecycle::{EngineMode, EvaluationResult, FederatedEngine};
pub use persistence::{FileStore, MemoryStore, PersistencePort};
pub use reinforcement::{ActionValueTable, Environment, QLearningAgent};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Initialize logging with colored output for interactive use
pub fn init() {
    logging::init_logging(true)
}
