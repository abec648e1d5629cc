// Training/inference lifecycle
// Owns the client population, the tick loop, freezing and evaluation

pub mod client;
pub mod engine;
pub mod evaluation;
pub mod mode;
pub mod scheduler;

pub use client::Client;
pub use engine::{EngineStatus, FederatedEngine, TickReport};
pub use evaluation::{
    summarize, EvaluationObserver, EvaluationProgress, EvaluationResult, EvaluationRunner,
};
pub use mode::EngineMode;
pub use scheduler::{spawn_configured_loop, spawn_training_loop, TrainingLoop};
