// Main module for the per-client reinforcement learning components
// Discretization, the sparse Q-table, the Q-learning agent and the task contract

pub mod discretizer;
pub mod environment;
pub mod q_learning;
pub mod q_table;

// Re-export main components for easier access
pub use discretizer::{discretize, discretize_state, StateDiscretizer};
pub use environment::{validate_environment, ClientInfo, Environment, Renderer, StepOutcome};
pub use q_learning::QLearningAgent;
pub use q_table::ActionValueTable;

/// Trait defining the interface for an action-selection policy
pub trait Policy {
    /// Selects an action for a state
    fn select_action(&mut self, state: &str) -> usize;
}
