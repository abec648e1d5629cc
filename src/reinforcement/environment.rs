// Environment contract consumed by the engine
// Tasks implement this trait; the engine never inspects observations itself

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;

use crate::error::{FedError, FedResult};

/// Result of applying one action to an observation
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome<O> {
    /// Observation after the action
    pub observation: O,
    pub reward: f64,
    /// The episode has terminated
    pub done: bool,
}

impl<O> StepOutcome<O> {
    pub fn new(observation: O, reward: f64, done: bool) -> Self {
        Self {
            observation,
            reward,
            done,
        }
    }
}

/// A discrete-action learning task.
///
/// `step` is always awaited, whether the task computes synchronously or not,
/// so call sites never branch on sync vs. async behaviour.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Raw observation produced by the task
    type Observation: Clone + Send + Sync + 'static;

    /// Ordered action labels; the length fixes the action space
    fn actions(&self) -> &[String];

    /// Discrete state key for an observation
    fn get_state(&self, observation: &Self::Observation) -> String;

    /// Apply `action` to `observation`
    async fn step(
        &self,
        observation: &Self::Observation,
        action: usize,
    ) -> StepOutcome<Self::Observation>;

    /// Start a new episode for `client_id`
    async fn reset(
        &self,
        client_id: usize,
        previous: Option<&Self::Observation>,
    ) -> Self::Observation;
}

/// Reject a task that cannot be trained: no actions, or duplicated labels
pub fn validate_environment<E: Environment + ?Sized>(env: &E) -> FedResult<usize> {
    let actions = env.actions();
    if actions.is_empty() {
        return Err(FedError::invalid_environment(
            "environment must declare at least one action",
        ));
    }

    let mut seen = HashSet::new();
    for label in actions {
        if label.trim().is_empty() {
            return Err(FedError::invalid_environment("action labels must not be empty"));
        }
        if !seen.insert(label.as_str()) {
            return Err(FedError::invalid_environment(format!(
                "duplicate action label '{}'",
                label
            )));
        }
    }

    Ok(actions.len())
}

/// What a renderer is told about the client it draws
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub client_id: usize,
    pub episode: usize,
    pub step: usize,
    pub epsilon: f64,
    pub episode_reward: f64,
    pub inference: bool,
}

/// Optional drawing hook. It only observes; learning never depends on it.
pub trait Renderer<O>: Send + Sync {
    fn render(&self, observation: &O, client: &ClientInfo);
}
