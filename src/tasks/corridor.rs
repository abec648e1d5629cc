// One-dimensional corridor: walk from the left wall to the goal at the right end

use async_trait::async_trait;
use serde::Serialize;

use crate::metrics::{KpiAggregation, KpiDefinition, MetricsEngine};
use crate::reinforcement::{Environment, StateDiscretizer, StepOutcome};

/// Position of a walker in the corridor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorridorState {
    pub position: f64,
    /// Set once the goal has been reached
    pub at_goal: bool,
}

/// Deterministic corridor of `length` cells. Each move costs
/// `step_penalty`; reaching the last cell pays `goal_reward` and ends the
/// episode. Moving into the left wall leaves the walker in place.
#[derive(Debug, Clone)]
pub struct Corridor {
    length: usize,
    step_penalty: f64,
    goal_reward: f64,
    actions: Vec<String>,
    discretizer: StateDiscretizer,
}

impl Corridor {
    pub fn new(length: usize) -> Self {
        let length = length.max(1);
        Self {
            length,
            step_penalty: 0.01,
            goal_reward: 1.0,
            actions: vec!["left".to_string(), "right".to_string()],
            // one bucket per cell, cell centres at whole positions
            discretizer: StateDiscretizer::default().with_dimension(
                length + 1,
                -0.5,
                length as f64 + 0.5,
            ),
        }
    }

    pub fn with_rewards(mut self, step_penalty: f64, goal_reward: f64) -> Self {
        self.step_penalty = step_penalty;
        self.goal_reward = goal_reward;
        self
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn goal(&self) -> f64 {
        self.length as f64
    }

    /// KPIs reported for corridor episodes; success means the goal was reached
    pub fn metrics_engine(&self) -> MetricsEngine<CorridorState> {
        let goal = self.goal();
        MetricsEngine::new()
            .with_kpi(KpiDefinition::new(
                "distance_to_goal",
                KpiAggregation::Last,
                move |s: &CorridorState| Ok(goal - s.position),
            ))
            .with_kpi(KpiDefinition::new(
                "furthest_progress",
                KpiAggregation::Max,
                move |s: &CorridorState| Ok(s.position / goal * 100.0),
            ))
            .with_kpi(KpiDefinition::new(
                "time_at_wall",
                KpiAggregation::Percentage,
                |s: &CorridorState| Ok(if s.position <= 0.0 { 1.0 } else { 0.0 }),
            ))
            .with_success(|s: &CorridorState, _| s.at_goal)
            .with_summary("steps", |data, _| data.steps as f64)
    }
}

impl Default for Corridor {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl Environment for Corridor {
    type Observation = CorridorState;

    fn actions(&self) -> &[String] {
        &self.actions
    }

    fn get_state(&self, observation: &CorridorState) -> String {
        self.discretizer.key(&[observation.position])
    }

    async fn step(&self, observation: &CorridorState, action: usize) -> StepOutcome<CorridorState> {
        let delta = if action == 1 { 1.0 } else { -1.0 };
        let position = (observation.position + delta).clamp(0.0, self.goal());
        let at_goal = position >= self.goal();
        let reward = if at_goal {
            self.goal_reward
        } else {
            -self.step_penalty
        };

        StepOutcome::new(CorridorState { position, at_goal }, reward, at_goal)
    }

    async fn reset(&self, _client_id: usize, _previous: Option<&CorridorState>) -> CorridorState {
        CorridorState {
            position: 0.0,
            at_goal: false,
        }
    }
}
