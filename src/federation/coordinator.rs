// Federation coordinator: owns the round counter, trigger state and round log
// Aggregation itself is stateless; this module decides when and records what

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::config::{AggregationWeighting, FederationConfig, TriggerStrategy};
use crate::error::FedResult;
use crate::federation::aggregation::{fed_avg, proportional_weights};
use crate::federation::convergence::{compute_delta, ModelDelta};
use crate::federation::trigger::{build_trigger, FederationProgress, FederationTrigger};
use crate::metrics::RollingWindow;
use crate::reinforcement::ActionValueTable;

/// Mutable federation bookkeeping
#[derive(Debug, Clone)]
pub struct FederationState {
    /// Completed aggregations; only a successful aggregation increments it
    pub round: u64,
    /// Average client episodes observed at the last aggregation
    pub last_avg_episodes: f64,
    /// Whether triggers are evaluated after each tick
    pub auto_federate: bool,
    /// Recent episode rewards across all clients, oldest first
    pub reward_history: RollingWindow,
    /// Table produced by the last aggregation
    pub previous_table: Option<ActionValueTable>,
}

impl FederationState {
    pub fn new(auto_federate: bool, history_capacity: usize) -> Self {
        Self {
            round: 0,
            last_avg_episodes: 0.0,
            auto_federate,
            reward_history: RollingWindow::new(history_capacity),
            previous_table: None,
        }
    }
}

/// What caused an aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundCause {
    Automatic,
    Manual,
    Freeze,
}

/// Log entry for one completed aggregation
#[derive(Debug, Clone, Serialize)]
pub struct FederationRound {
    pub round: u64,
    pub timestamp: DateTime<Utc>,
    pub cause: RoundCause,
    pub clients: usize,
    pub avg_episodes: f64,
    /// States in the aggregated table
    pub states: usize,
    pub delta: ModelDelta,
}

/// A fresh global table and the round that produced it
#[derive(Debug, Clone)]
pub struct AggregationOutcome {
    pub table: ActionValueTable,
    pub round: FederationRound,
}

/// Decides when to aggregate and keeps a bounded history of rounds
#[derive(Debug)]
pub struct FederationCoordinator {
    state: FederationState,
    trigger: Box<dyn FederationTrigger>,
    weighting: AggregationWeighting,
    rounds: VecDeque<FederationRound>,
    max_round_log: usize,
}

impl FederationCoordinator {
    pub fn new(config: &FederationConfig) -> Self {
        Self {
            state: FederationState::new(config.auto_federate, config.history_capacity),
            trigger: build_trigger(config.trigger),
            weighting: config.weighting,
            rounds: VecDeque::with_capacity(config.max_round_log),
            max_round_log: config.max_round_log,
        }
    }

    pub fn state(&self) -> &FederationState {
        &self.state
    }

    pub fn round(&self) -> u64 {
        self.state.round
    }

    pub fn trigger_name(&self) -> &'static str {
        self.trigger.name()
    }

    pub fn is_auto_federation(&self) -> bool {
        self.state.auto_federate
    }

    pub fn set_auto_federation(&mut self, enabled: bool) {
        if self.state.auto_federate != enabled {
            info!(enabled, "Auto-federation toggled");
        }
        self.state.auto_federate = enabled;
    }

    /// Replace the trigger strategy; bookkeeping is kept
    pub fn set_trigger(&mut self, strategy: TriggerStrategy) {
        self.trigger = build_trigger(strategy);
    }

    pub fn set_weighting(&mut self, weighting: AggregationWeighting) {
        self.weighting = weighting;
    }

    /// Record the total reward of a finished client episode
    pub fn record_reward(&mut self, reward: f64) {
        self.state.reward_history.push(reward);
    }

    /// Whether the configured trigger asks for an aggregation now.
    /// Always false while auto-federation is off.
    pub fn should_trigger(&self, progress: &FederationProgress) -> bool {
        if !self.state.auto_federate || progress.clients == 0 {
            return false;
        }
        let fire = self.trigger.should_trigger(&self.state, progress);
        if fire {
            debug!(
                trigger = self.trigger.name(),
                avg_episodes = progress.avg_episodes,
                "Federation trigger fired"
            );
        }
        fire
    }

    /// Aggregation weights for clients with the given completed episode counts
    pub fn weights_for(&self, episodes: &[usize]) -> Option<Vec<f64>> {
        match self.weighting {
            AggregationWeighting::Uniform => None,
            AggregationWeighting::EpisodeCount => Some(proportional_weights(episodes)),
        }
    }

    /// Average `tables` into a new global table and advance the round.
    ///
    /// On error nothing is recorded and the round counter is unchanged.
    pub fn aggregate(
        &mut self,
        tables: &[ActionValueTable],
        episodes: &[usize],
        progress: &FederationProgress,
        cause: RoundCause,
    ) -> FedResult<AggregationOutcome> {
        let weights = self.weights_for(episodes);
        let table = fed_avg(tables, weights.as_deref())?;

        let delta = match &self.state.previous_table {
            Some(previous) => compute_delta(previous, &table),
            None => compute_delta(&ActionValueTable::new(table.num_actions()), &table),
        };

        self.state.round += 1;
        self.state.last_avg_episodes = progress.avg_episodes;
        self.state.reward_history.clear();
        self.state.previous_table = Some(table.clone());

        let round = FederationRound {
            round: self.state.round,
            timestamp: Utc::now(),
            cause,
            clients: tables.len(),
            avg_episodes: progress.avg_episodes,
            states: table.len(),
            delta,
        };

        info!(
            round = round.round,
            cause = ?cause,
            clients = round.clients,
            states = round.states,
            states_changed = delta.states_changed,
            avg_delta = delta.avg_delta,
            max_delta = delta.max_delta,
            converged = delta.converged,
            "Federation round complete"
        );

        if self.max_round_log > 0 {
            if self.rounds.len() == self.max_round_log {
                self.rounds.pop_front();
            }
            self.rounds.push_back(round.clone());
        }

        Ok(AggregationOutcome { table, round })
    }

    /// Logged rounds, oldest first
    pub fn rounds(&self) -> impl Iterator<Item = &FederationRound> {
        self.rounds.iter()
    }

    pub fn last_round(&self) -> Option<&FederationRound> {
        self.rounds.back()
    }

    /// Forget every round and bookmark; keeps the auto flag and strategy
    pub fn reset(&mut self) {
        let capacity = self.state.reward_history.capacity();
        self.state = FederationState::new(self.state.auto_federate, capacity);
        self.rounds.clear();
    }
}
