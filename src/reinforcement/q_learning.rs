// Q-Learning implementation for a single federated client
// Epsilon-greedy selection over a sparse table plus the one-step TD update

use crate::config::AgentConfig;
use crate::error::{FedError, FedResult};
use crate::reinforcement::{q_table::ActionValueTable, Policy};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

/// Tabular Q-learning agent owned by one client
#[derive(Debug, Clone)]
pub struct QLearningAgent {
    /// Q-table mapping state keys to one value per action
    table: ActionValueTable,
    /// Learning rate (α) - how quickly new information overrides old
    learning_rate: f64,
    /// Discount factor (γ) - importance of future rewards
    discount_factor: f64,
    /// Exploration rate (ε) - probability of taking a random action
    exploration_rate: f64,
    /// Exploration rate restored by `reset`
    initial_exploration_rate: f64,
    /// Multiplicative decay applied once per finished episode
    exploration_decay: f64,
    /// Floor for the exploration rate
    min_exploration_rate: f64,
    /// Frozen agents neither learn nor explore
    inference_mode: bool,
    /// Number of applied TD updates
    updates: usize,
    rng: StdRng,
}

impl QLearningAgent {
    /// Create a learning agent. `seed` makes exploration reproducible.
    pub fn new(num_actions: usize, config: &AgentConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            table: ActionValueTable::new(num_actions),
            learning_rate: config.learning_rate,
            discount_factor: config.discount_factor,
            exploration_rate: config.exploration_rate,
            initial_exploration_rate: config.exploration_rate,
            exploration_decay: config.exploration_decay,
            min_exploration_rate: config.min_exploration_rate,
            inference_mode: false,
            updates: 0,
            rng,
        }
    }

    /// Create a frozen agent (α = 0, ε = 0, inference on) executing `table`
    pub fn frozen(table: ActionValueTable) -> Self {
        let config = AgentConfig {
            learning_rate: 0.0,
            exploration_rate: 0.0,
            min_exploration_rate: 0.0,
            ..AgentConfig::default()
        };
        let mut agent = Self::new(table.num_actions(), &config, Some(0));
        agent.table = table;
        agent.inference_mode = true;
        agent
    }

    pub fn num_actions(&self) -> usize {
        self.table.num_actions()
    }

    /// Pick an action: random with probability ε, otherwise greedy.
    ///
    /// Greedy ties resolve to the lowest action index. In inference mode the
    /// stored ε is ignored and the choice is always greedy.
    pub fn choose_action(&mut self, state: &str) -> usize {
        let num_actions = self.num_actions();
        if num_actions == 0 {
            return 0;
        }

        if !self.inference_mode && self.rng.random::<f64>() < self.exploration_rate {
            return self.rng.random_range(0..num_actions);
        }

        self.table.best_action(state)
    }

    /// One-step temporal-difference update.
    ///
    /// Q(s,a) ← Q(s,a) + α[r + γ·max_a' Q(s',a') - Q(s,a)]
    pub fn learn(&mut self, state: &str, action: usize, reward: f64, next_state: &str) {
        if self.inference_mode {
            return;
        }
        if action >= self.num_actions() {
            warn!(
                "Ignoring update for out-of-range action {} (action space {})",
                action,
                self.num_actions()
            );
            return;
        }

        let max_next_q = self.table.max_value(next_state);
        let td_target = reward + self.discount_factor * max_next_q;

        let row = self.table.row_mut(state);
        let current_q = row[action];
        row[action] = current_q + self.learning_rate * (td_target - current_q);

        self.updates += 1;
    }

    /// ε ← max(ε_min, ε · decay); no-op for frozen agents
    pub fn decay_epsilon(&mut self) {
        if self.inference_mode {
            return;
        }
        self.exploration_rate =
            (self.exploration_rate * self.exploration_decay).max(self.min_exploration_rate);
    }

    /// Stored exploration rate
    pub fn epsilon(&self) -> f64 {
        self.exploration_rate
    }

    /// Exploration rate actually used by `choose_action`
    pub fn effective_epsilon(&self) -> f64 {
        if self.inference_mode {
            0.0
        } else {
            self.exploration_rate
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn updates(&self) -> usize {
        self.updates
    }

    /// Number of states this agent has materialized
    pub fn states_known(&self) -> usize {
        self.table.len()
    }

    pub fn q_value(&self, state: &str, action: usize) -> f64 {
        self.table.value(state, action)
    }

    /// Deep copy of the agent's table
    pub fn get_model(&self) -> ActionValueTable {
        self.table.clone()
    }

    /// Replace the agent's table with a deep copy of `table`
    pub fn set_model(&mut self, table: &ActionValueTable) -> FedResult<()> {
        if table.num_actions() != self.num_actions() {
            return Err(FedError::ActionSpaceMismatch {
                expected: self.num_actions(),
                found: table.num_actions(),
            });
        }
        self.table = table.clone();
        Ok(())
    }

    pub fn set_inference_mode(&mut self, enabled: bool) {
        self.inference_mode = enabled;
    }

    pub fn is_inference_mode(&self) -> bool {
        self.inference_mode
    }

    /// Forget everything learned and restore the initial exploration rate
    pub fn reset(&mut self) {
        self.table.clear();
        self.exploration_rate = self.initial_exploration_rate;
        self.updates = 0;
    }

    /// Apply new hyperparameters without touching the learned table.
    ///
    /// The current ε is only lowered here, never raised, and the floor is
    /// capped at the current ε so later decays stay non-increasing.
    pub fn update_hyperparameters(&mut self, config: &AgentConfig) {
        self.learning_rate = config.learning_rate;
        self.discount_factor = config.discount_factor;
        self.exploration_decay = config.exploration_decay;
        self.initial_exploration_rate = config.exploration_rate;
        self.exploration_rate = self.exploration_rate.min(config.exploration_rate);
        self.min_exploration_rate = config.min_exploration_rate.min(self.exploration_rate);
    }
}

impl Policy for QLearningAgent {
    fn select_action(&mut self, state: &str) -> usize {
        self.choose_action(state)
    }
}
