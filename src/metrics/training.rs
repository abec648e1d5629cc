// Rolling per-client statistics and population-level summaries

use serde::Serialize;
use std::collections::VecDeque;

use crate::metrics::episode::EpisodeOutcome;

/// Fixed-capacity window of the most recent values
#[derive(Debug, Clone, Default)]
pub struct RollingWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a value, dropping the oldest once full
    pub fn push(&mut self, value: f64) {
        if self.capacity == 0 {
            return;
        }
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
        }
    }

    /// Mean of the `count` values that end `offset` values before the newest.
    /// `None` when the window does not hold enough values.
    pub fn mean_of_slice(&self, offset: usize, count: usize) -> Option<f64> {
        if count == 0 || self.values.len() < offset + count {
            return None;
        }
        let end = self.values.len() - offset;
        let sum: f64 = self.values.range(end - count..end).sum();
        Some(sum / count as f64)
    }

    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }
}

/// Training statistics of one client
#[derive(Debug, Clone)]
pub struct ClientStats {
    pub episodes: usize,
    pub total_steps: usize,
    pub last_reward: Option<f64>,
    pub best_reward: Option<f64>,
    rewards: RollingWindow,
    successes: RollingWindow,
    pub last_outcome: Option<EpisodeOutcome>,
}

impl ClientStats {
    pub fn new(window: usize) -> Self {
        Self {
            episodes: 0,
            total_steps: 0,
            last_reward: None,
            best_reward: None,
            rewards: RollingWindow::new(window),
            successes: RollingWindow::new(window),
            last_outcome: None,
        }
    }

    /// Account for a finished episode
    pub fn record(&mut self, outcome: &EpisodeOutcome) {
        self.episodes += 1;
        self.total_steps += outcome.steps;
        self.last_reward = Some(outcome.total_reward);
        self.best_reward = Some(match self.best_reward {
            Some(best) => best.max(outcome.total_reward),
            None => outcome.total_reward,
        });
        self.rewards.push(outcome.total_reward);
        self.successes.push(if outcome.success { 1.0 } else { 0.0 });
        self.last_outcome = Some(outcome.clone());
    }

    /// Mean reward over the rolling window
    pub fn avg_reward(&self) -> f64 {
        self.rewards.mean().unwrap_or(0.0)
    }

    /// Success share over the rolling window
    pub fn success_rate(&self) -> f64 {
        self.successes.mean().unwrap_or(0.0)
    }
}

/// Aggregate view over all clients
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PopulationSummary {
    pub clients: usize,
    pub total_episodes: usize,
    pub avg_episodes: f64,
    pub total_steps: usize,
    pub avg_reward: f64,
    pub success_rate: f64,
    pub best_reward: Option<f64>,
}

impl PopulationSummary {
    pub fn from_stats<'a>(stats: impl IntoIterator<Item = &'a ClientStats>) -> Self {
        let mut clients = 0;
        let mut total_episodes = 0;
        let mut total_steps = 0;
        let mut reward_sum = 0.0;
        let mut success_sum = 0.0;
        let mut best_reward: Option<f64> = None;

        for s in stats {
            clients += 1;
            total_episodes += s.episodes;
            total_steps += s.total_steps;
            reward_sum += s.avg_reward();
            success_sum += s.success_rate();
            if let Some(best) = s.best_reward {
                best_reward = Some(best_reward.map_or(best, |b| b.max(best)));
            }
        }

        let denom = clients.max(1) as f64;
        Self {
            clients,
            total_episodes,
            avg_episodes: total_episodes as f64 / denom,
            total_steps,
            avg_reward: reward_sum / denom,
            success_rate: success_sum / denom,
            best_reward,
        }
    }
}
