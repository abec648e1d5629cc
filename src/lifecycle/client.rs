// One federated client: an agent, its current observation and episode accumulators

use crate::metrics::{ClientStats, EpisodeData};
use crate::reinforcement::{ClientInfo, QLearningAgent};

/// A learner and the episode it is currently playing
#[derive(Debug, Clone)]
pub struct Client<O> {
    pub id: usize,
    pub agent: QLearningAgent,
    /// Observation the next action is chosen from
    pub observation: O,
    /// Accumulators of the episode in progress
    pub episode: EpisodeData<O>,
    pub stats: ClientStats,
}

impl<O> Client<O> {
    pub fn new(
        id: usize,
        agent: QLearningAgent,
        observation: O,
        episode: EpisodeData<O>,
        stats_window: usize,
    ) -> Self {
        Self {
            id,
            agent,
            observation,
            episode,
            stats: ClientStats::new(stats_window),
        }
    }

    /// Completed episodes
    pub fn episodes(&self) -> usize {
        self.stats.episodes
    }

    /// Snapshot handed to renderers
    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            client_id: self.id,
            episode: self.stats.episodes,
            step: self.episode.steps,
            epsilon: self.agent.effective_epsilon(),
            episode_reward: self.episode.total_reward,
            inference: self.agent.is_inference_mode(),
        }
    }
}
