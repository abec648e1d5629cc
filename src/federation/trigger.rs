// Auto-federation trigger strategies
// A trigger only reads coordinator state; the coordinator owns every mutation

use std::fmt;

use crate::config::TriggerStrategy;
use crate::federation::coordinator::FederationState;

/// Client progress observed at the end of a tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FederationProgress {
    pub clients: usize,
    pub total_episodes: usize,
    /// Average completed episodes per client
    pub avg_episodes: f64,
}

impl FederationProgress {
    pub fn new(clients: usize, total_episodes: usize) -> Self {
        let avg_episodes = if clients == 0 {
            0.0
        } else {
            total_episodes as f64 / clients as f64
        };
        Self {
            clients,
            total_episodes,
            avg_episodes,
        }
    }
}

/// Decides when the coordinator should aggregate
pub trait FederationTrigger: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn should_trigger(&self, state: &FederationState, progress: &FederationProgress) -> bool;
}

/// Bucket index of an average episode count for a given interval
pub fn episode_bucket(avg_episodes: f64, interval: usize) -> u64 {
    if interval == 0 || !avg_episodes.is_finite() || avg_episodes <= 0.0 {
        return 0;
    }
    (avg_episodes / interval as f64).floor() as u64
}

/// Fires once per `interval` episodes of average client progress.
///
/// Comparing buckets instead of exact counts keeps it firing at most once per
/// interval even when clients finish episodes at different rates.
#[derive(Debug, Clone, Copy)]
pub struct EpisodeCountTrigger {
    pub interval: usize,
}

impl FederationTrigger for EpisodeCountTrigger {
    fn name(&self) -> &'static str {
        "episode_count"
    }

    fn should_trigger(&self, state: &FederationState, progress: &FederationProgress) -> bool {
        episode_bucket(progress.avg_episodes, self.interval)
            > episode_bucket(state.last_avg_episodes, self.interval)
    }
}

/// Relative change from `previous` to `recent`; absolute change near zero
pub fn relative_improvement(recent: f64, previous: f64) -> f64 {
    if previous.abs() < 1e-9 {
        recent - previous
    } else {
        (recent - previous) / previous.abs()
    }
}

/// Fires when local learning stops improving meaningfully
#[derive(Debug, Clone, Copy)]
pub struct PerformancePlateauTrigger {
    pub window: usize,
    pub threshold: f64,
}

impl FederationTrigger for PerformancePlateauTrigger {
    fn name(&self) -> &'static str {
        "performance_plateau"
    }

    fn should_trigger(&self, state: &FederationState, _progress: &FederationProgress) -> bool {
        let history = &state.reward_history;
        let (Some(recent), Some(previous)) = (
            history.mean_of_slice(0, self.window),
            history.mean_of_slice(self.window, self.window),
        ) else {
            return false;
        };

        relative_improvement(recent, previous) < self.threshold
    }
}

/// Build the trigger selected in the configuration
pub fn build_trigger(strategy: TriggerStrategy) -> Box<dyn FederationTrigger> {
    match strategy {
        TriggerStrategy::EpisodeCount { interval } => Box::new(EpisodeCountTrigger { interval }),
        TriggerStrategy::PerformancePlateau { window, threshold } => {
            Box::new(PerformancePlateauTrigger { window, threshold })
        }
    }
}
