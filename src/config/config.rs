use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ErrorExt, FedError, FedResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of independent clients trained in parallel
    pub num_clients: usize,
    /// Hard cap on steps per training episode
    pub max_steps_per_episode: usize,
    /// Base seed; client `i` uses `seed + i`. `None` seeds from the OS
    pub seed: Option<u64>,
    /// Period of the background tick loop
    pub tick_interval_ms: u64,
    pub agent: AgentConfig,
    pub federation: FederationConfig,
    pub evaluation: EvaluationConfig,
    pub metrics: MetricsConfig,
    pub render: RenderConfig,
    pub persistence: PersistenceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_clients: 4,
            max_steps_per_episode: 200,
            seed: None,
            tick_interval_ms: 16,
            agent: AgentConfig::default(),
            federation: FederationConfig::default(),
            evaluation: EvaluationConfig::default(),
            metrics: MetricsConfig::default(),
            render: RenderConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub learning_rate: f64,
    pub discount_factor: f64,
    pub exploration_rate: f64,
    pub exploration_decay: f64,
    pub min_exploration_rate: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount_factor: 0.9,
            exploration_rate: 0.2,
            exploration_decay: 0.995,
            min_exploration_rate: 0.05,
        }
    }
}

/// When the coordinator decides to aggregate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerStrategy {
    /// Every `interval` episodes of average client progress
    EpisodeCount { interval: usize },
    /// When the relative reward improvement between two consecutive windows
    /// drops below `threshold`
    PerformancePlateau { window: usize, threshold: f64 },
}

impl Default for TriggerStrategy {
    fn default() -> Self {
        TriggerStrategy::EpisodeCount { interval: 10 }
    }
}

/// How client tables are weighted during FedAvg
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AggregationWeighting {
    #[default]
    Uniform,
    /// Proportional to each client's completed episodes
    EpisodeCount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    pub auto_federate: bool,
    pub trigger: TriggerStrategy,
    pub weighting: AggregationWeighting,
    /// Capacity of the recent-reward history used by the plateau trigger
    pub history_capacity: usize,
    /// Number of past rounds kept for reporting
    pub max_round_log: usize,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            auto_federate: true,
            trigger: TriggerStrategy::default(),
            weighting: AggregationWeighting::default(),
            history_capacity: 100,
            max_round_log: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub episodes: usize,
    /// Step cap per evaluation episode
    pub max_steps: usize,
    /// Pause between evaluation steps, for paced rendering
    pub step_delay_ms: u64,
    /// Render every n-th evaluation step; 0 disables
    pub render_every: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            episodes: 100,
            max_steps: 500,
            step_delay_ms: 0,
            render_every: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub record_trajectory: bool,
    /// Size of the rolling windows in per-client statistics
    pub stats_window: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            record_trajectory: false,
            stats_window: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Render every n-th training tick; 0 disables
    pub every_n_ticks: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { every_n_ticks: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub directory: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            directory: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("fedrl"),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> FedResult<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let content = std::fs::read_to_string(path)
            .map_err(|e| FedError::io_error(e, Some(path)))?;

        let config: EngineConfig = match ext {
            "json" => serde_json::from_str(&content)?,
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "toml" => toml::from_str(&content)?,
            _ => {
                return Err(FedError::configuration(format!(
                    "Unsupported config format: {}",
                    ext
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> FedResult<()> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let content = match ext {
            "json" => serde_json::to_string_pretty(self)?,
            "yaml" | "yml" => serde_yaml::to_string(self)?,
            "toml" => toml::to_string(self)?,
            _ => {
                return Err(FedError::configuration(format!(
                    "Unsupported config format: {}",
                    ext
                )))
            }
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }
        std::fs::write(path, content).map_err(|e| FedError::io_error(e, Some(path)))?;
        Ok(())
    }

    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fedrl")
            .join("config.json")
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> FedResult<()> {
        if self.num_clients == 0 {
            return Err(FedError::configuration("num_clients must be at least 1"));
        }
        if self.max_steps_per_episode == 0 {
            return Err(FedError::configuration(
                "max_steps_per_episode must be at least 1",
            ));
        }
        if self.evaluation.max_steps == 0 {
            return Err(FedError::configuration(
                "evaluation.max_steps must be at least 1",
            ));
        }

        let agent = &self.agent;
        check_unit_range("agent.learning_rate", agent.learning_rate)?;
        check_unit_range("agent.discount_factor", agent.discount_factor)?;
        check_unit_range("agent.exploration_rate", agent.exploration_rate)?;
        check_unit_range("agent.exploration_decay", agent.exploration_decay)?;
        check_unit_range("agent.min_exploration_rate", agent.min_exploration_rate)?;
        if agent.min_exploration_rate > agent.exploration_rate {
            return Err(FedError::configuration(
                "agent.min_exploration_rate cannot exceed agent.exploration_rate",
            ));
        }

        match self.federation.trigger {
            TriggerStrategy::EpisodeCount { interval } if interval == 0 => {
                return Err(FedError::configuration(
                    "federation.trigger.interval must be at least 1",
                ));
            }
            TriggerStrategy::PerformancePlateau { window, .. } => {
                if window == 0 {
                    return Err(FedError::configuration(
                        "federation.trigger.window must be at least 1",
                    ));
                }
                if window * 2 > self.federation.history_capacity {
                    return Err(FedError::configuration(format!(
                        "federation.history_capacity ({}) must hold two windows of {}",
                        self.federation.history_capacity, window
                    )));
                }
            }
            _ => {}
        }

        Ok(())
    }
}

fn check_unit_range(name: &str, value: f64) -> FedResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(FedError::configuration(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}
