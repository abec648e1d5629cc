// Statistical evaluation of a frozen policy
// Episodes run sequentially; cancellation is honoured between episodes only

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::EvaluationConfig;
use crate::error::{FedError, FedResult};
use crate::metrics::{EpisodeOutcome, MetricsEngine};
use crate::reinforcement::{ClientInfo, Environment, Policy, Renderer};

/// Below this absolute average reward consistency is reported as 0
const CONSISTENCY_MIN_AVG: f64 = 0.01;

/// Reported after every finished evaluation episode
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationProgress<'a> {
    pub completed: usize,
    pub requested: usize,
    pub last: &'a EpisodeOutcome,
    /// Statistics over the episodes completed so far, without the outcomes
    pub partial: EvaluationResult,
}

/// Statistics over the completed episodes of one evaluation
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct EvaluationResult {
    pub requested: usize,
    pub completed: usize,
    pub cancelled: bool,
    pub avg_reward: f64,
    /// Population standard deviation of episode rewards
    pub std_reward: f64,
    pub min_reward: f64,
    pub max_reward: f64,
    pub success_rate: f64,
    /// `max(0, 1 - std/|avg|)`, 0 when the average is near zero
    pub consistency: f64,
    pub avg_steps: f64,
    pub kpi_averages: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<EpisodeOutcome>,
}

/// Receives evaluation progress; every method defaults to doing nothing
pub trait EvaluationObserver: Send {
    fn on_episode(&mut self, _progress: &EvaluationProgress<'_>) {}

    fn on_complete(&mut self, _result: &EvaluationResult) {}
}

impl EvaluationObserver for () {}

/// Compute evaluation statistics from finished episodes
pub fn summarize(requested: usize, outcomes: Vec<EpisodeOutcome>, cancelled: bool) -> EvaluationResult {
    let mut result = statistics(requested, &outcomes, cancelled);
    result.outcomes = outcomes;
    result
}

/// Statistics over `outcomes`; the result carries no outcome list
fn statistics(requested: usize, outcomes: &[EpisodeOutcome], cancelled: bool) -> EvaluationResult {
    let completed = outcomes.len();
    if completed == 0 {
        return EvaluationResult {
            requested,
            cancelled,
            ..EvaluationResult::default()
        };
    }

    let n = completed as f64;
    let rewards: Vec<f64> = outcomes.iter().map(|o| o.total_reward).collect();
    let avg_reward = rewards.iter().sum::<f64>() / n;
    let variance = rewards.iter().map(|r| (r - avg_reward).powi(2)).sum::<f64>() / n;
    let std_reward = variance.sqrt();

    let consistency = if avg_reward.abs() > CONSISTENCY_MIN_AVG {
        (1.0 - std_reward / avg_reward.abs()).max(0.0)
    } else {
        0.0
    };

    let mut kpi_sums: BTreeMap<String, f64> = BTreeMap::new();
    for outcome in outcomes {
        for (name, value) in &outcome.kpis {
            *kpi_sums.entry(name.clone()).or_default() += value;
        }
    }
    let kpi_averages = kpi_sums
        .into_iter()
        .map(|(name, sum)| (name, sum / n))
        .collect();

    EvaluationResult {
        requested,
        completed,
        cancelled,
        avg_reward,
        std_reward,
        min_reward: rewards.iter().copied().fold(f64::INFINITY, f64::min),
        max_reward: rewards.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        success_rate: outcomes.iter().filter(|o| o.success).count() as f64 / n,
        consistency,
        avg_steps: outcomes.iter().map(|o| o.steps as f64).sum::<f64>() / n,
        kpi_averages,
        outcomes: Vec::new(),
    }
}

/// Runs evaluations and tracks the progress of the current one
#[derive(Debug, Default)]
pub struct EvaluationRunner {
    requested: usize,
    completed: usize,
    token: CancellationToken,
}

impl EvaluationRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(completed, requested)` of the current or last run
    pub fn progress(&self) -> (usize, usize) {
        (self.completed, self.requested)
    }

    /// Token that cancels the next or current run; a cancelled token is
    /// replaced so a new run can start
    pub fn token(&mut self) -> CancellationToken {
        if self.token.is_cancelled() {
            self.token = CancellationToken::new();
        }
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Clear counters after a failed start
    pub fn reset(&mut self) {
        self.requested = 0;
        self.completed = 0;
    }

    /// Play `config.episodes` episodes with `policy`, starting each from a
    /// fresh observation for client 0.
    pub async fn run<E, P>(
        &mut self,
        env: &E,
        policy: &mut P,
        metrics: &MetricsEngine<E::Observation>,
        config: &EvaluationConfig,
        renderer: Option<&dyn Renderer<E::Observation>>,
        observer: &mut dyn EvaluationObserver,
    ) -> FedResult<EvaluationResult>
    where
        E: Environment + ?Sized,
        P: Policy + Send + ?Sized,
    {
        if config.max_steps == 0 {
            self.reset();
            return Err(FedError::evaluation("max_steps must be at least 1"));
        }

        let token = self.token();
        self.requested = config.episodes;
        self.completed = 0;

        info!("Starting evaluation of {} episodes", config.episodes);

        let mut outcomes = Vec::with_capacity(config.episodes);
        let mut cancelled = false;

        for episode in 0..config.episodes {
            if token.is_cancelled() {
                cancelled = true;
                info!(
                    "Evaluation cancelled after {} of {} episodes",
                    self.completed, config.episodes
                );
                break;
            }

            let mut observation = env.reset(0, None).await;
            let mut data = metrics.init();
            let mut done = false;

            while !done && data.steps < config.max_steps {
                let state = env.get_state(&observation);
                let action = policy.select_action(&state);
                let outcome = env.step(&observation, action).await;

                metrics.step(&mut data, &outcome.observation, action, outcome.reward);
                observation = outcome.observation;
                done = outcome.done;

                if let Some(renderer) = renderer {
                    if config.render_every > 0 && data.steps % config.render_every == 0 {
                        let info = ClientInfo {
                            client_id: 0,
                            episode,
                            step: data.steps,
                            epsilon: 0.0,
                            episode_reward: data.total_reward,
                            inference: true,
                        };
                        renderer.render(&observation, &info);
                    }
                }

                if config.step_delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(config.step_delay_ms)).await;
                }
            }

            let outcome = metrics.finalize(data, &observation).outcome();
            debug!(
                episode,
                reward = outcome.total_reward,
                steps = outcome.steps,
                success = outcome.success,
                "Evaluation episode finished"
            );

            self.completed += 1;
            outcomes.push(outcome);
            if let Some(last) = outcomes.last() {
                observer.on_episode(&EvaluationProgress {
                    completed: self.completed,
                    requested: config.episodes,
                    last,
                    partial: statistics(config.episodes, &outcomes, false),
                });
            }
        }

        let result = summarize(config.episodes, outcomes, cancelled);
        info!(
            completed = result.completed,
            avg_reward = result.avg_reward,
            std_reward = result.std_reward,
            success_rate = result.success_rate,
            consistency = result.consistency,
            "Evaluation finished"
        );
        observer.on_complete(&result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reinforcement::StepOutcome;
    use async_trait::async_trait;

    fn outcome(reward: f64, success: bool, steps: usize) -> EpisodeOutcome {
        EpisodeOutcome {
            steps,
            total_reward: reward,
            success,
            kpis: BTreeMap::from([("score".to_string(), reward * 2.0)]),
            summary: BTreeMap::new(),
        }
    }

    #[test]
    fn test_summarize_statistics() {
        let result = summarize(
            4,
            vec![
                outcome(2.0, true, 10),
                outcome(4.0, true, 20),
                outcome(4.0, false, 30),
                outcome(6.0, true, 40),
            ],
            false,
        );

        assert_eq!(result.completed, 4);
        assert_eq!(result.avg_reward, 4.0);
        // population std of [2, 4, 4, 6]
        assert!((result.std_reward - 2.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(result.success_rate, 0.75);
        assert!((result.consistency - (1.0 - 2.0_f64.sqrt() / 4.0)).abs() < 1e-12);
        assert_eq!(result.min_reward, 2.0);
        assert_eq!(result.max_reward, 6.0);
        assert_eq!(result.avg_steps, 25.0);
        assert_eq!(result.kpi_averages["score"], 8.0);
    }

    #[test]
    fn test_consistency_clamps_and_zero_average() {
        let spread = summarize(2, vec![outcome(-1.0, false, 1), outcome(3.0, true, 1)], false);
        // avg 1, std 2
        assert_eq!(spread.consistency, 0.0);

        let zero = summarize(2, vec![outcome(-1.0, false, 1), outcome(1.0, true, 1)], false);
        assert_eq!(zero.avg_reward, 0.0);
        assert_eq!(zero.consistency, 0.0);

        let identical = summarize(3, vec![outcome(5.0, true, 1); 3], false);
        assert_eq!(identical.std_reward, 0.0);
        assert_eq!(identical.consistency, 1.0);
    }

    #[test]
    fn test_summarize_nothing_completed() {
        let result = summarize(10, Vec::new(), true);
        assert_eq!(result.requested, 10);
        assert_eq!(result.completed, 0);
        assert!(result.cancelled);
        assert_eq!(result.avg_reward, 0.0);
    }

    /// Counts up by the chosen action; finishes at 3 with reward 1 per step
    struct Counter {
        actions: Vec<String>,
    }

    #[async_trait]
    impl Environment for Counter {
        type Observation = u32;

        fn actions(&self) -> &[String] {
            &self.actions
        }

        fn get_state(&self, observation: &u32) -> String {
            observation.to_string()
        }

        async fn step(&self, observation: &u32, action: usize) -> StepOutcome<u32> {
            let next = observation + action as u32;
            StepOutcome::new(next, 1.0, next >= 3)
        }

        async fn reset(&self, _client_id: usize, _previous: Option<&u32>) -> u32 {
            0
        }
    }

    /// Always picks the same action
    struct Fixed(usize);

    impl Policy for Fixed {
        fn select_action(&mut self, _state: &str) -> usize {
            self.0
        }
    }

    #[derive(Default)]
    struct Recorder {
        episodes: Vec<usize>,
        /// `(avg_reward, std_reward, success_rate)` after each episode
        partials: Vec<(f64, f64, f64)>,
        completed: Option<usize>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl EvaluationObserver for Recorder {
        fn on_episode(&mut self, progress: &EvaluationProgress<'_>) {
            self.episodes.push(progress.completed);
            assert_eq!(progress.partial.completed, progress.completed);
            assert!(progress.partial.outcomes.is_empty());
            self.partials.push((
                progress.partial.avg_reward,
                progress.partial.std_reward,
                progress.partial.success_rate,
            ));
            if let Some((after, token)) = &self.cancel_after {
                if progress.completed == *after {
                    token.cancel();
                }
            }
        }

        fn on_complete(&mut self, result: &EvaluationResult) {
            self.completed = Some(result.completed);
        }
    }

    fn counter() -> Counter {
        Counter {
            actions: vec!["stay".to_string(), "up".to_string()],
        }
    }

    fn config(episodes: usize, max_steps: usize) -> EvaluationConfig {
        EvaluationConfig {
            episodes,
            max_steps,
            ..EvaluationConfig::default()
        }
    }

    #[tokio::test]
    async fn test_run_reports_every_episode() {
        let mut runner = EvaluationRunner::new();
        let mut recorder = Recorder::default();
        let result = runner
            .run(
                &counter(),
                &mut Fixed(1),
                &MetricsEngine::new(),
                &config(3, 50),
                None,
                &mut recorder,
            )
            .await
            .unwrap();

        assert_eq!(result.completed, 3);
        assert_eq!(result.avg_steps, 3.0);
        assert_eq!(result.avg_reward, 3.0);
        assert_eq!(result.success_rate, 1.0);
        assert_eq!(recorder.episodes, vec![1, 2, 3]);
        assert_eq!(recorder.completed, Some(3));
        assert_eq!(runner.progress(), (3, 3));
    }

    /// Ends at 2 after one step; reward is the action, success needs a positive reward
    struct Alternating {
        actions: Vec<String>,
    }

    #[async_trait]
    impl Environment for Alternating {
        type Observation = u32;

        fn actions(&self) -> &[String] {
            &self.actions
        }

        fn get_state(&self, observation: &u32) -> String {
            observation.to_string()
        }

        async fn step(&self, _observation: &u32, action: usize) -> StepOutcome<u32> {
            StepOutcome::new(2, action as f64 * 4.0, true)
        }

        async fn reset(&self, _client_id: usize, _previous: Option<&u32>) -> u32 {
            0
        }
    }

    /// Cycles through a fixed list of actions, one per call
    struct Script(Vec<usize>, usize);

    impl Policy for Script {
        fn select_action(&mut self, _state: &str) -> usize {
            let action = self.0[self.1 % self.0.len()];
            self.1 += 1;
            action
        }
    }

    #[tokio::test]
    async fn test_progress_carries_running_statistics() {
        let env = Alternating {
            actions: vec!["zero".to_string(), "four".to_string()],
        };
        let mut runner = EvaluationRunner::new();
        let mut recorder = Recorder::default();
        let result = runner
            .run(
                &env,
                &mut Script(vec![1, 0, 1, 1], 0),
                &MetricsEngine::new(),
                &config(4, 10),
                None,
                &mut recorder,
            )
            .await
            .unwrap();

        // rewards 4, 0, 4, 4
        let expected = [
            (4.0, 0.0, 1.0),
            (2.0, 2.0, 0.5),
            (8.0 / 3.0, (32.0_f64 / 9.0).sqrt(), 2.0 / 3.0),
            (3.0, 3.0_f64.sqrt(), 0.75),
        ];
        assert_eq!(recorder.partials.len(), expected.len());
        for (got, want) in recorder.partials.iter().zip(expected) {
            assert!((got.0 - want.0).abs() < 1e-12);
            assert!((got.1 - want.1).abs() < 1e-12);
            assert!((got.2 - want.2).abs() < 1e-12);
        }
        assert_eq!(result.avg_reward, 3.0);
        assert_eq!(result.outcomes.len(), 4);
    }

    #[tokio::test]
    async fn test_step_cap_ends_episodes() {
        let mut runner = EvaluationRunner::new();
        let result = runner
            .run(
                &counter(),
                &mut Fixed(0),
                &MetricsEngine::new(),
                &config(2, 7),
                None,
                &mut (),
            )
            .await
            .unwrap();
        assert_eq!(result.completed, 2);
        assert_eq!(result.avg_steps, 7.0);
    }

    #[tokio::test]
    async fn test_cancellation_stops_at_episode_boundary() {
        let mut runner = EvaluationRunner::new();
        let token = runner.token();
        let mut recorder = Recorder {
            cancel_after: Some((2, token)),
            ..Recorder::default()
        };

        let result = runner
            .run(
                &counter(),
                &mut Fixed(1),
                &MetricsEngine::new(),
                &config(10, 50),
                None,
                &mut recorder,
            )
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.completed, 2);
        assert_eq!(recorder.completed, Some(2));

        // a cancelled token does not block the next run
        let result = runner
            .run(
                &counter(),
                &mut Fixed(1),
                &MetricsEngine::new(),
                &config(1, 50),
                None,
                &mut (),
            )
            .await
            .unwrap();
        assert!(!result.cancelled);
        assert_eq!(result.completed, 1);
    }

    #[tokio::test]
    async fn test_invalid_config_resets_counters() {
        let mut runner = EvaluationRunner::new();
        runner
            .run(&counter(), &mut Fixed(1), &MetricsEngine::new(), &config(2, 5), None, &mut ())
            .await
            .unwrap();
        assert_eq!(runner.progress(), (2, 2));

        let err = runner
            .run(&counter(), &mut Fixed(1), &MetricsEngine::new(), &config(2, 0), None, &mut ())
            .await
            .unwrap_err();
        assert!(matches!(err, FedError::Evaluation { .. }));
        assert_eq!(runner.progress(), (0, 0));
    }
}
