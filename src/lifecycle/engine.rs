// Federated engine: the tick loop, federation rounds and the training/inference switch
// Every table is touched only from `&mut self`, so a tick and an aggregation never overlap

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AgentConfig, EngineConfig, TriggerStrategy};
use crate::error::{FedError, FedResult};
use crate::federation::{
    fed_avg, AggregationOutcome, FederationCoordinator, FederationProgress, FederationRound,
    RoundCause,
};
use crate::lifecycle::client::Client;
use crate::lifecycle::evaluation::{EvaluationObserver, EvaluationResult, EvaluationRunner};
use crate::lifecycle::mode::EngineMode;
use crate::metrics::{MetricsEngine, PopulationSummary};
use crate::persistence::{ModelMetadata, PersistencePort, StoredModel};
use crate::reinforcement::{
    validate_environment, ActionValueTable, Environment, QLearningAgent, Renderer,
};

/// What one training tick did
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick: u64,
    /// Clients whose episode ended during this tick
    pub episodes_completed: usize,
    /// Set when the tick triggered a federation round
    pub round: Option<FederationRound>,
}

/// Snapshot of the engine for display and reporting
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub run_id: Uuid,
    pub mode: EngineMode,
    pub ticks: u64,
    pub round: u64,
    pub auto_federation: bool,
    pub trigger: &'static str,
    /// Training clients, including a population parked during inference
    pub population: PopulationSummary,
    pub avg_epsilon: f64,
    /// States known to the largest table in use
    pub states_known: usize,
    pub last_round: Option<FederationRound>,
    /// `(completed, requested)` of the current or last evaluation
    pub evaluation_progress: (usize, usize),
    pub last_evaluation: Option<EvaluationResult>,
}

/// Owns the client population of one run and everything it needs
pub struct FederatedEngine<E: Environment> {
    config: EngineConfig,
    env: E,
    num_actions: usize,
    metrics: MetricsEngine<E::Observation>,
    store: Arc<dyn PersistencePort>,
    renderer: Option<Arc<dyn Renderer<E::Observation>>>,
    mode: EngineMode,
    clients: Vec<Client<E::Observation>>,
    /// Population parked while a frozen agent runs
    stashed: Option<Vec<Client<E::Observation>>>,
    frozen: Option<QLearningAgent>,
    coordinator: FederationCoordinator,
    evaluation: EvaluationRunner,
    ticks: u64,
    run_id: Uuid,
    last_evaluation: Option<EvaluationResult>,
}

impl<E: Environment> FederatedEngine<E> {
    /// Validate the configuration and the task, then build the population.
    ///
    /// An invalid configuration or task is fatal: no engine is created.
    pub async fn new(
        config: EngineConfig,
        env: E,
        metrics: MetricsEngine<E::Observation>,
        store: Arc<dyn PersistencePort>,
    ) -> FedResult<Self> {
        config.validate()?;
        let num_actions = validate_environment(&env)?;

        let metrics = if config.metrics.record_trajectory {
            metrics.with_trajectory(true)
        } else {
            metrics
        };

        let mut engine = Self {
            coordinator: FederationCoordinator::new(&config.federation),
            config,
            env,
            num_actions,
            metrics,
            store,
            renderer: None,
            mode: EngineMode::Training,
            clients: Vec::new(),
            stashed: None,
            frozen: None,
            evaluation: EvaluationRunner::new(),
            ticks: 0,
            run_id: Uuid::new_v4(),
            last_evaluation: None,
        };
        engine.clients = engine.build_population(None).await;

        info!(
            run_id = %engine.run_id,
            clients = engine.clients.len(),
            actions = num_actions,
            trigger = engine.coordinator.trigger_name(),
            "Federated engine ready"
        );
        Ok(engine)
    }

    /// Attach a renderer; it only observes
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer<E::Observation>>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    async fn build_population(
        &self,
        initial: Option<&ActionValueTable>,
    ) -> Vec<Client<E::Observation>> {
        let mut clients = Vec::with_capacity(self.config.num_clients);
        for id in 0..self.config.num_clients {
            let seed = self.config.seed.map(|s| s.wrapping_add(id as u64));
            let mut agent = QLearningAgent::new(self.num_actions, &self.config.agent, seed);
            if let Some(table) = initial {
                if let Err(e) = agent.set_model(table) {
                    warn!("Client {} starts empty: {}", id, e);
                }
            }
            let observation = self.env.reset(id, None).await;
            clients.push(Client::new(
                id,
                agent,
                observation,
                self.metrics.init(),
                self.config.metrics.stats_window,
            ));
        }
        clients
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Period for a background tick loop
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.config.tick_interval_ms)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    /// Active training clients; empty during inference
    pub fn clients(&self) -> &[Client<E::Observation>] {
        &self.clients
    }

    pub fn frozen_agent(&self) -> Option<&QLearningAgent> {
        self.frozen.as_ref()
    }

    pub fn coordinator(&self) -> &FederationCoordinator {
        &self.coordinator
    }

    pub fn last_evaluation(&self) -> Option<&EvaluationResult> {
        self.last_evaluation.as_ref()
    }

    /// Average progress of the active population
    pub fn progress(&self) -> FederationProgress {
        let total = self.clients.iter().map(Client::episodes).sum();
        FederationProgress::new(self.clients.len(), total)
    }

    /// Advance every client by exactly one step.
    ///
    /// All steps are joined before any learning happens, and the trigger is
    /// checked only once the whole population has advanced. Returns `None`
    /// outside training.
    pub async fn tick(&mut self) -> FedResult<Option<TickReport>> {
        if !self.mode.is_training() {
            return Ok(None);
        }

        let env = &self.env;
        let choices: Vec<(String, usize)> = self
            .clients
            .iter_mut()
            .map(|client| {
                let state = env.get_state(&client.observation);
                let action = client.agent.choose_action(&state);
                (state, action)
            })
            .collect();

        let outcomes = join_all(
            self.clients
                .iter()
                .zip(&choices)
                .map(|(client, (_, action))| env.step(&client.observation, *action)),
        )
        .await;

        let max_steps = self.config.max_steps_per_episode;
        let mut finished = Vec::new();
        for (index, (client, ((state, action), outcome))) in self
            .clients
            .iter_mut()
            .zip(choices.into_iter().zip(outcomes))
            .enumerate()
        {
            let next_state = env.get_state(&outcome.observation);
            client.agent.learn(&state, action, outcome.reward, &next_state);
            self.metrics
                .step(&mut client.episode, &outcome.observation, action, outcome.reward);
            client.observation = outcome.observation;

            if outcome.done || client.episode.steps >= max_steps {
                finished.push(index);
            }
        }

        for &index in &finished {
            let client = &mut self.clients[index];
            let data = std::mem::replace(&mut client.episode, self.metrics.init());
            let outcome = self.metrics.finalize(data, &client.observation).outcome();

            client.stats.record(&outcome);
            client.agent.decay_epsilon();
            self.coordinator.record_reward(outcome.total_reward);

            debug!(
                client = client.id,
                episode = client.stats.episodes,
                reward = outcome.total_reward,
                steps = outcome.steps,
                epsilon = client.agent.epsilon(),
                "Episode finished"
            );
        }

        let clients = &self.clients;
        let fresh = join_all(finished.iter().map(|&index| {
            let client = &clients[index];
            env.reset(client.id, Some(&client.observation))
        }))
        .await;
        for (&index, observation) in finished.iter().zip(fresh) {
            self.clients[index].observation = observation;
        }

        self.ticks += 1;
        self.render_clients();

        let progress = self.progress();
        let round = if self.coordinator.should_trigger(&progress) {
            Some(self.federate_with(RoundCause::Automatic)?.round)
        } else {
            None
        };

        Ok(Some(TickReport {
            tick: self.ticks,
            episodes_completed: finished.len(),
            round,
        }))
    }

    fn render_clients(&self) {
        let Some(renderer) = &self.renderer else {
            return;
        };
        let every = self.config.render.every_n_ticks;
        if every == 0 || self.ticks % every != 0 {
            return;
        }
        for client in &self.clients {
            renderer.render(&client.observation, &client.info());
        }
    }

    /// Run a round over the active clients without touching their tables
    fn aggregate_population(&mut self, cause: RoundCause) -> FedResult<AggregationOutcome> {
        let tables: Vec<ActionValueTable> =
            self.clients.iter().map(|c| c.agent.get_model()).collect();
        let episodes: Vec<usize> = self.clients.iter().map(Client::episodes).collect();
        let progress = self.progress();

        self.coordinator
            .aggregate(&tables, &episodes, &progress, cause)
    }

    /// Aggregate the active clients and push the result back into each of them
    fn federate_with(&mut self, cause: RoundCause) -> FedResult<AggregationOutcome> {
        let outcome = self.aggregate_population(cause)?;
        for client in &mut self.clients {
            client.agent.set_model(&outcome.table)?;
        }
        Ok(outcome)
    }

    /// Run a federation round now, regardless of the trigger
    pub fn federate(&mut self) -> FedResult<FederationRound> {
        if !self.mode.is_training() {
            return Err(FedError::invalid_mode("federate", self.mode));
        }
        Ok(self.federate_with(RoundCause::Manual)?.round)
    }

    pub fn set_auto_federation(&mut self, enabled: bool) {
        self.coordinator.set_auto_federation(enabled);
        self.config.federation.auto_federate = enabled;
    }

    pub fn set_trigger(&mut self, strategy: TriggerStrategy) -> FedResult<()> {
        let mut candidate = self.config.clone();
        candidate.federation.trigger = strategy;
        candidate.validate()?;
        self.coordinator.set_trigger(strategy);
        self.config = candidate;
        Ok(())
    }

    /// Apply new hyperparameters to every client, parked ones included
    pub fn update_agent_config(&mut self, agent: AgentConfig) -> FedResult<()> {
        let mut candidate = self.config.clone();
        candidate.agent = agent;
        candidate.validate()?;

        for client in self
            .clients
            .iter_mut()
            .chain(self.stashed.iter_mut().flatten())
        {
            client.agent.update_hyperparameters(&candidate.agent);
        }
        self.config = candidate;
        Ok(())
    }

    fn model_metadata(&self, table: &ActionValueTable) -> ModelMetadata {
        ModelMetadata::for_table(table)
            .with("round", self.coordinator.round())
            .with("runId", self.run_id.to_string())
            .with("clients", self.config.num_clients)
            .with("actions", self.env.actions().to_vec())
    }

    /// Freeze the population into a single greedy agent.
    ///
    /// The aggregated table is persisted through the store; a failed save is
    /// logged and does not block the switch.
    pub fn enter_inference(&mut self) -> FedResult<()> {
        if self.mode.is_inference() {
            return Err(FedError::invalid_mode("enter_inference", self.mode));
        }

        // parked clients keep their own tables
        let table = match self.aggregate_population(RoundCause::Freeze) {
            Ok(outcome) => outcome.table,
            Err(e) => {
                crate::log_warn!(e, "Aggregation failed, freezing the first client's table");
                self.clients
                    .first()
                    .map(|c| c.agent.get_model())
                    .unwrap_or_else(|| ActionValueTable::new(self.num_actions))
            }
        };

        let metadata = self.model_metadata(&table);
        if !self.store.save(&table, &metadata) {
            warn!("Failed to persist the frozen model; continuing with the in-memory copy");
        }

        info!(
            states = table.len(),
            round = self.coordinator.round(),
            "Switched to inference"
        );
        self.stashed = Some(std::mem::take(&mut self.clients));
        self.frozen = Some(QLearningAgent::frozen(table));
        self.mode = EngineMode::Inference;
        Ok(())
    }

    /// Resume training with the parked population, or a fresh one seeded
    /// from the frozen table when nothing was parked
    pub async fn enter_training(&mut self) -> FedResult<()> {
        if self.mode.is_training() {
            return Err(FedError::invalid_mode("enter_training", self.mode));
        }

        self.evaluation.cancel();
        self.clients = match self.stashed.take() {
            Some(clients) => clients,
            None => {
                let initial = self.frozen.as_ref().map(QLearningAgent::get_model);
                self.build_population(initial.as_ref()).await
            }
        };
        self.frozen = None;
        self.mode = EngineMode::Training;

        info!(clients = self.clients.len(), "Switched to training");
        Ok(())
    }

    /// Token that cancels the running evaluation at its next episode boundary
    pub fn evaluation_token(&mut self) -> CancellationToken {
        self.evaluation.token()
    }

    /// Evaluate the frozen agent over `config.evaluation.episodes` episodes
    pub async fn run_evaluation(
        &mut self,
        observer: &mut dyn EvaluationObserver,
    ) -> FedResult<EvaluationResult> {
        if !self.mode.is_inference() {
            self.evaluation.reset();
            return Err(FedError::invalid_mode("run_evaluation", self.mode));
        }
        let Some(agent) = self.frozen.as_mut() else {
            self.evaluation.reset();
            return Err(FedError::evaluation("no frozen model available"));
        };

        let result = self
            .evaluation
            .run(
                &self.env,
                agent,
                &self.metrics,
                &self.config.evaluation,
                self.renderer.as_deref(),
                observer,
            )
            .await?;
        self.last_evaluation = Some(result.clone());
        Ok(result)
    }

    /// The table the engine would persist right now: the frozen table during
    /// inference, otherwise an aggregate of the clients without starting a round
    pub fn current_model(&self) -> FedResult<ActionValueTable> {
        if let Some(agent) = &self.frozen {
            return Ok(agent.get_model());
        }
        let tables: Vec<ActionValueTable> =
            self.clients.iter().map(|c| c.agent.get_model()).collect();
        let episodes: Vec<usize> = self.clients.iter().map(Client::episodes).collect();
        let weights = self.coordinator.weights_for(&episodes);
        fed_avg(&tables, weights.as_deref())
    }

    pub fn save_model(&self) -> FedResult<bool> {
        let table = self.current_model()?;
        Ok(self.store.save(&table, &self.model_metadata(&table)))
    }

    pub fn export_model(&self) -> FedResult<bool> {
        let table = self.current_model()?;
        Ok(self.store.export(&table, &self.model_metadata(&table)))
    }

    /// Install the stored working copy
    pub fn load_model(&mut self) -> FedResult<()> {
        let stored = self
            .store
            .load()
            .ok_or_else(|| FedError::persistence("no valid stored model available"))?;
        self.install_model(stored)
    }

    /// Install an externally supplied model
    pub async fn import_model(&mut self) -> FedResult<()> {
        let stored = self.store.import().await?;
        self.install_model(stored)
    }

    /// Replace the frozen table and the parked clients' tables during
    /// inference, or every client's table during training
    pub fn install_model(&mut self, stored: StoredModel) -> FedResult<()> {
        let table = stored.table;
        if table.num_actions() != self.num_actions {
            return Err(FedError::ActionSpaceMismatch {
                expected: self.num_actions,
                found: table.num_actions(),
            });
        }

        info!(
            version = %stored.version,
            states = table.len(),
            mode = %self.mode,
            "Installing model"
        );
        match self.mode {
            EngineMode::Inference => {
                // training resumes from the installed table
                for client in self.stashed.iter_mut().flatten() {
                    client.agent.set_model(&table)?;
                }
                self.frozen = Some(QLearningAgent::frozen(table));
            }
            EngineMode::Training => {
                for client in &mut self.clients {
                    client.agent.set_model(&table)?;
                }
            }
        }
        Ok(())
    }

    /// Start over: fresh population and federation state, back in training
    pub async fn reset(&mut self) {
        self.evaluation.cancel();
        self.evaluation.reset();
        self.coordinator.reset();
        self.stashed = None;
        self.frozen = None;
        self.mode = EngineMode::Training;
        self.ticks = 0;
        self.last_evaluation = None;
        self.run_id = Uuid::new_v4();
        self.clients = self.build_population(None).await;

        info!(run_id = %self.run_id, "Engine reset");
    }

    pub fn status(&self) -> EngineStatus {
        let avg_epsilon = if self.clients.is_empty() {
            0.0
        } else {
            self.clients
                .iter()
                .map(|c| c.agent.effective_epsilon())
                .sum::<f64>()
                / self.clients.len() as f64
        };

        let states_known = match &self.frozen {
            Some(agent) => agent.states_known(),
            None => self
                .clients
                .iter()
                .map(|c| c.agent.states_known())
                .max()
                .unwrap_or(0),
        };

        EngineStatus {
            run_id: self.run_id,
            mode: self.mode,
            ticks: self.ticks,
            round: self.coordinator.round(),
            auto_federation: self.coordinator.is_auto_federation(),
            trigger: self.coordinator.trigger_name(),
            population: PopulationSummary::from_stats(
                self.clients
                    .iter()
                    .chain(self.stashed.iter().flatten())
                    .map(|c| &c.stats),
            ),
            avg_epsilon,
            states_known,
            last_round: self.coordinator.last_round().cloned(),
            evaluation_progress: self.evaluation.progress(),
            last_evaluation: self.last_evaluation.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{serialize_model, MemoryStore};
    use crate::reinforcement::StepOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// start -> branch -> end. Clients 0 and 1 pass through "a", the others
    /// through "b"; leaving the branch pays 1.
    struct Branches {
        actions: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Position {
        client: usize,
        depth: u8,
    }

    #[async_trait]
    impl Environment for Branches {
        type Observation = Position;

        fn actions(&self) -> &[String] {
            &self.actions
        }

        fn get_state(&self, observation: &Position) -> String {
            match observation.depth {
                0 => "start".to_string(),
                1 if observation.client < 2 => "a".to_string(),
                1 => "b".to_string(),
                _ => "end".to_string(),
            }
        }

        async fn step(&self, observation: &Position, _action: usize) -> StepOutcome<Position> {
            let next = Position {
                client: observation.client,
                depth: observation.depth + 1,
            };
            let reward = if observation.depth == 1 { 1.0 } else { 0.0 };
            let done = next.depth >= 2;
            StepOutcome::new(next, reward, done)
        }

        async fn reset(&self, client_id: usize, _previous: Option<&Position>) -> Position {
            Position {
                client: client_id,
                depth: 0,
            }
        }
    }

    /// One-step episodes whose steps resolve in reverse client order.
    /// Tracks how many steps were pending at once.
    struct Staggered {
        actions: Vec<String>,
        clients: usize,
        pending: AtomicUsize,
        peak_pending: AtomicUsize,
    }

    #[derive(Debug, Clone)]
    struct Slot {
        client: usize,
        finished: bool,
    }

    impl Staggered {
        fn new(clients: usize) -> Self {
            Self {
                actions: vec!["stay".to_string(), "go".to_string()],
                clients,
                pending: AtomicUsize::new(0),
                peak_pending: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Environment for Staggered {
        type Observation = Slot;

        fn actions(&self) -> &[String] {
            &self.actions
        }

        fn get_state(&self, slot: &Slot) -> String {
            if slot.finished {
                "finished".to_string()
            } else {
                format!("c{}", slot.client)
            }
        }

        async fn step(&self, slot: &Slot, _action: usize) -> StepOutcome<Slot> {
            let now = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_pending.fetch_max(now, Ordering::SeqCst);
            let delay = (self.clients - slot.client) as u64 * 3;
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            self.pending.fetch_sub(1, Ordering::SeqCst);

            let next = Slot {
                client: slot.client,
                finished: true,
            };
            StepOutcome::new(next, 1.0, true)
        }

        async fn reset(&self, client_id: usize, _previous: Option<&Slot>) -> Slot {
            tokio::task::yield_now().await;
            Slot {
                client: client_id,
                finished: false,
            }
        }
    }

    fn branches() -> Branches {
        Branches {
            actions: vec!["left".to_string(), "right".to_string()],
        }
    }

    fn test_config(clients: usize) -> EngineConfig {
        let mut config = EngineConfig {
            num_clients: clients,
            max_steps_per_episode: 50,
            seed: Some(7),
            ..EngineConfig::default()
        };
        config.agent.exploration_rate = 0.0;
        config.agent.min_exploration_rate = 0.0;
        config.federation.auto_federate = false;
        config.evaluation.episodes = 5;
        config.evaluation.max_steps = 10;
        config
    }

    async fn engine(config: EngineConfig, store: Arc<MemoryStore>) -> FederatedEngine<Branches> {
        FederatedEngine::new(config, branches(), MetricsEngine::new(), store)
            .await
            .unwrap()
    }

    async fn run_ticks(engine: &mut FederatedEngine<Branches>, ticks: usize) {
        for _ in 0..ticks {
            engine.tick().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_setup() {
        let store = Arc::new(MemoryStore::new());

        let empty = Branches { actions: vec![] };
        let err = FederatedEngine::new(test_config(2), empty, MetricsEngine::new(), store.clone())
            .await
            .err()
            .unwrap();
        assert!(err.is_fatal());

        let err = FederatedEngine::new(test_config(0), branches(), MetricsEngine::new(), store)
            .await
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_tick_advances_every_client_once() {
        let mut engine = engine(test_config(3), Arc::new(MemoryStore::new())).await;

        let report = engine.tick().await.unwrap().unwrap();
        assert_eq!(report.tick, 1);
        assert_eq!(report.episodes_completed, 0);
        assert!(engine.clients().iter().all(|c| c.observation.depth == 1));
        assert!(engine.clients().iter().all(|c| c.episode.steps == 1));

        let report = engine.tick().await.unwrap().unwrap();
        assert_eq!(report.episodes_completed, 3);
        // finished episodes were reset within the same tick
        assert!(engine.clients().iter().all(|c| c.observation.depth == 0));
        assert!(engine.clients().iter().all(|c| c.episodes() == 1));
        assert_eq!(engine.progress().avg_episodes, 1.0);
    }

    #[tokio::test]
    async fn test_two_branch_scenario_attenuates_by_uniform_weighting() {
        let mut engine = engine(test_config(4), Arc::new(MemoryStore::new())).await;
        run_ticks(&mut engine, 20).await;

        let local_a = engine.clients()[0].agent.q_value("a", 0);
        let local_b = engine.clients()[3].agent.q_value("b", 0);
        assert!(local_a > 0.5);
        assert!(local_b > 0.5);
        assert_eq!(engine.clients()[3].agent.q_value("a", 0), 0.0);

        let round = engine.federate().unwrap();
        assert_eq!(round.round, 1);

        let global = engine.clients()[0].agent.get_model();
        assert!(global.contains("a"));
        assert!(global.contains("b"));
        assert!((global.value("a", 0) - local_a / 2.0).abs() < 1e-12);
        assert!((global.value("b", 0) - local_b / 2.0).abs() < 1e-12);
        assert!(global.value("a", 0) < local_a);

        // every client now holds the same table
        assert!(engine.clients().iter().all(|c| c.agent.get_model() == global));
    }

    #[tokio::test]
    async fn test_auto_federation_fires_on_interval() {
        let mut config = test_config(2);
        config.federation.auto_federate = true;
        config.federation.trigger = TriggerStrategy::EpisodeCount { interval: 2 };
        let mut engine = engine(config, Arc::new(MemoryStore::new())).await;

        let mut rounds = Vec::new();
        for _ in 0..8 {
            let report = engine.tick().await.unwrap().unwrap();
            if let Some(round) = report.round {
                rounds.push((report.tick, round.round));
            }
        }
        // two-step episodes: two episodes per client every four ticks
        assert_eq!(rounds, vec![(4, 1), (8, 2)]);

        engine.set_auto_federation(false);
        run_ticks(&mut engine, 4).await;
        assert_eq!(engine.coordinator().round(), 2);
    }

    #[tokio::test]
    async fn test_inference_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(test_config(2), store.clone()).await;
        run_ticks(&mut engine, 10).await;

        engine.enter_inference().unwrap();
        assert_eq!(engine.mode(), EngineMode::Inference);
        assert!(engine.clients().is_empty());
        assert!(engine.tick().await.unwrap().is_none());

        let saved = store.load().unwrap();
        let frozen = engine.frozen_agent().unwrap().get_model();
        assert_eq!(saved.table, frozen);
        assert_eq!(saved.metadata.extra["round"], 1);

        let result = engine.run_evaluation(&mut ()).await.unwrap();
        assert_eq!(result.completed, 5);
        assert_eq!(result.avg_reward, 1.0);
        assert_eq!(result.std_reward, 0.0);
        assert_eq!(result.success_rate, 1.0);
        assert_eq!(result.consistency, 1.0);

        // evaluation never changes the frozen table
        assert_eq!(engine.frozen_agent().unwrap().get_model(), frozen);

        engine.enter_training().await.unwrap();
        assert_eq!(engine.mode(), EngineMode::Training);
        assert!(engine.frozen_agent().is_none());
        assert!(engine.clients().iter().all(|c| c.episodes() == 5));
        assert_eq!(engine.status().round, 1);
    }

    #[tokio::test]
    async fn test_tick_joins_deferred_steps_before_learning() {
        let mut config = test_config(3);
        config.federation.auto_federate = true;
        config.federation.trigger = TriggerStrategy::EpisodeCount { interval: 1 };
        let mut engine = FederatedEngine::new(
            config,
            Staggered::new(3),
            MetricsEngine::new(),
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();

        let report = engine.tick().await.unwrap().unwrap();
        // every step was in flight at the same time
        assert_eq!(engine.env().peak_pending.load(Ordering::SeqCst), 3);
        assert_eq!(engine.env().pending.load(Ordering::SeqCst), 0);
        assert_eq!(report.episodes_completed, 3);

        // the trigger saw the whole population after it advanced
        let round = report.round.unwrap();
        assert_eq!(round.clients, 3);
        assert_eq!(round.avg_episodes, 1.0);

        // each client's update reached the aggregate, then every client was reset
        let global = engine.clients()[0].agent.get_model();
        for id in 0..3 {
            assert!((global.value(&format!("c{}", id), 0) - 0.1 / 3.0).abs() < 1e-12);
        }
        assert!(engine.clients().iter().all(|c| !c.observation.finished));
    }

    #[tokio::test]
    async fn test_plateau_trigger_fires_from_ticks() {
        let mut config = test_config(2);
        config.federation.auto_federate = true;
        config.federation.trigger = TriggerStrategy::PerformancePlateau {
            window: 2,
            threshold: 0.01,
        };
        config.federation.history_capacity = 10;
        let mut engine = engine(config, Arc::new(MemoryStore::new())).await;
        assert_eq!(engine.coordinator().trigger_name(), "performance_plateau");

        let mut rounds = Vec::new();
        for _ in 0..8 {
            let report = engine.tick().await.unwrap().unwrap();
            if let Some(round) = report.round {
                rounds.push((report.tick, round.round));
            }
        }
        // every episode pays 1, so two windows of two rewards are flat by tick 4;
        // the history restarts after each round
        assert_eq!(rounds, vec![(4, 1), (8, 2)]);
        assert!(engine.coordinator().state().reward_history.is_empty());
    }

    #[tokio::test]
    async fn test_freeze_keeps_individual_tables() {
        let mut engine = engine(test_config(4), Arc::new(MemoryStore::new())).await;
        run_ticks(&mut engine, 10).await;

        let before: Vec<ActionValueTable> =
            engine.clients().iter().map(|c| c.agent.get_model()).collect();
        assert_ne!(before[0], before[3]);

        engine.enter_inference().unwrap();
        let frozen = engine.frozen_agent().unwrap().get_model();
        assert!(frozen.contains("a") && frozen.contains("b"));

        engine.enter_training().await.unwrap();
        let after: Vec<ActionValueTable> =
            engine.clients().iter().map(|c| c.agent.get_model()).collect();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_model_installed_during_inference_survives_enter_training() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(test_config(2), store.clone()).await;
        run_ticks(&mut engine, 4).await;
        engine.enter_inference().unwrap();

        let marker =
            ActionValueTable::from_rows(2, [("marker".to_string(), vec![7.0, 7.0])]).unwrap();
        store.queue_import(serialize_model(&marker, &ModelMetadata::default()).unwrap());
        engine.import_model().await.unwrap();
        assert_eq!(engine.frozen_agent().unwrap().get_model(), marker);

        engine.enter_training().await.unwrap();
        assert!(engine
            .clients()
            .iter()
            .all(|c| c.agent.q_value("marker", 0) == 7.0));
        // the parked clients keep their episode history
        assert!(engine.clients().iter().all(|c| c.episodes() == 2));
    }

    #[tokio::test]
    async fn test_mode_guards() {
        let mut engine = engine(test_config(1), Arc::new(MemoryStore::new())).await;

        let err = engine.run_evaluation(&mut ()).await.unwrap_err();
        assert!(matches!(err, FedError::InvalidMode { .. }));
        assert_eq!(engine.status().evaluation_progress, (0, 0));
        assert!(engine.enter_training().await.is_err());

        engine.enter_inference().unwrap();
        assert!(engine.enter_inference().is_err());
        assert!(matches!(engine.federate(), Err(FedError::InvalidMode { .. })));
    }

    #[tokio::test]
    async fn test_import_checks_action_space() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(test_config(2), store.clone()).await;

        let wide = ActionValueTable::from_rows(3, [("a".to_string(), vec![1.0, 2.0, 3.0])]).unwrap();
        store.queue_import(serialize_model(&wide, &ModelMetadata::default()).unwrap());
        assert!(matches!(
            engine.import_model().await,
            Err(FedError::ActionSpaceMismatch { expected: 2, found: 3 })
        ));

        let fitting = ActionValueTable::from_rows(2, [("a".to_string(), vec![4.0, 0.0])]).unwrap();
        store.queue_import(serialize_model(&fitting, &ModelMetadata::default()).unwrap());
        engine.import_model().await.unwrap();
        assert!(engine.clients().iter().all(|c| c.agent.q_value("a", 0) == 4.0));

        assert!(matches!(engine.import_model().await, Err(FedError::Persistence { .. })));
    }

    #[tokio::test]
    async fn test_save_and_load_model() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(test_config(2), store.clone()).await;
        assert!(engine.load_model().is_err());

        run_ticks(&mut engine, 4).await;
        assert!(engine.save_model().unwrap());
        assert!(engine.export_model().unwrap());
        assert_eq!(store.export_count(), 1);
        // saving does not start a round
        assert_eq!(engine.coordinator().round(), 0);

        engine.enter_inference().unwrap();
        engine.load_model().unwrap();
        assert!(engine.frozen_agent().unwrap().states_known() > 0);
    }

    #[tokio::test]
    async fn test_update_agent_config_validates() {
        let mut engine = engine(test_config(2), Arc::new(MemoryStore::new())).await;
        let bad = AgentConfig {
            learning_rate: 1.5,
            ..AgentConfig::default()
        };
        assert!(engine.update_agent_config(bad).is_err());

        let good = AgentConfig {
            learning_rate: 0.5,
            exploration_rate: 0.0,
            min_exploration_rate: 0.0,
            ..AgentConfig::default()
        };
        engine.update_agent_config(good).unwrap();
        assert!(engine.clients().iter().all(|c| c.agent.learning_rate() == 0.5));
    }

    #[tokio::test]
    async fn test_reset_starts_over() {
        let mut engine = engine(test_config(2), Arc::new(MemoryStore::new())).await;
        let first_run = engine.run_id();
        run_ticks(&mut engine, 6).await;
        engine.federate().unwrap();
        engine.enter_inference().unwrap();

        engine.reset().await;
        let status = engine.status();
        assert_eq!(status.mode, EngineMode::Training);
        assert_eq!(status.ticks, 0);
        assert_eq!(status.round, 0);
        assert_eq!(status.population.total_episodes, 0);
        assert_eq!(status.states_known, 0);
        assert_ne!(engine.run_id(), first_run);
    }
}
