// Episode accumulation: per-step KPI values, trajectory and the final record
// Success and summaries are derived from KPIs and final state, not from learning

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::metrics::kpi::KpiDefinition;

/// One recorded transition
#[derive(Debug, Clone)]
pub struct TrajectoryStep<S> {
    pub step: usize,
    pub state: S,
    pub action: usize,
    pub reward: f64,
}

/// Running accumulators of an episode in progress
#[derive(Debug, Clone)]
pub struct EpisodeData<S> {
    pub steps: usize,
    pub total_reward: f64,
    pub kpi_values: BTreeMap<String, Vec<f64>>,
    pub trajectory: Vec<TrajectoryStep<S>>,
}

impl<S> EpisodeData<S> {
    /// Values recorded so far for one KPI
    pub fn kpi(&self, name: &str) -> &[f64] {
        self.kpi_values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A finished episode
#[derive(Debug, Clone)]
pub struct EpisodeRecord<S> {
    pub steps: usize,
    pub total_reward: f64,
    pub kpi_values: BTreeMap<String, Vec<f64>>,
    pub trajectory: Vec<TrajectoryStep<S>>,
    pub success: bool,
    /// Each KPI reduced with its aggregation
    pub kpis: BTreeMap<String, f64>,
    /// Caller-defined summary metrics
    pub summary: BTreeMap<String, f64>,
}

/// Serializable view of an episode without per-step data
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EpisodeOutcome {
    pub steps: usize,
    pub total_reward: f64,
    pub success: bool,
    pub kpis: BTreeMap<String, f64>,
    pub summary: BTreeMap<String, f64>,
}

impl<S> EpisodeRecord<S> {
    pub fn outcome(&self) -> EpisodeOutcome {
        EpisodeOutcome {
            steps: self.steps,
            total_reward: self.total_reward,
            success: self.success,
            kpis: self.kpis.clone(),
            summary: self.summary.clone(),
        }
    }
}

/// Decides whether a finished episode counts as a success
pub type SuccessPredicate<S> = Arc<dyn Fn(&S, &EpisodeData<S>) -> bool + Send + Sync>;

/// Named metric derived from the whole episode
pub type SummaryFn<S> = Arc<dyn Fn(&EpisodeData<S>, &S) -> f64 + Send + Sync>;

/// KPI engine shared by every client of a run
pub struct MetricsEngine<S> {
    kpis: Vec<KpiDefinition<S>>,
    success: SuccessPredicate<S>,
    summaries: Vec<(String, SummaryFn<S>)>,
    record_trajectory: bool,
}

impl<S: Clone> MetricsEngine<S> {
    /// No KPIs, success when the total reward is positive
    pub fn new() -> Self {
        Self {
            kpis: Vec::new(),
            success: Arc::new(|_: &S, data: &EpisodeData<S>| data.total_reward > 0.0),
            summaries: Vec::new(),
            record_trajectory: false,
        }
    }

    pub fn with_kpi(mut self, kpi: KpiDefinition<S>) -> Self {
        self.kpis.push(kpi);
        self
    }

    pub fn with_success<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&S, &EpisodeData<S>) -> bool + Send + Sync + 'static,
    {
        self.success = Arc::new(predicate);
        self
    }

    pub fn with_summary<F>(mut self, name: impl Into<String>, summary: F) -> Self
    where
        F: Fn(&EpisodeData<S>, &S) -> f64 + Send + Sync + 'static,
    {
        self.summaries.push((name.into(), Arc::new(summary)));
        self
    }

    pub fn with_trajectory(mut self, record: bool) -> Self {
        self.record_trajectory = record;
        self
    }

    pub fn kpis(&self) -> &[KpiDefinition<S>] {
        &self.kpis
    }

    /// Empty accumulators for a new episode
    pub fn init(&self) -> EpisodeData<S> {
        EpisodeData {
            steps: 0,
            total_reward: 0.0,
            kpi_values: self
                .kpis
                .iter()
                .map(|kpi| (kpi.name.clone(), Vec::new()))
                .collect(),
            trajectory: Vec::new(),
        }
    }

    /// Record one transition ending in `state`
    pub fn step(&self, data: &mut EpisodeData<S>, state: &S, action: usize, reward: f64) {
        for kpi in &self.kpis {
            let value = kpi.evaluate(state);
            data.kpi_values
                .entry(kpi.name.clone())
                .or_default()
                .push(value);
        }

        if self.record_trajectory {
            data.trajectory.push(TrajectoryStep {
                step: data.steps,
                state: state.clone(),
                action,
                reward,
            });
        }

        data.steps += 1;
        data.total_reward += reward;
    }

    /// Reduce KPIs, decide success and compute summaries
    pub fn finalize(&self, data: EpisodeData<S>, final_state: &S) -> EpisodeRecord<S> {
        let kpis = self
            .kpis
            .iter()
            .map(|kpi| (kpi.name.clone(), kpi.aggregation.reduce(data.kpi(&kpi.name))))
            .collect();

        let success = (self.success)(final_state, &data);

        let summary = self
            .summaries
            .iter()
            .map(|(name, f)| (name.clone(), f(&data, final_state)))
            .collect();

        EpisodeRecord {
            steps: data.steps,
            total_reward: data.total_reward,
            kpi_values: data.kpi_values,
            trajectory: data.trajectory,
            success,
            kpis,
            summary,
        }
    }
}

impl<S: Clone> Default for MetricsEngine<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for MetricsEngine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsEngine")
            .field("kpis", &self.kpis)
            .field(
                "summaries",
                &self.summaries.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field("record_trajectory", &self.record_trajectory)
            .finish()
    }
}
