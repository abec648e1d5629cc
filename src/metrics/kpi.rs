// KPI definitions: named per-step measurements kept apart from the reward
// A failing compute function is logged and counted as zero for that step

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// How the per-step values of a KPI are reduced at the end of an episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiAggregation {
    Sum,
    Average,
    Max,
    Min,
    Last,
    First,
    /// Number of steps with a non-zero value
    CountNonZero,
    /// Share of steps with a non-zero value, in percent
    Percentage,
}

impl KpiAggregation {
    /// Reduce a list of per-step values; an empty list reduces to 0
    pub fn reduce(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }

        match self {
            KpiAggregation::Sum => values.iter().sum(),
            KpiAggregation::Average => values.iter().sum::<f64>() / values.len() as f64,
            KpiAggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            KpiAggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            KpiAggregation::Last => values[values.len() - 1],
            KpiAggregation::First => values[0],
            KpiAggregation::CountNonZero => count_non_zero(values) as f64,
            KpiAggregation::Percentage => {
                count_non_zero(values) as f64 / values.len() as f64 * 100.0
            }
        }
    }
}

fn count_non_zero(values: &[f64]) -> usize {
    values.iter().filter(|v| **v != 0.0).count()
}

/// Per-state KPI computation
pub type KpiFn<S> = Arc<dyn Fn(&S) -> anyhow::Result<f64> + Send + Sync>;

/// A named, domain-meaningful measurement evaluated at every step
pub struct KpiDefinition<S> {
    pub name: String,
    pub aggregation: KpiAggregation,
    compute: KpiFn<S>,
}

impl<S> KpiDefinition<S> {
    pub fn new<F>(name: impl Into<String>, aggregation: KpiAggregation, compute: F) -> Self
    where
        F: Fn(&S) -> anyhow::Result<f64> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            aggregation,
            compute: Arc::new(compute),
        }
    }

    /// Evaluate the KPI; errors and non-finite results count as 0
    pub fn evaluate(&self, state: &S) -> f64 {
        match (self.compute)(state) {
            Ok(value) if value.is_finite() => value,
            Ok(value) => {
                warn!("KPI '{}' produced non-finite value {}, using 0", self.name, value);
                0.0
            }
            Err(e) => {
                warn!("KPI '{}' failed to compute: {:#}, using 0", self.name, e);
                0.0
            }
        }
    }
}

impl<S> Clone for KpiDefinition<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            aggregation: self.aggregation,
            compute: Arc::clone(&self.compute),
        }
    }
}

impl<S> fmt::Debug for KpiDefinition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KpiDefinition")
            .field("name", &self.name)
            .field("aggregation", &self.aggregation)
            .finish()
    }
}
