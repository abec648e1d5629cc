// Federated averaging over client Q-tables

use std::collections::BTreeSet;

use crate::error::{FedError, FedResult};
use crate::reinforcement::ActionValueTable;

/// Weighted average of client tables (FedAvg).
///
/// The output holds the union of all input states. A client that never saw
/// a state contributes zeros for it; weights are neither dropped nor
/// renormalized per state. Without explicit weights every client gets `1/n`.
pub fn fed_avg(
    tables: &[ActionValueTable],
    weights: Option<&[f64]>,
) -> FedResult<ActionValueTable> {
    let first = tables.first().ok_or(FedError::EmptyAggregation)?;
    let num_actions = first.num_actions();

    if let Some(mismatch) = tables.iter().find(|t| t.num_actions() != num_actions) {
        return Err(FedError::ActionSpaceMismatch {
            expected: num_actions,
            found: mismatch.num_actions(),
        });
    }

    let uniform;
    let weights = match weights {
        Some(w) if w.len() != tables.len() => {
            return Err(FedError::WeightMismatch {
                tables: tables.len(),
                weights: w.len(),
            })
        }
        Some(w) => w,
        None => {
            uniform = vec![1.0 / tables.len() as f64; tables.len()];
            &uniform
        }
    };

    let states: BTreeSet<&String> = tables.iter().flat_map(|t| t.keys()).collect();

    let mut aggregated = ActionValueTable::new(num_actions);
    for state in states {
        let mut row = vec![0.0; num_actions];
        for (table, &weight) in tables.iter().zip(weights) {
            if let Some(values) = table.get(state) {
                for (acc, value) in row.iter_mut().zip(values) {
                    *acc += weight * value;
                }
            }
        }
        aggregated.insert(state.clone(), row)?;
    }

    Ok(aggregated)
}

/// Weights proportional to `counts`; uniform when every count is zero
pub fn proportional_weights(counts: &[usize]) -> Vec<f64> {
    let total: usize = counts.iter().sum();
    if total == 0 {
        let n = counts.len().max(1) as f64;
        return vec![1.0 / n; counts.len()];
    }
    counts
        .iter()
        .map(|&c| c as f64 / total as f64)
        .collect()
}
