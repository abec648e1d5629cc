// Round-over-round change of the aggregated model

use serde::Serialize;
use std::collections::BTreeSet;

use crate::reinforcement::ActionValueTable;

/// A state counts as changed when one of its entries moved more than this
pub const CHANGE_EPSILON: f64 = 1e-3;

/// Average per-state change below which the model is considered converged
pub const CONVERGENCE_THRESHOLD: f64 = 0.01;

/// Comparison of two consecutive aggregated tables
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ModelDelta {
    /// Distinct states in the union of both tables
    pub total_states: usize,
    /// States whose largest entry change exceeds `CHANGE_EPSILON`
    pub states_changed: usize,
    /// Sum of absolute entry changes divided by `total_states`
    pub avg_delta: f64,
    /// Largest absolute change of a single entry
    pub max_delta: f64,
    pub converged: bool,
}

impl ModelDelta {
    /// Share of states that changed, in `[0, 1]`
    pub fn change_ratio(&self) -> f64 {
        if self.total_states == 0 {
            0.0
        } else {
            self.states_changed as f64 / self.total_states as f64
        }
    }
}

/// Compare `old` and `new` over the union of their states.
///
/// Missing rows read as zeros. The average is taken per distinct state, not
/// per entry, so the convergence threshold bounds the mean L1 change of a
/// state's action vector. Two empty tables are trivially converged.
pub fn compute_delta(old: &ActionValueTable, new: &ActionValueTable) -> ModelDelta {
    let states: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let num_actions = old.num_actions().max(new.num_actions());

    let mut sum = 0.0;
    let mut max_delta: f64 = 0.0;
    let mut states_changed = 0;

    for state in &states {
        let mut state_max: f64 = 0.0;
        for action in 0..num_actions {
            let diff = (new.value(state, action) - old.value(state, action)).abs();
            sum += diff;
            state_max = state_max.max(diff);
        }
        max_delta = max_delta.max(state_max);
        if state_max > CHANGE_EPSILON {
            states_changed += 1;
        }
    }

    let total_states = states.len();
    let avg_delta = if total_states == 0 {
        0.0
    } else {
        sum / total_states as f64
    };

    ModelDelta {
        total_states,
        states_changed,
        avg_delta,
        max_delta,
        converged: avg_delta < CONVERGENCE_THRESHOLD,
    }
}
