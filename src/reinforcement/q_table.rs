// Sparse action-value table keyed by discretized state
// Rows are materialized lazily: an absent state reads as a zero vector

use std::collections::{BTreeMap, HashMap};

use crate::error::{FedError, FedResult};

/// Mapping from state key to one value per action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionValueTable {
    num_actions: usize,
    rows: HashMap<String, Vec<f64>>,
}

impl ActionValueTable {
    /// Create an empty table for `num_actions` actions
    pub fn new(num_actions: usize) -> Self {
        Self {
            num_actions,
            rows: HashMap::new(),
        }
    }

    /// Build a table from existing rows, rejecting rows of the wrong width
    pub fn from_rows(
        num_actions: usize,
        rows: impl IntoIterator<Item = (String, Vec<f64>)>,
    ) -> FedResult<Self> {
        let mut table = Self::new(num_actions);
        for (key, values) in rows {
            table.insert(key, values)?;
        }
        Ok(table)
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    /// Number of materialized states
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, state: &str) -> bool {
        self.rows.contains_key(state)
    }

    /// Read a row without materializing it
    pub fn get(&self, state: &str) -> Option<&[f64]> {
        self.rows.get(state).map(Vec::as_slice)
    }

    /// Value of one entry; absent rows and out-of-range actions read as zero
    pub fn value(&self, state: &str, action: usize) -> f64 {
        self.rows
            .get(state)
            .and_then(|row| row.get(action))
            .copied()
            .unwrap_or(0.0)
    }

    /// Materialize the row for `state` and return it
    pub fn row(&mut self, state: &str) -> &[f64] {
        self.row_mut(state)
    }

    /// Materialize the row for `state` and return it mutably
    pub fn row_mut(&mut self, state: &str) -> &mut Vec<f64> {
        let num_actions = self.num_actions;
        self.rows
            .entry(state.to_string())
            .or_insert_with(|| vec![0.0; num_actions])
    }

    /// Largest value in the (materialized) row for `state`
    pub fn max_value(&mut self, state: &str) -> f64 {
        let row = self.row(state);
        if row.is_empty() {
            return 0.0;
        }
        row.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Index of the best action for `state`; ties go to the lowest index
    pub fn best_action(&mut self, state: &str) -> usize {
        argmax(self.row(state))
    }

    /// Insert or replace a row
    pub fn insert(&mut self, state: impl Into<String>, values: Vec<f64>) -> FedResult<()> {
        if values.len() != self.num_actions {
            return Err(FedError::ActionSpaceMismatch {
                expected: self.num_actions,
                found: values.len(),
            });
        }
        self.rows.insert(state.into(), values);
        Ok(())
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.rows.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<f64>)> {
        self.rows.iter()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Sorted copy of the rows, used for stable serialization
    pub fn to_sorted_map(&self) -> BTreeMap<String, Vec<f64>> {
        self.rows
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Index of the maximum value, first occurrence wins
pub fn argmax(values: &[f64]) -> usize {
    let mut best_index = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best_value {
            best_value = v;
            best_index = i;
        }
    }
    best_index
}
