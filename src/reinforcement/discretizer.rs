// State discretization for tabular Q-learning
// Maps continuous observations onto bounded bucket indices and composite keys

/// Separator used between per-dimension buckets in a composite state key
pub const KEY_SEPARATOR: &str = "_";

/// Map a continuous value to a bucket in `[0, bins - 1]`.
///
/// Out-of-range values saturate at the nearest edge bucket instead of failing.
/// A degenerate range (`max <= min`), zero bins or a NaN input map to bucket 0.
pub fn discretize(value: f64, bins: usize, min: f64, max: f64) -> usize {
    if bins == 0 || max <= min || value.is_nan() {
        return 0;
    }

    let normalized = (value - min) / (max - min);
    let scaled = (normalized * bins as f64).floor();

    if scaled <= 0.0 {
        0
    } else if scaled >= (bins - 1) as f64 {
        bins - 1
    } else {
        scaled as usize
    }
}

/// Discretize every dimension and join the buckets into one composite key.
///
/// Order is preserved, so the key layout is defined by the task that chooses
/// the order of `values`. Extra entries in longer slices are ignored.
pub fn discretize_state(values: &[f64], bins: &[usize], mins: &[f64], maxs: &[f64]) -> String {
    values
        .iter()
        .zip(bins)
        .zip(mins.iter().zip(maxs))
        .map(|((&value, &bins), (&min, &max))| discretize(value, bins, min, max).to_string())
        .collect::<Vec<_>>()
        .join(KEY_SEPARATOR)
}

/// One dimension of an observation space
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub bins: usize,
    pub min: f64,
    pub max: f64,
}

/// Reusable uniform-grid discretizer over a fixed set of dimensions
#[derive(Debug, Clone, Default)]
pub struct StateDiscretizer {
    bins: Vec<usize>,
    mins: Vec<f64>,
    maxs: Vec<f64>,
}

impl StateDiscretizer {
    pub fn new(dimensions: impl IntoIterator<Item = Dimension>) -> Self {
        let mut discretizer = Self::default();
        for dim in dimensions {
            discretizer = discretizer.with_dimension(dim.bins, dim.min, dim.max);
        }
        discretizer
    }

    /// Append a dimension to the grid
    pub fn with_dimension(mut self, bins: usize, min: f64, max: f64) -> Self {
        self.bins.push(bins);
        self.mins.push(min);
        self.maxs.push(max);
        self
    }

    pub fn dimensions(&self) -> usize {
        self.bins.len()
    }

    /// Number of distinct keys this grid can produce, `None` when it does
    /// not fit in a `usize`
    pub fn num_states(&self) -> Option<usize> {
        self.bins
            .iter()
            .try_fold(1usize, |acc, &b| acc.checked_mul(b.max(1)))
    }

    pub fn key(&self, values: &[f64]) -> String {
        discretize_state(values, &self.bins, &self.mins, &self.maxs)
    }

    pub fn buckets(&self, values: &[f64]) -> Vec<usize> {
        values
            .iter()
            .enumerate()
            .take(self.bins.len())
            .map(|(i, &v)| discretize(v, self.bins[i], self.mins[i], self.maxs[i]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_boundaries() {
        assert_eq!(discretize(0.0, 10, 0.0, 1.0), 0);
        assert_eq!(discretize(1.0, 10, 0.0, 1.0), 9);
        assert_eq!(discretize(-5.0, 4, -5.0, 5.0), 0);
        assert_eq!(discretize(5.0, 4, -5.0, 5.0), 3);
    }

    #[test]
    fn test_out_of_range_clamps() {
        assert_eq!(discretize(-100.0, 5, 0.0, 1.0), 0);
        assert_eq!(discretize(100.0, 5, 0.0, 1.0), 4);
        assert_eq!(discretize(f64::INFINITY, 5, 0.0, 1.0), 4);
        assert_eq!(discretize(f64::NEG_INFINITY, 5, 0.0, 1.0), 0);
    }

    #[test]
    fn test_interior_buckets() {
        assert_eq!(discretize(0.25, 4, 0.0, 1.0), 1);
        assert_eq!(discretize(0.49, 4, 0.0, 1.0), 1);
        assert_eq!(discretize(0.5, 4, 0.0, 1.0), 2);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(discretize(0.5, 0, 0.0, 1.0), 0);
        assert_eq!(discretize(0.5, 4, 1.0, 1.0), 0);
        assert_eq!(discretize(f64::NAN, 4, 0.0, 1.0), 0);
    }

    #[test]
    fn test_composite_key_preserves_order() {
        let key = discretize_state(&[0.0, 1.0, 0.5], &[3, 3, 4], &[0.0; 3], &[1.0; 3]);
        assert_eq!(key, "0_2_2");

        let swapped = discretize_state(&[1.0, 0.0, 0.5], &[3, 3, 4], &[0.0; 3], &[1.0; 3]);
        assert_eq!(swapped, "2_0_2");
    }

    #[test]
    fn test_discretizer_grid() {
        let grid = StateDiscretizer::default()
            .with_dimension(4, 0.0, 8.0)
            .with_dimension(2, -1.0, 1.0);

        assert_eq!(grid.dimensions(), 2);
        assert_eq!(grid.num_states(), Some(8));
        assert_eq!(grid.key(&[3.0, 0.5]), "1_1");
        assert_eq!(grid.buckets(&[100.0, -100.0]), vec![3, 0]);
    }

    #[test]
    fn test_num_states_overflow_is_none() {
        let huge = StateDiscretizer::default()
            .with_dimension(usize::MAX, 0.0, 1.0)
            .with_dimension(2, 0.0, 1.0);
        assert_eq!(huge.num_states(), None);
        assert_eq!(StateDiscretizer::default().num_states(), Some(1));
    }
}
