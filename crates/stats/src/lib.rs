//! Descriptive statistics shared by the kalmar filters and the analysis layer.
//!
//! Everything here works on plain `f64` slices. Functions that need ordered
//! input say so; none of them allocate unless noted.

use std::cmp::Ordering;

/// Arithmetic mean of a slice. Returns 0.0 if empty.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Sample variance with an N-1 denominator.
/// Returns 0.0 if fewer than 2 elements.
pub fn variance(data: &[f64]) -> f64 {
    let n = data.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|&x| (x - m) * (x - m)).sum::<f64>() / (n as f64 - 1.0)
}

/// Population variance with an N denominator.
///
/// Used for windowed innovation and differenced-observation variances,
/// where the window is the whole population of interest. Returns 0.0 if
/// empty.
pub fn population_variance(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|&x| (x - m) * (x - m)).sum::<f64>() / data.len() as f64
}

/// First differences `x[i+1] - x[i]`. Empty for fewer than 2 elements.
pub fn diff(data: &[f64]) -> Vec<f64> {
    data.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Sorts a copy of `data` ascending. NaNs compare equal to everything.
pub fn sorted(data: &[f64]) -> Vec<f64> {
    let mut out = data.to_vec();
    out.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    out
}

/// Linear-interpolation quantile (type 7, the `numpy.percentile` default).
///
/// **Expects pre-sorted input.** Returns `None` for an empty slice; `p` is
/// clamped to `[0, 1]`.
pub fn quantile_type7(sorted: &[f64], p: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    Some(sorted[lo] + (h - h.floor()) * (sorted[hi] - sorted[lo]))
}

/// Fraction of `data` that is less than or equal to `value`.
///
/// Returns 0.0 if `data` is empty.
pub fn percentile_rank(data: &[f64], value: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().filter(|&&x| x <= value).count() as f64 / data.len() as f64
}

/// Quantile of a weighted sample.
///
/// Sorts `(value, weight)` pairs by value and returns the first value whose
/// cumulative normalised weight reaches `p`. Weights need not sum to one but
/// must be non-negative. Returns `None` if the inputs are empty, have
/// different lengths, or carry no positive weight.
pub fn weighted_quantile(values: &[f64], weights: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() || values.len() != weights.len() {
        return None;
    }
    let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    if total <= 0.0 {
        return None;
    }

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(Ordering::Equal)
    });

    let target = p.clamp(0.0, 1.0) * total;
    let mut acc = 0.0;
    for &i in &order {
        acc += weights[i].max(0.0);
        if acc >= target {
            return Some(values[i]);
        }
    }
    order.last().map(|&i| values[i])
}

/// Mean squared error between two equally long slices.
///
/// Extra elements of the longer slice are ignored. Returns 0.0 if either is
/// empty.
pub fn mse(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return 0.0;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p) * (a - p))
        .sum::<f64>()
        / n as f64
}

/// Mean absolute error between two equally long slices.
///
/// Extra elements of the longer slice are ignored. Returns 0.0 if either is
/// empty.
pub fn mae(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return 0.0;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(mean(&data), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mean_empty() {
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_variance_sample() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(variance(&data), 32.0 / 7.0, epsilon = 1e-12);
    }

    #[test]
    fn test_variance_short() {
        assert_eq!(variance(&[]), 0.0);
        assert_eq!(variance(&[5.0]), 0.0);
    }

    #[test]
    fn test_population_variance() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(population_variance(&data), 4.0, epsilon = 1e-12);
        assert_eq!(population_variance(&[]), 0.0);
        assert_eq!(population_variance(&[3.0]), 0.0);
    }

    #[test]
    fn test_diff() {
        assert_eq!(diff(&[1.0, 4.0, 2.0]), vec![3.0, -2.0]);
        assert!(diff(&[1.0]).is_empty());
    }

    #[test]
    fn test_quantile_type7() {
        let s = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(quantile_type7(&s, 0.25).unwrap(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(quantile_type7(&s, 0.5).unwrap(), 3.0, epsilon = 1e-12);
        assert_relative_eq!(quantile_type7(&s, 0.1).unwrap(), 1.4, epsilon = 1e-12);
        assert_relative_eq!(quantile_type7(&s, 0.0).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(quantile_type7(&s, 1.0).unwrap(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_quantile_type7_matches_numpy() {
        // numpy.percentile(range(1, 11), 30) == 3.7
        let s: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_relative_eq!(quantile_type7(&s, 0.3).unwrap(), 3.7, epsilon = 1e-12);
    }

    #[test]
    fn test_quantile_type7_empty() {
        assert!(quantile_type7(&[], 0.5).is_none());
    }

    #[test]
    fn test_sorted_handles_unordered() {
        assert_eq!(sorted(&[3.0, 1.0, 2.0]), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_percentile_rank() {
        let data = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(percentile_rank(&data, 2.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(percentile_rank(&data, 0.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(percentile_rank(&data, 9.0), 1.0, epsilon = 1e-12);
        assert_eq!(percentile_rank(&[], 1.0), 0.0);
    }

    #[test]
    fn test_weighted_quantile_uniform_weights() {
        let values = [4.0, 1.0, 3.0, 2.0];
        let weights = [1.0; 4];
        assert_eq!(weighted_quantile(&values, &weights, 0.5), Some(2.0));
        assert_eq!(weighted_quantile(&values, &weights, 1.0), Some(4.0));
        assert_eq!(weighted_quantile(&values, &weights, 0.0), Some(1.0));
    }

    #[test]
    fn test_weighted_quantile_point_mass() {
        let values = [1.0, 2.0, 3.0];
        let weights = [0.0, 1.0, 0.0];
        assert_eq!(weighted_quantile(&values, &weights, 0.025), Some(2.0));
        assert_eq!(weighted_quantile(&values, &weights, 0.975), Some(2.0));
    }

    #[test]
    fn test_weighted_quantile_invalid() {
        assert!(weighted_quantile(&[], &[], 0.5).is_none());
        assert!(weighted_quantile(&[1.0], &[1.0, 2.0], 0.5).is_none());
        assert!(weighted_quantile(&[1.0, 2.0], &[0.0, 0.0], 0.5).is_none());
    }

    #[test]
    fn test_mse_mae() {
        let actual = [1.0, 2.0, 3.0];
        let predicted = [1.0, 3.0, 1.0];
        assert_relative_eq!(mse(&actual, &predicted), 5.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(mae(&actual, &predicted), 1.0, epsilon = 1e-12);
        assert_eq!(mse(&[], &[]), 0.0);
        assert_eq!(mae(&[], &[1.0]), 0.0);
    }
}
