//! Effective sample size and systematic resampling.

/// Effective sample size `1 / Σ w²` of normalised weights.
///
/// Equals N for uniform weights and 1 when all mass sits on one particle.
/// Returns 0.0 for empty or all-zero input.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq > 0.0 { 1.0 / sum_sq } else { 0.0 }
}

/// Systematic resampling with a single offset `u ∈ [0, 1)`.
///
/// Draws N indices at positions `(i + u) / N` along the cumulative weight
/// distribution. Builds a CDF and uses binary search (`partition_point`) for
/// each position; the last CDF entry is forced to 1.0.
///
/// Weights need not be normalised. Returns an empty vector for empty input.
pub fn systematic_resample(weights: &[f64], u: f64) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let total: f64 = weights.iter().sum();
    let mut cdf = Vec::with_capacity(n);
    let mut acc = 0.0;
    for &w in weights {
        acc += w / total;
        cdf.push(acc);
    }
    if let Some(last) = cdf.last_mut() {
        *last = 1.0;
    }

    let step = 1.0 / n as f64;
    (0..n)
        .map(|i| {
            let position = (i as f64 + u) * step;
            cdf.partition_point(|&c| c < position).min(n - 1)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_ess_uniform_is_n() {
        let w = vec![0.01; 100];
        assert_abs_diff_eq!(effective_sample_size(&w), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ess_point_mass_is_one() {
        let mut w = vec![0.0; 50];
        w[17] = 1.0;
        assert_abs_diff_eq!(effective_sample_size(&w), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ess_empty() {
        assert_eq!(effective_sample_size(&[]), 0.0);
    }

    #[test]
    fn test_systematic_point_mass() {
        let idx = systematic_resample(&[0.0, 0.0, 1.0, 0.0], 0.3);
        assert_eq!(idx, vec![2, 2, 2, 2]);
    }

    #[test]
    fn test_systematic_uniform_is_identity() {
        let idx = systematic_resample(&[0.25; 4], 0.5);
        assert_eq!(idx, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_systematic_counts_follow_weights() {
        // Weight 0.5 on index 0 must be drawn exactly N/2 times.
        let idx = systematic_resample(&[0.5, 0.25, 0.125, 0.125], 0.1);
        assert_eq!(idx.iter().filter(|&&i| i == 0).count(), 2);
        assert_eq!(idx.iter().filter(|&&i| i == 1).count(), 1);
        assert!(idx.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_systematic_unnormalised_weights() {
        let a = systematic_resample(&[2.0, 6.0], 0.4);
        let b = systematic_resample(&[0.25, 0.75], 0.4);
        assert_eq!(a, b);
    }
}
