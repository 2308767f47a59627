//! Filter results and information criteria.

use ndarray::{Array2, ArrayView2, Zip};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::FilterError;
use crate::model::StateSpaceModel;
use crate::state::FilterState;

/// Akaike Information Criterion, `2k - 2·LL`.
pub fn aic(log_likelihood: f64, n_params: usize) -> f64 {
    2.0 * n_params as f64 - 2.0 * log_likelihood
}

/// Bayesian Information Criterion, `k·ln(n) - 2·LL`.
pub fn bic(log_likelihood: f64, n_params: usize, n_obs: usize) -> f64 {
    n_params as f64 * (n_obs.max(1) as f64).ln() - 2.0 * log_likelihood
}

/// Two-sided standard normal critical value for a confidence `level`.
///
/// `z_score(0.95)` is approximately 1.96.
///
/// # Errors
///
/// | Variant | Trigger |
/// |---------|---------|
/// | `InvalidConfig` | `level` outside the open interval (0, 1) |
pub fn z_score(level: f64) -> Result<f64, FilterError> {
    if !(level > 0.0 && level < 1.0) {
        return Err(FilterError::InvalidConfig {
            field: "confidence",
            reason: format!("must be in (0, 1), got {level}"),
        });
    }
    let normal = Normal::new(0.0, 1.0).map_err(|e| FilterError::InvalidConfig {
        field: "confidence",
        reason: e.to_string(),
    })?;
    Ok(normal.inverse_cdf(0.5 * (1.0 + level)))
}

/// Lower and upper bounds around an observation-space estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceBands {
    level: f64,
    lower: Array2<f64>,
    upper: Array2<f64>,
}

impl ConfidenceBands {
    /// Creates bands from explicit bounds.
    pub fn new(level: f64, lower: Array2<f64>, upper: Array2<f64>) -> Self {
        Self {
            level,
            lower,
            upper,
        }
    }

    /// Gaussian bands `mean ± z·sqrt(variance)`.
    ///
    /// # Errors
    ///
    /// Same as [`z_score`].
    pub fn gaussian(
        mean: ArrayView2<'_, f64>,
        variance: ArrayView2<'_, f64>,
        level: f64,
    ) -> Result<Self, FilterError> {
        let z = z_score(level)?;
        let half = variance.mapv(|v| z * v.max(0.0).sqrt());
        Ok(Self {
            level,
            lower: &mean - &half,
            upper: &mean + &half,
        })
    }

    /// Confidence level, e.g. 0.95.
    pub fn level(&self) -> f64 {
        self.level
    }

    /// Lower bounds (n x m).
    pub fn lower(&self) -> &Array2<f64> {
        &self.lower
    }

    /// Upper bounds (n x m).
    pub fn upper(&self) -> &Array2<f64> {
        &self.upper
    }
}

/// One-step-ahead prediction error summary (steps 1..n, all components).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Diagnostics {
    mse: f64,
    mae: f64,
}

impl Diagnostics {
    /// Mean squared one-step prediction error.
    pub fn mse(&self) -> f64 {
        self.mse
    }

    /// Mean absolute one-step prediction error.
    pub fn mae(&self) -> f64 {
        self.mae
    }
}

/// Raw material for a [`FilterResult`].
///
/// Filters fill this in and call [`FilterResult::from_parts`], which derives
/// residuals, diagnostics, bands and information criteria. All
/// observation-space matrices are `n x m`.
#[derive(Debug, Clone)]
pub struct FilterResultParts {
    /// Identifier of the producing filter, e.g. `linear_local_level`.
    pub name: String,
    /// Model whose matrices produced the states, when a single one applies.
    pub model: Option<StateSpaceModel>,
    /// Filtered states, one per observation.
    pub filtered: Vec<FilterState>,
    /// Smoothed states, one per observation.
    pub smoothed: Vec<FilterState>,
    /// One-step-ahead predicted states, one per observation.
    pub predicted: Vec<FilterState>,
    /// Filtered estimate in observation space.
    pub fitted: Array2<f64>,
    /// Variance of the filtered estimate in observation space.
    pub fitted_variance: Array2<f64>,
    /// Smoothed estimate in observation space.
    pub smoothed_values: Array2<f64>,
    /// Variance of the smoothed estimate in observation space.
    pub smoothed_variance: Array2<f64>,
    /// One-step-ahead predictions in observation space.
    pub predictions: Array2<f64>,
    /// Variance of the one-step-ahead predictions.
    pub prediction_variance: Array2<f64>,
    /// Total log-likelihood.
    pub log_likelihood: f64,
    /// Number of estimated parameters, k.
    pub n_params: usize,
    /// Confidence level for the bands.
    pub confidence: f64,
    /// Precomputed bands; Gaussian bands from `fitted_variance` otherwise.
    pub bands: Option<ConfidenceBands>,
}

/// Complete output of a fitted filter.
#[derive(Debug, Clone)]
pub struct FilterResult {
    name: String,
    model: Option<StateSpaceModel>,
    filtered: Vec<FilterState>,
    smoothed: Vec<FilterState>,
    predicted: Vec<FilterState>,
    fitted: Array2<f64>,
    fitted_variance: Array2<f64>,
    smoothed_values: Array2<f64>,
    smoothed_variance: Array2<f64>,
    predictions: Array2<f64>,
    prediction_variance: Array2<f64>,
    residuals: Array2<f64>,
    standardized_residuals: Array2<f64>,
    bands: ConfidenceBands,
    diagnostics: Diagnostics,
    log_likelihood: f64,
    n_params: usize,
    aic: f64,
    bic: f64,
}

impl FilterResult {
    /// Assembles a result from its parts and the observations they explain.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `DimensionMismatch` | a part does not match the observations' shape |
    /// | `InvalidConfig` | `confidence` outside (0, 1) |
    pub fn from_parts(
        parts: FilterResultParts,
        observations: ArrayView2<'_, f64>,
    ) -> Result<Self, FilterError> {
        let shape = observations.dim();
        for (what, m) in [
            ("fitted values", &parts.fitted),
            ("fitted variance", &parts.fitted_variance),
            ("smoothed values", &parts.smoothed_values),
            ("smoothed variance", &parts.smoothed_variance),
            ("predictions", &parts.predictions),
            ("prediction variance", &parts.prediction_variance),
        ] {
            if m.dim() != shape {
                return Err(FilterError::DimensionMismatch {
                    what,
                    expected: format!("{}x{}", shape.0, shape.1),
                    got: format!("{}x{}", m.nrows(), m.ncols()),
                });
            }
        }
        if parts.filtered.len() != shape.0 {
            return Err(FilterError::DimensionMismatch {
                what: "filtered states",
                expected: shape.0.to_string(),
                got: parts.filtered.len().to_string(),
            });
        }

        let residuals = &observations - &parts.fitted;
        let standardized_residuals = standardize(&parts.filtered, shape);
        let diagnostics = one_step_diagnostics(observations, parts.predictions.view());
        let bands = match parts.bands {
            Some(b) => b,
            None => ConfidenceBands::gaussian(
                parts.fitted.view(),
                parts.fitted_variance.view(),
                parts.confidence,
            )?,
        };

        let n = shape.0;
        Ok(Self {
            aic: aic(parts.log_likelihood, parts.n_params),
            bic: bic(parts.log_likelihood, parts.n_params, n),
            name: parts.name,
            model: parts.model,
            filtered: parts.filtered,
            smoothed: parts.smoothed,
            predicted: parts.predicted,
            fitted: parts.fitted,
            fitted_variance: parts.fitted_variance,
            smoothed_values: parts.smoothed_values,
            smoothed_variance: parts.smoothed_variance,
            predictions: parts.predictions,
            prediction_variance: parts.prediction_variance,
            residuals,
            standardized_residuals,
            bands,
            diagnostics,
            log_likelihood: parts.log_likelihood,
            n_params: parts.n_params,
        })
    }

    /// Identifier of the producing filter.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Model used, when a single linear model applies.
    pub fn model(&self) -> Option<&StateSpaceModel> {
        self.model.as_ref()
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.fitted.nrows()
    }

    /// True if the result covers no observations.
    pub fn is_empty(&self) -> bool {
        self.fitted.nrows() == 0
    }

    /// Filtered states.
    pub fn filtered_states(&self) -> &[FilterState] {
        &self.filtered
    }

    /// Smoothed states.
    pub fn smoothed_states(&self) -> &[FilterState] {
        &self.smoothed
    }

    /// One-step-ahead predicted states.
    pub fn predicted_states(&self) -> &[FilterState] {
        &self.predicted
    }

    /// Filtered estimate in observation space (n x m).
    pub fn fitted(&self) -> &Array2<f64> {
        &self.fitted
    }

    /// Variance of the filtered estimate in observation space.
    pub fn fitted_variance(&self) -> &Array2<f64> {
        &self.fitted_variance
    }

    /// Smoothed estimate in observation space.
    pub fn smoothed_values(&self) -> &Array2<f64> {
        &self.smoothed_values
    }

    /// Variance of the smoothed estimate in observation space.
    pub fn smoothed_variance(&self) -> &Array2<f64> {
        &self.smoothed_variance
    }

    /// One-step-ahead predictions in observation space.
    pub fn predictions(&self) -> &Array2<f64> {
        &self.predictions
    }

    /// Variance of the one-step-ahead predictions.
    pub fn prediction_variance(&self) -> &Array2<f64> {
        &self.prediction_variance
    }

    /// Observations minus filtered estimate.
    pub fn residuals(&self) -> &Array2<f64> {
        &self.residuals
    }

    /// Innovations scaled by the square root of their variance.
    ///
    /// Zero at the seeding step and wherever the variance is not positive.
    pub fn standardized_residuals(&self) -> &Array2<f64> {
        &self.standardized_residuals
    }

    /// Confidence bands around the filtered estimate.
    pub fn bands(&self) -> &ConfidenceBands {
        &self.bands
    }

    /// One-step prediction error summary.
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    /// Total log-likelihood.
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    /// Number of estimated parameters, k.
    pub fn n_params(&self) -> usize {
        self.n_params
    }

    /// `2k - 2·LL`.
    pub fn aic(&self) -> f64 {
        self.aic
    }

    /// `k·ln(n) - 2·LL`.
    pub fn bic(&self) -> f64 {
        self.bic
    }

    /// Last filtered state.
    pub fn last_state(&self) -> Option<&FilterState> {
        self.filtered.last()
    }
}

fn standardize(filtered: &[FilterState], shape: (usize, usize)) -> Array2<f64> {
    let mut out = Array2::zeros(shape);
    for (t, state) in filtered.iter().enumerate() {
        let v = state.innovation();
        let s = state.innovation_covariance();
        for j in 0..shape.1.min(v.len()).min(s.nrows()) {
            let var = s[[j, j]];
            if var > 0.0 {
                out[[t, j]] = v[j] / var.sqrt();
            }
        }
    }
    out
}

fn one_step_diagnostics(
    observations: ArrayView2<'_, f64>,
    predictions: ArrayView2<'_, f64>,
) -> Diagnostics {
    if observations.nrows() < 2 {
        return Diagnostics { mse: 0.0, mae: 0.0 };
    }
    let mut actual = Vec::new();
    let mut predicted = Vec::new();
    Zip::from(observations.slice(ndarray::s![1.., ..]))
        .and(predictions.slice(ndarray::s![1.., ..]))
        .for_each(|&y, &p| {
            actual.push(y);
            predicted.push(p);
        });
    Diagnostics {
        mse: kalmar_stats::mse(&actual, &predicted),
        mae: kalmar_stats::mae(&actual, &predicted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn parts(n: usize) -> FilterResultParts {
        let filtered: Vec<FilterState> = (0..n)
            .map(|t| {
                FilterState::new(t, array![t as f64], array![[1.0]])
                    .with_innovation(array![2.0], array![[4.0]])
            })
            .collect();
        let col = |f: &dyn Fn(usize) -> f64| Array2::from_shape_fn((n, 1), |(t, _)| f(t));
        FilterResultParts {
            name: "test".to_string(),
            model: None,
            smoothed: filtered.clone(),
            predicted: filtered.clone(),
            filtered,
            fitted: col(&|t| t as f64),
            fitted_variance: col(&|_| 1.0),
            smoothed_values: col(&|t| t as f64),
            smoothed_variance: col(&|_| 1.0),
            predictions: col(&|t| t as f64 - 1.0),
            prediction_variance: col(&|_| 2.0),
            log_likelihood: -10.0,
            n_params: 2,
            confidence: 0.95,
            bands: None,
        }
    }

    #[test]
    fn information_criteria() {
        assert_abs_diff_eq!(aic(-10.0, 2), 24.0, epsilon = 1e-12);
        assert_abs_diff_eq!(bic(-10.0, 2, 100), 2.0 * 100f64.ln() + 20.0, epsilon = 1e-12);
    }

    #[test]
    fn z_score_95() {
        assert_abs_diff_eq!(z_score(0.95).unwrap(), 1.959964, epsilon = 1e-5);
        assert_abs_diff_eq!(z_score(0.99).unwrap(), 2.575829, epsilon = 1e-5);
    }

    #[test]
    fn z_score_rejects_bad_level() {
        assert!(z_score(1.0).is_err());
        assert!(z_score(0.0).is_err());
        assert!(z_score(f64::NAN).is_err());
    }

    #[test]
    fn from_parts_derives_everything() {
        let obs = Array2::from_shape_fn((4, 1), |(t, _)| t as f64 + 0.5);
        let r = FilterResult::from_parts(parts(4), obs.view()).unwrap();
        assert_eq!(r.len(), 4);
        assert_abs_diff_eq!(r.residuals()[[2, 0]], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(r.standardized_residuals()[[1, 0]], 1.0, epsilon = 1e-12);
        // One-step errors are all 1.5 from step 1 on.
        assert_abs_diff_eq!(r.diagnostics().mae(), 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(r.diagnostics().mse(), 2.25, epsilon = 1e-12);
        assert_abs_diff_eq!(r.aic(), 24.0, epsilon = 1e-12);
        let z = z_score(0.95).unwrap();
        assert_abs_diff_eq!(r.bands().upper()[[3, 0]], 3.0 + z, epsilon = 1e-12);
        assert_abs_diff_eq!(r.bands().lower()[[3, 0]], 3.0 - z, epsilon = 1e-12);
    }

    #[test]
    fn from_parts_shape_mismatch() {
        let obs = Array2::zeros((5, 1));
        let err = FilterResult::from_parts(parts(4), obs.view()).unwrap_err();
        assert!(matches!(err, FilterError::DimensionMismatch { .. }));
    }
}
