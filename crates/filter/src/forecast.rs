//! Multi-step forecasts from a final filtered state.

use ndarray::{Array1, Array2};
use tracing::debug;

use crate::error::FilterError;
use crate::linalg;
use crate::model::StateSpaceModel;
use crate::result::ConfidenceBands;
use crate::state::FilterState;

/// Observation-space forecast over steps `1..=horizon`.
///
/// Rows are horizon steps, columns observation components. Variances are
/// non-decreasing along the horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    means: Array2<f64>,
    variances: Array2<f64>,
    bands: ConfidenceBands,
}

impl Forecast {
    /// Builds a forecast from per-step means and variances.
    ///
    /// Negative variances are clamped to zero and each column is replaced
    /// by its running maximum, so uncertainty never shrinks with the
    /// horizon. Bands are Gaussian at the given `level`.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `DimensionMismatch` | `means` and `variances` differ in shape |
    /// | `InvalidConfig` | `level` outside (0, 1) |
    pub fn from_moments(
        means: Array2<f64>,
        mut variances: Array2<f64>,
        level: f64,
    ) -> Result<Self, FilterError> {
        if means.dim() != variances.dim() {
            return Err(FilterError::DimensionMismatch {
                what: "forecast variances",
                expected: format!("{}x{}", means.nrows(), means.ncols()),
                got: format!("{}x{}", variances.nrows(), variances.ncols()),
            });
        }
        for mut col in variances.columns_mut() {
            let mut running = 0.0_f64;
            for v in col.iter_mut() {
                running = running.max(v.max(0.0));
                *v = running;
            }
        }
        let bands = ConfidenceBands::gaussian(means.view(), variances.view(), level)?;
        Ok(Self {
            means,
            variances,
            bands,
        })
    }

    /// Number of forecast steps.
    pub fn horizon(&self) -> usize {
        self.means.nrows()
    }

    /// Forecast means (horizon x m).
    pub fn means(&self) -> &Array2<f64> {
        &self.means
    }

    /// Forecast variances (horizon x m).
    pub fn variances(&self) -> &Array2<f64> {
        &self.variances
    }

    /// Lower band (horizon x m).
    pub fn lower(&self) -> &Array2<f64> {
        self.bands.lower()
    }

    /// Upper band (horizon x m).
    pub fn upper(&self) -> &Array2<f64> {
        self.bands.upper()
    }

    /// Confidence level of the bands.
    pub fn level(&self) -> f64 {
        self.bands.level()
    }
}

/// Propagates a filtered state through a model without further updates.
///
/// Each step applies `x ← F·x`, `P ← F·P·Fᵀ + Q`, and reports the
/// observation-space mean `H·x` and variance `H·P·Hᵀ + R`.
#[derive(Debug, Clone, Copy)]
pub struct ForecastEngine<'a> {
    model: &'a StateSpaceModel,
    confidence: f64,
}

impl<'a> ForecastEngine<'a> {
    /// Creates an engine with 95% bands.
    pub fn new(model: &'a StateSpaceModel) -> Self {
        Self {
            model,
            confidence: 0.95,
        }
    }

    /// Sets the band confidence level.
    pub fn with_confidence(mut self, level: f64) -> Self {
        self.confidence = level;
        self
    }

    /// Forecasts `horizon` steps ahead of `last`.
    ///
    /// Reported variances go through [`Forecast::from_moments`], so each one
    /// is the maximum of the model variances up to that step. A contractive
    /// model whose variance falls towards its stationary value reports the
    /// earlier, larger variance instead.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `InvalidConfig` | `horizon == 0` or bad confidence level |
    /// | `DimensionMismatch` | `last` does not match the model's state dimension |
    /// | `NumericalInstability` | the propagated state turns non-finite |
    #[tracing::instrument(skip(self, last), fields(model = %self.model.family()))]
    pub fn forecast(&self, last: &FilterState, horizon: usize) -> Result<Forecast, FilterError> {
        if horizon == 0 {
            return Err(FilterError::InvalidConfig {
                field: "horizon",
                reason: "must be at least 1".to_string(),
            });
        }
        let n = self.model.state_dim();
        if last.mean().len() != n || last.covariance().dim() != (n, n) {
            return Err(FilterError::DimensionMismatch {
                what: "forecast origin state",
                expected: n.to_string(),
                got: last.mean().len().to_string(),
            });
        }

        let f = self.model.transition();
        let h = self.model.observation();
        let q = self.model.process_noise();
        let r = self.model.observation_noise();
        let m = self.model.obs_dim();

        let mut mean: Array1<f64> = last.mean().clone();
        let mut cov: Array2<f64> = last.covariance().clone();
        let mut means = Array2::zeros((horizon, m));
        let mut variances = Array2::zeros((horizon, m));

        for k in 0..horizon {
            mean = f.dot(&mean);
            cov = f.dot(&cov).dot(&f.t()) + q;
            linalg::symmetrize(&mut cov);
            if mean.iter().chain(cov.iter()).any(|v| !v.is_finite()) {
                return Err(FilterError::NumericalInstability {
                    step: last.step() + k + 1,
                    reason: "forecast state is not finite".to_string(),
                });
            }
            let obs_cov = h.dot(&cov).dot(&h.t()) + r;
            means.row_mut(k).assign(&h.dot(&mean));
            variances.row_mut(k).assign(&obs_cov.diag());
        }

        debug!(horizon, "forecast complete");
        Forecast::from_moments(means, variances, self.confidence)
    }
}
