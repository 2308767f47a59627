//! Likelihood-weighted combination of several linear models.
//!
//! Each member is (optionally) optimised and filtered independently on the
//! rayon pool. Weights are a softmax of the member log-likelihoods:
//!
//! ```text
//! w_k = exp(ll_k − max ll) / Σ_j exp(ll_j − max ll)
//! ```
//!
//! The combined observation-space estimate at each step is `f̄ = Σ w_k·f_k`,
//! with disagreement `Σ w_k·(f_k − f̄)²` and mixture variance
//! `Σ w_k·(var_k + (f_k − f̄)²)`.

use ndarray::{Array1, Array2};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::error::FilterError;
use crate::estimator::StateEstimator;
use crate::forecast::Forecast;
use crate::kalman::{LinearKalmanFilter, check_series};
use crate::model::{ModelFamily, StateSpaceModel};
use crate::optimizer::{OptimizerConfig, ParameterOptimizer};
use crate::result::{FilterResult, FilterResultParts};
use crate::series::Series;
use crate::state::FilterState;

/// Normalised softmax weights of a set of log-likelihoods.
///
/// Equal inputs give uniform weights; the output sums to 1.
///
/// # Example
///
/// ```
/// let w = kalmar_filter::softmax_weights(&[-10.0, -10.0, -10.0, -10.0]);
/// assert!(w.iter().all(|&x| (x - 0.25).abs() < 1e-12));
/// ```
pub fn softmax_weights(log_likelihoods: &[f64]) -> Vec<f64> {
    let max = log_likelihoods
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = log_likelihoods.iter().map(|ll| (ll - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Configuration for [`EnsembleFilter`].
#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    members: Vec<StateSpaceModel>,
    optimize: bool,
    optimizer: OptimizerConfig,
    confidence: f64,
}

impl EnsembleConfig {
    /// Default members: local level, local trend and seasonal(12), each
    /// optimised with [`OptimizerConfig::default`]; 95% bands.
    pub fn new() -> Self {
        let members = [
            ModelFamily::LocalLevel,
            ModelFamily::LocalTrend,
            ModelFamily::Seasonal { period: 12 },
        ]
        .iter()
        .filter_map(|f| StateSpaceModel::from_family(f).ok())
        .collect();
        Self {
            members,
            optimize: true,
            optimizer: OptimizerConfig::default(),
            confidence: 0.95,
        }
    }

    /// Replaces the member models.
    pub fn with_members(mut self, members: Vec<StateSpaceModel>) -> Self {
        self.members = members;
        self
    }

    /// Enables or disables per-member noise optimisation.
    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// Sets the optimizer configuration used for every member.
    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Sets the confidence level for bands and forecasts.
    pub fn with_confidence(mut self, level: f64) -> Self {
        self.confidence = level;
        self
    }

    /// Member models.
    pub fn members(&self) -> &[StateSpaceModel] {
        &self.members
    }

    /// Whether members are optimised before filtering.
    pub fn optimize(&self) -> bool {
        self.optimize
    }

    /// Optimizer configuration.
    pub fn optimizer(&self) -> &OptimizerConfig {
        &self.optimizer
    }

    /// Confidence level.
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Validates this configuration.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `InvalidConfig` | no members, or confidence outside (0, 1) |
    /// | `DimensionMismatch` | members disagree on the observation dimension |
    /// | others | see [`OptimizerConfig::validate`] |
    pub fn validate(&self) -> Result<(), FilterError> {
        let Some(first) = self.members.first() else {
            return Err(FilterError::InvalidConfig {
                field: "members",
                reason: "ensemble needs at least one member".to_string(),
            });
        };
        if let Some(bad) = self.members.iter().find(|m| m.obs_dim() != first.obs_dim()) {
            return Err(FilterError::DimensionMismatch {
                what: "ensemble member observation dimension",
                expected: first.obs_dim().to_string(),
                got: bad.obs_dim().to_string(),
            });
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(FilterError::InvalidConfig {
                field: "confidence",
                reason: format!("must be in (0, 1), got {}", self.confidence),
            });
        }
        self.optimizer.validate()
    }
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// One ensemble member after fitting.
#[derive(Debug, Clone)]
pub struct EnsembleMember {
    name: String,
    model: StateSpaceModel,
    weight: f64,
    result: Option<FilterResult>,
    error: Option<FilterError>,
}

impl EnsembleMember {
    /// Model family name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Model used: the optimised one on success, the configured one otherwise.
    pub fn model(&self) -> &StateSpaceModel {
        &self.model
    }

    /// Normalised weight; 0 for failed members.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Log-likelihood of a successful member.
    pub fn log_likelihood(&self) -> Option<f64> {
        self.result.as_ref().map(FilterResult::log_likelihood)
    }

    /// Member result, if it succeeded.
    pub fn result(&self) -> Option<&FilterResult> {
        self.result.as_ref()
    }

    /// Failure, if it did not.
    pub fn error(&self) -> Option<&FilterError> {
        self.error.as_ref()
    }
}

/// Output of [`EnsembleFilter::fit_ensemble`].
#[derive(Debug, Clone)]
pub struct EnsembleResult {
    result: FilterResult,
    members: Vec<EnsembleMember>,
    disagreement: Array2<f64>,
    degenerate: bool,
}

impl EnsembleResult {
    /// Combined result.
    pub fn result(&self) -> &FilterResult {
        &self.result
    }

    /// Consumes `self` and returns the combined result.
    pub fn into_result(self) -> FilterResult {
        self.result
    }

    /// Members in configuration order.
    pub fn members(&self) -> &[EnsembleMember] {
        &self.members
    }

    /// Member weights in configuration order.
    pub fn weights(&self) -> Vec<f64> {
        self.members.iter().map(|m| m.weight).collect()
    }

    /// Per-step weighted spread of member filtered values, `Σ w·(f − f̄)²`.
    pub fn disagreement(&self) -> &Array2<f64> {
        &self.disagreement
    }

    /// True if every optimised member failed and the weights fell back to
    /// uniform over unoptimised members.
    pub fn degenerate(&self) -> bool {
        self.degenerate
    }
}

/// Weighted combination of independently fitted linear Kalman filters.
///
/// # Example
///
/// ```
/// use kalmar_filter::{EnsembleConfig, EnsembleFilter, Series, StateSpaceModel};
///
/// let series = Series::scalar(&[1.0, 1.2, 0.9, 1.4, 1.1, 1.3]).unwrap();
/// let config = EnsembleConfig::new()
///     .with_members(vec![StateSpaceModel::local_level(), StateSpaceModel::local_trend()])
///     .with_optimize(false);
/// let out = EnsembleFilter::new(config).unwrap().fit_ensemble(&series).unwrap();
/// let total: f64 = out.weights().iter().sum();
/// assert!((total - 1.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone)]
pub struct EnsembleFilter {
    config: EnsembleConfig,
    fitted: Vec<(LinearKalmanFilter, f64)>,
}

impl EnsembleFilter {
    /// Creates an ensemble filter.
    ///
    /// # Errors
    ///
    /// Returns the first [`EnsembleConfig::validate`] failure.
    pub fn new(config: EnsembleConfig) -> Result<Self, FilterError> {
        config.validate()?;
        Ok(Self {
            config,
            fitted: Vec::new(),
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Fits every member and combines them.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `DimensionMismatch` | series dimension differs from the members' |
    /// | `DegenerateEnsemble` | every member failed, with and without optimisation |
    #[tracing::instrument(skip(self, series), fields(members = self.config.members.len(), n_obs = series.len()))]
    pub fn fit_ensemble(&mut self, series: &Series) -> Result<EnsembleResult, FilterError> {
        for model in &self.config.members {
            check_series(model, series)?;
        }
        self.fitted.clear();

        let mut runs = self.run_members(series, self.config.optimize);
        let mut degenerate = false;
        if runs.iter().all(Result::is_err) {
            if self.config.optimize {
                warn!("every member failed; retrying without optimisation");
                runs = self.run_members(series, false);
            }
            if runs.iter().all(Result::is_err) {
                return Err(FilterError::DegenerateEnsemble {
                    members: self.config.members.len(),
                });
            }
            degenerate = self.config.optimize;
        }

        let lls: Vec<f64> = runs
            .iter()
            .filter_map(|r| r.as_ref().ok().map(|(_, res)| res.log_likelihood()))
            .collect();
        let mut ok_weights = if degenerate {
            vec![1.0 / lls.len() as f64; lls.len()]
        } else {
            softmax_weights(&lls)
        }
        .into_iter();

        let mut members = Vec::with_capacity(runs.len());
        for (run, configured) in runs.into_iter().zip(&self.config.members) {
            match run {
                Ok((kf, result)) => {
                    let weight = ok_weights.next().unwrap_or(0.0);
                    members.push(EnsembleMember {
                        name: configured.name(),
                        model: kf.model().clone(),
                        weight,
                        result: Some(result),
                        error: None,
                    });
                    self.fitted.push((kf, weight));
                }
                Err(e) => {
                    warn!(member = %configured.name(), error = %e, "member failed");
                    members.push(EnsembleMember {
                        name: configured.name(),
                        model: configured.clone(),
                        weight: 0.0,
                        result: None,
                        error: Some(e),
                    });
                }
            }
        }

        let (result, disagreement) = self.combine(&members, series)?;
        info!(
            weights = ?members.iter().map(|m| m.weight).collect::<Vec<_>>(),
            log_likelihood = result.log_likelihood(),
            degenerate,
            "ensemble combined"
        );
        Ok(EnsembleResult {
            result,
            members,
            disagreement,
            degenerate,
        })
    }

    /// Mixture forecast of the contributing members.
    ///
    /// Mean `f̄ = Σ w_k·f_k`, variance `Σ w_k·(v_k + (f_k − f̄)²)`.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `NotFitted` | [`fit_ensemble`](Self::fit_ensemble) has not succeeded |
    /// | others | see [`crate::ForecastEngine::forecast`] |
    pub fn forecast(&self, horizon: usize) -> Result<Forecast, FilterError> {
        if self.fitted.is_empty() {
            return Err(FilterError::NotFitted);
        }
        let forecasts = self
            .fitted
            .iter()
            .map(|(kf, w)| kf.forecast(horizon).map(|fc| (fc, *w)))
            .collect::<Result<Vec<_>, _>>()?;
        let means: Vec<&Array2<f64>> = forecasts.iter().map(|(fc, _)| fc.means()).collect();
        let vars: Vec<&Array2<f64>> = forecasts.iter().map(|(fc, _)| fc.variances()).collect();
        let weights: Vec<f64> = forecasts.iter().map(|(_, w)| *w).collect();
        let mix = mixture(&weights, &means, &vars);
        Forecast::from_moments(mix.mean, mix.variance, self.config.confidence)
    }

    fn run_members(
        &self,
        series: &Series,
        optimize: bool,
    ) -> Vec<Result<(LinearKalmanFilter, FilterResult), FilterError>> {
        self.config
            .members
            .par_iter()
            .map(|model| {
                let model = if optimize {
                    ParameterOptimizer::new(self.config.optimizer.clone())?
                        .optimize(model, series)?
                        .into_model()
                } else {
                    model.clone()
                };
                let mut kf = LinearKalmanFilter::new(model).with_confidence(self.config.confidence);
                let result = kf.fit(series)?;
                Ok((kf, result))
            })
            .collect()
    }

    fn combine(
        &self,
        members: &[EnsembleMember],
        series: &Series,
    ) -> Result<(FilterResult, Array2<f64>), FilterError> {
        let live: Vec<(&FilterResult, f64)> = members
            .iter()
            .filter_map(|m| m.result.as_ref().map(|r| (r, m.weight)))
            .collect();
        let weights: Vec<f64> = live.iter().map(|(_, w)| *w).collect();

        let fitted = mixture(
            &weights,
            &live.iter().map(|(r, _)| r.fitted()).collect::<Vec<_>>(),
            &live.iter().map(|(r, _)| r.fitted_variance()).collect::<Vec<_>>(),
        );
        let smoothed = mixture(
            &weights,
            &live.iter().map(|(r, _)| r.smoothed_values()).collect::<Vec<_>>(),
            &live.iter().map(|(r, _)| r.smoothed_variance()).collect::<Vec<_>>(),
        );
        let predicted = mixture(
            &weights,
            &live.iter().map(|(r, _)| r.predictions()).collect::<Vec<_>>(),
            &live.iter().map(|(r, _)| r.prediction_variance()).collect::<Vec<_>>(),
        );

        let observations = series.values();
        let n = series.len();
        let mut filtered_states = Vec::with_capacity(n);
        let mut smoothed_states = Vec::with_capacity(n);
        let mut predicted_states = Vec::with_capacity(n);
        for t in 0..n {
            let step_ll: f64 = live
                .iter()
                .map(|(r, w)| w * r.filtered_states()[t].log_likelihood())
                .sum();
            let pred_mean = predicted.mean.row(t).to_owned();
            let innovation_cov = Array2::from_diag(&predicted.variance.row(t));
            let innovation = if t == 0 {
                Array1::zeros(series.dim())
            } else {
                &observations.row(t) - &pred_mean
            };
            let ts = series.timestamp(t);
            let state = |mean: Array1<f64>, var: Array2<f64>| {
                FilterState::new(t, mean, var)
                    .with_timestamp(ts)
                    .with_log_likelihood(step_ll)
                    .with_innovation(innovation.clone(), innovation_cov.clone())
            };
            filtered_states.push(state(
                fitted.mean.row(t).to_owned(),
                Array2::from_diag(&fitted.variance.row(t)),
            ));
            smoothed_states.push(state(
                smoothed.mean.row(t).to_owned(),
                Array2::from_diag(&smoothed.variance.row(t)),
            ));
            predicted_states.push(state(pred_mean, innovation_cov.clone()));
        }

        let log_likelihood: f64 = live.iter().map(|(r, w)| w * r.log_likelihood()).sum();
        let n_params: usize = live.iter().map(|(r, _)| r.n_params()).sum();
        let disagreement = fitted.disagreement.clone();

        let result = FilterResult::from_parts(
            FilterResultParts {
                name: "ensemble".to_string(),
                model: None,
                filtered: filtered_states,
                smoothed: smoothed_states,
                predicted: predicted_states,
                fitted: fitted.mean,
                fitted_variance: fitted.variance,
                smoothed_values: smoothed.mean,
                smoothed_variance: smoothed.variance,
                predictions: predicted.mean,
                prediction_variance: predicted.variance,
                log_likelihood,
                n_params,
                confidence: self.config.confidence,
                bands: None,
            },
            observations,
        )?;
        Ok((result, disagreement))
    }
}

impl StateEstimator for EnsembleFilter {
    type Error = FilterError;

    fn fit(&mut self, series: &Series) -> Result<FilterResult, FilterError> {
        self.fit_ensemble(series).map(EnsembleResult::into_result)
    }

    fn forecast(&self, horizon: usize) -> Result<Forecast, FilterError> {
        EnsembleFilter::forecast(self, horizon)
    }
}

struct Mixture {
    mean: Array2<f64>,
    disagreement: Array2<f64>,
    variance: Array2<f64>,
}

/// Weighted mixture moments of equally shaped member matrices.
fn mixture(weights: &[f64], means: &[&Array2<f64>], variances: &[&Array2<f64>]) -> Mixture {
    let shape = means.first().map_or((0, 0), |m| m.dim());
    let mut mean = Array2::<f64>::zeros(shape);
    for (w, m) in weights.iter().zip(means) {
        mean.scaled_add(*w, *m);
    }
    let mut disagreement = Array2::<f64>::zeros(shape);
    let mut variance = Array2::<f64>::zeros(shape);
    for ((w, m), v) in weights.iter().zip(means).zip(variances) {
        let dev = *m - &mean;
        let dev2 = &dev * &dev;
        disagreement.scaled_add(*w, &dev2);
        variance.scaled_add(*w, &(*v + &dev2));
    }
    Mixture {
        mean,
        disagreement,
        variance,
    }
}
