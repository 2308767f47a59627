//! Kalman filter that re-estimates its noise covariances online.
//!
//! After a warm-up of `window` innovations, one of three policies retunes R
//! (and optionally Q) before each prediction, using only observations
//! already processed:
//!
//! | Policy | Update |
//! |--------|--------|
//! | innovation | `R ← α·R + (1 − α)·diag(Var(v))`; with `adapt_process_noise`, `Q ← α·Q + (1 − α)·mean(K·v·vᵀ·Kᵀ)` |
//! | likelihood | `R ← R·g` for the grid factor `g` maximising the windowed log-likelihood |
//! | variance | `R = r_share · Var(Δy)`, Q rescaled so `Q[0,0] = q_share · Var(Δy)` |
//!
//! Every adapted diagonal entry is floored at `noise_floor`. The smoother
//! replays the Q each step was actually predicted with.

use std::fmt;

use ndarray::{Array1, Array2, s};
use tracing::{debug, info};

use crate::error::FilterError;
use crate::estimator::StateEstimator;
use crate::forecast::{Forecast, ForecastEngine};
use crate::kalman::{
    assemble_linear, check_series, predict_moments, seed_states, update_moments,
    window_log_likelihood,
};
use crate::model::StateSpaceModel;
use crate::result::FilterResult;
use crate::series::Series;
use crate::smoother;
use crate::state::FilterState;

/// Rule used to retune the noise covariances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdaptationPolicy {
    /// Exponentially forget towards the windowed innovation variance.
    Innovation,
    /// Pick the best-scoring multiple of the current R over the window.
    Likelihood,
    /// Set noise from the variance of recent first differences.
    Variance,
}

impl AdaptationPolicy {
    /// All policies, in a stable order.
    pub const ALL: [AdaptationPolicy; 3] = [Self::Innovation, Self::Likelihood, Self::Variance];

    /// Lowercase identifier.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Innovation => "innovation",
            Self::Likelihood => "likelihood",
            Self::Variance => "variance",
        }
    }
}

impl fmt::Display for AdaptationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for [`AdaptiveKalmanFilter`].
///
/// # Example
///
/// ```
/// use kalmar_filter::{AdaptationPolicy, AdaptiveConfig};
///
/// let config = AdaptiveConfig::new()
///     .with_policy(AdaptationPolicy::Likelihood)
///     .with_window(30)
///     .with_likelihood_grid(vec![0.5, 1.0, 2.0]);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveConfig {
    policy: AdaptationPolicy,
    window: usize,
    forgetting_factor: f64,
    noise_floor: f64,
    adapt_process_noise: bool,
    likelihood_grid: Vec<f64>,
    process_share: f64,
    observation_share: f64,
    changepoint_ratio: f64,
    confidence: f64,
}

impl AdaptiveConfig {
    /// Creates a configuration with defaults.
    ///
    /// Defaults: innovation policy, `window = 20`, `forgetting_factor = 0.95`,
    /// `noise_floor = 1e-6`, Q not adapted, grid `[0.25, 0.5, 1, 2, 4]`,
    /// `process_share = 0.1`, `observation_share = 0.5`,
    /// `changepoint_ratio = 2`, `confidence = 0.95`.
    pub fn new() -> Self {
        Self {
            policy: AdaptationPolicy::Innovation,
            window: 20,
            forgetting_factor: 0.95,
            noise_floor: 1e-6,
            adapt_process_noise: false,
            likelihood_grid: vec![0.25, 0.5, 1.0, 2.0, 4.0],
            process_share: 0.1,
            observation_share: 0.5,
            changepoint_ratio: 2.0,
            confidence: 0.95,
        }
    }

    /// Sets the adaptation policy.
    pub fn with_policy(mut self, policy: AdaptationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the warm-up and look-back window length.
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Sets α, the weight kept on the previous noise estimate.
    pub fn with_forgetting_factor(mut self, alpha: f64) -> Self {
        self.forgetting_factor = alpha;
        self
    }

    /// Sets the minimum value of every adapted diagonal entry.
    pub fn with_noise_floor(mut self, floor: f64) -> Self {
        self.noise_floor = floor;
        self
    }

    /// Also adapt Q under the innovation policy.
    pub fn with_adapt_process_noise(mut self, adapt: bool) -> Self {
        self.adapt_process_noise = adapt;
        self
    }

    /// Sets the R multipliers tried by the likelihood policy.
    pub fn with_likelihood_grid(mut self, grid: Vec<f64>) -> Self {
        self.likelihood_grid = grid;
        self
    }

    /// Sets the variance-policy shares of `Var(Δy)` given to Q and R.
    pub fn with_shares(mut self, process_share: f64, observation_share: f64) -> Self {
        self.process_share = process_share;
        self.observation_share = observation_share;
        self
    }

    /// Sets the relative R move that marks a change point.
    pub fn with_changepoint_ratio(mut self, ratio: f64) -> Self {
        self.changepoint_ratio = ratio;
        self
    }

    /// Sets the confidence level for bands and forecasts.
    pub fn with_confidence(mut self, level: f64) -> Self {
        self.confidence = level;
        self
    }

    /// Adaptation policy.
    pub fn policy(&self) -> AdaptationPolicy {
        self.policy
    }

    /// Window length.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Forgetting factor α.
    pub fn forgetting_factor(&self) -> f64 {
        self.forgetting_factor
    }

    /// Noise floor.
    pub fn noise_floor(&self) -> f64 {
        self.noise_floor
    }

    /// Whether Q is adapted by the innovation policy.
    pub fn adapt_process_noise(&self) -> bool {
        self.adapt_process_noise
    }

    /// Likelihood-policy grid.
    pub fn likelihood_grid(&self) -> &[f64] {
        &self.likelihood_grid
    }

    /// Variance-policy share for Q.
    pub fn process_share(&self) -> f64 {
        self.process_share
    }

    /// Variance-policy share for R.
    pub fn observation_share(&self) -> f64 {
        self.observation_share
    }

    /// Change-point ratio.
    pub fn changepoint_ratio(&self) -> f64 {
        self.changepoint_ratio
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
    /// | `InvalidConfig` | `window < 2`, α outside [0, 1), non-positive floor, shares or grid factors, an empty grid, ratio ≤ 1, or confidence outside (0, 1) |
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.window < 2 {
            return Err(FilterError::InvalidConfig {
                field: "window",
                reason: format!("must be at least 2, got {}", self.window),
            });
        }
        if !(0.0..1.0).contains(&self.forgetting_factor) {
            return Err(FilterError::InvalidConfig {
                field: "forgetting_factor",
                reason: format!("must be in [0, 1), got {}", self.forgetting_factor),
            });
        }
        for (field, value) in [
            ("noise_floor", self.noise_floor),
            ("process_share", self.process_share),
            ("observation_share", self.observation_share),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(FilterError::InvalidConfig {
                    field,
                    reason: format!("must be positive and finite, got {value}"),
                });
            }
        }
        if self.likelihood_grid.is_empty()
            || self.likelihood_grid.iter().any(|g| !(*g > 0.0 && g.is_finite()))
        {
            return Err(FilterError::InvalidConfig {
                field: "likelihood_grid",
                reason: "must be a non-empty list of positive factors".to_string(),
            });
        }
        if !(self.changepoint_ratio > 1.0) {
            return Err(FilterError::InvalidConfig {
                field: "changepoint_ratio",
                reason: format!("must exceed 1, got {}", self.changepoint_ratio),
            });
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(FilterError::InvalidConfig {
                field: "confidence",
                reason: format!("must be in (0, 1), got {}", self.confidence),
            });
        }
        Ok(())
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// One adaptation step.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationRecord {
    /// Step whose prediction used the adapted noise.
    pub step: usize,
    /// Adapted `R[0,0]`.
    pub observation_noise: f64,
    /// Adapted `Q[0,0]`.
    pub process_noise: f64,
    /// First innovation component of the step.
    pub innovation: f64,
}

/// Output of [`AdaptiveKalmanFilter::fit_adaptive`].
#[derive(Debug, Clone)]
pub struct AdaptiveResult {
    result: FilterResult,
    policy: AdaptationPolicy,
    observation_noise: Vec<f64>,
    process_noise: Vec<f64>,
    history: Vec<AdaptationRecord>,
    changepoints: Vec<usize>,
    final_model: StateSpaceModel,
}

impl AdaptiveResult {
    /// Common filter result.
    pub fn result(&self) -> &FilterResult {
        &self.result
    }

    /// Consumes `self` and returns the common filter result.
    pub fn into_result(self) -> FilterResult {
        self.result
    }

    /// Policy that produced this result.
    pub fn policy(&self) -> AdaptationPolicy {
        self.policy
    }

    /// `R[0,0]` used at each step.
    pub fn observation_noise(&self) -> &[f64] {
        &self.observation_noise
    }

    /// `Q[0,0]` used at each step.
    pub fn process_noise(&self) -> &[f64] {
        &self.process_noise
    }

    /// Every adaptation, in step order.
    pub fn history(&self) -> &[AdaptationRecord] {
        &self.history
    }

    /// Steps at which R moved by at least the change-point ratio.
    pub fn changepoints(&self) -> &[usize] {
        &self.changepoints
    }

    /// Model carrying the last adapted Q and R.
    pub fn final_model(&self) -> &StateSpaceModel {
        &self.final_model
    }
}

/// Kalman filter that adapts Q and R while filtering.
#[derive(Debug, Clone)]
pub struct AdaptiveKalmanFilter {
    model: StateSpaceModel,
    config: AdaptiveConfig,
    last_state: Option<FilterState>,
    final_model: Option<StateSpaceModel>,
}

impl AdaptiveKalmanFilter {
    /// Creates a filter starting from `model`'s noise.
    ///
    /// # Errors
    ///
    /// Returns the first [`AdaptiveConfig::validate`] failure.
    pub fn new(model: StateSpaceModel, config: AdaptiveConfig) -> Result<Self, FilterError> {
        config.validate()?;
        Ok(Self {
            model,
            config,
            last_state: None,
            final_model: None,
        })
    }

    /// Model whose noise seeds the adaptation.
    pub fn model(&self) -> &StateSpaceModel {
        &self.model
    }

    /// Configuration in use.
    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Result identifier, e.g. `adaptive_innovation`.
    pub fn name(&self) -> String {
        format!("adaptive_{}", self.config.policy.name())
    }

    /// Filters and smooths `series` with online noise adaptation.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `DimensionMismatch` | series dimension differs from the model's |
    /// | `NumericalInstability` | the recursion or smoother broke down |
    /// | `InvalidMatrix` | the adapted noise is not PSD |
    #[tracing::instrument(skip(self, series), fields(policy = %self.config.policy, n_obs = series.len()))]
    pub fn fit_adaptive(&mut self, series: &Series) -> Result<AdaptiveResult, FilterError> {
        check_series(&self.model, series)?;
        let n = series.len();
        let f = self.model.transition();
        let h = self.model.observation();
        let observations = series.values();

        let mut q = self.model.process_noise().clone();
        let mut r = self.model.observation_noise().clone();

        let mut filtered = Vec::with_capacity(n);
        let mut predicted = Vec::with_capacity(n);
        let mut q_used: Vec<Array2<f64>> = Vec::with_capacity(n);
        let mut corrections: Vec<Array2<f64>> = Vec::with_capacity(n);
        let mut observation_noise = Vec::with_capacity(n);
        let mut process_noise = Vec::with_capacity(n);
        let mut history = Vec::new();
        let mut changepoints = Vec::new();
        let mut anchor = r[[0, 0]];

        let (p0, f0) = seed_states(&self.model, series.row(0), series.timestamp(0));
        predicted.push(p0);
        filtered.push(f0);
        q_used.push(q.clone());
        corrections.push(Array2::zeros(q.dim()));
        observation_noise.push(r[[0, 0]]);
        process_noise.push(q[[0, 0]]);
        let mut log_likelihood = 0.0;

        for t in 1..n {
            // Innovations for steps 1..t are available; step 0 is the seed.
            let adapted = t > self.config.window;
            if adapted {
                let lo = t - self.config.window;
                match self.config.policy {
                    AdaptationPolicy::Innovation => {
                        self.adapt_innovation(&mut q, &mut r, &filtered[lo..t], &corrections[lo..t]);
                    }
                    AdaptationPolicy::Likelihood => {
                        let start: &FilterState = &filtered[lo];
                        let window = observations.slice(s![lo + 1..t, ..]);
                        r = self.adapt_likelihood(&q, &r, start, window, lo + 1);
                    }
                    AdaptationPolicy::Variance => {
                        self.adapt_variance(&mut q, &mut r, observations.slice(s![lo..t, ..]));
                    }
                }
                apply_floor(&mut q, self.config.noise_floor);
                apply_floor(&mut r, self.config.noise_floor);
            }

            let prev = &filtered[t - 1];
            let (x_pred, p_pred) = predict_moments(f, &q, prev.mean(), prev.covariance());
            let upd = update_moments(h, &r, &x_pred, &p_pred, series.row(t), t)?;
            log_likelihood += upd.log_likelihood;

            let kv = upd.gain.dot(&upd.innovation);
            corrections.push(outer(&kv));

            if adapted {
                history.push(AdaptationRecord {
                    step: t,
                    observation_noise: r[[0, 0]],
                    process_noise: q[[0, 0]],
                    innovation: upd.innovation[0],
                });
                let ratio = r[[0, 0]] / anchor;
                if ratio >= self.config.changepoint_ratio
                    || ratio <= 1.0 / self.config.changepoint_ratio
                {
                    debug!(step = t, from = anchor, to = r[[0, 0]], "change point");
                    changepoints.push(t);
                    anchor = r[[0, 0]];
                }
            }

            let ts = series.timestamp(t);
            predicted.push(
                FilterState::new(t, x_pred, p_pred)
                    .with_timestamp(ts)
                    .with_log_likelihood(upd.log_likelihood)
                    .with_innovation(upd.innovation.clone(), upd.innovation_covariance.clone()),
            );
            filtered.push(
                FilterState::new(t, upd.mean, upd.covariance)
                    .with_timestamp(ts)
                    .with_log_likelihood(upd.log_likelihood)
                    .with_innovation(upd.innovation, upd.innovation_covariance),
            );
            q_used.push(q.clone());
            observation_noise.push(r[[0, 0]]);
            process_noise.push(q[[0, 0]]);
        }

        let smoothed = smoother::rts_smooth(f, &filtered, |t| q_used[t].clone())?;
        let final_model = self.model.with_noise(q, r)?;

        info!(
            log_likelihood,
            adaptations = history.len(),
            changepoints = changepoints.len(),
            final_r = final_model.observation_noise()[[0, 0]],
            "adaptive pass complete"
        );

        let result = assemble_linear(
            self.name(),
            &final_model,
            filtered,
            smoothed,
            predicted,
            log_likelihood,
            self.model.n_params(),
            self.config.confidence,
            series,
        )?;

        self.last_state = result.last_state().cloned();
        self.final_model = Some(final_model.clone());

        Ok(AdaptiveResult {
            result,
            policy: self.config.policy,
            observation_noise,
            process_noise,
            history,
            changepoints,
            final_model,
        })
    }

    /// Forecasts from the last filtered state with the last adapted noise.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `NotFitted` | [`fit_adaptive`](Self::fit_adaptive) has not succeeded |
    /// | others | see [`ForecastEngine::forecast`] |
    pub fn forecast(&self, horizon: usize) -> Result<Forecast, FilterError> {
        match (&self.last_state, &self.final_model) {
            (Some(last), Some(model)) => ForecastEngine::new(model)
                .with_confidence(self.config.confidence)
                .forecast(last, horizon),
            _ => Err(FilterError::NotFitted),
        }
    }

    fn adapt_innovation(
        &self,
        q: &mut Array2<f64>,
        r: &mut Array2<f64>,
        window: &[FilterState],
        corrections: &[Array2<f64>],
    ) {
        let alpha = self.config.forgetting_factor;
        for j in 0..r.nrows() {
            let v: Vec<f64> = window.iter().map(|s| s.innovation()[j]).collect();
            let var = kalmar_stats::population_variance(&v);
            for k in 0..r.ncols() {
                r[[j, k]] *= alpha;
            }
            r[[j, j]] += (1.0 - alpha) * var;
        }
        if self.config.adapt_process_noise {
            let mut mean = Array2::<f64>::zeros(q.dim());
            for c in corrections {
                mean += c;
            }
            mean /= corrections.len() as f64;
            *q = &*q * alpha + &(mean * (1.0 - alpha));
        }
    }

    fn adapt_likelihood(
        &self,
        q: &Array2<f64>,
        r: &Array2<f64>,
        start: &FilterState,
        window: ndarray::ArrayView2<'_, f64>,
        first_step: usize,
    ) -> Array2<f64> {
        let mut best = (f64::NEG_INFINITY, 1.0);
        for &g in &self.config.likelihood_grid {
            let candidate = r * g;
            let ll = window_log_likelihood(
                &self.model,
                q,
                &candidate,
                start.mean(),
                start.covariance(),
                window,
                first_step,
            )
            .unwrap_or(f64::NEG_INFINITY);
            if ll > best.0 {
                best = (ll, g);
            }
        }
        r * best.1
    }

    fn adapt_variance(
        &self,
        q: &mut Array2<f64>,
        r: &mut Array2<f64>,
        window: ndarray::ArrayView2<'_, f64>,
    ) {
        let variances: Vec<f64> = (0..window.ncols())
            .map(|j| {
                let column: Vec<f64> = window.column(j).to_vec();
                kalmar_stats::population_variance(&kalmar_stats::diff(&column))
            })
            .collect();
        for (j, v) in variances.iter().enumerate() {
            r[[j, j]] = self.config.observation_share * v;
        }
        let target = self.config.process_share * variances[0];
        let q00 = q[[0, 0]];
        if q00 > 0.0 {
            *q *= target / q00;
        } else {
            q[[0, 0]] = target;
        }
    }
}

impl StateEstimator for AdaptiveKalmanFilter {
    type Error = FilterError;

    fn fit(&mut self, series: &Series) -> Result<FilterResult, FilterError> {
        self.fit_adaptive(series).map(AdaptiveResult::into_result)
    }

    fn forecast(&self, horizon: usize) -> Result<Forecast, FilterError> {
        AdaptiveKalmanFilter::forecast(self, horizon)
    }
}

fn apply_floor(m: &mut Array2<f64>, floor: f64) {
    for i in 0..m.nrows() {
        if !(m[[i, i]] >= floor) {
            m[[i, i]] = floor;
        }
    }
}

fn outer(v: &Array1<f64>) -> Array2<f64> {
    let n = v.len();
    Array2::from_shape_fn((n, n), |(i, j)| v[i] * v[j])
}
