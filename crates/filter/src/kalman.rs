//! Linear Kalman filter: predict/update recursion and the streaming filter.
//!
//! # Recursion
//!
//! | Step | Formula |
//! |------|---------|
//! | predict | `x⁻ = F·x`, `P⁻ = F·P·Fᵀ + Q` |
//! | innovation | `v = y − H·x⁻`, `S = H·P⁻·Hᵀ + R` |
//! | gain | `K = P⁻·Hᵀ·S⁻¹` |
//! | update | `x = x⁻ + K·v`, `P = (I − K·H)·P⁻·(I − K·H)ᵀ + K·R·Kᵀ` |
//! | log-likelihood | `−½·(m·ln 2π + ln det S + vᵀ·S⁻¹·v)` |
//!
//! The covariance update uses the Joseph form and is symmetrised after every
//! step, so P stays symmetric PSD even when `K` is computed from a
//! regularised `S`.
//!
//! The first observation seeds the state (see
//! [`StateSpaceModel::seed_mean`]) and contributes zero log-likelihood.

use std::f64::consts::PI;

use chrono::NaiveDateTime;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use tracing::{debug, warn};

use crate::error::FilterError;
use crate::estimator::StateEstimator;
use crate::forecast::{Forecast, ForecastEngine};
use crate::linalg;
use crate::model::StateSpaceModel;
use crate::result::{FilterResult, FilterResultParts};
use crate::series::Series;
use crate::smoother;
use crate::state::FilterState;

/// Output of a single measurement update.
#[derive(Debug, Clone)]
pub(crate) struct Update {
    pub(crate) mean: Array1<f64>,
    pub(crate) covariance: Array2<f64>,
    pub(crate) innovation: Array1<f64>,
    pub(crate) innovation_covariance: Array2<f64>,
    pub(crate) gain: Array2<f64>,
    pub(crate) log_likelihood: f64,
}

/// Time update `x⁻ = F·x`, `P⁻ = F·P·Fᵀ + Q`.
pub(crate) fn predict_moments(
    f: &Array2<f64>,
    q: &Array2<f64>,
    mean: &Array1<f64>,
    cov: &Array2<f64>,
) -> (Array1<f64>, Array2<f64>) {
    let x = f.dot(mean);
    let mut p = f.dot(cov).dot(&f.t()) + q;
    linalg::symmetrize(&mut p);
    (x, p)
}

/// Measurement update against observation `y`.
///
/// # Errors
///
/// | Variant | Trigger |
/// |---------|---------|
/// | `NumericalInstability` | `S` singular after the ridge, or a non-finite result |
pub(crate) fn update_moments(
    h: &Array2<f64>,
    r: &Array2<f64>,
    x_pred: &Array1<f64>,
    p_pred: &Array2<f64>,
    y: ArrayView1<'_, f64>,
    step: usize,
) -> Result<Update, FilterError> {
    let m = h.nrows();
    let innovation = &y - &h.dot(x_pred);
    let mut s = h.dot(p_pred).dot(&h.t()) + r;
    linalg::symmetrize(&mut s);

    let inv = linalg::spd_inverse(&s, step, "innovation covariance")?;
    let gain = p_pred.dot(&h.t()).dot(&inv.inverse);
    let mean = x_pred + &gain.dot(&innovation);

    let n = x_pred.len();
    let a = linalg::identity(n) - &gain.dot(h);
    let mut covariance = a.dot(p_pred).dot(&a.t()) + &gain.dot(r).dot(&gain.t());
    linalg::symmetrize(&mut covariance);

    let log_likelihood = -0.5
        * (m as f64 * (2.0 * PI).ln()
            + inv.ln_det
            + linalg::quadratic_form(&innovation, &inv.inverse));

    if !log_likelihood.is_finite() || mean.iter().chain(covariance.iter()).any(|v| !v.is_finite())
    {
        return Err(FilterError::NumericalInstability {
            step,
            reason: "updated state is not finite".to_string(),
        });
    }

    Ok(Update {
        mean,
        covariance,
        innovation,
        innovation_covariance: s,
        gain,
        log_likelihood,
    })
}

/// Seeding step for the first observation.
///
/// Returns `(predicted, filtered)`: the prior and the seeded state. Both
/// carry a zero innovation and `S = H·P0·Hᵀ + R`.
pub(crate) fn seed_states(
    model: &StateSpaceModel,
    y: ArrayView1<'_, f64>,
    timestamp: Option<NaiveDateTime>,
) -> (FilterState, FilterState) {
    let h = model.observation();
    let p0 = model.initial_covariance().clone();
    let mut s = h.dot(&p0).dot(&h.t()) + model.observation_noise();
    linalg::symmetrize(&mut s);
    let zero = Array1::zeros(model.obs_dim());

    let predicted = FilterState::new(0, model.initial_mean().clone(), p0.clone())
        .with_timestamp(timestamp)
        .with_innovation(zero.clone(), s.clone());
    let filtered = FilterState::new(0, model.seed_mean(y), p0)
        .with_timestamp(timestamp)
        .with_innovation(zero, s);
    (predicted, filtered)
}

/// Log-likelihood of `observations` starting from a filtered state at
/// `first_step - 1`, with fixed noise `q` and `r`.
pub(crate) fn window_log_likelihood(
    model: &StateSpaceModel,
    q: &Array2<f64>,
    r: &Array2<f64>,
    start_mean: &Array1<f64>,
    start_cov: &Array2<f64>,
    observations: ArrayView2<'_, f64>,
    first_step: usize,
) -> Result<f64, FilterError> {
    let f = model.transition();
    let h = model.observation();
    let mut mean = start_mean.clone();
    let mut cov = start_cov.clone();
    let mut total = 0.0;
    for (k, y) in observations.rows().into_iter().enumerate() {
        let (x_pred, p_pred) = predict_moments(f, q, &mean, &cov);
        let upd = update_moments(h, r, &x_pred, &p_pred, y, first_step + k)?;
        total += upd.log_likelihood;
        mean = upd.mean;
        cov = upd.covariance;
    }
    Ok(total)
}

/// Total log-likelihood of a full forward pass, without storing states.
///
/// This is the optimizer's objective.
///
/// # Errors
///
/// | Variant | Trigger |
/// |---------|---------|
/// | `EmptyData` | no observations |
/// | `NumericalInstability` | the recursion broke down |
pub(crate) fn forward_log_likelihood(
    model: &StateSpaceModel,
    observations: ArrayView2<'_, f64>,
) -> Result<f64, FilterError> {
    if observations.nrows() == 0 {
        return Err(FilterError::EmptyData);
    }
    let mean = model.seed_mean(observations.row(0));
    window_log_likelihood(
        model,
        model.process_noise(),
        model.observation_noise(),
        &mean,
        model.initial_covariance(),
        observations.slice(s![1.., ..]),
        1,
    )
}

/// Maps states to observation space: `H·x` and `diag(H·P·Hᵀ)`.
pub(crate) fn observation_moments(
    h: &Array2<f64>,
    states: &[FilterState],
) -> (Array2<f64>, Array2<f64>) {
    let m = h.nrows();
    let mut values = Array2::zeros((states.len(), m));
    let mut variances = Array2::zeros((states.len(), m));
    for (t, state) in states.iter().enumerate() {
        values.row_mut(t).assign(&h.dot(state.mean()));
        let cov = h.dot(state.covariance()).dot(&h.t());
        variances.row_mut(t).assign(&cov.diag());
    }
    (values, variances)
}

/// Diagonal of each state's innovation covariance, as an `n x m` matrix.
pub(crate) fn innovation_variances(states: &[FilterState], m: usize) -> Array2<f64> {
    let mut out = Array2::zeros((states.len(), m));
    for (t, state) in states.iter().enumerate() {
        let s = state.innovation_covariance();
        for j in 0..m.min(s.nrows()) {
            out[[t, j]] = s[[j, j]];
        }
    }
    out
}

/// Checks that `series` matches the model's observation dimension.
pub(crate) fn check_series(model: &StateSpaceModel, series: &Series) -> Result<(), FilterError> {
    if series.dim() != model.obs_dim() {
        return Err(FilterError::DimensionMismatch {
            what: "observation series",
            expected: format!("n x {}", model.obs_dim()),
            got: format!("{} x {}", series.len(), series.dim()),
        });
    }
    Ok(())
}

/// Streaming linear Kalman filter over a fixed [`StateSpaceModel`].
///
/// Use [`predict`](Self::predict) and [`update`](Self::update) one step at
/// a time, [`step`](Self::step) to do both, or [`fit`](Self::fit) to run a
/// whole series, smooth it and assemble a [`FilterResult`].
///
/// If an update fails numerically the filter keeps its predicted state,
/// whose covariance already includes the step's process noise, and returns
/// the error.
///
/// # Example
///
/// ```
/// use kalmar_filter::{LinearKalmanFilter, Series, StateSpaceModel};
///
/// let series = Series::scalar(&[100.0, 101.0, 99.0, 102.0, 98.0, 103.0]).unwrap();
/// let mut kf = LinearKalmanFilter::new(StateSpaceModel::local_level());
/// let result = kf.fit(&series).unwrap();
/// assert_eq!(result.fitted()[[0, 0]], 100.0);
/// ```
#[derive(Debug, Clone)]
pub struct LinearKalmanFilter {
    model: StateSpaceModel,
    confidence: f64,
    mean: Array1<f64>,
    covariance: Array2<f64>,
    next_step: usize,
    log_likelihood: f64,
    filtered: Vec<FilterState>,
    predicted: Vec<FilterState>,
}

impl LinearKalmanFilter {
    /// Creates a filter positioned at the model's prior.
    pub fn new(model: StateSpaceModel) -> Self {
        let mean = model.initial_mean().clone();
        let covariance = model.initial_covariance().clone();
        Self {
            model,
            confidence: 0.95,
            mean,
            covariance,
            next_step: 0,
            log_likelihood: 0.0,
            filtered: Vec::new(),
            predicted: Vec::new(),
        }
    }

    /// Sets the confidence level for result bands and forecasts.
    pub fn with_confidence(mut self, level: f64) -> Self {
        self.confidence = level;
        self
    }

    /// Returns to the prior and forgets all processed observations.
    pub fn reset(&mut self) {
        self.mean = self.model.initial_mean().clone();
        self.covariance = self.model.initial_covariance().clone();
        self.next_step = 0;
        self.log_likelihood = 0.0;
        self.filtered.clear();
        self.predicted.clear();
    }

    /// Time update: `x ← F·x`, `P ← F·P·Fᵀ + Q`.
    ///
    /// Repeated calls without an update propagate further ahead.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `NumericalInstability` | the predicted state is not finite |
    pub fn predict(&mut self) -> Result<(), FilterError> {
        let (x, p) = predict_moments(
            self.model.transition(),
            self.model.process_noise(),
            &self.mean,
            &self.covariance,
        );
        if x.iter().chain(p.iter()).any(|v| !v.is_finite()) {
            return Err(FilterError::NumericalInstability {
                step: self.next_step,
                reason: "predicted state is not finite".to_string(),
            });
        }
        self.mean = x;
        self.covariance = p;
        Ok(())
    }

    /// Measurement update against `y`.
    ///
    /// The first observation seeds the state instead of updating it.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `DimensionMismatch` | `y` does not have the model's observation dimension |
    /// | `NumericalInstability` | `S` is singular after the ridge, or the result is non-finite |
    pub fn update(&mut self, y: ArrayView1<'_, f64>) -> Result<&FilterState, FilterError> {
        self.update_at(y, None)
    }

    /// Predict (except before the first observation), then update.
    ///
    /// # Errors
    ///
    /// Same as [`predict`](Self::predict) and [`update`](Self::update).
    pub fn step(&mut self, y: ArrayView1<'_, f64>) -> Result<&FilterState, FilterError> {
        self.step_at(y, None)
    }

    /// Resets, then filters every observation of `series`.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `DimensionMismatch` | series dimension differs from the model's |
    /// | `NumericalInstability` | the recursion broke down |
    #[tracing::instrument(skip(self, series), fields(model = %self.model.family(), n_obs = series.len()))]
    pub fn run(&mut self, series: &Series) -> Result<(), FilterError> {
        check_series(&self.model, series)?;
        self.reset();
        for t in 0..series.len() {
            self.step_at(series.row(t), series.timestamp(t))?;
        }
        debug!(log_likelihood = self.log_likelihood, "forward pass complete");
        Ok(())
    }

    /// RTS-smooths the stored forward pass.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `NumericalInstability` | a predicted covariance is singular after the ridge |
    pub fn smooth(&self) -> Result<Vec<FilterState>, FilterError> {
        let q = self.model.process_noise();
        smoother::rts_smooth(self.model.transition(), &self.filtered, |_| q.clone())
    }

    /// Filters and smooths `series`, returning the full result.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run) and [`smooth`](Self::smooth).
    pub fn fit(&mut self, series: &Series) -> Result<FilterResult, FilterError> {
        self.run(series)?;
        let smoothed = self.smooth()?;
        let name = format!("linear_{}", self.model.name());
        assemble_linear(
            name,
            &self.model,
            self.filtered.clone(),
            smoothed,
            self.predicted.clone(),
            self.log_likelihood,
            self.model.n_params(),
            self.confidence,
            series,
        )
    }

    /// Forecasts `horizon` steps past the last processed observation.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `NotFitted` | no observation has been processed |
    /// | others | see [`ForecastEngine::forecast`] |
    pub fn forecast(&self, horizon: usize) -> Result<Forecast, FilterError> {
        let last = self.filtered.last().ok_or(FilterError::NotFitted)?;
        ForecastEngine::new(&self.model)
            .with_confidence(self.confidence)
            .forecast(last, horizon)
    }

    /// Model in use.
    pub fn model(&self) -> &StateSpaceModel {
        &self.model
    }

    /// Current state mean (predicted if `predict` was the last call).
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Current state covariance.
    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    /// Cumulative log-likelihood of the processed observations.
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    /// Filtered states so far.
    pub fn filtered_states(&self) -> &[FilterState] {
        &self.filtered
    }

    /// Predicted states so far.
    pub fn predicted_states(&self) -> &[FilterState] {
        &self.predicted
    }

    fn step_at(
        &mut self,
        y: ArrayView1<'_, f64>,
        timestamp: Option<NaiveDateTime>,
    ) -> Result<&FilterState, FilterError> {
        if !self.filtered.is_empty() {
            self.predict()?;
        }
        self.update_at(y, timestamp)
    }

    fn update_at(
        &mut self,
        y: ArrayView1<'_, f64>,
        timestamp: Option<NaiveDateTime>,
    ) -> Result<&FilterState, FilterError> {
        let m = self.model.obs_dim();
        if y.len() != m {
            return Err(FilterError::DimensionMismatch {
                what: "observation",
                expected: m.to_string(),
                got: y.len().to_string(),
            });
        }
        let step = self.next_step;

        let (predicted, filtered) = if self.filtered.is_empty() {
            seed_states(&self.model, y, timestamp)
        } else {
            let upd = match update_moments(
                self.model.observation(),
                self.model.observation_noise(),
                &self.mean,
                &self.covariance,
                y,
                step,
            ) {
                Ok(u) => u,
                Err(e) => {
                    warn!(step, error = %e, "update failed; keeping predicted state");
                    return Err(e);
                }
            };
            let predicted = FilterState::new(step, self.mean.clone(), self.covariance.clone())
                .with_timestamp(timestamp)
                .with_log_likelihood(upd.log_likelihood)
                .with_innovation(upd.innovation.clone(), upd.innovation_covariance.clone());
            let filtered = FilterState::new(step, upd.mean, upd.covariance)
                .with_timestamp(timestamp)
                .with_log_likelihood(upd.log_likelihood)
                .with_innovation(upd.innovation, upd.innovation_covariance);
            (predicted, filtered)
        };

        self.mean = filtered.mean().clone();
        self.covariance = filtered.covariance().clone();
        self.log_likelihood += filtered.log_likelihood();
        self.next_step += 1;
        self.predicted.push(predicted);
        self.filtered.push(filtered);
        Ok(&self.filtered[self.filtered.len() - 1])
    }
}

impl StateEstimator for LinearKalmanFilter {
    type Error = FilterError;

    fn fit(&mut self, series: &Series) -> Result<FilterResult, FilterError> {
        LinearKalmanFilter::fit(self, series)
    }

    fn forecast(&self, horizon: usize) -> Result<Forecast, FilterError> {
        LinearKalmanFilter::forecast(self, horizon)
    }
}

/// Builds a [`FilterResult`] from linear-Gaussian state sequences.
#[allow(clippy::too_many_arguments)]
pub(crate) fn assemble_linear(
    name: String,
    model: &StateSpaceModel,
    filtered: Vec<FilterState>,
    smoothed: Vec<FilterState>,
    predicted: Vec<FilterState>,
    log_likelihood: f64,
    n_params: usize,
    confidence: f64,
    series: &Series,
) -> Result<FilterResult, FilterError> {
    let h = model.observation();
    let (fitted, fitted_variance) = observation_moments(h, &filtered);
    let (smoothed_values, smoothed_variance) = observation_moments(h, &smoothed);
    let (predictions, _) = observation_moments(h, &predicted);
    let prediction_variance = innovation_variances(&predicted, model.obs_dim());

    FilterResult::from_parts(
        FilterResultParts {
            name,
            model: Some(model.clone()),
            filtered,
            smoothed,
            predicted,
            fitted,
            fitted_variance,
            smoothed_values,
            smoothed_variance,
            predictions,
            prediction_variance,
            log_likelihood,
            n_params,
            confidence,
            bands: None,
        },
        series.values(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn update_by_hand() {
        // P⁻ = 1.1, R = 1 -> S = 2.1, K = 1.1 / 2.1
        let upd = update_moments(
            &array![[1.0]],
            &array![[1.0]],
            &array![100.0],
            &array![[1.1]],
            array![101.0].view(),
            1,
        )
        .unwrap();
        let k = 1.1 / 2.1;
        assert_abs_diff_eq!(upd.gain[[0, 0]], k, epsilon = 1e-12);
        assert_abs_diff_eq!(upd.mean[0], 100.0 + k, epsilon = 1e-12);
        assert_abs_diff_eq!(upd.covariance[[0, 0]], (1.0 - k) * 1.1, epsilon = 1e-12);
        let ll = -0.5 * ((2.0 * PI).ln() + 2.1_f64.ln() + 1.0 / 2.1);
        assert_abs_diff_eq!(upd.log_likelihood, ll, epsilon = 1e-12);
    }

    #[test]
    fn update_singular_innovation_is_regularised() {
        let upd = update_moments(
            &array![[1.0]],
            &array![[0.0]],
            &array![0.0],
            &array![[0.0]],
            array![1.0].view(),
            4,
        )
        .unwrap();
        // S = 0 is invertible only after the ridge; the observation is
        // then wildly unlikely but the state stays finite.
        assert!(upd.mean.iter().all(|v| v.is_finite()));
        assert!(upd.log_likelihood < -1e6);
    }

    #[test]
    fn seed_from_first_observation() {
        let mut kf = LinearKalmanFilter::new(StateSpaceModel::local_level());
        let s = kf.step(array![42.0].view()).unwrap();
        assert_abs_diff_eq!(s.mean()[0], 42.0, epsilon = 1e-12);
        assert_eq!(s.log_likelihood(), 0.0);
        assert_abs_diff_eq!(s.covariance()[[0, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn predict_only_grows_covariance() {
        let mut kf = LinearKalmanFilter::new(StateSpaceModel::local_trend());
        let mut prev = kf.covariance().diag().to_owned();
        for _ in 0..50 {
            kf.predict().unwrap();
            let diag = kf.covariance().diag().to_owned();
            for (a, b) in diag.iter().zip(prev.iter()) {
                assert!(a + 1e-12 >= *b);
            }
            prev = diag;
        }
    }

    #[test]
    fn wrong_observation_dimension() {
        let mut kf = LinearKalmanFilter::new(StateSpaceModel::local_level());
        let err = kf.update(array![1.0, 2.0].view()).unwrap_err();
        assert!(matches!(err, FilterError::DimensionMismatch { .. }));
    }

    #[test]
    fn failed_update_keeps_predicted_state() {
        let model = StateSpaceModel::local_level();
        let mut kf = LinearKalmanFilter::new(model);
        kf.step(array![1.0].view()).unwrap();
        kf.predict().unwrap();
        let predicted_var = kf.covariance()[[0, 0]];
        let err = kf.update(array![1.0, 2.0].view());
        assert!(err.is_err());
        assert_abs_diff_eq!(kf.covariance()[[0, 0]], predicted_var, epsilon = 1e-12);
        assert_eq!(kf.filtered_states().len(), 1);
    }

    #[test]
    fn forward_log_likelihood_matches_fit() {
        let series = Series::scalar(&[1.0, 2.0, 1.5, 3.0, 2.5]).unwrap();
        let model = StateSpaceModel::local_level();
        let ll = forward_log_likelihood(&model, series.values()).unwrap();
        let result = LinearKalmanFilter::new(model).fit(&series).unwrap();
        assert_abs_diff_eq!(ll, result.log_likelihood(), epsilon = 1e-10);
    }

    #[test]
    fn forecast_requires_fit() {
        let kf = LinearKalmanFilter::new(StateSpaceModel::local_level());
        assert_eq!(kf.forecast(3).unwrap_err(), FilterError::NotFitted);
    }

    #[test]
    fn fit_rejects_dimension_mismatch() {
        let series = Series::vector(array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        let err = LinearKalmanFilter::new(StateSpaceModel::local_level())
            .fit(&series)
            .unwrap_err();
        assert!(matches!(err, FilterError::DimensionMismatch { .. }));
    }
}
