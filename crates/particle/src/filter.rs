//! Bootstrap particle filter.

use kalmar_filter::{
    ConfidenceBands, FilterError, FilterResult, FilterResultParts, FilterState, Forecast, Series,
    StateEstimator, linalg,
};
use ndarray::{Array1, Array2, ArrayView1, Axis, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::{debug, info, warn};

use crate::config::ParticleConfig;
use crate::error::ParticleError;
use crate::model::ParticleModel;
use crate::resample::{effective_sample_size, systematic_resample};

/// Log total weight below which the cloud counts as collapsed.
const LN_WEIGHT_FLOOR: f64 = -700.0;

/// Minimum jitter standard deviation per coordinate.
const JITTER_FLOOR: f64 = 1e-8;

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_os_rng(),
    }
}

/// Output of [`ParticleFilter::fit_particles`].
#[derive(Debug, Clone)]
pub struct ParticleResult {
    result: FilterResult,
    ess: Vec<f64>,
    weight_sums: Vec<f64>,
    resampling_steps: Vec<usize>,
    degeneracy_events: Vec<usize>,
}

impl ParticleResult {
    /// Common filter result. Smoothed values equal the filtered ones.
    pub fn result(&self) -> &FilterResult {
        &self.result
    }

    /// Consumes `self` and returns the common filter result.
    pub fn into_result(self) -> FilterResult {
        self.result
    }

    /// Effective sample size after each update, before resampling.
    pub fn ess(&self) -> &[f64] {
        &self.ess
    }

    /// Total weight after each update, before resampling.
    pub fn weight_sums(&self) -> &[f64] {
        &self.weight_sums
    }

    /// Steps at which the cloud was resampled.
    pub fn resampling_steps(&self) -> &[usize] {
        &self.resampling_steps
    }

    /// Steps at which the total weight collapsed and the cloud was reset.
    pub fn degeneracy_events(&self) -> &[usize] {
        &self.degeneracy_events
    }
}

/// Sequential Monte Carlo filter with systematic resampling.
///
/// Noise is drawn sequentially from one explicitly seeded RNG, then each
/// particle is propagated and weighted in parallel. With a fixed seed two
/// runs are bit-for-bit identical.
///
/// # Example
///
/// ```
/// use kalmar_filter::{Series, StateSpaceModel};
/// use kalmar_particle::{LinearGaussian, ParticleConfig, ParticleFilter};
///
/// let model = LinearGaussian::new(StateSpaceModel::local_level()).unwrap();
/// let config = ParticleConfig::new().with_n_particles(200).with_seed(Some(7));
/// let mut pf = ParticleFilter::new(model, config).unwrap();
/// let series = Series::scalar(&[1.0, 1.1, 0.9, 1.2]).unwrap();
/// let out = pf.fit_particles(&series).unwrap();
/// assert_eq!(out.ess().len(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct ParticleFilter<M: ParticleModel> {
    model: M,
    config: ParticleConfig,
    rng: StdRng,
    particles: Option<Array2<f64>>,
    weights: Vec<f64>,
}

impl<M: ParticleModel> ParticleFilter<M> {
    /// Creates a filter.
    ///
    /// # Errors
    ///
    /// Returns the first [`ParticleConfig::validate`] failure.
    pub fn new(model: M, config: ParticleConfig) -> Result<Self, ParticleError> {
        config.validate()?;
        let rng = make_rng(config.seed());
        Ok(Self {
            model,
            config,
            rng,
            particles: None,
            weights: Vec::new(),
        })
    }

    /// Model in use.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Configuration in use.
    pub fn config(&self) -> &ParticleConfig {
        &self.config
    }

    /// Current particle cloud (N x n), if fitted.
    pub fn particles(&self) -> Option<&Array2<f64>> {
        self.particles.as_ref()
    }

    /// Current normalised weights.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Filters `series`, re-seeding the RNG from the configuration.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `Filter(DimensionMismatch)` | series dimension differs from the model's |
    /// | `Filter(InvalidMatrix)` | the initial covariance has no Cholesky factor |
    /// | `ResamplingDegeneracy` | particle states turned non-finite |
    #[tracing::instrument(skip(self, series), fields(model = %self.model.name(), n_particles = self.config.n_particles(), n_obs = series.len()))]
    pub fn fit_particles(&mut self, series: &Series) -> Result<ParticleResult, ParticleError> {
        let m = self.model.obs_dim();
        if series.dim() != m {
            return Err(FilterError::DimensionMismatch {
                what: "observation series",
                expected: format!("n x {m}"),
                got: format!("{} x {}", series.len(), series.dim()),
            }
            .into());
        }
        self.rng = make_rng(self.config.seed());
        let n_obs = series.len();
        let n_particles = self.config.n_particles();
        let level = self.config.confidence();
        let lower_p = (1.0 - level) / 2.0;
        let upper_p = (1.0 + level) / 2.0;

        let (mean0, cov0) = self.model.initial_distribution(series.row(0));
        let factor = linalg::cholesky_psd(&cov0).ok_or(FilterError::InvalidMatrix {
            what: "initial covariance",
            reason: "no Cholesky factor".to_string(),
        })?;
        let z = self.standard_normals(n_particles, mean0.len());
        let mut particles = &z.dot(&factor.t()) + &mean0;
        let mut weights = vec![1.0 / n_particles as f64; n_particles];

        let mut filtered = Vec::with_capacity(n_obs);
        let mut predicted = Vec::with_capacity(n_obs);
        let mut fitted = Array2::zeros((n_obs, m));
        let mut fitted_variance = Array2::zeros((n_obs, m));
        let mut predictions = Array2::zeros((n_obs, m));
        let mut prediction_variance = Array2::zeros((n_obs, m));
        let mut lower = Array2::zeros((n_obs, m));
        let mut upper = Array2::zeros((n_obs, m));
        let mut ess = Vec::with_capacity(n_obs);
        let mut weight_sums = Vec::with_capacity(n_obs);
        let mut resampling_steps = Vec::new();
        let mut degeneracy_events = Vec::new();
        let mut log_likelihood = 0.0;

        for t in 0..n_obs {
            let y = series.row(t);
            let ts = series.timestamp(t);
            let mut log_lik = Array1::<f64>::zeros(n_particles);
            if t > 0 {
                let noise = self.standard_normals(n_particles, self.model.noise_dim());
                let model = &self.model;
                Zip::from(particles.rows_mut())
                    .and(noise.rows())
                    .and(&mut log_lik)
                    .par_for_each(|mut state, eta, ll| {
                        model.propagate(state.view_mut(), eta);
                        *ll = model.log_likelihood(y, state.view());
                    });
            }

            // One-step prediction: propagated cloud under the previous weights.
            let (obs_values, obs_var) = self.observe_cloud(&particles);
            let (pred_mean, pred_cov) = weighted_moments(&particles, &weights);
            let (pred_obs, pred_obs_var) = mixture_moments(&obs_values, &obs_var, &weights);
            predictions.row_mut(t).assign(&pred_obs);
            prediction_variance.row_mut(t).assign(&pred_obs_var);

            let mut step_ll = 0.0;
            if t > 0 {
                let log_w: Vec<f64> = weights
                    .iter()
                    .zip(log_lik.iter())
                    .map(|(w, ll)| w.ln() + ll)
                    .collect();
                let total = log_sum_exp(&log_w);
                if total.is_finite() && total >= LN_WEIGHT_FLOOR {
                    step_ll = total;
                    for (w, lw) in weights.iter_mut().zip(&log_w) {
                        *w = (lw - total).exp();
                    }
                } else {
                    step_ll = if total.is_finite() { total } else { LN_WEIGHT_FLOOR };
                    self.recover(&mut particles, &mut weights, t)?;
                    degeneracy_events.push(t);
                }
            }
            log_likelihood += step_ll;

            let (mean, cov) = weighted_moments(&particles, &weights);
            let (obs_values, _) = self.observe_cloud(&particles);
            let zero_var = Array2::zeros(obs_values.dim());
            let (fit_mean, fit_var) = mixture_moments(&obs_values, &zero_var, &weights);
            fitted.row_mut(t).assign(&fit_mean);
            fitted_variance.row_mut(t).assign(&fit_var);
            for j in 0..m {
                let column: Vec<f64> = obs_values.column(j).to_vec();
                lower[[t, j]] =
                    kalmar_stats::weighted_quantile(&column, &weights, lower_p).unwrap_or(fit_mean[j]);
                upper[[t, j]] =
                    kalmar_stats::weighted_quantile(&column, &weights, upper_p).unwrap_or(fit_mean[j]);
            }

            let innovation = if t == 0 {
                Array1::zeros(m)
            } else {
                &y - &pred_obs
            };
            let s = Array2::from_diag(&pred_obs_var);
            predicted.push(
                FilterState::new(t, pred_mean, pred_cov)
                    .with_timestamp(ts)
                    .with_log_likelihood(step_ll)
                    .with_innovation(innovation.clone(), s.clone()),
            );
            filtered.push(
                FilterState::new(t, mean, cov)
                    .with_timestamp(ts)
                    .with_log_likelihood(step_ll)
                    .with_innovation(innovation, s),
            );

            let step_ess = effective_sample_size(&weights);
            ess.push(step_ess);
            weight_sums.push(weights.iter().sum::<f64>());
            if step_ess < self.config.resample_threshold() * n_particles as f64 {
                let u: f64 = self.rng.random();
                let idx = systematic_resample(&weights, u);
                particles = particles.select(Axis(0), &idx);
                weights.fill(1.0 / n_particles as f64);
                resampling_steps.push(t);
                debug!(step = t, ess = step_ess, "resampled");
            }
        }

        info!(
            log_likelihood,
            resamples = resampling_steps.len(),
            degeneracy_events = degeneracy_events.len(),
            "particle pass complete"
        );

        let result = FilterResult::from_parts(
            FilterResultParts {
                name: "particle".to_string(),
                model: None,
                smoothed: filtered.clone(),
                filtered,
                predicted,
                smoothed_values: fitted.clone(),
                smoothed_variance: fitted_variance.clone(),
                fitted,
                fitted_variance,
                predictions,
                prediction_variance,
                log_likelihood,
                n_params: self.model.n_params(),
                confidence: level,
                bands: Some(ConfidenceBands::new(level, lower, upper)),
            },
            series.values(),
        )?;

        self.particles = Some(particles);
        self.weights = weights;

        Ok(ParticleResult {
            result,
            ess,
            weight_sums,
            resampling_steps,
            degeneracy_events,
        })
    }

    /// Propagates the fitted cloud `horizon` steps without updates.
    ///
    /// Draws from a clone of the filter's RNG, so repeated calls return the
    /// same forecast. The cloud's variance at each step is replaced by its
    /// running maximum (see [`Forecast::from_moments`]).
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `NotFitted` | [`fit_particles`](Self::fit_particles) has not succeeded |
    /// | `InvalidConfig` | `horizon == 0` |
    pub fn forecast(&self, horizon: usize) -> Result<Forecast, ParticleError> {
        let Some(cloud) = &self.particles else {
            return Err(ParticleError::NotFitted);
        };
        if horizon == 0 {
            return Err(ParticleError::InvalidConfig {
                field: "horizon",
                reason: "must be at least 1".to_string(),
            });
        }
        let mut rng = self.rng.clone();
        let mut particles = cloud.clone();
        let m = self.model.obs_dim();
        let mut means = Array2::zeros((horizon, m));
        let mut variances = Array2::zeros((horizon, m));
        for k in 0..horizon {
            let noise = Array2::from_shape_simple_fn(
                (particles.nrows(), self.model.noise_dim()),
                || rng.sample::<f64, _>(StandardNormal),
            );
            let model = &self.model;
            Zip::from(particles.rows_mut())
                .and(noise.rows())
                .par_for_each(|mut state, eta| model.propagate(state.view_mut(), eta));
            let (values, vars) = self.observe_cloud(&particles);
            let (mean, var) = mixture_moments(&values, &vars, &self.weights);
            means.row_mut(k).assign(&mean);
            variances.row_mut(k).assign(&var);
        }
        Ok(Forecast::from_moments(means, variances, self.config.confidence())?)
    }

    fn standard_normals(&mut self, rows: usize, cols: usize) -> Array2<f64> {
        let rng = &mut self.rng;
        Array2::from_shape_simple_fn((rows, cols), || rng.sample::<f64, _>(StandardNormal))
    }

    /// Observation-space mean and variance of every particle.
    fn observe_cloud(&self, particles: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let m = self.model.obs_dim();
        let mut values = Array2::zeros((particles.nrows(), m));
        let mut vars = Array2::zeros((particles.nrows(), m));
        let model = &self.model;
        Zip::from(values.rows_mut())
            .and(vars.rows_mut())
            .and(particles.rows())
            .par_for_each(|mut v, mut s, p| {
                v.assign(&model.observe(p));
                s.assign(&model.observation_variance(p));
            });
        (values, vars)
    }

    /// Resets weights to uniform and jitters the cloud after a collapse.
    fn recover(
        &mut self,
        particles: &mut Array2<f64>,
        weights: &mut [f64],
        step: usize,
    ) -> Result<(), ParticleError> {
        if particles.iter().any(|v| !v.is_finite()) {
            return Err(ParticleError::ResamplingDegeneracy {
                step,
                reason: "non-finite particle state".to_string(),
            });
        }
        warn!(step, "particle weights collapsed; resetting to uniform with jitter");
        let n = particles.nrows();
        weights.fill(1.0 / n as f64);
        let (_, cov) = weighted_moments(particles, weights);
        let scale = self.config.jitter_scale();
        let sd: Array1<f64> = cov.diag().mapv(|v| (v.max(0.0).sqrt() * scale).max(JITTER_FLOOR));
        let jitter = self.standard_normals(n, sd.len());
        *particles += &(&jitter * &sd);
        Ok(())
    }
}

impl<M: ParticleModel> StateEstimator for ParticleFilter<M> {
    type Error = ParticleError;

    fn fit(&mut self, series: &Series) -> Result<FilterResult, ParticleError> {
        self.fit_particles(series).map(ParticleResult::into_result)
    }

    fn forecast(&self, horizon: usize) -> Result<Forecast, ParticleError> {
        ParticleFilter::forecast(self, horizon)
    }
}

/// `ln Σ exp(x)`, stable for large magnitudes. `-inf` for empty input or
/// when every term is `-inf`.
fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Weighted mean and covariance of the rows of `particles`.
fn weighted_moments(particles: &Array2<f64>, weights: &[f64]) -> (Array1<f64>, Array2<f64>) {
    let w = ArrayView1::from(weights);
    let mean = particles.t().dot(&w);
    let centered = particles - &mean;
    let scaled = &centered * &w.insert_axis(Axis(1));
    let mut cov = centered.t().dot(&scaled);
    linalg::symmetrize(&mut cov);
    (mean, cov)
}

/// Mixture mean `Σ w·μ` and variance `Σ w·(σ² + (μ − mean)²)` per column.
fn mixture_moments(
    means: &Array2<f64>,
    variances: &Array2<f64>,
    weights: &[f64],
) -> (Array1<f64>, Array1<f64>) {
    let w = ArrayView1::from(weights);
    let mean = means.t().dot(&w);
    let dev = means - &mean;
    let total = variances + &(&dev * &dev);
    (mean, total.t().dot(&w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinearGaussian;
    use approx::assert_abs_diff_eq;
    use kalmar_filter::StateSpaceModel;
    use ndarray::array;

    fn small_filter(seed: u64) -> ParticleFilter<LinearGaussian> {
        let model = LinearGaussian::new(StateSpaceModel::local_level()).unwrap();
        let config = ParticleConfig::new()
            .with_n_particles(300)
            .with_seed(Some(seed));
        ParticleFilter::new(model, config).unwrap()
    }

    #[test]
    fn test_log_sum_exp() {
        assert_abs_diff_eq!(log_sum_exp(&[0.0, 0.0]), 2f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(log_sum_exp(&[-1000.0, -1000.0]), -1000.0 + 2f64.ln(), epsilon = 1e-9);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_weighted_moments_by_hand() {
        let particles = array![[0.0], [2.0]];
        let (mean, cov) = weighted_moments(&particles, &[0.25, 0.75]);
        assert_abs_diff_eq!(mean[0], 1.5, epsilon = 1e-12);
        // 0.25 * 2.25 + 0.75 * 0.25
        assert_abs_diff_eq!(cov[[0, 0]], 0.75, epsilon = 1e-12);
    }

    #[test]
    fn test_mixture_moments_by_hand() {
        let (mean, var) = mixture_moments(&array![[1.0], [3.0]], &array![[0.5], [1.5]], &[0.5, 0.5]);
        assert_abs_diff_eq!(mean[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(var[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_weights_normalised_after_every_update() {
        let mut pf = small_filter(1);
        let series = Series::scalar(&[5.0, 5.2, 4.9, 5.1, 5.3, 5.0]).unwrap();
        let out = pf.fit_particles(&series).unwrap();
        assert_eq!(out.weight_sums().len(), series.len());
        for (t, sum) in out.weight_sums().iter().enumerate() {
            assert!((sum - 1.0).abs() < 1e-9, "step {t}: weights sum to {sum}");
        }
        assert_abs_diff_eq!(pf.weights().iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        assert_eq!(pf.particles().unwrap().nrows(), 300);
    }

    #[test]
    fn test_first_step_has_no_update() {
        let mut pf = small_filter(2);
        let series = Series::scalar(&[3.0, 3.1]).unwrap();
        let out = pf.fit_particles(&series).unwrap();
        assert_eq!(out.result().filtered_states()[0].log_likelihood(), 0.0);
        assert_abs_diff_eq!(out.ess()[0], 300.0, epsilon = 1e-6);
    }

    #[test]
    fn test_outlier_triggers_degeneracy_event() {
        let model = LinearGaussian::new(
            StateSpaceModel::local_level()
                .with_noise(array![[1e-4]], array![[1e-4]])
                .unwrap()
                .with_initial_variance(1e-4)
                .unwrap(),
        )
        .unwrap();
        let config = ParticleConfig::new().with_n_particles(100).with_seed(Some(3));
        let mut pf = ParticleFilter::new(model, config).unwrap();
        let series = Series::scalar(&[0.0, 0.0, 1e3, 0.0]).unwrap();
        let out = pf.fit_particles(&series).unwrap();
        assert_eq!(out.degeneracy_events(), &[2]);
        assert!(out.result().log_likelihood().is_finite());
        assert_abs_diff_eq!(pf.weights().iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        for sum in out.weight_sums() {
            assert_abs_diff_eq!(*sum, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_forecast_requires_fit_and_is_repeatable() {
        let mut pf = small_filter(4);
        assert_eq!(pf.forecast(3).unwrap_err(), ParticleError::NotFitted);
        pf.fit_particles(&Series::scalar(&[1.0, 1.5, 2.0]).unwrap())
            .unwrap();
        let a = pf.forecast(5).unwrap();
        let b = pf.forecast(5).unwrap();
        assert_eq!(a, b);
        assert!(pf.forecast(0).is_err());
        for k in 1..5 {
            assert!(a.variances()[[k, 0]] >= a.variances()[[k - 1, 0]]);
        }
    }
}
