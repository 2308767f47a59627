//! State-space models the particle filter can run.

use std::f64::consts::PI;

use kalmar_filter::linalg;
use kalmar_filter::{FilterError, StateSpaceModel};
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1};

use crate::error::ParticleError;

/// A (possibly nonlinear) state-space model in sampling form.
///
/// Noise is passed in as standard-normal draws of length
/// [`noise_dim`](Self::noise_dim); the model maps them onto its own process
/// noise. All methods must be pure so particles can be processed in
/// parallel.
pub trait ParticleModel: Send + Sync {
    /// Short identifier, e.g. `local_level` or `stochastic_volatility`.
    fn name(&self) -> String;

    /// State dimension n.
    fn state_dim(&self) -> usize;

    /// Number of standard-normal draws consumed by one `propagate`.
    fn noise_dim(&self) -> usize;

    /// Observation dimension m.
    fn obs_dim(&self) -> usize;

    /// Number of model parameters (k in AIC/BIC).
    fn n_params(&self) -> usize;

    /// Gaussian initial distribution `(mean, covariance)` given the first
    /// observation.
    fn initial_distribution(&self, first: ArrayView1<'_, f64>) -> (Array1<f64>, Array2<f64>);

    /// Advances `state` one step in place using the standard-normal `noise`.
    fn propagate(&self, state: ArrayViewMut1<'_, f64>, noise: ArrayView1<'_, f64>);

    /// `ln p(obs | state)`.
    fn log_likelihood(&self, obs: ArrayView1<'_, f64>, state: ArrayView1<'_, f64>) -> f64;

    /// Observation-space mean `E[y | state]`.
    fn observe(&self, state: ArrayView1<'_, f64>) -> Array1<f64>;

    /// Observation-space variance `diag Var[y | state]`.
    fn observation_variance(&self, state: ArrayView1<'_, f64>) -> Array1<f64>;
}

/// Linear-Gaussian model sampled from a [`StateSpaceModel`].
///
/// `x ← F·x + L·η` with `L·Lᵀ = Q`, `y ~ N(H·x, R)`.
#[derive(Debug, Clone)]
pub struct LinearGaussian {
    model: StateSpaceModel,
    process_factor: Array2<f64>,
    observation_precision: Array2<f64>,
    observation_ln_det: f64,
}

impl LinearGaussian {
    /// Wraps `model`, factorising Q and inverting R once.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `Filter(InvalidMatrix)` | Q has no Cholesky factor even with jitter |
    /// | `Filter(NumericalInstability)` | R cannot be inverted |
    pub fn new(model: StateSpaceModel) -> Result<Self, ParticleError> {
        let process_factor =
            linalg::cholesky_psd(model.process_noise()).ok_or(FilterError::InvalidMatrix {
                what: "process noise",
                reason: "no Cholesky factor".to_string(),
            })?;
        let inv = linalg::spd_inverse(model.observation_noise(), 0, "observation noise")?;
        Ok(Self {
            model,
            process_factor,
            observation_precision: inv.inverse,
            observation_ln_det: inv.ln_det,
        })
    }

    /// Underlying linear model.
    pub fn model(&self) -> &StateSpaceModel {
        &self.model
    }
}

impl ParticleModel for LinearGaussian {
    fn name(&self) -> String {
        self.model.name()
    }

    fn state_dim(&self) -> usize {
        self.model.state_dim()
    }

    fn noise_dim(&self) -> usize {
        self.model.state_dim()
    }

    fn obs_dim(&self) -> usize {
        self.model.obs_dim()
    }

    fn n_params(&self) -> usize {
        self.model.n_params()
    }

    fn initial_distribution(&self, first: ArrayView1<'_, f64>) -> (Array1<f64>, Array2<f64>) {
        (
            self.model.seed_mean(first),
            self.model.initial_covariance().clone(),
        )
    }

    fn propagate(&self, mut state: ArrayViewMut1<'_, f64>, noise: ArrayView1<'_, f64>) {
        let next = self.model.transition().dot(&state) + self.process_factor.dot(&noise);
        state.assign(&next);
    }

    fn log_likelihood(&self, obs: ArrayView1<'_, f64>, state: ArrayView1<'_, f64>) -> f64 {
        let v = &obs - &self.model.observation().dot(&state);
        let m = v.len() as f64;
        -0.5 * (m * (2.0 * PI).ln()
            + self.observation_ln_det
            + linalg::quadratic_form(&v, &self.observation_precision))
    }

    fn observe(&self, state: ArrayView1<'_, f64>) -> Array1<f64> {
        self.model.observation().dot(&state)
    }

    fn observation_variance(&self, _state: ArrayView1<'_, f64>) -> Array1<f64> {
        self.model.observation_noise().diag().to_owned()
    }
}

/// Univariate stochastic-volatility model for a return series.
///
/// ```text
/// h[t] = μ + φ·(h[t-1] − μ) + σ_η·η[t]
/// y[t] ~ N(0, exp(h[t]))
/// ```
///
/// The initial log-variance is drawn from the stationary distribution
/// `N(μ, σ_η² / (1 − φ²))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochasticVolatility {
    mu: f64,
    phi: f64,
    sigma_eta: f64,
}

impl StochasticVolatility {
    /// Creates the model.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `InvalidConfig` | non-finite `mu`, `|phi| >= 1`, or `sigma_eta <= 0` |
    pub fn new(mu: f64, phi: f64, sigma_eta: f64) -> Result<Self, ParticleError> {
        if !mu.is_finite() {
            return Err(ParticleError::InvalidConfig {
                field: "mu",
                reason: format!("must be finite, got {mu}"),
            });
        }
        if !(phi.abs() < 1.0) {
            return Err(ParticleError::InvalidConfig {
                field: "phi",
                reason: format!("must satisfy |phi| < 1, got {phi}"),
            });
        }
        if !(sigma_eta > 0.0 && sigma_eta.is_finite()) {
            return Err(ParticleError::InvalidConfig {
                field: "sigma_eta",
                reason: format!("must be positive and finite, got {sigma_eta}"),
            });
        }
        Ok(Self { mu, phi, sigma_eta })
    }

    /// Long-run mean of the log-variance.
    pub fn mu(&self) -> f64 {
        self.mu
    }

    /// Persistence.
    pub fn phi(&self) -> f64 {
        self.phi
    }

    /// Volatility of the log-variance.
    pub fn sigma_eta(&self) -> f64 {
        self.sigma_eta
    }
}

impl ParticleModel for StochasticVolatility {
    fn name(&self) -> String {
        "stochastic_volatility".to_string()
    }

    fn state_dim(&self) -> usize {
        1
    }

    fn noise_dim(&self) -> usize {
        1
    }

    fn obs_dim(&self) -> usize {
        1
    }

    fn n_params(&self) -> usize {
        3
    }

    fn initial_distribution(&self, _first: ArrayView1<'_, f64>) -> (Array1<f64>, Array2<f64>) {
        let var = self.sigma_eta * self.sigma_eta / (1.0 - self.phi * self.phi);
        (Array1::from_elem(1, self.mu), Array2::from_elem((1, 1), var))
    }

    fn propagate(&self, mut state: ArrayViewMut1<'_, f64>, noise: ArrayView1<'_, f64>) {
        state[0] = self.mu + self.phi * (state[0] - self.mu) + self.sigma_eta * noise[0];
    }

    fn log_likelihood(&self, obs: ArrayView1<'_, f64>, state: ArrayView1<'_, f64>) -> f64 {
        let h = state[0];
        -0.5 * ((2.0 * PI).ln() + h + obs[0] * obs[0] * (-h).exp())
    }

    fn observe(&self, _state: ArrayView1<'_, f64>) -> Array1<f64> {
        Array1::zeros(1)
    }

    fn observation_variance(&self, state: ArrayView1<'_, f64>) -> Array1<f64> {
        Array1::from_elem(1, state[0].exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_linear_gaussian_propagate() {
        let lg = LinearGaussian::new(StateSpaceModel::local_trend()).unwrap();
        let mut x = array![10.0, 2.0];
        lg.propagate(x.view_mut(), array![0.0, 0.0].view());
        assert_eq!(x, array![12.0, 2.0]);
        // Cholesky of diag(0.1, 0.01) scales each draw by its sd.
        lg.propagate(x.view_mut(), array![1.0, 1.0].view());
        assert_abs_diff_eq!(x[0], 14.0 + 0.1_f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 2.0 + 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_linear_gaussian_likelihood_matches_normal_density() {
        let lg = LinearGaussian::new(StateSpaceModel::local_level()).unwrap();
        let ll = lg.log_likelihood(array![1.0].view(), array![0.0].view());
        assert_abs_diff_eq!(ll, -0.5 * ((2.0 * PI).ln() + 1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_linear_gaussian_seeds_from_first_observation() {
        let lg = LinearGaussian::new(StateSpaceModel::local_level()).unwrap();
        let (mean, cov) = lg.initial_distribution(array![7.5].view());
        assert_eq!(mean, array![7.5]);
        assert_eq!(cov, array![[1.0]]);
        assert_eq!(lg.observation_variance(mean.view()), array![1.0]);
    }

    #[test]
    fn test_stochastic_volatility_validation() {
        assert!(StochasticVolatility::new(0.0, 1.0, 0.2).is_err());
        assert!(StochasticVolatility::new(0.0, 0.9, 0.0).is_err());
        assert!(StochasticVolatility::new(f64::NAN, 0.9, 0.2).is_err());
        assert!(StochasticVolatility::new(-1.0, 0.95, 0.2).is_ok());
    }

    #[test]
    fn test_stochastic_volatility_dynamics() {
        let sv = StochasticVolatility::new(-1.0, 0.5, 0.2).unwrap();
        let mut h = array![1.0];
        sv.propagate(h.view_mut(), array![0.0].view());
        assert_abs_diff_eq!(h[0], 0.0, epsilon = 1e-12);
        let (mean, var) = sv.initial_distribution(array![0.0].view());
        assert_eq!(mean[0], -1.0);
        assert_abs_diff_eq!(var[[0, 0]], 0.04 / 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(sv.observation_variance(array![0.0].view())[0], 1.0);
    }

    #[test]
    fn test_stochastic_volatility_likelihood_prefers_matching_variance() {
        let sv = StochasticVolatility::new(0.0, 0.9, 0.2).unwrap();
        let y = array![3.0];
        let low = sv.log_likelihood(y.view(), array![-2.0].view());
        let matched = sv.log_likelihood(y.view(), array![9f64.ln()].view());
        assert!(matched > low);
    }
}
