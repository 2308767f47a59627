//! Linear-Gaussian state-space models.
//!
//! ```text
//! x[t+1] = F · x[t] + w[t],   w ~ N(0, Q)     (transition)
//! y[t]   = H · x[t] + v[t],   v ~ N(0, R)     (observation)
//! ```
//!
//! A [`StateSpaceModel`] is immutable. The optimizer and the adaptive filter
//! swap its noise covariances through [`StateSpaceModel::with_noise`] and
//! [`StateSpaceModel::with_noise_parameters`], which return a new, fully
//! re-validated model.

use std::fmt;

use ndarray::{Array1, Array2, ArrayView1};

use crate::error::FilterError;
use crate::linalg;

/// Default process-noise variance on the level component.
const DEFAULT_LEVEL_Q: f64 = 0.1;

/// Default process-noise variance on slope and seasonal components.
const DEFAULT_SLOW_Q: f64 = 0.01;

/// Default observation-noise variance.
const DEFAULT_R: f64 = 1.0;

/// Named model family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    /// Random walk observed with noise (state = level).
    LocalLevel,
    /// Random walk with drift (state = level, slope).
    LocalTrend,
    /// Local level plus `period - 1` dummy seasonal effects summing to zero.
    Seasonal {
        /// Season length in steps, at least 2.
        period: usize,
    },
    /// User-supplied matrices.
    Custom,
}

impl ModelFamily {
    /// Stable identifier, e.g. `local_level` or `seasonal_12`.
    pub fn name(&self) -> String {
        match self {
            Self::LocalLevel => "local_level".to_string(),
            Self::LocalTrend => "local_trend".to_string(),
            Self::Seasonal { period } => format!("seasonal_{period}"),
            Self::Custom => "custom".to_string(),
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Which covariance a free noise parameter lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NoiseTarget {
    Process,
    Observation,
}

/// One free noise parameter: a variance shared by a set of diagonal entries.
#[derive(Debug, Clone, PartialEq)]
struct NoiseGroup {
    target: NoiseTarget,
    indices: Vec<usize>,
}

impl NoiseGroup {
    fn process(indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            target: NoiseTarget::Process,
            indices: indices.into_iter().collect(),
        }
    }

    fn observation(indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            target: NoiseTarget::Observation,
            indices: indices.into_iter().collect(),
        }
    }
}

/// Immutable description of a linear-Gaussian filter's dynamics.
///
/// | Symbol | Accessor | Shape |
/// |--------|----------|-------|
/// | F | [`transition()`](Self::transition) | n x n |
/// | H | [`observation()`](Self::observation) | m x n |
/// | Q | [`process_noise()`](Self::process_noise) | n x n, symmetric PSD |
/// | R | [`observation_noise()`](Self::observation_noise) | m x m, symmetric PSD |
/// | x0 | [`initial_mean()`](Self::initial_mean) | n |
/// | P0 | [`initial_covariance()`](Self::initial_covariance) | n x n, symmetric PSD |
///
/// The free parameters seen by the optimizer are grouped diagonal entries
/// of Q and R; see [`noise_parameters()`](Self::noise_parameters).
#[derive(Debug, Clone, PartialEq)]
pub struct StateSpaceModel {
    family: ModelFamily,
    transition: Array2<f64>,
    observation: Array2<f64>,
    process_noise: Array2<f64>,
    observation_noise: Array2<f64>,
    initial_mean: Array1<f64>,
    initial_covariance: Array2<f64>,
    noise_groups: Vec<NoiseGroup>,
}

impl StateSpaceModel {
    /// Builds and validates a custom model.
    ///
    /// Every diagonal entry of Q, then of R, becomes a separate free noise
    /// parameter.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `DimensionMismatch` | any operand is inconsistent with `F` (n x n) and `H` (m x n) |
    /// | `InvalidMatrix` | non-finite entries, or a covariance that is not symmetric PSD |
    pub fn new(
        transition: Array2<f64>,
        observation: Array2<f64>,
        process_noise: Array2<f64>,
        observation_noise: Array2<f64>,
        initial_mean: Array1<f64>,
        initial_covariance: Array2<f64>,
    ) -> Result<Self, FilterError> {
        let n = transition.nrows();
        let m = observation.nrows();
        let noise_groups = (0..n)
            .map(|i| NoiseGroup::process([i]))
            .chain((0..m).map(|j| NoiseGroup::observation([j])))
            .collect();
        let model = Self {
            family: ModelFamily::Custom,
            transition,
            observation,
            process_noise,
            observation_noise,
            initial_mean,
            initial_covariance,
            noise_groups,
        };
        model.validate()?;
        Ok(model)
    }

    /// Local level model: `F = [1]`, `H = [1]`, `Q = [0.1]`, `R = [1]`.
    pub fn local_level() -> Self {
        Self {
            family: ModelFamily::LocalLevel,
            transition: Array2::eye(1),
            observation: Array2::eye(1),
            process_noise: Array2::from_elem((1, 1), DEFAULT_LEVEL_Q),
            observation_noise: Array2::from_elem((1, 1), DEFAULT_R),
            initial_mean: Array1::zeros(1),
            initial_covariance: Array2::eye(1),
            noise_groups: vec![NoiseGroup::process([0]), NoiseGroup::observation([0])],
        }
    }

    /// Local linear trend: `F = [[1, 1], [0, 1]]`, `H = [1, 0]`,
    /// `Q = diag(0.1, 0.01)`, `R = [1]`.
    pub fn local_trend() -> Self {
        let mut transition = Array2::eye(2);
        transition[[0, 1]] = 1.0;
        let mut observation = Array2::zeros((1, 2));
        observation[[0, 0]] = 1.0;
        let mut process_noise = Array2::zeros((2, 2));
        process_noise[[0, 0]] = DEFAULT_LEVEL_Q;
        process_noise[[1, 1]] = DEFAULT_SLOW_Q;
        Self {
            family: ModelFamily::LocalTrend,
            transition,
            observation,
            process_noise,
            observation_noise: Array2::from_elem((1, 1), DEFAULT_R),
            initial_mean: Array1::zeros(2),
            initial_covariance: Array2::eye(2),
            noise_groups: vec![
                NoiseGroup::process([0]),
                NoiseGroup::process([1]),
                NoiseGroup::observation([0]),
            ],
        }
    }

    /// Local level plus dummy seasonal effects of length `period`.
    ///
    /// The state is `[level, s_1, ..., s_{p-1}]`. The seasonal effects over
    /// one period sum to zero, so the new current effect is
    /// `-(s_1 + ... + s_{p-1})` and the others shift back by one. The
    /// observation is the level plus the current effect, `H = [1, 1, 0, ..., 0]`.
    /// The seasonal components share one process-noise variance.
    ///
    /// The seasonal prior is `I - J/p`, the covariance of `p - 1` consecutive
    /// effects drawn from an exchangeable zero-sum period. The transition maps
    /// it onto itself.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `InvalidConfig` | `period < 2` |
    pub fn seasonal(period: usize) -> Result<Self, FilterError> {
        if period < 2 {
            return Err(FilterError::InvalidConfig {
                field: "period",
                reason: format!("must be at least 2, got {period}"),
            });
        }
        let n = period;
        let mut transition = Array2::zeros((n, n));
        transition[[0, 0]] = 1.0;
        for j in 1..n {
            transition[[1, j]] = -1.0;
        }
        for i in 2..n {
            transition[[i, i - 1]] = 1.0;
        }

        let mut observation = Array2::zeros((1, n));
        observation[[0, 0]] = 1.0;
        observation[[0, 1]] = 1.0;

        let mut process_noise = Array2::zeros((n, n));
        process_noise[[0, 0]] = DEFAULT_LEVEL_Q;
        for i in 1..n {
            process_noise[[i, i]] = DEFAULT_SLOW_Q;
        }

        Ok(Self {
            family: ModelFamily::Seasonal { period },
            transition,
            observation,
            process_noise,
            observation_noise: Array2::from_elem((1, 1), DEFAULT_R),
            initial_mean: Array1::zeros(n),
            initial_covariance: seasonal_prior(period),
            noise_groups: vec![
                NoiseGroup::process([0]),
                NoiseGroup::process(1..n),
                NoiseGroup::observation([0]),
            ],
        })
    }

    /// Builds the default model of a named family.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `InvalidConfig` | `Custom` (needs explicit matrices) or a seasonal period below 2 |
    pub fn from_family(family: &ModelFamily) -> Result<Self, FilterError> {
        match family {
            ModelFamily::LocalLevel => Ok(Self::local_level()),
            ModelFamily::LocalTrend => Ok(Self::local_trend()),
            ModelFamily::Seasonal { period } => Self::seasonal(*period),
            ModelFamily::Custom => Err(FilterError::InvalidConfig {
                field: "family",
                reason: "custom models need explicit matrices".to_string(),
            }),
        }
    }

    /// Returns a copy with a new initial state.
    ///
    /// # Errors
    ///
    /// Same as [`StateSpaceModel::new`].
    pub fn with_initial_state(
        &self,
        mean: Array1<f64>,
        covariance: Array2<f64>,
    ) -> Result<Self, FilterError> {
        let model = Self {
            initial_mean: mean,
            initial_covariance: covariance,
            ..self.clone()
        };
        model.validate()?;
        Ok(model)
    }

    /// Returns a copy with `P0 = variance · I`.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `InvalidMatrix` | `variance` is negative or non-finite |
    pub fn with_initial_variance(&self, variance: f64) -> Result<Self, FilterError> {
        let unit = match self.family {
            ModelFamily::Seasonal { period } => seasonal_prior(period),
            _ => Array2::eye(self.state_dim()),
        };
        self.with_initial_state(self.initial_mean.clone(), unit * variance)
    }

    /// Returns a copy with Q and R replaced wholesale.
    ///
    /// # Errors
    ///
    /// Same as [`StateSpaceModel::new`].
    pub fn with_noise(
        &self,
        process_noise: Array2<f64>,
        observation_noise: Array2<f64>,
    ) -> Result<Self, FilterError> {
        let model = Self {
            process_noise,
            observation_noise,
            ..self.clone()
        };
        model.validate()?;
        Ok(model)
    }

    /// Current values of the free noise parameters, one per group.
    ///
    /// | Family | Parameters |
    /// |--------|------------|
    /// | local level | `[Q_level, R]` |
    /// | local trend | `[Q_level, Q_slope, R]` |
    /// | seasonal | `[Q_level, Q_season, R]` |
    /// | custom | every diagonal entry of Q, then of R |
    pub fn noise_parameters(&self) -> Vec<f64> {
        self.noise_groups
            .iter()
            .map(|g| {
                let m = self.noise_matrix(g.target);
                g.indices.first().map_or(0.0, |&i| m[[i, i]])
            })
            .collect()
    }

    /// Returns a copy whose grouped diagonal noise entries are set from
    /// `params` (same order as [`noise_parameters()`](Self::noise_parameters)).
    ///
    /// Off-diagonal entries are kept.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `DimensionMismatch` | `params.len()` differs from the parameter count |
    /// | `InvalidMatrix` | a resulting covariance is not symmetric PSD |
    pub fn with_noise_parameters(&self, params: &[f64]) -> Result<Self, FilterError> {
        if params.len() != self.noise_groups.len() {
            return Err(FilterError::DimensionMismatch {
                what: "noise parameter vector",
                expected: self.noise_groups.len().to_string(),
                got: params.len().to_string(),
            });
        }
        let mut q = self.process_noise.clone();
        let mut r = self.observation_noise.clone();
        for (group, &value) in self.noise_groups.iter().zip(params) {
            let target = match group.target {
                NoiseTarget::Process => &mut q,
                NoiseTarget::Observation => &mut r,
            };
            for &i in &group.indices {
                target[[i, i]] = value;
            }
        }
        self.with_noise(q, r)
    }

    /// Initial state mean for the first observation `y`.
    ///
    /// Each state coordinate `j` that is observed directly (`H[j, j] != 0`)
    /// is set to `y[j] / H[j, j]`; the rest keep the prior mean.
    pub fn seed_mean(&self, y: ArrayView1<'_, f64>) -> Array1<f64> {
        let mut mean = self.initial_mean.clone();
        let k = self.obs_dim().min(self.state_dim()).min(y.len());
        for j in 0..k {
            let h = self.observation[[j, j]];
            if h != 0.0 {
                mean[j] = y[j] / h;
            }
        }
        mean
    }

    /// Family tag.
    pub fn family(&self) -> &ModelFamily {
        &self.family
    }

    /// Family identifier, e.g. `local_trend`.
    pub fn name(&self) -> String {
        self.family.name()
    }

    /// State dimension n.
    pub fn state_dim(&self) -> usize {
        self.transition.nrows()
    }

    /// Observation dimension m.
    pub fn obs_dim(&self) -> usize {
        self.observation.nrows()
    }

    /// Number of free noise parameters (used as k in AIC/BIC).
    pub fn n_params(&self) -> usize {
        self.noise_groups.len()
    }

    /// Transition matrix F.
    pub fn transition(&self) -> &Array2<f64> {
        &self.transition
    }

    /// Observation matrix H.
    pub fn observation(&self) -> &Array2<f64> {
        &self.observation
    }

    /// Process-noise covariance Q.
    pub fn process_noise(&self) -> &Array2<f64> {
        &self.process_noise
    }

    /// Observation-noise covariance R.
    pub fn observation_noise(&self) -> &Array2<f64> {
        &self.observation_noise
    }

    /// Initial state mean x0.
    pub fn initial_mean(&self) -> &Array1<f64> {
        &self.initial_mean
    }

    /// Initial state covariance P0.
    pub fn initial_covariance(&self) -> &Array2<f64> {
        &self.initial_covariance
    }

    fn noise_matrix(&self, target: NoiseTarget) -> &Array2<f64> {
        match target {
            NoiseTarget::Process => &self.process_noise,
            NoiseTarget::Observation => &self.observation_noise,
        }
    }

    fn validate(&self) -> Result<(), FilterError> {
        let n = self.transition.nrows();
        check_shape("transition matrix", self.transition.dim(), (n, n))?;
        if n == 0 {
            return Err(FilterError::DimensionMismatch {
                what: "transition matrix",
                expected: "at least 1x1".to_string(),
                got: "0x0".to_string(),
            });
        }
        let m = self.observation.nrows();
        if m == 0 {
            return Err(FilterError::DimensionMismatch {
                what: "observation matrix",
                expected: format!("at least 1x{n}"),
                got: format!("0x{}", self.observation.ncols()),
            });
        }
        check_shape("observation matrix", self.observation.dim(), (m, n))?;
        check_shape("process noise", self.process_noise.dim(), (n, n))?;
        check_shape("observation noise", self.observation_noise.dim(), (m, m))?;
        check_shape("initial covariance", self.initial_covariance.dim(), (n, n))?;
        if self.initial_mean.len() != n {
            return Err(FilterError::DimensionMismatch {
                what: "initial mean",
                expected: n.to_string(),
                got: self.initial_mean.len().to_string(),
            });
        }

        check_finite("transition matrix", self.transition.iter())?;
        check_finite("observation matrix", self.observation.iter())?;
        check_finite("initial mean", self.initial_mean.iter())?;
        check_covariance("process noise", &self.process_noise)?;
        check_covariance("observation noise", &self.observation_noise)?;
        check_covariance("initial covariance", &self.initial_covariance)?;
        Ok(())
    }
}

fn check_shape(
    what: &'static str,
    got: (usize, usize),
    expected: (usize, usize),
) -> Result<(), FilterError> {
    if got != expected {
        return Err(FilterError::DimensionMismatch {
            what,
            expected: format!("{}x{}", expected.0, expected.1),
            got: format!("{}x{}", got.0, got.1),
        });
    }
    Ok(())
}

fn check_finite<'a>(
    what: &'static str,
    mut values: impl Iterator<Item = &'a f64>,
) -> Result<(), FilterError> {
    if values.any(|v| !v.is_finite()) {
        return Err(FilterError::InvalidMatrix {
            what,
            reason: "contains non-finite entries".to_string(),
        });
    }
    Ok(())
}

fn check_covariance(what: &'static str, m: &Array2<f64>) -> Result<(), FilterError> {
    check_finite(what, m.iter())?;
    if !linalg::is_symmetric(m) {
        return Err(FilterError::InvalidMatrix {
            what,
            reason: "not symmetric".to_string(),
        });
    }
    if !linalg::is_psd(m) {
        return Err(FilterError::InvalidMatrix {
            what,
            reason: "not positive semi-definite".to_string(),
        });
    }
    Ok(())
}

/// Unit prior of the seasonal family: 1 on the level, `I - J/p` on the effects.
fn seasonal_prior(period: usize) -> Array2<f64> {
    let mut prior = Array2::eye(period);
    let share = 1.0 / period as f64;
    for i in 1..period {
        for j in 1..period {
            prior[[i, j]] -= share;
        }
    }
    prior
}
