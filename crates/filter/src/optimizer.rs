//! Maximum-likelihood estimation of noise variances.
//!
//! Wraps the `argmin` Nelder-Mead solver to minimise the negative
//! log-likelihood of a full forward pass over the log of each free noise
//! parameter. Working in log space keeps every variance positive; the
//! box bounds are enforced by clamping plus a quadratic penalty on the
//! clamped distance, so the simplex is steered back inside.
//!
//! Several starts run in parallel. A start that hits its iteration or time
//! budget still contributes its best point; if no start converges, the
//! outcome carries a non-fatal [`ConvergenceError`].

use std::time::{Duration, Instant};

use argmin::core::{CostFunction, Executor, State, TerminationReason};
use argmin::solver::neldermead::NelderMead;
use ndarray::ArrayView2;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{ConvergenceError, FilterError};
use crate::kalman::{check_series, forward_log_likelihood};
use crate::model::StateSpaceModel;
use crate::series::Series;

/// Initial simplex edge length in log space.
const SIMPLEX_STEP: f64 = 0.5;

/// Weight of the squared out-of-bounds distance added to the cost.
const BOUND_PENALTY: f64 = 1e3;

/// Configuration for [`ParameterOptimizer`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use kalmar_filter::OptimizerConfig;
///
/// let config = OptimizerConfig::new()
///     .with_bounds(1e-4, 5.0)
///     .with_max_iters(200)
///     .with_max_time(Duration::from_secs(2));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    lower_bound: f64,
    upper_bound: f64,
    max_iters: u64,
    max_time: Duration,
    n_starts: usize,
    sd_tolerance: f64,
}

impl OptimizerConfig {
    /// Creates a configuration with defaults.
    ///
    /// Defaults: bounds `[1e-6, 10]`, `max_iters = 500`, `max_time = 10 s`
    /// per start, `n_starts = 3`, `sd_tolerance = 1e-8`.
    pub fn new() -> Self {
        Self {
            lower_bound: 1e-6,
            upper_bound: 10.0,
            max_iters: 500,
            max_time: Duration::from_secs(10),
            n_starts: 3,
            sd_tolerance: 1e-8,
        }
    }

    /// Sets the box bounds on every variance parameter.
    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower_bound = lower;
        self.upper_bound = upper;
        self
    }

    /// Sets the iteration cap per start.
    pub fn with_max_iters(mut self, max_iters: u64) -> Self {
        self.max_iters = max_iters;
        self
    }

    /// Sets the wall-clock cap per start.
    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = max_time;
        self
    }

    /// Sets the number of starting points.
    pub fn with_n_starts(mut self, n_starts: usize) -> Self {
        self.n_starts = n_starts;
        self
    }

    /// Sets the simplex standard-deviation convergence tolerance.
    pub fn with_sd_tolerance(mut self, tol: f64) -> Self {
        self.sd_tolerance = tol;
        self
    }

    /// Lower variance bound.
    pub fn lower_bound(&self) -> f64 {
        self.lower_bound
    }

    /// Upper variance bound.
    pub fn upper_bound(&self) -> f64 {
        self.upper_bound
    }

    /// Iteration cap per start.
    pub fn max_iters(&self) -> u64 {
        self.max_iters
    }

    /// Wall-clock cap per start.
    pub fn max_time(&self) -> Duration {
        self.max_time
    }

    /// Number of starting points.
    pub fn n_starts(&self) -> usize {
        self.n_starts
    }

    /// Simplex convergence tolerance.
    pub fn sd_tolerance(&self) -> f64 {
        self.sd_tolerance
    }

    /// Validates this configuration.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `InvalidConfig` | bounds not `0 < lower < upper` and finite, zero iterations, zero starts, zero time, or a negative tolerance |
    pub fn validate(&self) -> Result<(), FilterError> {
        if !(self.lower_bound > 0.0 && self.lower_bound.is_finite()) {
            return Err(FilterError::InvalidConfig {
                field: "lower_bound",
                reason: format!("must be positive and finite, got {}", self.lower_bound),
            });
        }
        if !(self.upper_bound > self.lower_bound && self.upper_bound.is_finite()) {
            return Err(FilterError::InvalidConfig {
                field: "upper_bound",
                reason: format!(
                    "must be finite and above lower bound {}, got {}",
                    self.lower_bound, self.upper_bound
                ),
            });
        }
        if self.max_iters == 0 {
            return Err(FilterError::InvalidConfig {
                field: "max_iters",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.n_starts == 0 {
            return Err(FilterError::InvalidConfig {
                field: "n_starts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_time.is_zero() {
            return Err(FilterError::InvalidConfig {
                field: "max_time",
                reason: "must be positive".to_string(),
            });
        }
        if !(self.sd_tolerance >= 0.0) {
            return Err(FilterError::InvalidConfig {
                field: "sd_tolerance",
                reason: format!("must be non-negative, got {}", self.sd_tolerance),
            });
        }
        Ok(())
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of [`ParameterOptimizer::optimize`].
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    model: StateSpaceModel,
    log_likelihood: f64,
    initial_log_likelihood: Option<f64>,
    iterations: u64,
    converged_starts: usize,
    convergence: Option<ConvergenceError>,
}

impl OptimizationOutcome {
    /// Model carrying the best noise parameters found.
    pub fn model(&self) -> &StateSpaceModel {
        &self.model
    }

    /// Consumes the outcome and returns the model.
    pub fn into_model(self) -> StateSpaceModel {
        self.model
    }

    /// Log-likelihood of the returned model.
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    /// Log-likelihood of the starting model, if it could be evaluated.
    pub fn initial_log_likelihood(&self) -> Option<f64> {
        self.initial_log_likelihood
    }

    /// Iterations summed over all starts.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Number of starts whose simplex converged.
    pub fn converged_starts(&self) -> usize {
        self.converged_starts
    }

    /// True if at least one start converged.
    pub fn converged(&self) -> bool {
        self.convergence.is_none()
    }

    /// Non-fatal warning when no start converged within its budget.
    pub fn convergence(&self) -> Option<&ConvergenceError> {
        self.convergence.as_ref()
    }
}

/// Bounded, multi-start maximum-likelihood search over a model's noise
/// parameters (see [`StateSpaceModel::noise_parameters`]).
#[derive(Debug, Clone, Default)]
pub struct ParameterOptimizer {
    config: OptimizerConfig,
}

impl ParameterOptimizer {
    /// Creates an optimizer.
    ///
    /// # Errors
    ///
    /// Returns the first [`OptimizerConfig::validate`] failure.
    pub fn new(config: OptimizerConfig) -> Result<Self, FilterError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration in use.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Finds the noise parameters maximising the log-likelihood of `series`.
    ///
    /// The returned model is never worse than `model` itself: if no start
    /// improves on it, `model` is returned unchanged.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `DimensionMismatch` | series dimension differs from the model's |
    /// | `NumericalInstability` | neither the starting model nor any candidate can be evaluated |
    #[tracing::instrument(skip(self, model, series), fields(model = %model.family(), n_obs = series.len()))]
    pub fn optimize(
        &self,
        model: &StateSpaceModel,
        series: &Series,
    ) -> Result<OptimizationOutcome, FilterError> {
        check_series(model, series)?;
        let started = Instant::now();
        let observations = series.values();
        let ln_lower = self.config.lower_bound.ln();
        let ln_upper = self.config.upper_bound.ln();

        let initial = forward_log_likelihood(model, observations);
        let theta0: Vec<f64> = model
            .noise_parameters()
            .iter()
            .map(|p| p.clamp(self.config.lower_bound, self.config.upper_bound).ln())
            .collect();
        let starts = start_points(&theta0, self.config.n_starts, ln_lower, ln_upper);

        let runs: Vec<Result<StartRun, FilterError>> = starts
            .par_iter()
            .map(|start| self.run_start(model, observations, start, ln_lower, ln_upper))
            .collect();

        let mut iterations = 0;
        let mut converged_starts = 0;
        let mut stop_reason = None;
        let mut best: Option<StartRun> = None;
        for run in runs {
            match run {
                Ok(r) => {
                    iterations += r.iterations;
                    if r.converged {
                        converged_starts += 1;
                    } else {
                        stop_reason = Some(r.reason.clone());
                    }
                    if best.as_ref().is_none_or(|b| r.cost < b.cost) {
                        best = Some(r);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "optimiser start failed");
                    stop_reason = Some(e.to_string());
                }
            }
        }

        let candidate = best.and_then(|b| {
            let params: Vec<f64> = b.param.iter().map(|t| t.clamp(ln_lower, ln_upper).exp()).collect();
            let m = model.with_noise_parameters(&params).ok()?;
            let ll = forward_log_likelihood(&m, observations).ok()?;
            ll.is_finite().then_some((m, ll))
        });

        let (best_model, log_likelihood) = match (candidate, &initial) {
            (Some((_, ll)), Ok(ll0)) if ll < *ll0 => {
                debug!(ll, ll0, "no start improved on the initial parameters");
                (model.clone(), *ll0)
            }
            (Some((m, ll)), _) => (m, ll),
            (None, Ok(ll0)) => (model.clone(), *ll0),
            (None, Err(e)) => return Err(e.clone()),
        };

        let convergence = (converged_starts == 0).then(|| ConvergenceError {
            iterations,
            reason: stop_reason.unwrap_or_else(|| "budget exhausted".to_string()),
        });
        if let Some(c) = &convergence {
            warn!(warning = %c, "returning best parameters found");
        }

        info!(
            log_likelihood,
            iterations,
            converged_starts,
            elapsed_ms = started.elapsed().as_millis() as u64,
            params = ?best_model.noise_parameters(),
            "optimisation complete"
        );

        Ok(OptimizationOutcome {
            model: best_model,
            log_likelihood,
            initial_log_likelihood: initial.ok(),
            iterations,
            converged_starts,
            convergence,
        })
    }

    fn run_start<'a>(
        &self,
        model: &'a StateSpaceModel,
        observations: ArrayView2<'a, f64>,
        start: &[f64],
        ln_lower: f64,
        ln_upper: f64,
    ) -> Result<StartRun, FilterError> {
        let cost = NoiseCost {
            model,
            observations,
            ln_lower,
            ln_upper,
        };
        let simplex = build_simplex(start, ln_lower, ln_upper);
        let solver = NelderMead::new(simplex)
            .with_sd_tolerance(self.config.sd_tolerance)
            .map_err(|e| FilterError::Optimization {
                reason: e.to_string(),
            })?;
        let max_iters = self.config.max_iters;
        let result = Executor::new(cost, solver)
            .configure(|state| state.max_iters(max_iters))
            .timeout(self.config.max_time)
            .run()
            .map_err(|e| FilterError::Optimization {
                reason: e.to_string(),
            })?;

        let state = result.state();
        let param = state
            .get_best_param()
            .cloned()
            .ok_or_else(|| FilterError::Optimization {
                reason: "solver returned no parameters".to_string(),
            })?;
        let reason = state.get_termination_reason();
        let converged = matches!(
            reason,
            Some(TerminationReason::SolverConverged) | Some(TerminationReason::TargetCostReached)
        );
        let reason = match reason {
            Some(TerminationReason::MaxItersReached) => "iteration budget exhausted".to_string(),
            Some(TerminationReason::Timeout) => "time budget exhausted".to_string(),
            Some(other) => format!("{other:?}"),
            None => "not terminated".to_string(),
        };
        Ok(StartRun {
            param,
            cost: state.get_best_cost(),
            iterations: state.get_iter(),
            converged,
            reason,
        })
    }
}

struct StartRun {
    param: Vec<f64>,
    cost: f64,
    iterations: u64,
    converged: bool,
    reason: String,
}

/// Start `i` scales the initial parameters by 1, 0.1, 10, 0.01, 100, ...
fn start_points(theta0: &[f64], n_starts: usize, ln_lower: f64, ln_upper: f64) -> Vec<Vec<f64>> {
    (0..n_starts)
        .map(|i| {
            let k = i.div_ceil(2) as f64;
            let sign = if i % 2 == 1 { -1.0 } else { 1.0 };
            let offset = sign * k * std::f64::consts::LN_10;
            theta0
                .iter()
                .map(|t| (t + offset).clamp(ln_lower, ln_upper))
                .collect()
        })
        .collect()
}

/// Origin plus one vertex per axis, stepping inward at the bounds.
fn build_simplex(start: &[f64], ln_lower: f64, ln_upper: f64) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(start.len() + 1);
    simplex.push(start.to_vec());
    for i in 0..start.len() {
        let mut vertex = start.to_vec();
        vertex[i] = if start[i] + SIMPLEX_STEP <= ln_upper {
            start[i] + SIMPLEX_STEP
        } else {
            (start[i] - SIMPLEX_STEP).max(ln_lower)
        };
        simplex.push(vertex);
    }
    simplex
}

/// Cost function for argmin: penalised negative log-likelihood over log
/// variances.
struct NoiseCost<'a> {
    model: &'a StateSpaceModel,
    observations: ArrayView2<'a, f64>,
    ln_lower: f64,
    ln_upper: f64,
}

impl CostFunction for NoiseCost<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let mut penalty = 0.0;
        let params: Vec<f64> = theta
            .iter()
            .map(|&t| {
                let c = t.clamp(self.ln_lower, self.ln_upper);
                penalty += BOUND_PENALTY * (t - c) * (t - c);
                c.exp()
            })
            .collect();

        let ll = self
            .model
            .with_noise_parameters(&params)
            .and_then(|m| forward_log_likelihood(&m, self.observations));
        match ll {
            Ok(ll) if ll.is_finite() => Ok(-ll + penalty),
            _ => Ok(f64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn random_walk(n: usize, q: f64, r: f64, seed: u64) -> Series {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let level_noise = Normal::new(0.0, q.sqrt()).unwrap();
        let obs_noise = Normal::new(0.0, r.sqrt()).unwrap();
        let mut level = 10.0;
        let values: Vec<f64> = (0..n)
            .map(|_| {
                level += level_noise.sample(&mut rng);
                level + obs_noise.sample(&mut rng)
            })
            .collect();
        Series::scalar(&values).unwrap()
    }

    #[test]
    fn config_defaults() {
        let cfg = OptimizerConfig::default();
        assert_eq!(cfg.lower_bound(), 1e-6);
        assert_eq!(cfg.upper_bound(), 10.0);
        assert_eq!(cfg.max_iters(), 500);
        assert_eq!(cfg.n_starts(), 3);
        assert_eq!(cfg.max_time(), Duration::from_secs(10));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn config_validation() {
        assert!(OptimizerConfig::new().with_bounds(0.0, 1.0).validate().is_err());
        assert!(OptimizerConfig::new().with_bounds(2.0, 1.0).validate().is_err());
        assert!(OptimizerConfig::new().with_max_iters(0).validate().is_err());
        assert!(OptimizerConfig::new().with_n_starts(0).validate().is_err());
        assert!(OptimizerConfig::new().with_max_time(Duration::ZERO).validate().is_err());
        assert!(OptimizerConfig::new().with_sd_tolerance(-1.0).validate().is_err());
    }

    #[test]
    fn start_points_scale_by_decades() {
        let starts = start_points(&[0.0], 4, -20.0, 20.0);
        let ln10 = std::f64::consts::LN_10;
        assert_abs_diff_eq!(starts[0][0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(starts[1][0], -ln10, epsilon = 1e-12);
        assert_abs_diff_eq!(starts[2][0], ln10, epsilon = 1e-12);
        assert_abs_diff_eq!(starts[3][0], -2.0 * ln10, epsilon = 1e-12);
    }

    #[test]
    fn simplex_steps_inward_at_upper_bound() {
        let s = build_simplex(&[1.0, 0.0], -5.0, 1.0);
        assert_eq!(s.len(), 3);
        assert_abs_diff_eq!(s[1][0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(s[2][1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn cost_penalises_out_of_bounds() {
        let series = random_walk(50, 0.1, 1.0, 1);
        let model = StateSpaceModel::local_level();
        let cost = NoiseCost {
            model: &model,
            observations: series.values(),
            ln_lower: 1e-6_f64.ln(),
            ln_upper: 10f64.ln(),
        };
        let inside = cost.cost(&vec![10f64.ln(), 0.0]).unwrap();
        let outside = cost.cost(&vec![10f64.ln() + 1.0, 0.0]).unwrap();
        assert_abs_diff_eq!(outside - inside, BOUND_PENALTY, epsilon = 1e-6);
    }

    #[test]
    fn improves_likelihood() {
        let series = random_walk(300, 0.5, 0.2, 7);
        let model = StateSpaceModel::local_level();
        let opt = ParameterOptimizer::new(OptimizerConfig::new()).unwrap();
        let outcome = opt.optimize(&model, &series).unwrap();
        let initial = outcome.initial_log_likelihood().unwrap();
        assert!(outcome.log_likelihood() >= initial);
        let params = outcome.model().noise_parameters();
        assert!(params.iter().all(|&p| (1e-6..=10.0).contains(&p)));
        // True Q dominates R; the estimate should reflect that.
        assert!(params[0] > params[1], "params = {params:?}");
    }

    #[test]
    fn tiny_budget_flags_convergence_warning() {
        let series = random_walk(100, 0.1, 1.0, 3);
        let config = OptimizerConfig::new().with_max_iters(2).with_n_starts(1);
        let outcome = ParameterOptimizer::new(config)
            .unwrap()
            .optimize(&StateSpaceModel::local_level(), &series)
            .unwrap();
        assert!(!outcome.converged());
        let warning = outcome.convergence().unwrap();
        assert!(warning.reason.contains("iteration budget"));
        assert!(outcome.log_likelihood().is_finite());
    }

    #[test]
    fn constant_series_drives_observation_noise_down() {
        let series = Series::scalar(&[5.0; 200]).unwrap();
        let outcome = ParameterOptimizer::default()
            .optimize(&StateSpaceModel::local_level(), &series)
            .unwrap();
        let r = outcome.model().observation_noise()[[0, 0]];
        assert!(r < 1e-3, "R = {r}");
    }
}
