//! Runs the configured candidates and assembles the report.

use chrono::NaiveDateTime;
use kalmar_filter::{
    AdaptationPolicy, AdaptiveKalmanFilter, EnsembleFilter, FilterError, FilterResult, Forecast,
    LinearKalmanFilter, ModelFamily, ParameterOptimizer, Series, StateSpaceModel,
};
use kalmar_particle::{LinearGaussian, ParticleFilter};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::comparison::{Comparison, Score};
use crate::config::{AnalysisConfig, Transform, Variant};
use crate::error::{AnalysisError, CandidateError, VariantFailure};
use crate::insights::{self, Insights};

/// One filter run scheduled by the analyzer.
#[derive(Debug, Clone, PartialEq)]
enum Candidate {
    Linear(ModelFamily),
    Adaptive(AdaptationPolicy),
    Ensemble,
    Particle,
}

impl Candidate {
    fn name(&self) -> String {
        match self {
            Self::Linear(family) => format!("linear_{family}"),
            Self::Adaptive(policy) => format!("adaptive_{policy}"),
            Self::Ensemble => "ensemble".to_string(),
            Self::Particle => "particle".to_string(),
        }
    }
}

/// Summary of a noise optimisation run.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationSummary {
    pub log_likelihood: f64,
    pub initial_log_likelihood: Option<f64>,
    pub iterations: u64,
    pub converged: bool,
}

/// Variant-specific output of a fitted candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateDetail {
    Linear {
        /// Free noise variances of the fitted model.
        noise_parameters: Vec<f64>,
        optimization: Option<OptimizationSummary>,
    },
    Adaptive {
        policy: AdaptationPolicy,
        /// `R[0,0]` used at each step.
        observation_noise: Vec<f64>,
        /// `Q[0,0]` used at each step.
        process_noise: Vec<f64>,
        changepoints: Vec<usize>,
    },
    Ensemble {
        /// `(member name, weight)` in configuration order.
        weights: Vec<(String, f64)>,
        /// Between-member spread of the first observation component.
        disagreement: Vec<f64>,
        degenerate: bool,
    },
    Particle {
        ess: Vec<f64>,
        resampling_steps: Vec<usize>,
        degeneracy_events: Vec<usize>,
        optimization: Option<OptimizationSummary>,
    },
}

/// A candidate that fitted successfully.
#[derive(Debug, Clone)]
pub struct CandidateReport {
    name: String,
    variant: Variant,
    result: FilterResult,
    forecast: Forecast,
    detail: CandidateDetail,
    warnings: Vec<String>,
}

impl CandidateReport {
    /// Candidate name, e.g. `linear_local_level` or `adaptive_variance`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn result(&self) -> &FilterResult {
        &self.result
    }

    pub fn forecast(&self) -> &Forecast {
        &self.forecast
    }

    pub fn detail(&self) -> &CandidateDetail {
        &self.detail
    }

    /// Non-fatal problems, e.g. an optimizer that ran out of budget.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// Output of [`Analyzer::analyze`].
///
/// Results, forecasts and insights are on the transformed scale.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    transform: Transform,
    confidence: f64,
    n_obs: usize,
    last_observation: f64,
    timestamps: Option<Vec<NaiveDateTime>>,
    candidates: Vec<CandidateReport>,
    failures: Vec<VariantFailure>,
    comparison: Comparison,
    insights: Insights,
}

impl AnalysisReport {
    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    /// Last value of the first observation component, transformed.
    pub fn last_observation(&self) -> f64 {
        self.last_observation
    }

    pub fn timestamps(&self) -> Option<&[NaiveDateTime]> {
        self.timestamps.as_deref()
    }

    /// Successful candidates in run order.
    pub fn candidates(&self) -> &[CandidateReport] {
        &self.candidates
    }

    /// Candidate by name.
    pub fn candidate(&self, name: &str) -> Option<&CandidateReport> {
        self.candidates.iter().find(|c| c.name == name)
    }

    /// Failed candidates in run order.
    pub fn failures(&self) -> &[VariantFailure] {
        &self.failures
    }

    pub fn comparison(&self) -> &Comparison {
        &self.comparison
    }

    pub fn insights(&self) -> &Insights {
        &self.insights
    }

    /// Lowest-AIC candidate.
    pub fn best(&self) -> Option<&CandidateReport> {
        self.candidate(self.comparison.best())
    }
}

/// Runs a set of filter variants on one series and compares them.
///
/// Construct one per request; it holds nothing but its configuration.
#[derive(Debug, Clone)]
pub struct Analyzer {
    config: AnalysisConfig,
}

impl Analyzer {
    /// Creates an analyzer.
    ///
    /// # Errors
    ///
    /// Any error of [`AnalysisConfig::validate`].
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Fits every configured candidate to `series` in parallel, then ranks
    /// and summarises the ones that succeeded.
    ///
    /// Insights use the first observation component.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `NonPositiveForLog` | log transform with a value `<= 0` |
    /// | `AllVariantsFailed` | no candidate fitted; lists every failure |
    #[tracing::instrument(skip(self, series), fields(n_obs = series.len(), transform = %self.config.transform()))]
    pub fn analyze(&self, series: &Series) -> Result<AnalysisReport, AnalysisError> {
        let working = apply_transform(series, self.config.transform())?;
        let candidates = self.candidates();
        debug!(candidates = candidates.len(), "running candidates");

        let outcomes: Vec<(String, Result<CandidateReport, CandidateError>)> = candidates
            .par_iter()
            .map(|c| (c.name(), self.run_candidate(c, &working)))
            .collect();

        let mut reports = Vec::new();
        let mut failures = Vec::new();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(report) => {
                    info!(
                        candidate = %name,
                        log_likelihood = report.result.log_likelihood(),
                        aic = report.result.aic(),
                        "candidate fitted"
                    );
                    reports.push(report);
                }
                Err(e) => {
                    warn!(candidate = %name, error = %e, "candidate failed");
                    failures.push(VariantFailure {
                        name,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let scores: Vec<Score> = reports
            .iter()
            .map(|r| Score {
                name: r.name.clone(),
                log_likelihood: r.result.log_likelihood(),
                n_params: r.result.n_params(),
                aic: r.result.aic(),
                bic: r.result.bic(),
            })
            .collect();
        let Some(comparison) = Comparison::from_scores(&scores) else {
            return Err(AnalysisError::AllVariantsFailed { failures });
        };

        let last_observation = working.row(working.len() - 1)[0];
        let insights = derive_insights(
            &reports,
            &comparison,
            last_observation,
            self.config.transform(),
        );
        info!(best = comparison.best(), failed = failures.len(), "analysis complete");

        Ok(AnalysisReport {
            transform: self.config.transform(),
            confidence: self.config.confidence(),
            n_obs: working.len(),
            last_observation,
            timestamps: working.timestamps().map(<[NaiveDateTime]>::to_vec),
            candidates: reports,
            failures,
            comparison,
            insights,
        })
    }

    fn candidates(&self) -> Vec<Candidate> {
        let mut out = Vec::new();
        for variant in self.config.variants() {
            match variant {
                Variant::Linear => out.extend(
                    self.config
                        .families()
                        .iter()
                        .cloned()
                        .map(Candidate::Linear),
                ),
                Variant::Adaptive => out.extend(
                    self.config
                        .policies()
                        .iter()
                        .copied()
                        .map(Candidate::Adaptive),
                ),
                Variant::Ensemble => out.push(Candidate::Ensemble),
                Variant::Particle => out.push(Candidate::Particle),
            }
        }
        out
    }

    fn run_candidate(
        &self,
        candidate: &Candidate,
        series: &Series,
    ) -> Result<CandidateReport, CandidateError> {
        match candidate {
            Candidate::Linear(family) => self.run_linear(candidate.name(), family, series),
            Candidate::Adaptive(policy) => self.run_adaptive(candidate.name(), *policy, series),
            Candidate::Ensemble => self.run_ensemble(candidate.name(), series),
            Candidate::Particle => self.run_particle(candidate.name(), series),
        }
    }

    /// Builds a family's default model and, if enabled, optimises its
    /// noise. Linear, adaptive and particle candidates all start here.
    fn prepare_model(
        &self,
        family: &ModelFamily,
        series: &Series,
        warnings: &mut Vec<String>,
    ) -> Result<(StateSpaceModel, Option<OptimizationSummary>), FilterError> {
        let model = StateSpaceModel::from_family(family)?;
        if !self.config.optimize() {
            return Ok((model, None));
        }
        let outcome = ParameterOptimizer::new(self.config.optimizer().clone())?
            .optimize(&model, series)?;
        if let Some(warning) = outcome.convergence() {
            warnings.push(warning.to_string());
        }
        let summary = OptimizationSummary {
            log_likelihood: outcome.log_likelihood(),
            initial_log_likelihood: outcome.initial_log_likelihood(),
            iterations: outcome.iterations(),
            converged: outcome.converged(),
        };
        Ok((outcome.into_model(), Some(summary)))
    }

    fn run_linear(
        &self,
        name: String,
        family: &ModelFamily,
        series: &Series,
    ) -> Result<CandidateReport, CandidateError> {
        let mut warnings = Vec::new();
        let (model, optimization) = self.prepare_model(family, series, &mut warnings)?;
        let noise_parameters = model.noise_parameters();
        let mut kf = LinearKalmanFilter::new(model).with_confidence(self.config.confidence());
        let result = kf.fit(series)?;
        let forecast = kf.forecast(self.config.horizon())?;
        Ok(CandidateReport {
            name,
            variant: Variant::Linear,
            result,
            forecast,
            detail: CandidateDetail::Linear {
                noise_parameters,
                optimization,
            },
            warnings,
        })
    }

    fn run_adaptive(
        &self,
        name: String,
        policy: AdaptationPolicy,
        series: &Series,
    ) -> Result<CandidateReport, CandidateError> {
        let mut warnings = Vec::new();
        let (model, _) = self.prepare_model(self.config.adaptive_family(), series, &mut warnings)?;
        let config = self
            .config
            .adaptive()
            .clone()
            .with_policy(policy)
            .with_confidence(self.config.confidence());
        let mut filter = AdaptiveKalmanFilter::new(model, config)?;
        let adapted = filter.fit_adaptive(series)?;
        let forecast = filter.forecast(self.config.horizon())?;
        let detail = CandidateDetail::Adaptive {
            policy,
            observation_noise: adapted.observation_noise().to_vec(),
            process_noise: adapted.process_noise().to_vec(),
            changepoints: adapted.changepoints().to_vec(),
        };
        Ok(CandidateReport {
            name,
            variant: Variant::Adaptive,
            result: adapted.into_result(),
            forecast,
            detail,
            warnings,
        })
    }

    fn run_ensemble(
        &self,
        name: String,
        series: &Series,
    ) -> Result<CandidateReport, CandidateError> {
        let config = self
            .config
            .ensemble()
            .clone()
            .with_confidence(self.config.confidence());
        let mut filter = EnsembleFilter::new(config)?;
        let fitted = filter.fit_ensemble(series)?;
        let forecast = filter.forecast(self.config.horizon())?;

        let mut warnings = Vec::new();
        if fitted.degenerate() {
            warnings.push(
                "every optimised member failed; weights fell back to uniform".to_string(),
            );
        }
        for member in fitted.members() {
            if let Some(err) = member.error() {
                warnings.push(format!("member {} failed: {err}", member.name()));
            }
        }
        let detail = CandidateDetail::Ensemble {
            weights: fitted
                .members()
                .iter()
                .map(|m| (m.name().to_string(), m.weight()))
                .collect(),
            disagreement: fitted.disagreement().column(0).to_vec(),
            degenerate: fitted.degenerate(),
        };
        Ok(CandidateReport {
            name,
            variant: Variant::Ensemble,
            result: fitted.into_result(),
            forecast,
            detail,
            warnings,
        })
    }

    fn run_particle(
        &self,
        name: String,
        series: &Series,
    ) -> Result<CandidateReport, CandidateError> {
        let mut warnings = Vec::new();
        let (model, optimization) =
            self.prepare_model(self.config.particle_family(), series, &mut warnings)?;
        let config = self
            .config
            .particle()
            .clone()
            .with_confidence(self.config.confidence());
        let mut filter = ParticleFilter::new(LinearGaussian::new(model)?, config)?;
        let fitted = filter.fit_particles(series)?;
        let forecast = filter.forecast(self.config.horizon())?;

        if !fitted.degeneracy_events().is_empty() {
            warnings.push(format!(
                "particle weights collapsed at {} step(s) and were reset",
                fitted.degeneracy_events().len()
            ));
        }
        let detail = CandidateDetail::Particle {
            ess: fitted.ess().to_vec(),
            resampling_steps: fitted.resampling_steps().to_vec(),
            degeneracy_events: fitted.degeneracy_events().to_vec(),
            optimization,
        };
        Ok(CandidateReport {
            name,
            variant: Variant::Particle,
            result: fitted.into_result(),
            forecast,
            detail,
            warnings,
        })
    }
}

/// Applies `transform` to every observation.
fn apply_transform(series: &Series, transform: Transform) -> Result<Series, AnalysisError> {
    match transform {
        Transform::None => Ok(series.clone()),
        Transform::Log => {
            if let Some(((index, _), &value)) =
                series.values().indexed_iter().find(|(_, v)| **v <= 0.0)
            {
                return Err(AnalysisError::NonPositiveForLog { index, value });
            }
            Ok(series.map_values(f64::ln)?)
        }
    }
}

fn derive_insights(
    reports: &[CandidateReport],
    comparison: &Comparison,
    last_observation: f64,
    transform: Transform,
) -> Insights {
    let best = reports.iter().find(|r| r.name == comparison.best());

    let local_trend = reports.iter().find(|r| {
        r.variant == Variant::Linear
            && r.result
                .model()
                .is_some_and(|m| *m.family() == ModelFamily::LocalTrend)
    });
    let trend = match (local_trend, best) {
        (Some(r), _) => {
            let slopes: Vec<f64> = r
                .result
                .filtered_states()
                .iter()
                .map(|s| s.mean()[1])
                .collect();
            insights::trend(&r.name, &slopes)
        }
        (None, Some(r)) => {
            let level = r.result.fitted().column(0).to_vec();
            insights::trend(&r.name, &kalmar_stats::diff(&level))
        }
        (None, None) => None,
    };

    let volatility = reports
        .iter()
        .filter_map(|r| match &r.detail {
            CandidateDetail::Adaptive {
                observation_noise,
                changepoints,
                ..
            } => insights::volatility(&r.name, observation_noise, changepoints.len()),
            _ => None,
        })
        .collect();

    let forecast = best.and_then(|r| {
        let means = r.forecast.means().column(0).to_vec();
        insights::forecast(&r.name, &means, last_observation, transform)
    });

    let risk = reports.iter().find_map(|r| match &r.detail {
        CandidateDetail::Ensemble { disagreement, .. } => insights::risk(disagreement),
        _ => None,
    });

    Insights {
        best_model: comparison.best().to_string(),
        trend,
        volatility,
        forecast,
        risk,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use kalmar_filter::ErrorKind;
    use ndarray::Array2;

    fn prices(n: usize) -> Vec<f64> {
        (0..n)
            .map(|t| {
                let t = t as f64;
                100.0 * (0.002 * t).exp() * (1.0 + 0.01 * (0.9 * t).sin())
            })
            .collect()
    }

    fn quick_config() -> AnalysisConfig {
        AnalysisConfig::new()
            .with_optimize(false)
            .with_ensemble(kalmar_filter::EnsembleConfig::new().with_optimize(false))
    }

    #[test]
    fn test_candidate_names() {
        let analyzer = Analyzer::new(
            AnalysisConfig::new().with_variants(Variant::ALL.to_vec()),
        )
        .unwrap();
        let names: Vec<String> = analyzer.candidates().iter().map(Candidate::name).collect();
        assert_eq!(
            names,
            vec![
                "linear_local_level",
                "linear_local_trend",
                "adaptive_innovation",
                "adaptive_likelihood",
                "adaptive_variance",
                "ensemble",
                "particle",
            ]
        );
    }

    #[test]
    fn test_log_transform_rejects_non_positive() {
        let series = Series::scalar(&[1.0, 2.0, 0.0, 3.0]).unwrap();
        let err = apply_transform(&series, Transform::Log).unwrap_err();
        assert_eq!(err, AnalysisError::NonPositiveForLog { index: 2, value: 0.0 });
        assert!(apply_transform(&series, Transform::None).is_ok());
    }

    #[test]
    fn test_log_transform_values() {
        let series = Series::scalar(&[1.0, std::f64::consts::E]).unwrap();
        let logged = apply_transform(&series, Transform::Log).unwrap();
        assert_abs_diff_eq!(logged.row(1)[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_analyze_runs_default_candidates() {
        let series = Series::scalar(&prices(80)).unwrap();
        let report = Analyzer::new(quick_config()).unwrap().analyze(&series).unwrap();
        assert_eq!(report.candidates().len(), 6);
        assert!(report.failures().is_empty());
        assert_eq!(report.n_obs(), 80);
        assert_abs_diff_eq!(
            report.last_observation(),
            prices(80)[79].ln(),
            epsilon = 1e-12
        );
        for c in report.candidates() {
            assert_eq!(c.forecast().horizon(), 30);
        }
        let best = report.best().unwrap();
        let min_aic = report
            .candidates()
            .iter()
            .map(|c| c.result().aic())
            .fold(f64::INFINITY, f64::min);
        assert_abs_diff_eq!(best.result().aic(), min_aic);
        assert_eq!(report.insights().best_model, best.name());
        assert_eq!(report.insights().volatility.len(), 3);
        assert!(report.insights().risk.is_some());
        assert_eq!(
            report.insights().trend.as_ref().unwrap().source,
            "linear_local_trend"
        );
    }

    #[test]
    fn test_failures_are_recorded_and_aggregated() {
        let values = Array2::from_shape_fn((30, 2), |(t, j)| 1.0 + t as f64 + j as f64);
        let series = Series::vector(values).unwrap();
        let config = quick_config().with_variants(vec![Variant::Linear]);
        let err = Analyzer::new(config).unwrap().analyze(&series).unwrap_err();
        let AnalysisError::AllVariantsFailed { failures } = err else {
            panic!("expected aggregate failure");
        };
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].name, "linear_local_level");
        assert!(failures.iter().all(|f| f.kind == ErrorKind::Configuration));
    }

    #[test]
    fn test_trend_falls_back_to_best_level() {
        let series = Series::scalar(&prices(40)).unwrap();
        let config = quick_config()
            .with_variants(vec![Variant::Linear])
            .with_families(vec![ModelFamily::LocalLevel]);
        let report = Analyzer::new(config).unwrap().analyze(&series).unwrap();
        let trend = report.insights().trend.as_ref().unwrap();
        assert_eq!(trend.source, "linear_local_level");
        assert!(report.insights().risk.is_none());
        assert!(report.insights().volatility.is_empty());
    }
}
