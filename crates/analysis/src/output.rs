//! JSON output structures for analysis reports.
//!
//! Level quantities (fitted, smoothed, bands, forecast means and bands) are
//! mapped back to the input scale. Under the log transform that is `exp`,
//! so forecast "means" become medians. Variances stay on the model scale.

use chrono::NaiveDateTime;
use ndarray::Array2;
use serde::Serialize;

use crate::comparison::Comparison;
use crate::config::Transform;
use crate::error::AnalysisError;
use crate::insights::Insights;
use crate::orchestrator::{AnalysisReport, CandidateDetail, CandidateReport, OptimizationSummary};

/// Top-level report output.
#[derive(Debug, Serialize)]
pub struct ReportOutput {
    pub transform: String,
    pub confidence: f64,
    pub n_obs: usize,
    pub timestamps: Option<Vec<NaiveDateTime>>,
    pub best_model: String,
    pub comparison: Comparison,
    pub insights: Insights,
    pub candidates: Vec<CandidateOutput>,
    pub failures: Vec<FailureOutput>,
}

/// One fitted candidate. Sequences are indexed `[component][step]`.
#[derive(Debug, Serialize)]
pub struct CandidateOutput {
    pub name: String,
    pub variant: String,
    pub log_likelihood: f64,
    pub n_params: usize,
    pub aic: f64,
    pub bic: f64,
    pub mse: f64,
    pub mae: f64,
    pub fitted: Vec<Vec<f64>>,
    pub lower: Vec<Vec<f64>>,
    pub upper: Vec<Vec<f64>>,
    pub smoothed: Vec<Vec<f64>>,
    pub forecast: ForecastOutput,
    pub detail: DetailOutput,
    pub warnings: Vec<String>,
}

/// Forecast over steps `1..=horizon`, indexed `[component][step]`.
#[derive(Debug, Serialize)]
pub struct ForecastOutput {
    pub horizon: usize,
    pub level: f64,
    pub means: Vec<Vec<f64>>,
    pub variances: Vec<Vec<f64>>,
    pub lower: Vec<Vec<f64>>,
    pub upper: Vec<Vec<f64>>,
}

#[derive(Debug, Serialize)]
pub struct OptimizationOutput {
    pub log_likelihood: f64,
    pub initial_log_likelihood: Option<f64>,
    pub iterations: u64,
    pub converged: bool,
}

/// Variant-specific detail.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetailOutput {
    Linear {
        noise_parameters: Vec<f64>,
        optimization: Option<OptimizationOutput>,
    },
    Adaptive {
        policy: String,
        observation_noise: Vec<f64>,
        process_noise: Vec<f64>,
        changepoints: Vec<usize>,
    },
    Ensemble {
        members: Vec<MemberWeight>,
        disagreement: Vec<f64>,
        degenerate: bool,
    },
    Particle {
        ess: Vec<f64>,
        resampling_steps: Vec<usize>,
        degeneracy_events: Vec<usize>,
        optimization: Option<OptimizationOutput>,
    },
}

#[derive(Debug, Serialize)]
pub struct MemberWeight {
    pub name: String,
    pub weight: f64,
}

/// A candidate that failed.
#[derive(Debug, Serialize)]
pub struct FailureOutput {
    pub name: String,
    pub kind: String,
    pub message: String,
}

/// Builds the serialisable view of `report`.
pub fn report_output(report: &AnalysisReport) -> ReportOutput {
    let transform = report.transform();
    ReportOutput {
        transform: transform.name().to_string(),
        confidence: report.confidence(),
        n_obs: report.n_obs(),
        timestamps: report.timestamps().map(<[NaiveDateTime]>::to_vec),
        best_model: report.comparison().best().to_string(),
        comparison: report.comparison().clone(),
        insights: report.insights().clone(),
        candidates: report
            .candidates()
            .iter()
            .map(|c| candidate_output(c, transform))
            .collect(),
        failures: report
            .failures()
            .iter()
            .map(|f| FailureOutput {
                name: f.name.clone(),
                kind: f.kind.as_str().to_string(),
                message: f.message.clone(),
            })
            .collect(),
    }
}

/// Serialises `report` to pretty-printed JSON.
///
/// # Errors
///
/// Returns [`AnalysisError::Serialization`] if serialization fails.
pub fn to_json(report: &AnalysisReport) -> Result<String, AnalysisError> {
    serde_json::to_string_pretty(&report_output(report)).map_err(|e| {
        AnalysisError::Serialization {
            reason: e.to_string(),
        }
    })
}

fn candidate_output(c: &CandidateReport, transform: Transform) -> CandidateOutput {
    let result = c.result();
    let diagnostics = result.diagnostics();
    let forecast = c.forecast();
    CandidateOutput {
        name: c.name().to_string(),
        variant: c.variant().name().to_string(),
        log_likelihood: result.log_likelihood(),
        n_params: result.n_params(),
        aic: result.aic(),
        bic: result.bic(),
        mse: diagnostics.mse(),
        mae: diagnostics.mae(),
        fitted: level_columns(result.fitted(), transform),
        lower: level_columns(result.bands().lower(), transform),
        upper: level_columns(result.bands().upper(), transform),
        smoothed: level_columns(result.smoothed_values(), transform),
        forecast: ForecastOutput {
            horizon: forecast.horizon(),
            level: forecast.level(),
            means: level_columns(forecast.means(), transform),
            variances: level_columns(forecast.variances(), Transform::None),
            lower: level_columns(forecast.lower(), transform),
            upper: level_columns(forecast.upper(), transform),
        },
        detail: detail_output(c.detail()),
        warnings: c.warnings().to_vec(),
    }
}

fn detail_output(detail: &CandidateDetail) -> DetailOutput {
    match detail {
        CandidateDetail::Linear {
            noise_parameters,
            optimization,
        } => DetailOutput::Linear {
            noise_parameters: noise_parameters.clone(),
            optimization: optimization.as_ref().map(optimization_output),
        },
        CandidateDetail::Adaptive {
            policy,
            observation_noise,
            process_noise,
            changepoints,
        } => DetailOutput::Adaptive {
            policy: policy.name().to_string(),
            observation_noise: observation_noise.clone(),
            process_noise: process_noise.clone(),
            changepoints: changepoints.clone(),
        },
        CandidateDetail::Ensemble {
            weights,
            disagreement,
            degenerate,
        } => DetailOutput::Ensemble {
            members: weights
                .iter()
                .map(|(name, weight)| MemberWeight {
                    name: name.clone(),
                    weight: *weight,
                })
                .collect(),
            disagreement: disagreement.clone(),
            degenerate: *degenerate,
        },
        CandidateDetail::Particle {
            ess,
            resampling_steps,
            degeneracy_events,
            optimization,
        } => DetailOutput::Particle {
            ess: ess.clone(),
            resampling_steps: resampling_steps.clone(),
            degeneracy_events: degeneracy_events.clone(),
            optimization: optimization.as_ref().map(optimization_output),
        },
    }
}

fn optimization_output(summary: &OptimizationSummary) -> OptimizationOutput {
    OptimizationOutput {
        log_likelihood: summary.log_likelihood,
        initial_log_likelihood: summary.initial_log_likelihood,
        iterations: summary.iterations,
        converged: summary.converged,
    }
}

/// Splits `a` (steps x components) into per-component vectors on the
/// input scale.
fn level_columns(a: &Array2<f64>, transform: Transform) -> Vec<Vec<f64>> {
    a.columns()
        .into_iter()
        .map(|col| match transform {
            Transform::None => col.to_vec(),
            Transform::Log => col.iter().map(|v| v.exp()).collect(),
        })
        .collect()
}
