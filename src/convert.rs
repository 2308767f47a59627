//! Pure conversion functions: TOML config structs -> crate API config types.

use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::config::*;

use kalmar_analysis::{AnalysisConfig, Transform, Variant};
use kalmar_filter::{
    AdaptationPolicy, AdaptiveConfig, EnsembleConfig, ModelFamily, OptimizerConfig,
    StateSpaceModel,
};
use kalmar_particle::ParticleConfig;

/// Parses a model family name: `local_level`, `local_trend` or
/// `seasonal:<period>`.
pub fn parse_family(s: &str) -> Result<ModelFamily> {
    let lower = s.to_lowercase();
    match lower.as_str() {
        "local_level" => Ok(ModelFamily::LocalLevel),
        "local_trend" => Ok(ModelFamily::LocalTrend),
        other => match other.strip_prefix("seasonal:") {
            Some(period) => {
                let period: usize = period
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid seasonal period in {s:?}"))?;
                Ok(ModelFamily::Seasonal { period })
            }
            None => bail!("unknown model family: {other:?}"),
        },
    }
}

/// Parses an adaptation policy name into the corresponding enum variant.
pub fn parse_policy(s: &str) -> Result<AdaptationPolicy> {
    match s.to_lowercase().as_str() {
        "innovation" => Ok(AdaptationPolicy::Innovation),
        "likelihood" => Ok(AdaptationPolicy::Likelihood),
        "variance" => Ok(AdaptationPolicy::Variance),
        other => bail!("unknown adaptation policy: {other:?}"),
    }
}

/// Parses a filter variant name into the corresponding enum variant.
pub fn parse_variant(s: &str) -> Result<Variant> {
    match s.to_lowercase().as_str() {
        "linear" => Ok(Variant::Linear),
        "adaptive" => Ok(Variant::Adaptive),
        "ensemble" => Ok(Variant::Ensemble),
        "particle" => Ok(Variant::Particle),
        other => bail!("unknown filter variant: {other:?}"),
    }
}

/// Parses an input transform name into the corresponding enum variant.
pub fn parse_transform(s: &str) -> Result<Transform> {
    match s.to_lowercase().as_str() {
        "log" => Ok(Transform::Log),
        "none" => Ok(Transform::None),
        other => bail!("unknown transform: {other:?}"),
    }
}

/// Builds an [`OptimizerConfig`] from the TOML optimizer configuration.
pub fn build_optimizer_config(opt: &OptimizerToml) -> Result<OptimizerConfig> {
    if !(opt.max_seconds.is_finite() && opt.max_seconds > 0.0) {
        bail!(
            "optimizer max_seconds must be positive, got {}",
            opt.max_seconds
        );
    }
    Ok(OptimizerConfig::new()
        .with_bounds(opt.lower_bound, opt.upper_bound)
        .with_max_iters(opt.max_iters)
        .with_max_time(Duration::from_secs_f64(opt.max_seconds))
        .with_n_starts(opt.n_starts))
}

/// Builds an [`AdaptiveConfig`] from the TOML adaptive configuration.
///
/// The policy is set per candidate by the analyzer.
pub fn build_adaptive_config(adaptive: &AdaptiveToml, confidence: f64) -> AdaptiveConfig {
    AdaptiveConfig::new()
        .with_window(adaptive.window)
        .with_forgetting_factor(adaptive.forgetting_factor)
        .with_noise_floor(adaptive.noise_floor)
        .with_adapt_process_noise(adaptive.adapt_process_noise)
        .with_changepoint_ratio(adaptive.changepoint_ratio)
        .with_confidence(confidence)
}

/// Builds an [`EnsembleConfig`] from the TOML ensemble configuration.
pub fn build_ensemble_config(
    ensemble: &EnsembleToml,
    optimizer: OptimizerConfig,
    confidence: f64,
) -> Result<EnsembleConfig> {
    let members = ensemble
        .members
        .iter()
        .map(|name| {
            let family = parse_family(name)?;
            StateSpaceModel::from_family(&family)
                .with_context(|| format!("invalid ensemble member {name:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(EnsembleConfig::new()
        .with_members(members)
        .with_optimize(ensemble.optimize)
        .with_optimizer(optimizer)
        .with_confidence(confidence))
}

/// Builds a [`ParticleConfig`] from the TOML particle configuration.
///
/// An optional global seed is forwarded to the particle RNG.
pub fn build_particle_config(
    particle: &ParticleToml,
    confidence: f64,
    seed: Option<u64>,
) -> ParticleConfig {
    ParticleConfig::new()
        .with_n_particles(particle.n_particles)
        .with_resample_threshold(particle.resample_threshold)
        .with_jitter_scale(particle.jitter_scale)
        .with_confidence(confidence)
        .with_seed(seed)
}

/// Builds the full [`AnalysisConfig`] from the TOML configuration.
///
/// `seed` and `horizon` override the file values when set.
pub fn build_analysis_config(
    config: &KalmarConfig,
    seed: Option<u64>,
    horizon: Option<usize>,
) -> Result<AnalysisConfig> {
    let analysis = &config.analysis;
    let confidence = analysis.confidence;
    let variants = analysis
        .variants
        .iter()
        .map(|v| parse_variant(v))
        .collect::<Result<Vec<_>>>()?;
    let families = config
        .linear
        .families
        .iter()
        .map(|f| parse_family(f))
        .collect::<Result<Vec<_>>>()?;
    let policies = config
        .adaptive
        .policies
        .iter()
        .map(|p| parse_policy(p))
        .collect::<Result<Vec<_>>>()?;
    let optimizer = build_optimizer_config(&config.optimizer)?;

    Ok(AnalysisConfig::new()
        .with_variants(variants)
        .with_families(families)
        .with_optimize(config.linear.optimize)
        .with_optimizer(optimizer.clone())
        .with_adaptive(build_adaptive_config(&config.adaptive, confidence))
        .with_adaptive_family(parse_family(&config.adaptive.family)?)
        .with_policies(policies)
        .with_ensemble(build_ensemble_config(&config.ensemble, optimizer, confidence)?)
        .with_particle(build_particle_config(
            &config.particle,
            confidence,
            seed.or(config.seed),
        ))
        .with_particle_family(parse_family(&config.particle.family)?)
        .with_horizon(horizon.unwrap_or(analysis.horizon))
        .with_confidence(confidence)
        .with_transform(parse_transform(&analysis.transform)?))
}
