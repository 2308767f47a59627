//! Analysis configuration.

use std::fmt;

use kalmar_filter::{
    AdaptationPolicy, AdaptiveConfig, EnsembleConfig, ModelFamily, OptimizerConfig,
    StateSpaceModel, z_score,
};
use kalmar_particle::ParticleConfig;

use crate::error::AnalysisError;

/// Filter variant the analyzer can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// One linear Kalman filter per configured family.
    Linear,
    /// One adaptive filter per configured policy.
    Adaptive,
    /// Likelihood-weighted ensemble of linear members.
    Ensemble,
    /// Bootstrap particle filter on a linear-Gaussian model.
    Particle,
}

impl Variant {
    /// All variants, in run order.
    pub const ALL: [Variant; 4] = [Self::Linear, Self::Adaptive, Self::Ensemble, Self::Particle];

    /// Lowercase identifier.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Adaptive => "adaptive",
            Self::Ensemble => "ensemble",
            Self::Particle => "particle",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transform applied to observations before filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    /// Filter the raw values.
    None,
    /// Filter natural logarithms; all values must be positive.
    Log,
}

impl Transform {
    /// Lowercase identifier.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Log => "log",
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for an [`Analyzer`](crate::Analyzer) run.
///
/// The top-level confidence level overrides the levels carried by the
/// nested filter configurations.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    variants: Vec<Variant>,
    families: Vec<ModelFamily>,
    optimize: bool,
    optimizer: OptimizerConfig,
    adaptive: AdaptiveConfig,
    adaptive_family: ModelFamily,
    policies: Vec<AdaptationPolicy>,
    ensemble: EnsembleConfig,
    particle: ParticleConfig,
    particle_family: ModelFamily,
    horizon: usize,
    confidence: f64,
    transform: Transform,
}

impl AnalysisConfig {
    /// Creates a configuration with defaults.
    ///
    /// - variants: linear, adaptive, ensemble
    /// - families: local level, local trend
    /// - optimize: true
    /// - adaptive family: local level, every policy
    /// - particle family: local level
    /// - horizon: 30
    /// - confidence: 0.95
    /// - transform: log
    pub fn new() -> Self {
        Self {
            variants: vec![Variant::Linear, Variant::Adaptive, Variant::Ensemble],
            families: vec![ModelFamily::LocalLevel, ModelFamily::LocalTrend],
            optimize: true,
            optimizer: OptimizerConfig::default(),
            adaptive: AdaptiveConfig::default(),
            adaptive_family: ModelFamily::LocalLevel,
            policies: AdaptationPolicy::ALL.to_vec(),
            ensemble: EnsembleConfig::default(),
            particle: ParticleConfig::default(),
            particle_family: ModelFamily::LocalLevel,
            horizon: 30,
            confidence: 0.95,
            transform: Transform::Log,
        }
    }

    /// Sets which variants run.
    pub fn with_variants(mut self, variants: Vec<Variant>) -> Self {
        self.variants = variants;
        self
    }

    /// Sets the linear model families.
    pub fn with_families(mut self, families: Vec<ModelFamily>) -> Self {
        self.families = families;
        self
    }

    /// Enables or disables the starting-model noise optimisation of the
    /// linear, adaptive and particle candidates.
    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// Sets the optimizer configuration.
    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Sets the adaptive filter configuration; its policy is overridden per
    /// candidate.
    pub fn with_adaptive(mut self, adaptive: AdaptiveConfig) -> Self {
        self.adaptive = adaptive;
        self
    }

    /// Sets the model family the adaptive filters start from.
    pub fn with_adaptive_family(mut self, family: ModelFamily) -> Self {
        self.adaptive_family = family;
        self
    }

    /// Sets the adaptation policies to run.
    pub fn with_policies(mut self, policies: Vec<AdaptationPolicy>) -> Self {
        self.policies = policies;
        self
    }

    /// Sets the ensemble configuration.
    pub fn with_ensemble(mut self, ensemble: EnsembleConfig) -> Self {
        self.ensemble = ensemble;
        self
    }

    /// Sets the particle filter configuration.
    pub fn with_particle(mut self, particle: ParticleConfig) -> Self {
        self.particle = particle;
        self
    }

    /// Sets the model family the particle filter samples from.
    pub fn with_particle_family(mut self, family: ModelFamily) -> Self {
        self.particle_family = family;
        self
    }

    /// Sets the forecast horizon.
    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    /// Sets the confidence level used by every candidate.
    pub fn with_confidence(mut self, level: f64) -> Self {
        self.confidence = level;
        self
    }

    /// Sets the input transform.
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Seeds the particle filter RNG.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.particle = self.particle.with_seed(seed);
        self
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn families(&self) -> &[ModelFamily] {
        &self.families
    }

    pub fn optimize(&self) -> bool {
        self.optimize
    }

    pub fn optimizer(&self) -> &OptimizerConfig {
        &self.optimizer
    }

    pub fn adaptive(&self) -> &AdaptiveConfig {
        &self.adaptive
    }

    pub fn adaptive_family(&self) -> &ModelFamily {
        &self.adaptive_family
    }

    pub fn policies(&self) -> &[AdaptationPolicy] {
        &self.policies
    }

    pub fn ensemble(&self) -> &EnsembleConfig {
        &self.ensemble
    }

    pub fn particle(&self) -> &ParticleConfig {
        &self.particle
    }

    pub fn particle_family(&self) -> &ModelFamily {
        &self.particle_family
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Validates this configuration and every nested one.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `InvalidConfig` | no variants, a duplicated variant, an enabled variant with nothing to run, or `horizon == 0` |
    /// | `Filter` | bad confidence, an unbuildable family, or an invalid optimizer, adaptive or ensemble configuration |
    /// | `Particle` | invalid particle configuration |
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.variants.is_empty() {
            return Err(AnalysisError::InvalidConfig {
                field: "variants",
                reason: "at least one variant must be enabled".to_string(),
            });
        }
        for (i, v) in self.variants.iter().enumerate() {
            if self.variants[..i].contains(v) {
                return Err(AnalysisError::InvalidConfig {
                    field: "variants",
                    reason: format!("{v} listed more than once"),
                });
            }
        }
        if self.horizon == 0 {
            return Err(AnalysisError::InvalidConfig {
                field: "horizon",
                reason: "must be at least 1".to_string(),
            });
        }
        z_score(self.confidence)?;
        self.optimizer.validate()?;

        if self.variants.contains(&Variant::Linear) {
            if self.families.is_empty() {
                return Err(AnalysisError::InvalidConfig {
                    field: "families",
                    reason: "linear variant needs at least one model family".to_string(),
                });
            }
            for family in &self.families {
                StateSpaceModel::from_family(family)?;
            }
        }
        if self.variants.contains(&Variant::Adaptive) {
            if self.policies.is_empty() {
                return Err(AnalysisError::InvalidConfig {
                    field: "policies",
                    reason: "adaptive variant needs at least one policy".to_string(),
                });
            }
            StateSpaceModel::from_family(&self.adaptive_family)?;
            self.adaptive.validate()?;
        }
        if self.variants.contains(&Variant::Ensemble) {
            self.ensemble.validate()?;
        }
        if self.variants.contains(&Variant::Particle) {
            StateSpaceModel::from_family(&self.particle_family)?;
            self.particle.validate()?;
        }
        Ok(())
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kalmar_filter::FilterError;
    use kalmar_particle::ParticleError;

    #[test]
    fn test_config_defaults() {
        let config = AnalysisConfig::new();
        assert_eq!(
            config.variants(),
            &[Variant::Linear, Variant::Adaptive, Variant::Ensemble]
        );
        assert_eq!(
            config.families(),
            &[ModelFamily::LocalLevel, ModelFamily::LocalTrend]
        );
        assert_eq!(config.policies().len(), 3);
        assert_eq!(config.horizon(), 30);
        assert_eq!(config.transform(), Transform::Log);
        assert!(config.optimize());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_empty_and_duplicate_variants() {
        let empty = AnalysisConfig::new().with_variants(vec![]);
        assert!(matches!(
            empty.validate(),
            Err(AnalysisError::InvalidConfig { field: "variants", .. })
        ));
        let dup = AnalysisConfig::new().with_variants(vec![Variant::Linear, Variant::Linear]);
        assert!(matches!(
            dup.validate(),
            Err(AnalysisError::InvalidConfig { field: "variants", .. })
        ));
    }

    #[test]
    fn test_config_rejects_zero_horizon() {
        let config = AnalysisConfig::new().with_horizon(0);
        assert!(matches!(
            config.validate(),
            Err(AnalysisError::InvalidConfig { field: "horizon", .. })
        ));
    }

    #[test]
    fn test_config_rejects_bad_confidence() {
        let config = AnalysisConfig::new().with_confidence(1.0);
        assert!(matches!(
            config.validate(),
            Err(AnalysisError::Filter(FilterError::InvalidConfig { .. }))
        ));
    }

    #[test]
    fn test_config_checks_only_enabled_variants() {
        let config = AnalysisConfig::new()
            .with_variants(vec![Variant::Ensemble])
            .with_families(vec![])
            .with_policies(vec![]);
        assert!(config.validate().is_ok());

        let linear = AnalysisConfig::new()
            .with_variants(vec![Variant::Linear])
            .with_families(vec![ModelFamily::Custom]);
        assert!(matches!(linear.validate(), Err(AnalysisError::Filter(_))));
    }

    #[test]
    fn test_config_validates_particle() {
        let config = AnalysisConfig::new()
            .with_variants(vec![Variant::Particle])
            .with_particle(ParticleConfig::new().with_n_particles(0));
        assert!(matches!(
            config.validate(),
            Err(AnalysisError::Particle(ParticleError::InvalidConfig { .. }))
        ));
    }

    #[test]
    fn test_seed_reaches_particle_config() {
        let config = AnalysisConfig::new().with_seed(Some(7));
        assert_eq!(config.particle().seed(), Some(7));
    }

    #[test]
    fn test_variant_and_transform_names() {
        let names: Vec<_> = Variant::ALL.iter().map(|v| v.to_string()).collect();
        assert_eq!(names, vec!["linear", "adaptive", "ensemble", "particle"]);
        assert_eq!(Transform::Log.to_string(), "log");
        assert_eq!(Transform::None.name(), "none");
    }
}
