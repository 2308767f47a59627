//! Configuration for the particle filter.

use crate::error::ParticleError;

/// Configuration for [`ParticleFilter`](crate::ParticleFilter).
///
/// # Example
///
/// ```
/// use kalmar_particle::ParticleConfig;
///
/// let config = ParticleConfig::new()
///     .with_n_particles(500)
///     .with_resample_threshold(0.3)
///     .with_seed(Some(42));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleConfig {
    n_particles: usize,
    resample_threshold: f64,
    jitter_scale: f64,
    confidence: f64,
    seed: Option<u64>,
}

impl ParticleConfig {
    /// Creates a configuration with defaults.
    ///
    /// Defaults: `n_particles = 1000`, `resample_threshold = 0.5`,
    /// `jitter_scale = 0.1`, `confidence = 0.95`, no seed (OS entropy).
    pub fn new() -> Self {
        Self {
            n_particles: 1000,
            resample_threshold: 0.5,
            jitter_scale: 0.1,
            confidence: 0.95,
            seed: None,
        }
    }

    /// Sets the number of particles N.
    pub fn with_n_particles(mut self, n: usize) -> Self {
        self.n_particles = n;
        self
    }

    /// Resample when ESS falls below `threshold · N`.
    pub fn with_resample_threshold(mut self, threshold: f64) -> Self {
        self.resample_threshold = threshold;
        self
    }

    /// Sets the jitter applied after a weight collapse, as a fraction of
    /// each state coordinate's cloud standard deviation.
    pub fn with_jitter_scale(mut self, scale: f64) -> Self {
        self.jitter_scale = scale;
        self
    }

    /// Sets the band confidence level.
    pub fn with_confidence(mut self, level: f64) -> Self {
        self.confidence = level;
        self
    }

    /// Sets the RNG seed; `None` draws from OS entropy.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Number of particles.
    pub fn n_particles(&self) -> usize {
        self.n_particles
    }

    /// Resampling threshold as a fraction of N.
    pub fn resample_threshold(&self) -> f64 {
        self.resample_threshold
    }

    /// Collapse jitter scale.
    pub fn jitter_scale(&self) -> f64 {
        self.jitter_scale
    }

    /// Band confidence level.
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// RNG seed.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Validates this configuration.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | `InvalidConfig` | `n_particles < 2`, threshold outside [0, 1], negative or non-finite jitter, confidence outside (0, 1) |
    pub fn validate(&self) -> Result<(), ParticleError> {
        if self.n_particles < 2 {
            return Err(ParticleError::InvalidConfig {
                field: "n_particles",
                reason: format!("must be at least 2, got {}", self.n_particles),
            });
        }
        if !(0.0..=1.0).contains(&self.resample_threshold) {
            return Err(ParticleError::InvalidConfig {
                field: "resample_threshold",
                reason: format!("must be in [0, 1], got {}", self.resample_threshold),
            });
        }
        if !(self.jitter_scale >= 0.0 && self.jitter_scale.is_finite()) {
            return Err(ParticleError::InvalidConfig {
                field: "jitter_scale",
                reason: format!("must be non-negative and finite, got {}", self.jitter_scale),
            });
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(ParticleError::InvalidConfig {
                field: "confidence",
                reason: format!("must be in (0, 1), got {}", self.confidence),
            });
        }
        Ok(())
    }
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = ParticleConfig::default();
        assert_eq!(c.n_particles(), 1000);
        assert_eq!(c.resample_threshold(), 0.5);
        assert_eq!(c.jitter_scale(), 0.1);
        assert_eq!(c.confidence(), 0.95);
        assert_eq!(c.seed(), None);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(ParticleConfig::new().with_n_particles(1).validate().is_err());
        assert!(ParticleConfig::new().with_resample_threshold(1.5).validate().is_err());
        assert!(ParticleConfig::new().with_jitter_scale(-0.1).validate().is_err());
        assert!(ParticleConfig::new().with_confidence(0.0).validate().is_err());
        assert!(ParticleConfig::new().with_resample_threshold(0.0).validate().is_ok());
    }
}
