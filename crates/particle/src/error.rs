//! Error types for the kalmar-particle crate.

use kalmar_filter::{ErrorKind, FilterError};

/// Error type for all fallible operations in the kalmar-particle crate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParticleError {
    /// Error from the shared filtering layer (series, model, forecast).
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Returned when a configuration value is out of range.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Returned when the particle cloud cannot be recovered after its
    /// weights collapse, e.g. because the states themselves are non-finite.
    #[error("particle weights degenerated at step {step}: {reason}")]
    ResamplingDegeneracy {
        /// Time step at which recovery failed.
        step: usize,
        /// Description of the failure.
        reason: String,
    },

    /// Returned when a forecast is requested before the filter has run.
    #[error("particle filter has not been fitted")]
    NotFitted,
}

impl ParticleError {
    /// Returns the coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Filter(e) => e.kind(),
            Self::InvalidConfig { .. } | Self::NotFitted => ErrorKind::Configuration,
            Self::ResamplingDegeneracy { .. } => ErrorKind::ResamplingDegeneracy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_filter_transparent() {
        let err = ParticleError::from(FilterError::EmptyData);
        assert_eq!(err.to_string(), "observation series is empty");
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[test]
    fn error_invalid_config() {
        let err = ParticleError::InvalidConfig {
            field: "n_particles",
            reason: "must be at least 2".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration for n_particles: must be at least 2"
        );
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn error_resampling_degeneracy() {
        let err = ParticleError::ResamplingDegeneracy {
            step: 12,
            reason: "non-finite particle state".into(),
        };
        assert_eq!(
            err.to_string(),
            "particle weights degenerated at step 12: non-finite particle state"
        );
        assert_eq!(err.kind(), ErrorKind::ResamplingDegeneracy);
    }

    #[test]
    fn error_not_fitted() {
        assert_eq!(
            ParticleError::NotFitted.to_string(),
            "particle filter has not been fitted"
        );
    }

    #[test]
    fn error_is_std_error() {
        let err = ParticleError::NotFitted;
        let _: &dyn std::error::Error = &err;
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ParticleError>();
    }
}
