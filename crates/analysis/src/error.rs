//! Error types for the kalmar-analysis crate.

use std::fmt;

use kalmar_filter::{ErrorKind, FilterError};
use kalmar_particle::ParticleError;

/// A candidate that failed during an analysis run.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantFailure {
    /// Candidate name, e.g. `linear_local_trend`.
    pub name: String,
    /// Coarse category of the underlying error.
    pub kind: ErrorKind,
    /// Rendered error message.
    pub message: String,
}

impl fmt::Display for VariantFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.kind, self.message)
    }
}

/// Error type for all fallible operations in the kalmar-analysis crate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    /// Returned when a configuration value is out of range.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Returned when the log transform meets a non-positive observation.
    #[error("log transform needs positive values, got {value} at index {index}")]
    NonPositiveForLog {
        /// Row of the first offending observation.
        index: usize,
        /// The offending value.
        value: f64,
    },

    /// Error from the filtering layer outside any single candidate.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Error from the particle layer outside any single candidate.
    #[error(transparent)]
    Particle(#[from] ParticleError),

    /// Returned when no candidate produced a result.
    #[error("all {} analysis candidates failed: {}", .failures.len(), join_failures(.failures))]
    AllVariantsFailed {
        /// One entry per candidate, in run order.
        failures: Vec<VariantFailure>,
    },

    /// JSON serialization failed.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Serializer message.
        reason: String,
    },
}

/// Failure of a single candidate, before it is recorded as a [`VariantFailure`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub(crate) enum CandidateError {
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Particle(#[from] ParticleError),
}

impl CandidateError {
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            Self::Filter(e) => e.kind(),
            Self::Particle(e) => e.kind(),
        }
    }
}

fn join_failures(failures: &[VariantFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_invalid_config() {
        let err = AnalysisError::InvalidConfig {
            field: "horizon",
            reason: "must be at least 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration for horizon: must be at least 1"
        );
    }

    #[test]
    fn error_non_positive_for_log() {
        let err = AnalysisError::NonPositiveForLog {
            index: 4,
            value: -1.5,
        };
        assert_eq!(
            err.to_string(),
            "log transform needs positive values, got -1.5 at index 4"
        );
    }

    #[test]
    fn error_filter_transparent() {
        let err = AnalysisError::from(FilterError::EmptyData);
        assert_eq!(err.to_string(), "observation series is empty");
    }

    #[test]
    fn error_all_variants_failed_lists_each() {
        let err = AnalysisError::AllVariantsFailed {
            failures: vec![
                VariantFailure {
                    name: "linear_local_level".to_string(),
                    kind: ErrorKind::Configuration,
                    message: "bad shape".to_string(),
                },
                VariantFailure {
                    name: "particle".to_string(),
                    kind: ErrorKind::ResamplingDegeneracy,
                    message: "collapsed".to_string(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "all 2 analysis candidates failed: linear_local_level (configuration): bad shape; \
             particle (resampling_degeneracy): collapsed"
        );
    }

    #[test]
    fn candidate_error_keeps_source_layer() {
        let filter = CandidateError::from(FilterError::EmptyData);
        assert!(matches!(filter, CandidateError::Filter(FilterError::EmptyData)));
        assert_eq!(filter.kind(), FilterError::EmptyData.kind());
        assert_eq!(filter.to_string(), "observation series is empty");

        let particle = CandidateError::from(ParticleError::NotFitted);
        assert!(matches!(particle, CandidateError::Particle(ParticleError::NotFitted)));
        assert_eq!(particle.kind(), ParticleError::NotFitted.kind());
    }

    #[test]
    fn error_serialization() {
        let err = AnalysisError::Serialization {
            reason: "invalid JSON".to_string(),
        };
        assert_eq!(err.to_string(), "serialization error: invalid JSON");
    }

    #[test]
    fn error_is_std_error() {
        fn assert_impl<T: std::error::Error>() {}
        assert_impl::<AnalysisError>();
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_impl<T: Send + Sync>() {}
        assert_impl::<AnalysisError>();
        assert_impl::<VariantFailure>();
    }
}
