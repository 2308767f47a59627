//! Error types for the kalmar-filter crate.

use std::fmt;

/// Error type for all fallible operations in the kalmar-filter crate.
///
/// Covers input validation, model construction, numerical breakdown of the
/// recursions, and ensemble failure. Optimizer budget exhaustion is not an
/// error; it is reported through [`ConvergenceError`] on the outcome.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    /// Returned when the observation series is empty.
    #[error("observation series is empty")]
    EmptyData,

    /// Returned when an observation is NaN or infinite.
    #[error("observation at index {index} is not finite")]
    NonFiniteData {
        /// Row of the first offending observation.
        index: usize,
    },

    /// Returned when timestamps and observations have different lengths.
    #[error("got {timestamps} timestamps for {observations} observations")]
    TimestampMismatch {
        /// Number of timestamps supplied.
        timestamps: usize,
        /// Number of observation rows.
        observations: usize,
    },

    /// Returned when timestamps are not strictly increasing.
    #[error("timestamp at index {index} does not follow its predecessor")]
    UnorderedTimestamps {
        /// Index of the first out-of-order timestamp.
        index: usize,
    },

    /// Returned when a matrix or vector has the wrong shape.
    #[error("{what} has shape {got}, expected {expected}")]
    DimensionMismatch {
        /// Which operand was checked.
        what: &'static str,
        /// Expected shape.
        expected: String,
        /// Actual shape.
        got: String,
    },

    /// Returned when a matrix has the right shape but unusable content.
    #[error("{what} is invalid: {reason}")]
    InvalidMatrix {
        /// Which operand was checked.
        what: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Returned when a configuration value is out of range.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Returned when a covariance cannot be inverted even after ridge
    /// regularisation, or when the state turns non-finite.
    #[error("numerical instability at step {step}: {reason}")]
    NumericalInstability {
        /// Time step at which the failure occurred.
        step: usize,
        /// Description of the failure.
        reason: String,
    },

    /// Returned when every ensemble member fails, including the
    /// unoptimised retry.
    #[error("all {members} ensemble members failed to fit")]
    DegenerateEnsemble {
        /// Number of configured members.
        members: usize,
    },

    /// Returned when the optimizer backend itself errors.
    #[error("optimisation failed: {reason}")]
    Optimization {
        /// Backend error message.
        reason: String,
    },

    /// Returned when a forecast is requested before the filter has run.
    #[error("filter has not been fitted")]
    NotFitted,
}

impl FilterError {
    /// Returns the coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyData
            | Self::NonFiniteData { .. }
            | Self::TimestampMismatch { .. }
            | Self::UnorderedTimestamps { .. } => ErrorKind::Data,
            Self::DimensionMismatch { .. }
            | Self::InvalidMatrix { .. }
            | Self::InvalidConfig { .. }
            | Self::NotFitted => ErrorKind::Configuration,
            Self::NumericalInstability { .. } => ErrorKind::NumericalInstability,
            Self::DegenerateEnsemble { .. } => ErrorKind::DegenerateEnsemble,
            Self::Optimization { .. } => ErrorKind::Convergence,
        }
    }
}

/// Coarse error taxonomy shared by every kalmar crate.
///
/// | Kind | Meaning |
/// |------|---------|
/// | `Configuration` | shapes, covariances or settings are invalid |
/// | `Data` | the observation series is unusable |
/// | `NumericalInstability` | a recursion produced a singular or non-finite quantity |
/// | `Convergence` | the optimizer could not finish |
/// | `DegenerateEnsemble` | no ensemble member could be fitted |
/// | `ResamplingDegeneracy` | particle weights collapsed beyond recovery |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Data,
    NumericalInstability,
    Convergence,
    DegenerateEnsemble,
    ResamplingDegeneracy,
}

impl ErrorKind {
    /// Stable snake_case name, used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Data => "data",
            Self::NumericalInstability => "numerical_instability",
            Self::Convergence => "convergence",
            Self::DegenerateEnsemble => "degenerate_ensemble",
            Self::ResamplingDegeneracy => "resampling_degeneracy",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-fatal warning attached to an optimisation outcome whose search
/// stopped on its iteration or time budget instead of converging.
///
/// The accompanying parameters are still the best ones found.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("optimiser stopped after {iterations} iterations without converging ({reason})")]
pub struct ConvergenceError {
    /// Total iterations across all starts.
    pub iterations: u64,
    /// Why the search stopped.
    pub reason: String,
}

impl ConvergenceError {
    /// Always [`ErrorKind::Convergence`].
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Convergence
    }
}
