//! Common interface of every filter variant.

use crate::forecast::Forecast;
use crate::result::FilterResult;
use crate::series::Series;

/// A filter that can be fitted to a series and then forecast from its
/// final state.
///
/// Implemented by the linear, adaptive and ensemble filters in this crate
/// and by the particle filter in `kalmar-particle`. Each implementor also
/// offers a richer inherent `fit_*` method returning variant-specific
/// detail; `fit` returns the common [`FilterResult`].
pub trait StateEstimator {
    /// Error type of the implementor.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fits to `series`, replacing any previous fit.
    fn fit(&mut self, series: &Series) -> Result<FilterResult, Self::Error>;

    /// Forecasts `horizon` steps past the last fitted observation.
    fn forecast(&self, horizon: usize) -> Result<Forecast, Self::Error>;
}
