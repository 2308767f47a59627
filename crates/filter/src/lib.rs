//! # kalmar-filter
//!
//! Linear-Gaussian state-space filtering: Kalman filter with RTS smoothing,
//! maximum-likelihood noise estimation, online noise adaptation and
//! likelihood-weighted model ensembles.
//!
//! ## Architecture
//!
//! ```mermaid
//! graph LR
//!     A["StateSpaceModel"] --> B["LinearKalmanFilter"]
//!     A --> C["ParameterOptimizer"]
//!     C -->|"optimised model"| B
//!     A --> D["AdaptiveKalmanFilter"]
//!     C --> E["EnsembleFilter"]
//!     B --> E
//!     B -->|"FilterResult"| F["ForecastEngine"]
//!     D --> F
//!     E -->|"mixture"| G["Forecast"]
//!     F --> G
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use kalmar_filter::{LinearKalmanFilter, Series, StateSpaceModel};
//!
//! let series = Series::scalar(&[100.0, 101.0, 99.0, 102.0, 98.0, 103.0]).unwrap();
//! let mut kf = LinearKalmanFilter::new(StateSpaceModel::local_level());
//! let result = kf.fit(&series).unwrap();
//! assert_eq!(result.len(), 6);
//!
//! let forecast = kf.forecast(5).unwrap();
//! assert!(forecast.variances()[[4, 0]] >= forecast.variances()[[0, 0]]);
//! ```
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `model` | Model families and the noise parameterisation |
//! | `series` | Validated observation matrix with optional timestamps |
//! | `kalman` | Predict/update recursion and the streaming filter |
//! | `smoother` | Rauch–Tung–Striebel backward pass |
//! | `optimizer` | Multi-start Nelder-Mead over log noise variances |
//! | `adaptive` | Innovation, likelihood and variance adaptation policies |
//! | `ensemble` | Softmax-weighted mixture of linear members |
//! | `forecast` | Update-free propagation with growing variance |
//! | `result` | `FilterResult`, bands, diagnostics, AIC/BIC |
//! | `linalg` | Cholesky, ridge-regularised SPD inverse, symmetrisation |
//! | `estimator` | `StateEstimator` interface shared with the particle filter |
//! | `error` | Error types and the error taxonomy |

mod adaptive;
mod ensemble;
mod error;
mod estimator;
mod forecast;
mod kalman;
mod model;
mod optimizer;
mod result;
mod series;
mod state;

pub mod linalg;
pub(crate) mod smoother;

pub use adaptive::{
    AdaptationPolicy, AdaptationRecord, AdaptiveConfig, AdaptiveKalmanFilter, AdaptiveResult,
};
pub use ensemble::{
    EnsembleConfig, EnsembleFilter, EnsembleMember, EnsembleResult, softmax_weights,
};
pub use error::{ConvergenceError, ErrorKind, FilterError};
pub use estimator::StateEstimator;
pub use forecast::{Forecast, ForecastEngine};
pub use kalman::LinearKalmanFilter;
pub use model::{ModelFamily, StateSpaceModel};
pub use optimizer::{OptimizationOutcome, OptimizerConfig, ParameterOptimizer};
pub use result::{
    ConfidenceBands, Diagnostics, FilterResult, FilterResultParts, aic, bic, z_score,
};
pub use series::Series;
pub use state::FilterState;
