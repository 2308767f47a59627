//! # kalmar-particle
//!
//! Sequential Monte Carlo (bootstrap particle) filtering for linear and
//! nonlinear state-space models.
//!
//! ## One Step
//!
//! ```mermaid
//! graph LR
//!     A["draw noise (seeded StdRng)"] --> B["propagate (parallel)"]
//!     B --> C["log p(y | x) (parallel)"]
//!     C --> D["renormalise weights"]
//!     D -->|"collapse"| E["uniform weights + jitter"]
//!     D --> F["weighted mean / covariance / quantiles"]
//!     F -->|"ESS < threshold · N"| G["systematic resample"]
//! ```
//!
//! ## Models
//!
//! | Model | State | Observation |
//! |-------|-------|-------------|
//! | [`LinearGaussian`] | `x ← F·x + L·η`, `L·Lᵀ = Q` | `y ~ N(H·x, R)` |
//! | [`StochasticVolatility`] | `h ← μ + φ·(h − μ) + σ_η·η` | `y ~ N(0, exp(h))` |
//!
//! Any type implementing [`ParticleModel`] can be filtered.

mod config;
mod error;
mod filter;
mod model;
mod resample;

pub use config::ParticleConfig;
pub use error::ParticleError;
pub use filter::{ParticleFilter, ParticleResult};
pub use model::{LinearGaussian, ParticleModel, StochasticVolatility};
pub use resample::{effective_sample_size, systematic_resample};
