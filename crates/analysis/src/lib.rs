//! # kalmar-analysis
//!
//! Runs several filter variants on one series, ranks them by information
//! criteria and derives trend, volatility, forecast and risk insights.
//!
//! ## Pipeline
//!
//! ```mermaid
//! graph LR
//!     A["Series"] -->|"log / none"| B["Analyzer"]
//!     B --> C["linear_* (per family)"]
//!     B --> D["adaptive_* (per policy)"]
//!     B --> E["ensemble"]
//!     B --> F["particle"]
//!     C --> G["Comparison (AIC / BIC)"]
//!     D --> G
//!     E --> G
//!     F --> G
//!     G --> H["Insights"]
//!     H --> I["AnalysisReport → JSON"]
//! ```
//!
//! Candidates run in parallel. A failing candidate is recorded in
//! [`AnalysisReport::failures`] and left out of the comparison; only when
//! every candidate fails does [`Analyzer::analyze`] return
//! [`AnalysisError::AllVariantsFailed`].
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `config` | Variants, families, policies and nested filter settings |
//! | `orchestrator` | Candidate scheduling and report assembly |
//! | `comparison` | AIC/BIC table and rankings |
//! | `insights` | Qualitative labels from fitted candidates |
//! | `output` | Serialisable report and `to_json` |
//! | `error` | Error types |

mod comparison;
mod config;
mod error;
mod insights;
mod orchestrator;
mod output;

pub use comparison::{Comparison, ComparisonRow, Score};
pub use config::{AnalysisConfig, Transform, Variant};
pub use error::{AnalysisError, VariantFailure};
pub use insights::{
    FLAT_BAND, ForecastDirection, ForecastInsight, ForecastOutlook, Insights, RiskInsight,
    RiskTier, TREND_TOLERANCE, Tendency, TrendDirection, TrendInsight, VolatilityInsight,
    VolatilityRegime,
};
pub use orchestrator::{
    AnalysisReport, Analyzer, CandidateDetail, CandidateReport, OptimizationSummary,
};
pub use output::{
    CandidateOutput, DetailOutput, FailureOutput, ForecastOutput, MemberWeight,
    OptimizationOutput, ReportOutput, report_output, to_json,
};
