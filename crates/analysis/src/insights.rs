//! Qualitative summaries derived from fitted candidates.
//!
//! | Insight | Source | Rule |
//! |---------|--------|------|
//! | trend | local-trend slope, else best candidate's level changes | sign of the current slope with tolerance [`TREND_TOLERANCE`] |
//! | volatility | adaptive R history | percentile of the last R: > 75% high, < 25% low |
//! | forecast | best candidate's forecast | change vs last level, flat within ±[`FLAT_BAND`] |
//! | risk | ensemble disagreement | last value above the 75th percentile high, above the 25th medium |

use serde::Serialize;

use crate::config::Transform;

/// Slopes within ±this value are reported as sideways.
pub const TREND_TOLERANCE: f64 = 1e-4;

/// Relative forecast changes within ±this fraction are reported as flat.
pub const FLAT_BAND: f64 = 0.005;

/// Forecast steps summarised as short and medium term.
const SHORT_TERM: usize = 5;
const MEDIUM_TERM: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Upward,
    Downward,
    Sideways,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tendency {
    Increasing,
    Decreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastDirection {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

/// Direction of the latent trend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendInsight {
    /// Candidate the slopes came from.
    pub source: String,
    pub direction: TrendDirection,
    pub current_slope: f64,
    pub average_slope: f64,
    /// Population standard deviation of the slopes.
    pub slope_volatility: f64,
}

/// Noise regime seen by one adaptive candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolatilityInsight {
    pub source: String,
    pub regime: VolatilityRegime,
    pub tendency: Tendency,
    pub current: f64,
    pub average: f64,
    /// Fraction of the history at or below the current value.
    pub percentile: f64,
    pub regime_changes: usize,
}

/// Forecast change at one horizon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastOutlook {
    pub horizon: usize,
    pub direction: ForecastDirection,
    /// Percentage change of the level; only reported for log-transformed
    /// input, where it is a price return.
    pub expected_return_pct: Option<f64>,
}

/// Forecast summary of the best candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastInsight {
    pub source: String,
    pub short_term: ForecastOutlook,
    pub medium_term: ForecastOutlook,
    pub long_term: ForecastOutlook,
}

/// Uncertainty tier from the ensemble's between-member spread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskInsight {
    pub tier: RiskTier,
    pub tendency: Tendency,
    pub current_uncertainty: f64,
    pub average_uncertainty: f64,
}

/// Every insight the analysis could derive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insights {
    pub best_model: String,
    pub trend: Option<TrendInsight>,
    pub volatility: Vec<VolatilityInsight>,
    pub forecast: Option<ForecastInsight>,
    pub risk: Option<RiskInsight>,
}

/// Summarises a slope sequence. Returns `None` if it is empty.
pub(crate) fn trend(source: &str, slopes: &[f64]) -> Option<TrendInsight> {
    let &current = slopes.last()?;
    let direction = if current > TREND_TOLERANCE {
        TrendDirection::Upward
    } else if current < -TREND_TOLERANCE {
        TrendDirection::Downward
    } else {
        TrendDirection::Sideways
    };
    Some(TrendInsight {
        source: source.to_string(),
        direction,
        current_slope: current,
        average_slope: kalmar_stats::mean(slopes),
        slope_volatility: kalmar_stats::population_variance(slopes).sqrt(),
    })
}

/// Classifies the last value of an adaptive noise history.
///
/// A history with no spread is always `Normal`. Returns `None` if empty.
pub(crate) fn volatility(
    source: &str,
    history: &[f64],
    regime_changes: usize,
) -> Option<VolatilityInsight> {
    let &current = history.last()?;
    let average = kalmar_stats::mean(history);
    let percentile = kalmar_stats::percentile_rank(history, current);
    let (lo, hi) = history
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let regime = if hi - lo <= 1e-12 * hi.abs().max(1.0) {
        VolatilityRegime::Normal
    } else if percentile > 0.75 {
        VolatilityRegime::High
    } else if percentile < 0.25 {
        VolatilityRegime::Low
    } else {
        VolatilityRegime::Normal
    };
    Some(VolatilityInsight {
        source: source.to_string(),
        regime,
        tendency: tendency(current, average),
        current,
        average,
        percentile,
        regime_changes,
    })
}

/// Compares forecast means (step 1 first) with the last observed level.
///
/// Returns `None` if `means` is empty.
pub(crate) fn forecast(
    source: &str,
    means: &[f64],
    last: f64,
    transform: Transform,
) -> Option<ForecastInsight> {
    let h = means.len();
    if h == 0 {
        return None;
    }
    let outlook = |step: usize| {
        let step = step.min(h);
        let f = means[step - 1];
        let change = match transform {
            Transform::Log => (f - last).exp() - 1.0,
            Transform::None if last != 0.0 => (f - last) / last.abs(),
            Transform::None => f - last,
        };
        let direction = if change > FLAT_BAND {
            ForecastDirection::Up
        } else if change < -FLAT_BAND {
            ForecastDirection::Down
        } else {
            ForecastDirection::Flat
        };
        ForecastOutlook {
            horizon: step,
            direction,
            expected_return_pct: (transform == Transform::Log).then_some(change * 100.0),
        }
    };
    Some(ForecastInsight {
        source: source.to_string(),
        short_term: outlook(SHORT_TERM),
        medium_term: outlook(MEDIUM_TERM),
        long_term: outlook(h),
    })
}

/// Tiers the last value of the ensemble disagreement sequence.
///
/// Returns `None` if empty.
pub(crate) fn risk(disagreement: &[f64]) -> Option<RiskInsight> {
    let &current = disagreement.last()?;
    let sorted = kalmar_stats::sorted(disagreement);
    let p25 = kalmar_stats::quantile_type7(&sorted, 0.25)?;
    let p75 = kalmar_stats::quantile_type7(&sorted, 0.75)?;
    let tier = if current > p75 {
        RiskTier::High
    } else if current > p25 {
        RiskTier::Medium
    } else {
        RiskTier::Low
    };
    let average = kalmar_stats::mean(disagreement);
    Some(RiskInsight {
        tier,
        tendency: tendency(current, average),
        current_uncertainty: current,
        average_uncertainty: average,
    })
}

fn tendency(current: f64, average: f64) -> Tendency {
    if current > average {
        Tendency::Increasing
    } else {
        Tendency::Decreasing
    }
}
