//! Information-criterion comparison of fitted candidates.

use serde::Serialize;

/// Scores of one candidate in the comparison table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub name: String,
    pub log_likelihood: f64,
    pub n_params: usize,
    pub aic: f64,
    pub bic: f64,
    /// 1-based rank by AIC (1 = best).
    pub aic_rank: usize,
    /// 1-based rank by BIC (1 = best).
    pub bic_rank: usize,
    /// AIC minus the best AIC.
    pub delta_aic: f64,
}

/// Comparison table with rankings by AIC and BIC.
///
/// Rows keep candidate order. Ties keep the earlier candidate ahead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    rows: Vec<ComparisonRow>,
    by_aic: Vec<String>,
    by_bic: Vec<String>,
    best: String,
}

/// Raw scores handed to [`Comparison::from_scores`].
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub name: String,
    pub log_likelihood: f64,
    pub n_params: usize,
    pub aic: f64,
    pub bic: f64,
}

impl Comparison {
    /// Ranks `scores`; returns `None` if there are none.
    pub fn from_scores(scores: &[Score]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let aic_order = rank_order(scores, |s| s.aic);
        let bic_order = rank_order(scores, |s| s.bic);
        let best_aic = scores[aic_order[0]].aic;

        let mut rows: Vec<ComparisonRow> = scores
            .iter()
            .map(|s| ComparisonRow {
                name: s.name.clone(),
                log_likelihood: s.log_likelihood,
                n_params: s.n_params,
                aic: s.aic,
                bic: s.bic,
                aic_rank: 0,
                bic_rank: 0,
                delta_aic: s.aic - best_aic,
            })
            .collect();
        for (rank, &i) in aic_order.iter().enumerate() {
            rows[i].aic_rank = rank + 1;
        }
        for (rank, &i) in bic_order.iter().enumerate() {
            rows[i].bic_rank = rank + 1;
        }

        Some(Self {
            by_aic: aic_order.iter().map(|&i| scores[i].name.clone()).collect(),
            by_bic: bic_order.iter().map(|&i| scores[i].name.clone()).collect(),
            best: scores[aic_order[0]].name.clone(),
            rows,
        })
    }

    /// Rows in candidate order.
    pub fn rows(&self) -> &[ComparisonRow] {
        &self.rows
    }

    /// Candidate names from lowest to highest AIC.
    pub fn by_aic(&self) -> &[String] {
        &self.by_aic
    }

    /// Candidate names from lowest to highest BIC.
    pub fn by_bic(&self) -> &[String] {
        &self.by_bic
    }

    /// Name of the lowest-AIC candidate.
    pub fn best(&self) -> &str {
        &self.best
    }

    /// Row for `name`, if present.
    pub fn row(&self, name: &str) -> Option<&ComparisonRow> {
        self.rows.iter().find(|r| r.name == name)
    }
}

/// Indices of `scores` sorted ascending by `key`; NaN sorts last.
fn rank_order(scores: &[Score], key: impl Fn(&Score) -> f64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        let (ka, kb) = (key(&scores[a]), key(&scores[b]));
        match (ka.is_nan(), kb.is_nan()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => ka.total_cmp(&kb),
        }
    });
    order
}
