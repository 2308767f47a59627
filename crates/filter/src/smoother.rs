//! Rauch–Tung–Striebel fixed-interval smoother.
//!
//! Runs backwards over a completed forward pass:
//!
//! ```text
//! x⁻   = F · x[t]
//! P⁻   = F · P[t] · Fᵀ + Q[t+1]
//! G    = P[t] · Fᵀ · (P⁻)⁻¹
//! x̂[t] = x[t] + G · (x̂[t+1] − x⁻)
//! P̂[t] = P[t] + G · (P̂[t+1] − P⁻) · Gᵀ
//! ```
//!
//! **Not part of the public API.**

use ndarray::Array2;

use crate::error::FilterError;
use crate::linalg;
use crate::state::FilterState;

/// Smooths `filtered` for a fixed transition `f`.
///
/// `process_noise(t)` returns the Q that was used to predict step `t` from
/// step `t - 1`; the adaptive filter passes its per-step history, the
/// linear filter a constant.
pub(crate) fn rts_smooth<Q>(
    f: &Array2<f64>,
    filtered: &[FilterState],
    process_noise: Q,
) -> Result<Vec<FilterState>, FilterError>
where
    Q: Fn(usize) -> Array2<f64>,
{
    let n = filtered.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut smoothed: Vec<FilterState> = Vec::with_capacity(n);
    smoothed.push(filtered[n - 1].clone());

    for t in (0..n - 1).rev() {
        let state = &filtered[t];
        let next = &smoothed[smoothed.len() - 1];

        let x = state.mean();
        let p = state.covariance();
        let pred_mean = f.dot(x);
        let mut pred_cov = f.dot(p).dot(&f.t()) + &process_noise(t + 1);
        linalg::symmetrize(&mut pred_cov);

        let inv = linalg::spd_inverse(&pred_cov, t, "smoother predicted covariance")?;
        let gain = p.dot(&f.t()).dot(&inv.inverse);

        let mean = x + &gain.dot(&(next.mean() - &pred_mean));
        let mut cov = p + &gain.dot(&(next.covariance() - &pred_cov)).dot(&gain.t());
        linalg::symmetrize(&mut cov);

        if mean.iter().chain(cov.iter()).any(|v| !v.is_finite()) {
            return Err(FilterError::NumericalInstability {
                step: t,
                reason: "smoothed state is not finite".to_string(),
            });
        }
        smoothed.push(state.with_moments(mean, cov));
    }

    smoothed.reverse();
    Ok(smoothed)
}
