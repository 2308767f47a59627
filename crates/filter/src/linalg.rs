//! Small dense linear algebra for the filter recursions.
//!
//! State dimensions are tiny (1 to 13 for the built-in families), so these
//! routines favour plain loops over an external LAPACK binding. Covariances
//! are always handled as symmetric positive (semi-)definite matrices, which
//! lets Cholesky serve both as the PSD check and as the inversion path.

use ndarray::{Array1, Array2};
use tracing::debug;

use crate::error::FilterError;

/// Relative pivot tolerance below which a Cholesky factorisation is
/// treated as singular.
const PIVOT_TOL: f64 = 1e-12;

/// Ridge added to a near-singular matrix, as a fraction of its mean
/// diagonal.
const RIDGE_SCALE: f64 = 1e-9;

/// Smallest ridge ever added.
const RIDGE_FLOOR: f64 = 1e-12;

/// Tolerance for [`is_symmetric`], relative to the largest entry.
const SYMMETRY_TOL: f64 = 1e-9;

/// Inverse and log-determinant of a symmetric positive-definite matrix.
#[derive(Debug, Clone)]
pub struct SpdInverse {
    /// `A⁻¹`.
    pub inverse: Array2<f64>,
    /// `ln det A`.
    pub ln_det: f64,
    /// Ridge that had to be added before factorising (0.0 if none).
    pub ridge: f64,
}

/// Replaces `m` by `(m + mᵀ) / 2` in place.
pub fn symmetrize(m: &mut Array2<f64>) {
    let n = m.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (m[[i, j]] + m[[j, i]]);
            m[[i, j]] = avg;
            m[[j, i]] = avg;
        }
    }
}

/// Returns true if `m` is square and symmetric up to a relative tolerance.
pub fn is_symmetric(m: &Array2<f64>) -> bool {
    if m.nrows() != m.ncols() {
        return false;
    }
    let scale = m.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
    let n = m.nrows();
    (0..n).all(|i| ((i + 1)..n).all(|j| (m[[i, j]] - m[[j, i]]).abs() <= SYMMETRY_TOL * scale))
}

/// Lower-triangular Cholesky factor `L` with `A = L·Lᵀ`.
///
/// Returns `None` if a pivot is not comfortably positive relative to the
/// largest diagonal entry, which covers indefinite, singular and
/// non-finite input.
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return None;
    }
    let scale = a.diag().iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let tol = PIVOT_TOL * scale;
    let mut l = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut d = a[[j, j]];
        for k in 0..j {
            d -= l[[j, k]] * l[[j, k]];
        }
        // Negated comparison so that NaN pivots are rejected too.
        if !(d > tol) {
            return None;
        }
        let ljj = d.sqrt();
        l[[j, j]] = ljj;
        for i in (j + 1)..n {
            let mut s = a[[i, j]];
            for k in 0..j {
                s -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = s / ljj;
        }
    }
    Some(l)
}

/// Cholesky factor of a PSD matrix that may be singular.
///
/// Adds a diagonal jitter proportional to the mean diagonal, growing from
/// `1e-9` to `1e-5` of it, until the factorisation succeeds. Used to draw
/// Gaussian noise with covariance `A`. Returns `None` if `A` has a clearly
/// negative eigenvalue.
pub fn cholesky_psd(a: &Array2<f64>) -> Option<Array2<f64>> {
    if let Some(l) = cholesky(a) {
        return Some(l);
    }
    let n = a.nrows();
    let trace: f64 = a.diag().iter().map(|v| v.abs()).sum();
    let base = (trace / n.max(1) as f64).max(1.0);
    let mut jitter = RIDGE_SCALE * base;
    for _ in 0..3 {
        let reg = add_ridge(a, jitter);
        if let Some(l) = cholesky(&reg) {
            return Some(l);
        }
        jitter *= 100.0;
    }
    None
}

/// Returns true if `a` is symmetric positive semi-definite.
pub fn is_psd(a: &Array2<f64>) -> bool {
    is_symmetric(a) && a.iter().all(|v| v.is_finite()) && cholesky_psd(a).is_some()
}

/// Inverts a symmetric positive-definite matrix and returns its
/// log-determinant.
///
/// If the direct factorisation fails, a ridge `ε·I` is added (ε scaled to
/// the mean diagonal, floor `1e-12`) and the factorisation is retried once.
///
/// # Errors
///
/// | Variant | Trigger |
/// |---------|---------|
/// | `NumericalInstability` | `a` is non-finite, or still singular after the ridge |
pub fn spd_inverse(a: &Array2<f64>, step: usize, what: &str) -> Result<SpdInverse, FilterError> {
    if a.iter().any(|v| !v.is_finite()) {
        return Err(FilterError::NumericalInstability {
            step,
            reason: format!("{what} contains non-finite values"),
        });
    }
    if let Some(l) = cholesky(a) {
        return Ok(from_cholesky(&l, 0.0));
    }

    let n = a.nrows().max(1);
    let mean_diag = a.diag().iter().map(|v| v.abs()).sum::<f64>() / n as f64;
    let ridge = (RIDGE_SCALE * mean_diag).max(RIDGE_FLOOR);
    debug!(step, ridge, what, "regularising near-singular matrix");

    match cholesky(&add_ridge(a, ridge)) {
        Some(l) => Ok(from_cholesky(&l, ridge)),
        None => Err(FilterError::NumericalInstability {
            step,
            reason: format!("{what} is singular after ridge regularisation"),
        }),
    }
}

/// Quadratic form `vᵀ·A·v`.
pub fn quadratic_form(v: &Array1<f64>, a: &Array2<f64>) -> f64 {
    v.dot(&a.dot(v))
}

/// `I` of size `n`.
pub fn identity(n: usize) -> Array2<f64> {
    Array2::eye(n)
}

fn add_ridge(a: &Array2<f64>, ridge: f64) -> Array2<f64> {
    let mut reg = a.clone();
    for i in 0..reg.nrows() {
        reg[[i, i]] += ridge;
    }
    reg
}

fn from_cholesky(l: &Array2<f64>, ridge: f64) -> SpdInverse {
    let n = l.nrows();

    // Forward substitution: L·X = I gives X = L⁻¹ (lower triangular).
    let mut l_inv = Array2::<f64>::zeros((n, n));
    for c in 0..n {
        for i in c..n {
            let mut s = if i == c { 1.0 } else { 0.0 };
            for k in c..i {
                s -= l[[i, k]] * l_inv[[k, c]];
            }
            l_inv[[i, c]] = s / l[[i, i]];
        }
    }

    let mut inverse = l_inv.t().dot(&l_inv);
    symmetrize(&mut inverse);
    let ln_det = 2.0 * l.diag().iter().map(|v| v.ln()).sum::<f64>();
    SpdInverse {
        inverse,
        ln_det,
        ridge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn symmetrize_averages_off_diagonal() {
        let mut m = array![[1.0, 2.0], [4.0, 3.0]];
        symmetrize(&mut m);
        assert_abs_diff_eq!(m[[0, 1]], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m[[1, 0]], 3.0, epsilon = 1e-12);
        assert!(is_symmetric(&m));
    }

    #[test]
    fn cholesky_reconstructs() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let l = cholesky(&a).unwrap();
        let back = l.dot(&l.t());
        for (x, y) in back.iter().zip(a.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn cholesky_rejects_indefinite() {
        assert!(cholesky(&array![[1.0, 2.0], [2.0, 1.0]]).is_none());
        assert!(cholesky(&array![[f64::NAN]]).is_none());
    }

    #[test]
    fn cholesky_psd_accepts_singular() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        assert!(cholesky(&a).is_none());
        assert!(cholesky_psd(&a).is_some());
        assert!(is_psd(&a));
        assert!(is_psd(&Array2::zeros((2, 2))));
        assert!(!is_psd(&array![[1.0, 0.0], [0.0, -1.0]]));
    }

    #[test]
    fn spd_inverse_matches_closed_form() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let inv = spd_inverse(&a, 0, "test").unwrap();
        // det = 8, inverse = [[3, -2], [-2, 4]] / 8
        assert_abs_diff_eq!(inv.inverse[[0, 0]], 3.0 / 8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(inv.inverse[[0, 1]], -2.0 / 8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(inv.inverse[[1, 1]], 4.0 / 8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(inv.ln_det, 8.0_f64.ln(), epsilon = 1e-12);
        assert_eq!(inv.ridge, 0.0);
    }

    #[test]
    fn spd_inverse_regularises_singular() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        let inv = spd_inverse(&a, 3, "innovation covariance").unwrap();
        assert!(inv.ridge > 0.0);
        assert!(inv.inverse.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn spd_inverse_fails_on_non_finite() {
        let a = array![[f64::INFINITY]];
        let err = spd_inverse(&a, 5, "innovation covariance").unwrap_err();
        assert!(matches!(err, FilterError::NumericalInstability { step: 5, .. }));
    }

    #[test]
    fn spd_inverse_fails_on_negative() {
        let a = array![[-1.0]];
        assert!(spd_inverse(&a, 0, "innovation covariance").is_err());
    }

    #[test]
    fn quadratic_form_scalar() {
        let v = array![2.0];
        let a = array![[0.5]];
        assert_abs_diff_eq!(quadratic_form(&v, &a), 2.0, epsilon = 1e-12);
    }
}
