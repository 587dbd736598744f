//! Linear solvers for the logistic fit.
//!
//! Each Newton step of the penalized logistic regression solves
//!
//! ```text
//! (Xᵀ W X + Λ) Δ = g
//! ```
//!
//! The system matrix is symmetric positive definite whenever the penalty is
//! positive, so Cholesky is tried first. If the factorization fails (e.g. a
//! zero penalty with collinear columns) we fall back to an SVD least-squares
//! solve with progressively looser tolerances.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Solve `a x = b` for symmetric positive (semi-)definite `a`.
pub fn solve_symmetric(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    if let Some(chol) = a.clone().cholesky() {
        let x = chol.solve(b);
        if x.iter().all(|v| v.is_finite()) {
            return Some(x);
        }
    }
    solve_least_squares(a, b)
}
