//! Multivariate-normal and generalized-least-squares helpers.
//!
//! In this project we repeatedly evaluate, for each benchmark star, the
//! density of a small (node-count sized) multivariate normal with covariance
//! `Σ = D C D`, and, per homogenised star, a GLS mean with the same `Σ`
//! restricted to the observed nodes.
//!
//! Implementation choices:
//! - We work with Cholesky factors throughout: `Σ = (D L)(D L)ᵀ` where `L` is
//!   the correlation Cholesky factor, so densities need one triangular solve
//!   and no explicit inverse.
//! - Dimensions are tiny (typically 2–8 nodes), so dense `nalgebra` routines
//!   are comfortably fast even inside the sampler's inner loop.

use nalgebra::{DMatrix, DVector};

const LN_2PI: f64 = 1.837_877_066_409_345_2;

/// Log-density of `N(0, A Aᵀ)` at `resid`, given the covariance factor `A`
/// (lower triangular, e.g. `D * L_corr`).
///
/// Returns `None` if the factor is numerically degenerate.
pub fn mvn_logpdf_factor(resid: &DVector<f64>, factor: &DMatrix<f64>) -> Option<f64> {
    let k = resid.len();
    debug_assert_eq!(factor.nrows(), k);
    debug_assert_eq!(factor.ncols(), k);

    let mut log_det = 0.0;
    for i in 0..k {
        let d = factor[(i, i)];
        if !(d.is_finite() && d > 0.0) {
            return None;
        }
        log_det += d.ln();
    }

    let z = factor.solve_lower_triangular(resid)?;
    let quad = z.dot(&z);
    if !quad.is_finite() {
        return None;
    }
    Some(-0.5 * quad - log_det - 0.5 * k as f64 * LN_2PI)
}

/// Weighted consensus of correlated observations.
///
/// Solves the GLS problem `y = t·1 + e`, `e ~ N(0, cov)` and returns
/// `(t_hat, var(t_hat))`. Returns `None` when `cov` is not positive definite.
pub fn gls_consensus(y: &DVector<f64>, cov: &DMatrix<f64>) -> Option<(f64, f64)> {
    let k = y.len();
    debug_assert_eq!(cov.nrows(), k);
    debug_assert_eq!(cov.ncols(), k);

    let chol = cov.clone().cholesky()?;
    let ones = DVector::from_element(k, 1.0);
    let w = chol.solve(&ones);
    let denom = ones.dot(&w);
    if !(denom.is_finite() && denom > 0.0) {
        return None;
    }
    let numer = y.dot(&w);
    let t_hat = numer / denom;
    let var = 1.0 / denom;
    if t_hat.is_finite() && var.is_finite() {
        Some((t_hat, var))
    } else {
        None
    }
}
