//! Unconstrained parametrization of correlation matrices.
//!
//! The sampler walks an unconstrained vector `z` of length `n(n-1)/2`; each
//! entry maps through `tanh` to a canonical partial correlation in (-1, 1),
//! and the partials build a lower-triangular Cholesky factor `L` with unit-norm
//! rows. `C = L Lᵀ` is then a valid correlation matrix by construction, so a
//! non-positive-definite proposal cannot occur.

use nalgebra::DMatrix;

/// Number of unconstrained entries for an `n × n` correlation matrix.
pub fn corr_dim(n: usize) -> usize {
    n * (n - 1) / 2
}

/// Map an unconstrained vector to the correlation Cholesky factor.
///
/// `z = 0` maps to the identity (no inter-node correlation).
pub fn corr_cholesky(z: &[f64], n: usize) -> DMatrix<f64> {
    debug_assert_eq!(z.len(), corr_dim(n));

    let mut l = DMatrix::<f64>::zeros(n, n);
    if n == 0 {
        return l;
    }
    l[(0, 0)] = 1.0;

    let mut idx = 0;
    for i in 1..n {
        let mut sum_sq: f64 = 0.0;
        for j in 0..i {
            let partial = z[idx].tanh();
            idx += 1;
            let entry = partial * (1.0 - sum_sq).max(0.0).sqrt();
            l[(i, j)] = entry;
            sum_sq += entry * entry;
        }
        l[(i, i)] = (1.0 - sum_sq).max(0.0).sqrt();
    }
    l
}

/// Recover the full correlation matrix `C = L Lᵀ`.
pub fn corr_from_cholesky(l: &DMatrix<f64>) -> DMatrix<f64> {
    l * l.transpose()
}

/// LKJ(η) log-density (up to a constant) of a correlation Cholesky factor.
///
/// `η = 1` is uniform over correlation matrices; `η > 1` concentrates mass
/// toward the identity, which regularizes fits with few benchmark stars.
pub fn lkj_cholesky_logpdf(l: &DMatrix<f64>, eta: f64) -> f64 {
    let n = l.nrows();
    let mut lp = 0.0;
    for i in 1..n {
        let d = l[(i, i)];
        if d <= 0.0 {
            return f64::NEG_INFINITY;
        }
        lp += (n - i - 1) as f64 * d.ln() + (2.0 * eta - 2.0) * d.ln();
    }
    lp
}
