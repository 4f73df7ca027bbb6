//! The ensemble log-posterior.
//!
//! Each node's reported value for a benchmark star is modeled as
//!
//! ```text
//! x[m][n] = truth[m] + bias_n(truth[m]) + e[m][n]
//! e[m]    ~ MVN(0, D[m] C D[m])
//! ```
//!
//! where `D[m]` is diagonal with per-node total sigma
//! `sqrt((alpha_n * u[m][n])^2 + sigma_sys_n^2)` and `C` is the node-to-node
//! correlation matrix shared across stars. Missing entries are latent unknowns
//! imputed jointly with the fit; their reported uncertainty is the prior
//! scale. Priors: truths at the calibrator values, half-normal systematic
//! sigmas at the configured scale, log-normal alpha around 1, LKJ(2)
//! correlation, and normal shrinkage on bias coefficients.

use nalgebra::{DMatrix, DVector};

use crate::fit::bias::{BiasSpec, BiasTable};
use crate::fit::params::{ParamLayout, ParamsView};
use crate::math::{corr_cholesky, lkj_cholesky_logpdf, mvn_logpdf_factor};
use crate::prepare::PreparedData;

/// Tightness of the log-normal prior on the per-node uncertainty multiplier.
const ALPHA_PRIOR_SD: f64 = 0.25;
/// LKJ concentration; > 1 shrinks toward zero inter-node correlation.
const LKJ_ETA: f64 = 2.0;

pub struct EnsemblePosterior<'a> {
    data: &'a PreparedData,
    layout: ParamLayout,
    /// Centering point for bias polynomials: mean calibrator truth.
    pivot: f64,
    /// (row, col) of each masked-out matrix entry, fixing the imputation
    /// slot order.
    missing_cells: Vec<(usize, usize)>,
}

impl<'a> EnsemblePosterior<'a> {
    pub fn new(data: &'a PreparedData, bias: BiasSpec) -> EnsemblePosterior<'a> {
        let layout = ParamLayout::new(data, bias);
        let pivot = data.mu_calibrator.mean();
        let mut missing_cells = Vec::with_capacity(data.tm);
        for i in 0..data.n_benchmarks() {
            for j in 0..data.n_nodes() {
                if !data.mask[(i, j)] {
                    missing_cells.push((i, j));
                }
            }
        }
        debug_assert_eq!(missing_cells.len(), data.tm);
        EnsemblePosterior {
            data,
            layout,
            pivot,
            missing_cells,
        }
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    pub fn pivot(&self) -> f64 {
        self.pivot
    }

    pub fn bias_table(&self, view: &ParamsView<'_>) -> BiasTable {
        BiasTable::from_flat(
            self.layout.bias.clone(),
            self.pivot,
            self.data.n_nodes(),
            view.bias_coeffs,
        )
    }

    /// Joint log-posterior (unnormalized). Non-finite or degenerate
    /// configurations return `-inf`, which both search stages treat as a
    /// rejected point.
    pub fn log_posterior(&self, theta: &[f64]) -> f64 {
        let view = self.layout.view(theta);
        let n = self.data.n_nodes();
        let m = self.data.n_benchmarks();

        let mut sigma_sys = vec![0.0; n];
        let mut alpha = vec![0.0; n];
        for j in 0..n {
            sigma_sys[j] = self.data.lower_sigma + view.log_sigma_sys[j].exp();
            alpha[j] = view.log_alpha[j].exp();
            if !(sigma_sys[j].is_finite() && alpha[j].is_finite()) {
                return f64::NEG_INFINITY;
            }
        }

        let l_corr = corr_cholesky(view.corr_z, n);
        let bias = self.bias_table(&view);

        let mut lp = 0.0;

        // Priors.
        for j in 0..n {
            // Half-normal on sigma_sys with the configured scale, plus the
            // log-Jacobian of the floor+exp transform.
            lp += -0.5 * (sigma_sys[j] / self.data.scale).powi(2) + view.log_sigma_sys[j];
            lp += -0.5 * (view.log_alpha[j] / ALPHA_PRIOR_SD).powi(2);
        }
        lp += lkj_cholesky_logpdf(&l_corr, LKJ_ETA);

        let span = (self.data.upper_bound - self.data.lower_bound).max(self.data.scale);
        let terms = self.layout.bias.terms_per_regime();
        for (offset, &coeff) in view.bias_coeffs.iter().enumerate() {
            let term = offset % terms;
            let sd = self.data.scale / span.powi(term as i32);
            lp += -0.5 * (coeff / sd).powi(2);
        }

        for i in 0..m {
            let truth = view.truths[i];
            if !truth.is_finite() {
                return f64::NEG_INFINITY;
            }
            lp += -0.5 * ((truth - self.data.mu_calibrator[i]) / self.data.sigma_calibrator[i])
                .powi(2);
        }

        // Likelihood: one small MVN per benchmark star, covariance factor
        // D * L_corr so Sigma = D C D.
        let mut resid = DVector::<f64>::zeros(n);
        let mut factor = DMatrix::<f64>::zeros(n, n);
        let mut imputed = DMatrix::<f64>::zeros(m, n);
        for (&(i, j), &value) in self.missing_cells.iter().zip(view.missing.iter()) {
            imputed[(i, j)] = value;
        }

        for i in 0..m {
            let truth = view.truths[i];
            for j in 0..n {
                let x = if self.data.mask[(i, j)] {
                    self.data.values[(i, j)]
                } else {
                    imputed[(i, j)]
                };
                resid[j] = x - truth - bias.evaluate(j, truth);

                let u = self.data.uncertainties[(i, j)];
                let total = ((alpha[j] * u).powi(2) + sigma_sys[j].powi(2)).sqrt();
                for k in 0..=j {
                    factor[(j, k)] = total * l_corr[(j, k)];
                }
            }
            match mvn_logpdf_factor(&resid, &factor) {
                Some(v) => lp += v,
                None => return f64::NEG_INFINITY,
            }
        }

        if lp.is_finite() { lp } else { f64::NEG_INFINITY }
    }
}
