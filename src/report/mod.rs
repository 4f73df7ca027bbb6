//! Formatted terminal output for fits and homogenisation batches.
//!
//! We keep formatting code in one place so the statistical code stays clean
//! and output changes are localized.

use crate::domain::{Parameter, WorkingGroup};
use crate::fit::EnsembleFit;
use crate::homog::HomogBatch;

/// Summary of a completed fit: node table with fitted error structure.
pub fn format_fit_summary(fit: &EnsembleFit) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== homog - ensemble fit {} / {} ===\n",
        fit.wg, fit.parameter
    ));
    out.push_str(&format!(
        "Model: {} | benchmarks: {} | posterior draws: {}\n",
        fit.model_spec,
        fit.benchmark_star_ids.len(),
        fit.draws.len()
    ));
    out.push_str(&format!(
        "Value range seen in fitting: [{:.2}, {:.2}] {}\n\n",
        fit.lower_bound,
        fit.upper_bound,
        fit.parameter.unit_label()
    ));

    out.push_str(&format!(
        "{:<24} {:>12} {:>8} {:>12}\n",
        "node",
        "sigma_sys",
        "alpha",
        "bias@pivot"
    ));
    for (j, node) in fit.node_names.iter().enumerate() {
        // Term 0 of the pivot's regime is the bias at the pivot itself.
        let regime = fit.bias_spec.regime_index(fit.pivot);
        let terms = fit.bias_spec.terms_per_regime();
        let offset = (j * fit.bias_spec.n_regimes() + regime) * terms;
        let bias_at_pivot = fit.map.bias_coeffs[offset];
        out.push_str(&format!(
            "{:<24} {:>12.3} {:>8.3} {:>12.3}\n",
            node, fit.map.sigma_sys[j], fit.map.alpha[j], bias_at_pivot
        ));
    }
    out
}

/// Summary of a homogenisation batch, including the unresolved audit list.
pub fn format_batch_summary(
    batch: &HomogBatch,
    wg: WorkingGroup,
    parameter: Parameter,
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== homog - homogenisation {} / {} ===\n",
        wg, parameter
    ));
    out.push_str(&format!(
        "Homogenised: {} | unresolved: {}\n",
        batch.n_homogenised(),
        batch.n_unresolved()
    ));

    if !batch.unresolved.is_empty() {
        out.push_str("\nUnresolved stars (no accepted measurements):\n");
        for star in &batch.unresolved {
            out.push_str(&format!("  {star}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_summary_lists_unresolved_stars() {
        let mut batch = HomogBatch::default();
        batch.results.insert("s1".to_string(), (5000.0, 40.0));
        batch.unresolved.push("s9".to_string());

        let text = format_batch_summary(&batch, WorkingGroup(1), Parameter::Teff);
        assert!(text.contains("Homogenised: 1"));
        assert!(text.contains("unresolved: 1"));
        assert!(text.contains("s9"));
    }
}
