//! Small order statistics used by the median fallback model and diagnostics.

/// Median of a mutable slice (sorts in place). `None` on empty input.
pub fn median_mut(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Median absolute deviation about the median, scaled to be a consistent
/// estimator of the normal standard deviation (factor 1.4826).
pub fn mad_std(values: &[f64]) -> Option<f64> {
    let mut work: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let center = median_mut(&mut work)?;
    let mut abs_dev: Vec<f64> = work.iter().map(|v| (v - center).abs()).collect();
    median_mut(&mut abs_dev).map(|mad| mad * 1.4826)
}

/// Sample mean and (unbiased) variance. Variance is zero for fewer than two
/// values.
pub fn mean_var(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (f64::NAN, 0.0);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    (mean, var)
}

/// Split R-hat convergence diagnostic over per-chain traces.
///
/// Each chain is split in half so within-chain drift also inflates the
/// statistic. Returns `None` when there is not enough data to diagnose.
pub fn split_rhat(traces: &[Vec<f64>]) -> Option<f64> {
    let mut halves: Vec<&[f64]> = Vec::with_capacity(traces.len() * 2);
    for trace in traces {
        if trace.len() < 4 {
            return None;
        }
        let mid = trace.len() / 2;
        halves.push(&trace[..mid]);
        halves.push(&trace[mid..]);
    }
    let m = halves.len();
    let n = halves.iter().map(|h| h.len()).min()?;
    if m < 2 || n < 2 {
        return None;
    }

    let stats: Vec<(f64, f64)> = halves.iter().map(|h| mean_var(&h[..n])).collect();
    let grand_mean = stats.iter().map(|(mean, _)| mean).sum::<f64>() / m as f64;

    let b = n as f64 / (m - 1) as f64
        * stats
            .iter()
            .map(|(mean, _)| (mean - grand_mean).powi(2))
            .sum::<f64>();
    let w = stats.iter().map(|(_, var)| var).sum::<f64>() / m as f64;
    if !(w.is_finite() && w > 0.0) {
        // A zero-variance trace is either a stuck chain or a constant
        // objective; either way the diagnostic cannot vouch for mixing.
        return None;
    }

    let var_plus = (n - 1) as f64 / n as f64 * w + b / n as f64;
    Some((var_plus / w).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_handles_odd_and_even() {
        assert_eq!(median_mut(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median_mut(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median_mut(&mut []), None);
    }

    #[test]
    fn mad_std_of_constant_is_zero() {
        assert_eq!(mad_std(&[5.0, 5.0, 5.0]), Some(0.0));
    }

    #[test]
    fn split_rhat_near_one_for_identical_chains() {
        let trace: Vec<f64> = (0..100).map(|i| (i as f64 * 0.7).sin()).collect();
        let rhat = split_rhat(&[trace.clone(), trace]).unwrap();
        assert!(rhat < 1.05, "rhat = {rhat}");
    }

    #[test]
    fn split_rhat_large_for_disjoint_chains() {
        let a: Vec<f64> = (0..100).map(|i| (i as f64 * 0.7).sin()).collect();
        let b: Vec<f64> = a.iter().map(|v| v + 50.0).collect();
        let rhat = split_rhat(&[a, b]).unwrap();
        assert!(rhat > 2.0, "rhat = {rhat}");
    }
}
