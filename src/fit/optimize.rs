//! Deterministic MAP search.
//!
//! A compass (coordinate pattern) search: sweep the coordinates, probing
//! `±step` on each; accept improvements, grow the step on success and shrink
//! it when both directions fail. The search is fully deterministic given the
//! starting point, so identical data and seeds reproduce the same MAP point.
//!
//! Convergence means every per-coordinate step has shrunk below `tol` times
//! its scale. Exhausting the evaluation budget first is a convergence failure
//! and the caller must discard the fit.

use tracing::debug;

use crate::config::OptimizerConfig;
use crate::error::InferenceConvergenceError;

#[derive(Debug, Clone)]
pub struct OptimResult {
    pub point: Vec<f64>,
    pub value: f64,
    pub evaluations: usize,
    pub sweeps: usize,
}

const STEP_GROW: f64 = 2.0;
const STEP_SHRINK: f64 = 0.5;

/// Maximize `f` from `x0` with per-coordinate step scales.
pub fn maximize<F>(
    f: F,
    x0: &[f64],
    scales: &[f64],
    options: &OptimizerConfig,
) -> Result<OptimResult, InferenceConvergenceError>
where
    F: Fn(&[f64]) -> f64,
{
    debug_assert_eq!(x0.len(), scales.len());
    let dim = x0.len();

    let mut x = x0.to_vec();
    let mut best = f(&x);
    let mut evaluations = 1usize;
    if !best.is_finite() {
        return Err(InferenceConvergenceError::NonFiniteObjective);
    }

    let mut steps: Vec<f64> = scales
        .iter()
        .map(|s| options.initial_step * s.max(1e-12))
        .collect();
    let max_steps: Vec<f64> = scales.iter().map(|s| 8.0 * s.max(1e-12)).collect();

    let mut sweeps = 0usize;
    loop {
        sweeps += 1;

        for i in 0..dim {
            let original = x[i];
            let mut improved_coord = false;

            for direction in [1.0, -1.0] {
                if evaluations >= options.max_evaluations {
                    return Err(InferenceConvergenceError::OptimizerBudgetExhausted {
                        budget: options.max_evaluations,
                    });
                }
                x[i] = original + direction * steps[i];
                let candidate = f(&x);
                evaluations += 1;
                if candidate > best {
                    best = candidate;
                    improved_coord = true;
                    break;
                }
                x[i] = original;
            }

            if improved_coord {
                steps[i] = (steps[i] * STEP_GROW).min(max_steps[i]);
            } else {
                steps[i] *= STEP_SHRINK;
            }
        }

        let converged = steps
            .iter()
            .zip(scales.iter())
            .all(|(step, scale)| *step <= options.tol * scale.max(1e-12));
        if converged {
            debug!(sweeps, evaluations, value = best, "MAP search converged");
            return Ok(OptimResult {
                point: x,
                value: best,
                evaluations,
                sweeps,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(budget: usize) -> OptimizerConfig {
        OptimizerConfig {
            max_evaluations: budget,
            tol: 1e-7,
            initial_step: 0.5,
        }
    }

    #[test]
    fn finds_the_maximum_of_a_separable_quadratic() {
        let f = |x: &[f64]| -(x[0] - 3.0).powi(2) - 2.0 * (x[1] + 1.5).powi(2);
        let result = maximize(f, &[0.0, 0.0], &[1.0, 1.0], &options(100_000)).unwrap();
        assert!((result.point[0] - 3.0).abs() < 1e-4, "{:?}", result.point);
        assert!((result.point[1] + 1.5).abs() < 1e-4, "{:?}", result.point);
    }

    #[test]
    fn handles_correlated_quadratics() {
        let f = |x: &[f64]| {
            let (a, b) = (x[0] - 1.0, x[1] - 2.0);
            -(a * a + b * b + 1.6 * a * b)
        };
        let result = maximize(f, &[-4.0, 5.0], &[1.0, 1.0], &options(300_000)).unwrap();
        assert!((result.point[0] - 1.0).abs() < 1e-3);
        assert!((result.point[1] - 2.0).abs() < 1e-3);
    }

    #[test]
    fn is_deterministic() {
        let f = |x: &[f64]| -(x[0].powi(2)) - (x[1] - 0.5).powi(4);
        let a = maximize(f, &[2.0, 2.0], &[1.0, 1.0], &options(100_000)).unwrap();
        let b = maximize(f, &[2.0, 2.0], &[1.0, 1.0], &options(100_000)).unwrap();
        assert_eq!(a.point, b.point);
        assert_eq!(a.evaluations, b.evaluations);
    }

    #[test]
    fn budget_exhaustion_is_an_error() {
        let f = |x: &[f64]| -(x[0] - 100.0).powi(2);
        let err = maximize(f, &[0.0], &[1.0], &options(10)).unwrap_err();
        assert!(matches!(
            err,
            InferenceConvergenceError::OptimizerBudgetExhausted { .. }
        ));
    }

    #[test]
    fn non_finite_start_is_an_error() {
        let f = |_: &[f64]| f64::NAN;
        let err = maximize(f, &[0.0], &[1.0], &options(10)).unwrap_err();
        assert!(matches!(err, InferenceConvergenceError::NonFiniteObjective));
    }
}
