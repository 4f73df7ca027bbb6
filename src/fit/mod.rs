//! Ensemble inference engine: joint fit of latent truths, per-node bias
//! functions, variance structure and node-to-node correlation.
//!
//! The expensive joint fit runs once per (working group, parameter); the
//! resulting [`EnsembleFit`] then prices consensus values for arbitrary stars
//! without re-running inference.

pub mod bias;
pub mod model;
pub mod optimize;
pub mod params;
pub mod sample;

use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::HomogConfig;
use crate::domain::{Parameter, WorkingGroup};
use crate::error::HomogError;
use crate::fit::bias::{BiasSpec, BiasTable};
use crate::fit::model::EnsemblePosterior;
use crate::math::{corr_cholesky, gls_consensus};
use crate::prepare::PreparedData;

/// One posterior configuration of the node-level parameters (the star-level
/// latents are integrated out for prediction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitPoint {
    /// Flat (node, regime, term) bias coefficients.
    pub bias_coeffs: Vec<f64>,
    /// Per-node systematic sigma, already floored.
    pub sigma_sys: Vec<f64>,
    /// Per-node reported-uncertainty multiplier.
    pub alpha: Vec<f64>,
    /// Correlation Cholesky factor, row-major lower triangle included the
    /// diagonal.
    pub corr_chol: Vec<f64>,
}

impl FitPoint {
    fn corr_cholesky_matrix(&self, n: usize) -> DMatrix<f64> {
        let mut l = DMatrix::<f64>::zeros(n, n);
        let mut idx = 0;
        for i in 0..n {
            for j in 0..=i {
                l[(i, j)] = self.corr_chol[idx];
                idx += 1;
            }
        }
        l
    }
}

/// Per-star observation aligned to the fit's node ordering: `None` where the
/// node did not report (those nodes are marginalized out).
pub type AlignedObservations = Vec<Option<(f64, f64)>>;

/// Consensus estimate for one star.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consensus {
    pub value: f64,
    pub uncertainty: f64,
    pub n_nodes: usize,
}

/// A trained ensemble model for one (working group, parameter) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleFit {
    pub wg: WorkingGroup,
    pub parameter: Parameter,
    /// Ordered node names: the index mapping fixed at preparation time.
    /// Reordering invalidates the fit.
    pub node_names: Vec<String>,
    /// Model-spec identifier, e.g. `ensemble-poly1x1regime`.
    pub model_spec: String,

    pub bias_spec: BiasSpec,
    /// Centering point for bias polynomials.
    pub pivot: f64,
    pub scale: f64,
    pub lower_sigma: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,

    /// Benchmark stars used for fitting, with their fitted latent truths at
    /// the MAP point.
    pub benchmark_star_ids: Vec<String>,
    pub map_truths: Vec<f64>,

    pub map: FitPoint,
    /// Thinned posterior draws (all chains concatenated).
    pub draws: Vec<FitPoint>,
}

impl EnsembleFit {
    pub fn n_nodes(&self) -> usize {
        self.node_names.len()
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.node_names.iter().position(|n| n == name)
    }

    fn bias_table(&self, point: &FitPoint) -> BiasTable {
        BiasTable::from_flat(
            self.bias_spec.clone(),
            self.pivot,
            self.n_nodes(),
            &point.bias_coeffs,
        )
    }

    /// Posterior-predictive consensus for one star.
    ///
    /// `observations` must be aligned to `node_names`; entries are
    /// `(value, reported_uncertainty)`. Stars with zero observed entries
    /// cannot be homogenised and return `None`.
    pub fn consensus(&self, observations: &AlignedObservations) -> Option<Consensus> {
        debug_assert_eq!(observations.len(), self.n_nodes());
        let observed: Vec<(usize, f64, f64)> = observations
            .iter()
            .enumerate()
            .filter_map(|(j, entry)| {
                entry
                    .filter(|(value, _)| value.is_finite())
                    .map(|(value, unc)| {
                        let unc = if unc.is_finite() && unc > 0.0 {
                            unc
                        } else {
                            self.scale
                        };
                        (j, value, unc)
                    })
            })
            .collect();
        if observed.is_empty() {
            return None;
        }

        let mut estimates = Vec::with_capacity(self.draws.len() + 1);
        let mut variances = Vec::with_capacity(self.draws.len() + 1);
        let points: Vec<&FitPoint> = if self.draws.is_empty() {
            vec![&self.map]
        } else {
            self.draws.iter().collect()
        };
        for point in points {
            if let Some((estimate, variance)) = self.consensus_at(point, &observed) {
                estimates.push(estimate);
                variances.push(variance);
            }
        }
        if estimates.is_empty() {
            return None;
        }

        let (mean_estimate, between_var) = crate::math::mean_var(&estimates);
        let mean_within = variances.iter().sum::<f64>() / variances.len() as f64;
        Some(Consensus {
            value: mean_estimate,
            uncertainty: (mean_within + between_var).sqrt(),
            n_nodes: observed.len(),
        })
    }

    /// GLS consensus under one posterior configuration. The bias is evaluated
    /// at the running truth estimate; one refinement pass is enough because
    /// the bias varies slowly compared to the measurement noise.
    fn consensus_at(
        &self,
        point: &FitPoint,
        observed: &[(usize, f64, f64)],
    ) -> Option<(f64, f64)> {
        let k = observed.len();
        let n = self.n_nodes();
        let bias = self.bias_table(point);
        let l = point.corr_cholesky_matrix(n);
        let corr = &l * l.transpose();

        // Covariance restricted to the observed nodes (marginalization of an
        // MVN is row/column selection).
        let mut cov = DMatrix::<f64>::zeros(k, k);
        for (a, &(ja, _, ua)) in observed.iter().enumerate() {
            let sa = ((point.alpha[ja] * ua).powi(2) + point.sigma_sys[ja].powi(2)).sqrt();
            for (b, &(jb, _, ub)) in observed.iter().enumerate() {
                let sb = ((point.alpha[jb] * ub).powi(2) + point.sigma_sys[jb].powi(2)).sqrt();
                cov[(a, b)] = corr[(ja, jb)] * sa * sb;
            }
        }

        // Pass 1: bias at the plain weighted mean. Pass 2: bias at the GLS
        // estimate from pass 1.
        let mut truth_guess = {
            let mut num = 0.0;
            let mut den = 0.0;
            for &(ja, value, ua) in observed {
                let w = 1.0 / ((point.alpha[ja] * ua).powi(2) + point.sigma_sys[ja].powi(2));
                num += w * value;
                den += w;
            }
            num / den
        };

        let mut result = None;
        for _ in 0..2 {
            let adjusted = DVector::from_iterator(
                k,
                observed
                    .iter()
                    .map(|&(ja, value, _)| value - bias.evaluate(ja, truth_guess)),
            );
            let (estimate, variance) = gls_consensus(&adjusted, &cov)?;
            truth_guess = estimate;
            result = Some((estimate, variance));
        }
        result
    }
}

/// Run the full two-stage inference for prepared data.
pub fn fit_ensemble(
    data: &PreparedData,
    config: &HomogConfig,
) -> Result<EnsembleFit, HomogError> {
    let bias_spec = BiasSpec::from_config(&config.bias);
    let posterior = EnsemblePosterior::new(data, bias_spec.clone());
    let layout = posterior.layout().clone();

    let mut rng = StdRng::seed_from_u64(config.seed);
    let start = layout.initial_point(data, &mut rng);
    let scales = layout.step_scales(data);

    info!(
        wg = %data.wg,
        parameter = %data.parameter,
        nodes = data.n_nodes(),
        benchmarks = data.n_benchmarks(),
        free_parameters = layout.len(),
        "starting ensemble fit"
    );

    let objective = |theta: &[f64]| posterior.log_posterior(theta);
    let map = optimize::maximize(objective, &start, &scales, &config.optimizer)?;
    let draws = sample::sample(
        objective,
        &map.point,
        &scales,
        &config.sampler,
        config.seed,
    )?;

    let extract = |theta: &[f64]| -> FitPoint {
        let view = layout.view(theta);
        let n = data.n_nodes();
        let sigma_sys: Vec<f64> = view
            .log_sigma_sys
            .iter()
            .map(|z| data.lower_sigma + z.exp())
            .collect();
        let alpha: Vec<f64> = view.log_alpha.iter().map(|z| z.exp()).collect();
        let l = corr_cholesky(view.corr_z, n);
        let mut corr_chol = Vec::with_capacity(n * (n + 1) / 2);
        for i in 0..n {
            for j in 0..=i {
                corr_chol.push(l[(i, j)]);
            }
        }
        FitPoint {
            bias_coeffs: view.bias_coeffs.to_vec(),
            sigma_sys,
            alpha,
            corr_chol,
        }
    };

    let map_view = layout.view(&map.point);
    let map_truths = map_view.truths.to_vec();
    let map_point = extract(&map.point);
    let posterior_points: Vec<FitPoint> = draws.draws.iter().map(|d| extract(d)).collect();

    Ok(EnsembleFit {
        wg: data.wg,
        parameter: data.parameter,
        node_names: data.node_names.clone(),
        model_spec: format!("ensemble-{}", bias_spec.id()),
        bias_spec,
        pivot: posterior.pivot(),
        scale: data.scale,
        lower_sigma: data.lower_sigma,
        lower_bound: data.lower_bound,
        upper_bound: data.upper_bound,
        benchmark_star_ids: data.star_ids.clone(),
        map_truths,
        map: map_point,
        draws: posterior_points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HomogConfig, OptimizerConfig, SamplerConfig};
    use crate::domain::{BenchmarkStar, MeasurementRow, NodeFilter, Parameter, WorkingGroup};
    use crate::prepare::prepare;
    use crate::store::MemoryStore;

    fn fast_config() -> HomogConfig {
        HomogConfig {
            optimizer: OptimizerConfig {
                max_evaluations: 400_000,
                tol: 1e-4,
                initial_step: 0.5,
            },
            sampler: SamplerConfig {
                chains: 2,
                iterations: 3_000,
                warmup: 1_500,
                thin: 30,
                rhat_threshold: 1.5,
            },
            ..HomogConfig::default()
        }
    }

    /// Two nodes reporting the same underlying truths, node B shifted +50 K.
    fn offset_store() -> (MemoryStore, WorkingGroup) {
        let wg = WorkingGroup(1);
        let mut store = MemoryStore::new();
        let truths = [
            ("b1", 4900.0),
            ("b2", 5100.0),
            ("b3", 5300.0),
            ("b4", 5500.0),
            ("b5", 5700.0),
            ("b6", 4700.0),
        ];
        for (star, truth) in truths {
            store.insert_benchmark(
                Parameter::Teff,
                BenchmarkStar {
                    star_id: star.to_string(),
                    truth,
                    truth_uncertainty: 30.0,
                },
            );
            for (node, offset) in [("N-A", 0.0), ("N-B", 50.0)] {
                store.insert_measurement(
                    wg,
                    Parameter::Teff,
                    MeasurementRow {
                        star_id: star.to_string(),
                        node_name: node.to_string(),
                        value: Some(truth + offset),
                        uncertainty: Some(60.0),
                        quality_pass: true,
                        setup: None,
                        provenance: None,
                    },
                );
            }
        }
        (store, wg)
    }

    #[test]
    fn fit_recovers_a_constant_offset_between_nodes() {
        let (store, wg) = offset_store();
        let config = fast_config();
        let data = prepare(&store, wg, Parameter::Teff, &NodeFilter::any(), &config).unwrap();
        let fit = fit_ensemble(&data, &config).unwrap();

        let bias = fit.bias_table(&fit.map);
        let a = fit.node_index("N-A").unwrap();
        let b = fit.node_index("N-B").unwrap();
        let delta = bias.evaluate(b, 5200.0) - bias.evaluate(a, 5200.0);
        // Node B reports +50 K relative to node A; priors shrink biases, so
        // accept a generous window around the truth.
        assert!((delta - 50.0).abs() < 35.0, "delta = {delta}");
    }

    #[test]
    fn map_stage_is_deterministic_for_fixed_seed() {
        let (store, wg) = offset_store();
        let mut config = fast_config();
        // Skip most of the sampler cost; determinism is about the MAP stage.
        config.sampler = SamplerConfig {
            chains: 2,
            iterations: 400,
            warmup: 200,
            thin: 20,
            rhat_threshold: 10.0,
        };
        let data = prepare(&store, wg, Parameter::Teff, &NodeFilter::any(), &config).unwrap();
        let a = fit_ensemble(&data, &config).unwrap();
        let b = fit_ensemble(&data, &config).unwrap();
        assert_eq!(a.map, b.map);
        assert_eq!(a.map_truths, b.map_truths);
        assert_eq!(a.draws, b.draws);
    }

    #[test]
    fn consensus_of_agreeing_nodes_reproduces_their_value() {
        let (store, wg) = offset_store();
        let config = fast_config();
        let data = prepare(&store, wg, Parameter::Teff, &NodeFilter::any(), &config).unwrap();
        let fit = fit_ensemble(&data, &config).unwrap();

        // Both nodes report exactly the pattern seen in training: A at truth,
        // B at truth + 50. The consensus should land near the truth.
        let observations: AlignedObservations =
            vec![Some((5200.0, 60.0)), Some((5250.0, 60.0))];
        let consensus = fit.consensus(&observations).unwrap();
        assert_eq!(consensus.n_nodes, 2);
        assert!(
            (consensus.value - 5200.0).abs() < 60.0,
            "value = {}",
            consensus.value
        );
        assert!(consensus.uncertainty > 0.0 && consensus.uncertainty < 200.0);
    }

    #[test]
    fn absent_node_is_marginalized_not_fatal() {
        let (store, wg) = offset_store();
        let config = fast_config();
        let data = prepare(&store, wg, Parameter::Teff, &NodeFilter::any(), &config).unwrap();
        let fit = fit_ensemble(&data, &config).unwrap();

        let full: AlignedObservations = vec![Some((5200.0, 60.0)), Some((5250.0, 60.0))];
        let partial: AlignedObservations = vec![Some((5200.0, 60.0)), None];
        let with_both = fit.consensus(&full).unwrap();
        let with_one = fit.consensus(&partial).unwrap();
        assert_eq!(with_one.n_nodes, 1);
        assert!(with_one.uncertainty >= with_both.uncertainty * 0.9);
        assert!(with_one.value.is_finite());
    }

    #[test]
    fn no_observations_yield_no_consensus() {
        let (store, wg) = offset_store();
        let config = fast_config();
        let data = prepare(&store, wg, Parameter::Teff, &NodeFilter::any(), &config).unwrap();
        let fit = fit_ensemble(&data, &config).unwrap();
        assert!(fit.consensus(&vec![None, None]).is_none());
    }
}
