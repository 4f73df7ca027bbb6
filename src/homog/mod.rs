//! Homogenisation pass: apply a fitted ensemble model to stars from the store.
//!
//! Stars are evaluated independently (rayon), then results are written back
//! through a single serialized upsert loop so no update is lost. A star with
//! zero accepted measurements is skipped, logged, and reported as unresolved;
//! it never aborts the batch.

pub mod median;

pub use median::MedianModel;

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::domain::{ConsensusResult, Parameter, StarSelector, WorkingGroup};
use crate::error::{HomogError, ModelCompatibilityError};
use crate::fit::{AlignedObservations, Consensus, EnsembleFit};
use crate::store::CatalogStore;

/// Outcome of one homogenisation batch.
#[derive(Debug, Clone, Default)]
pub struct HomogBatch {
    /// Consensus per star id, in sorted order.
    pub results: BTreeMap<String, (f64, f64)>,
    /// Stars that could not be homogenised (no accepted measurements).
    pub unresolved: Vec<String>,
}

impl HomogBatch {
    pub fn n_homogenised(&self) -> usize {
        self.results.len()
    }

    pub fn n_unresolved(&self) -> usize {
        self.unresolved.len()
    }
}

/// Applies one fitted model to stars selected from a store.
#[derive(Debug)]
pub struct Homogeniser<'a> {
    fit: &'a EnsembleFit,
}

impl<'a> Homogeniser<'a> {
    /// Bind a fitted model to a requested (working group, parameter) context.
    /// A mismatch is a compatibility error, never a silent reinterpretation.
    pub fn new(
        fit: &'a EnsembleFit,
        wg: WorkingGroup,
        parameter: Parameter,
    ) -> Result<Homogeniser<'a>, ModelCompatibilityError> {
        if fit.wg != wg {
            return Err(ModelCompatibilityError::WorkingGroup {
                requested: wg,
                found: fit.wg,
            });
        }
        if fit.parameter != parameter {
            return Err(ModelCompatibilityError::Parameter {
                requested: parameter,
                found: fit.parameter,
            });
        }
        Ok(Homogeniser { fit })
    }

    pub fn fit(&self) -> &EnsembleFit {
        self.fit
    }

    /// Homogenise every selected star and upsert one consensus row each.
    pub fn homogenise(
        &self,
        store: &mut dyn CatalogStore,
        selector: &StarSelector,
    ) -> Result<HomogBatch, HomogError> {
        let wg = self.fit.wg;
        let parameter = self.fit.parameter;
        let stars = store.select_stars(wg, parameter, selector)?;

        // One read for the whole batch; nodes outside the fitted set are
        // ignored (they were not part of the model and cannot be aligned).
        let rows = store.measurements(wg, parameter, &crate::domain::NodeFilter::any())?;
        let mut per_star: BTreeMap<&str, AlignedObservations> = BTreeMap::new();
        for star in &stars {
            per_star.insert(star.as_str(), vec![None; self.fit.n_nodes()]);
        }
        for row in &rows {
            let Some(slots) = per_star.get_mut(row.star_id.as_str()) else {
                continue;
            };
            if !row.quality_pass {
                continue;
            }
            let Some(value) = row.value.filter(|v| v.is_finite()) else {
                continue;
            };
            let Some(index) = self.fit.node_index(&row.node_name) else {
                debug!(
                    star_id = %row.star_id,
                    node = %row.node_name,
                    "node not in fitted model; ignoring measurement"
                );
                continue;
            };
            // At most one accepted measurement per (star, node); keep the
            // first in deterministic row order.
            if slots[index].is_none() {
                slots[index] = Some((value, row.uncertainty.unwrap_or(f64::NAN)));
            }
        }

        // Independent per-star evaluation; writes happen serially below.
        let evaluated: Vec<(String, Option<Consensus>)> = stars
            .par_iter()
            .map(|star| {
                let observations = &per_star[star.as_str()];
                (star.clone(), self.fit.consensus(observations))
            })
            .collect();

        let mut batch = HomogBatch::default();
        for (star_id, outcome) in evaluated {
            match outcome {
                Some(consensus) => {
                    store.upsert_consensus(ConsensusResult {
                        star_id: star_id.clone(),
                        wg,
                        parameter,
                        value: consensus.value,
                        uncertainty: consensus.uncertainty,
                        source_model: self.fit.model_spec.clone(),
                        n_nodes: consensus.n_nodes,
                    })?;
                    batch.results.insert(star_id, (consensus.value, consensus.uncertainty));
                }
                None => {
                    warn!(star_id = %star_id, %wg, %parameter, "unresolved: no accepted measurements");
                    batch.unresolved.push(star_id);
                }
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HomogConfig, OptimizerConfig, SamplerConfig};
    use crate::domain::{BenchmarkStar, MeasurementRow, NodeFilter};
    use crate::fit::fit_ensemble;
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
                rhat_threshold: 2.0,
            },
            ..HomogConfig::default()
        }
    }

    fn seeded_store() -> (MemoryStore, WorkingGroup) {
        let wg = WorkingGroup(1);
        let mut store = MemoryStore::new();
        let benchmarks = [
            ("b1", 4900.0),
            ("b2", 5100.0),
            ("b3", 5300.0),
            ("b4", 5500.0),
            ("b5", 4700.0),
            ("b6", 5700.0),
        ];
        // Fixed pseudo-noise keeps the fixture deterministic without an RNG.
        let noise = [8.0, -12.0, 5.0, -6.0, 10.0, -4.0];
        for (k, (star, truth)) in benchmarks.iter().enumerate() {
            store.insert_benchmark(
                Parameter::Teff,
                BenchmarkStar {
                    star_id: star.to_string(),
                    truth: *truth,
                    truth_uncertainty: 40.0,
                },
            );
            for (node, sign) in [("N-A", 1.0), ("N-B", -1.0)] {
                store.insert_measurement(
                    wg,
                    Parameter::Teff,
                    MeasurementRow {
                        star_id: star.to_string(),
                        node_name: node.to_string(),
                        value: Some(truth + sign * noise[k]),
                        uncertainty: Some(70.0),
                        quality_pass: true,
                        setup: Some("UVES-580".to_string()),
                        provenance: None,
                    },
                );
            }
        }
        // Survey targets (not benchmarks).
        for (star, value) in [("t1", 5050.0), ("t2", 5600.0)] {
            for node in ["N-A", "N-B"] {
                store.insert_measurement(
                    wg,
                    Parameter::Teff,
                    MeasurementRow {
                        star_id: star.to_string(),
                        node_name: node.to_string(),
                        value: Some(value),
                        uncertainty: Some(70.0),
                        quality_pass: true,
                        setup: Some("UVES-580".to_string()),
                        provenance: None,
                    },
                );
            }
        }
        // A star whose only measurements failed QC: must come back unresolved.
        store.insert_measurement(
            wg,
            Parameter::Teff,
            MeasurementRow {
                star_id: "t3".to_string(),
                node_name: "N-A".to_string(),
                value: Some(9000.0),
                uncertainty: Some(70.0),
                quality_pass: false,
                setup: Some("UVES-580".to_string()),
                provenance: None,
            },
        );
        (store, wg)
    }

    fn fitted(store: &MemoryStore, wg: WorkingGroup) -> crate::fit::EnsembleFit {
        let config = fast_config();
        let data = prepare(store, wg, Parameter::Teff, &NodeFilter::any(), &config).unwrap();
        fit_ensemble(&data, &config).unwrap()
    }

    #[test]
    fn batch_homogenises_and_reports_unresolved() {
        let (mut store, wg) = seeded_store();
        let fit = fitted(&store, wg);
        let homogeniser = Homogeniser::new(&fit, wg, Parameter::Teff).unwrap();

        let batch = homogeniser
            .homogenise(&mut store, &StarSelector::All)
            .unwrap();

        // Benchmarks + two targets homogenised; the QC-failed star skipped.
        assert_eq!(batch.n_homogenised(), 8);
        assert_eq!(batch.unresolved, vec!["t3".to_string()]);
        assert!(store.consensus_for("t3", wg, Parameter::Teff).is_none());

        let (value, uncertainty) = batch.results["t1"];
        assert!((value - 5050.0).abs() < 60.0, "value = {value}");
        assert!(uncertainty > 0.0);

        let row = store.consensus_for("t1", wg, Parameter::Teff).unwrap();
        assert_eq!(row.n_nodes, 2);
        assert_eq!(row.source_model, fit.model_spec);
    }

    #[test]
    fn rerun_overwrites_rather_than_appends() {
        let (mut store, wg) = seeded_store();
        let fit = fitted(&store, wg);
        let homogeniser = Homogeniser::new(&fit, wg, Parameter::Teff).unwrap();

        let selector = StarSelector::Ids(vec!["t1".to_string()]);
        homogeniser.homogenise(&mut store, &selector).unwrap();
        homogeniser.homogenise(&mut store, &selector).unwrap();

        let rows: Vec<_> = store
            .consensus_rows()
            .filter(|r| r.star_id == "t1")
            .collect();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn selector_by_setup_restricts_the_batch() {
        let (mut store, wg) = seeded_store();
        // One GIRAFFE star that must not be selected by the UVES setup filter.
        store.insert_measurement(
            wg,
            Parameter::Teff,
            MeasurementRow {
                star_id: "g1".to_string(),
                node_name: "N-A".to_string(),
                value: Some(4400.0),
                uncertainty: Some(70.0),
                quality_pass: true,
                setup: Some("GIRAFFE-HR10".to_string()),
                provenance: None,
            },
        );
        let fit = fitted(&store, wg);
        let homogeniser = Homogeniser::new(&fit, wg, Parameter::Teff).unwrap();
        let batch = homogeniser
            .homogenise(&mut store, &StarSelector::Setup("UVES".to_string()))
            .unwrap();
        assert!(!batch.results.contains_key("g1"));
        assert!(store.consensus_for("g1", wg, Parameter::Teff).is_none());
    }

    #[test]
    fn mismatched_parameter_is_a_compatibility_error() {
        let (store, wg) = seeded_store();
        let fit = fitted(&store, wg);
        let err = Homogeniser::new(&fit, wg, Parameter::Feh).unwrap_err();
        assert!(matches!(err, ModelCompatibilityError::Parameter { .. }));

        let err = Homogeniser::new(&fit, WorkingGroup(11), Parameter::Teff).unwrap_err();
        assert!(matches!(err, ModelCompatibilityError::WorkingGroup { .. }));
    }
}
