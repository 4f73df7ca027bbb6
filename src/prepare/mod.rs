//! Data preparation: raw store rows → fixed-shape numeric structures.
//!
//! This stage fixes the node index mapping for the whole fit, splits
//! benchmark from non-benchmark stars, and encodes missingness as an explicit
//! mask rather than dropping rows. Row arrival order never affects the output;
//! only the (sorted) node-name ordering does.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::config::HomogConfig;
use crate::domain::{MeasurementRow, NodeFilter, Parameter, WorkingGroup};
use crate::error::{DataPreparationError, HomogError};
use crate::store::CatalogStore;

/// Minimum benchmark stars needed to constrain the model at all.
const MIN_BENCHMARKS: usize = 2;

/// Fit-ready data for one (working group, parameter).
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub wg: WorkingGroup,
    pub parameter: Parameter,

    /// Ordered node names; index `n` here is node index `n` everywhere
    /// downstream (matrices, fit parameters, persisted models).
    pub node_names: Vec<String>,
    /// Benchmark star ids, aligned to matrix rows.
    pub star_ids: Vec<String>,

    /// Benchmark×node values; entries where `mask` is false hold NaN and the
    /// mask is authoritative.
    pub values: DMatrix<f64>,
    /// Benchmark×node reported uncertainties; masked-out entries hold the
    /// configured scale so imputed values carry the prior measurement noise.
    pub uncertainties: DMatrix<f64>,
    /// True where a usable (accepted, finite) measurement exists.
    pub mask: DMatrix<bool>,

    /// Calibrator truth values aligned to `star_ids`.
    pub mu_calibrator: DVector<f64>,
    /// Calibrator truth uncertainties aligned to `star_ids`.
    pub sigma_calibrator: DVector<f64>,

    /// Count of missing (to-be-imputed) entries.
    pub tm: usize,
    /// Bounds for uniform initialization of imputed entries, taken from the
    /// observed accepted values.
    pub lower_bound: f64,
    pub upper_bound: f64,

    /// Default systematic-uncertainty scale for this parameter.
    pub scale: f64,
    /// Floor below which systematic uncertainty may not shrink.
    pub lower_sigma: f64,
}

impl PreparedData {
    pub fn n_nodes(&self) -> usize {
        self.node_names.len()
    }

    pub fn n_benchmarks(&self) -> usize {
        self.star_ids.len()
    }

    /// Node index for a name recorded in this preparation, if present.
    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.node_names.iter().position(|n| n == name)
    }
}

/// Prepare fit inputs for one (working group, parameter).
///
/// Fails if zero nodes match the filter, if any matched node violates the
/// configured naming prefix, or if fewer than two benchmark stars survive
/// filtering.
pub fn prepare(
    store: &dyn CatalogStore,
    wg: WorkingGroup,
    parameter: Parameter,
    filter: &NodeFilter,
    config: &HomogConfig,
) -> Result<PreparedData, HomogError> {
    let rows = store.measurements(wg, parameter, filter)?;
    let benchmarks = store.benchmarks(parameter)?;

    let scale = config.scale.get(parameter);
    let lower_sigma = config.lower_sigma.get(parameter);

    // Benchmarks with non-finite truth or non-positive uncertainty cannot
    // calibrate anything; drop them up front.
    let mut truth_by_star: BTreeMap<String, (f64, f64)> = BTreeMap::new();
    for bench in &benchmarks {
        if bench.truth.is_finite()
            && bench.truth_uncertainty.is_finite()
            && bench.truth_uncertainty > 0.0
        {
            truth_by_star.insert(bench.star_id.clone(), (bench.truth, bench.truth_uncertainty));
        } else {
            warn!(star_id = %bench.star_id, %parameter, "dropping benchmark with non-finite truth");
        }
    }

    // One accepted measurement per (star, node). Duplicates are resolved
    // deterministically by provenance order and logged for audit.
    let mut accepted: BTreeMap<(String, String), MeasurementRow> = BTreeMap::new();
    let mut rejected_qc = 0usize;
    let mut all_node_names: BTreeSet<String> = BTreeSet::new();
    for row in rows {
        all_node_names.insert(row.node_name.clone());
        if !row.quality_pass {
            rejected_qc += 1;
            continue;
        }
        if !row.value.is_some_and(|v| v.is_finite()) {
            continue;
        }
        let key = (row.star_id.clone(), row.node_name.clone());
        match accepted.get(&key) {
            None => {
                accepted.insert(key, row);
            }
            Some(existing) => {
                let keep_existing = existing.provenance <= row.provenance;
                debug!(
                    star_id = %row.star_id,
                    node = %row.node_name,
                    "duplicate accepted measurement; keeping one deterministically"
                );
                if !keep_existing {
                    accepted.insert(key, row);
                }
            }
        }
    }

    // Node ordering: sorted names of nodes that contributed at least one
    // usable measurement. Superfluous nodes (rows but nothing usable) are
    // pruned here and logged.
    let contributing: BTreeSet<String> = accepted.keys().map(|(_, node)| node.clone()).collect();
    for node in all_node_names.difference(&contributing) {
        warn!(node = %node, %wg, %parameter, "pruning node with zero usable measurements");
    }
    let node_names: Vec<String> = contributing.into_iter().collect();

    if node_names.is_empty() {
        return Err(DataPreparationError::NoMatchingNodes {
            wg,
            parameter,
            filter: filter.describe(),
        }
        .into());
    }
    if let Some(prefix) = &filter.name_prefix {
        for node in &node_names {
            if !node.starts_with(prefix.as_str()) {
                return Err(DataPreparationError::InconsistentNodeName {
                    node: node.clone(),
                    prefix: prefix.clone(),
                }
                .into());
            }
        }
    }

    // Benchmark stars actually available: truth known and at least one node
    // reported an accepted value. A star with a single reporting node stays in,
    // with the other entries masked as missing.
    let mut star_ids: Vec<String> = truth_by_star
        .keys()
        .filter(|star| {
            node_names
                .iter()
                .any(|node| accepted.contains_key(&((*star).clone(), node.clone())))
        })
        .cloned()
        .collect();
    star_ids.sort();

    if truth_by_star.len() < MIN_BENCHMARKS {
        return Err(DataPreparationError::InsufficientBenchmarks {
            parameter,
            usable: truth_by_star.len(),
            required: MIN_BENCHMARKS,
        }
        .into());
    }
    if star_ids.len() < MIN_BENCHMARKS {
        if star_ids.is_empty() {
            return Err(DataPreparationError::NoBenchmarkOverlap { wg, parameter }.into());
        }
        return Err(DataPreparationError::InsufficientBenchmarks {
            parameter,
            usable: star_ids.len(),
            required: MIN_BENCHMARKS,
        }
        .into());
    }

    let m = star_ids.len();
    let n = node_names.len();
    let mut values = DMatrix::<f64>::from_element(m, n, f64::NAN);
    let mut uncertainties = DMatrix::<f64>::from_element(m, n, scale);
    let mut mask = DMatrix::<bool>::from_element(m, n, false);
    let mut observed_min = f64::INFINITY;
    let mut observed_max = f64::NEG_INFINITY;
    let mut tm = 0usize;

    for (i, star) in star_ids.iter().enumerate() {
        for (j, node) in node_names.iter().enumerate() {
            match accepted.get(&(star.clone(), node.clone())) {
                Some(row) => {
                    let value = row.value.unwrap_or(f64::NAN);
                    values[(i, j)] = value;
                    mask[(i, j)] = true;
                    observed_min = observed_min.min(value);
                    observed_max = observed_max.max(value);
                    match row.uncertainty.filter(|u| u.is_finite() && *u > 0.0) {
                        Some(u) => uncertainties[(i, j)] = u,
                        None => {
                            debug!(
                                star_id = %star,
                                node = %node,
                                "missing reported uncertainty; substituting the prior scale"
                            );
                        }
                    }
                }
                None => tm += 1,
            }
        }
    }

    let mu_calibrator = DVector::from_iterator(m, star_ids.iter().map(|s| truth_by_star[s].0));
    let sigma_calibrator = DVector::from_iterator(m, star_ids.iter().map(|s| truth_by_star[s].1));

    debug!(
        %wg,
        %parameter,
        nodes = n,
        benchmarks = m,
        missing = tm,
        rejected_qc,
        "prepared fit data"
    );

    Ok(PreparedData {
        wg,
        parameter,
        node_names,
        star_ids,
        values,
        uncertainties,
        mask,
        mu_calibrator,
        sigma_calibrator,
        tm,
        lower_bound: observed_min,
        upper_bound: observed_max,
        scale,
        lower_sigma,
    })
}
