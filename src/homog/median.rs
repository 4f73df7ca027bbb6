//! Median fallback model.
//!
//! When too few benchmark stars exist to constrain the ensemble model (e.g. a
//! brand-new instrument setup), the median of the accepted node values with a
//! scaled-MAD uncertainty is still a defensible consensus. Same store
//! contract and the same unresolved semantics as the ensemble homogeniser.

use std::collections::BTreeMap;

use tracing::warn;

use crate::domain::{ConsensusResult, NodeFilter, Parameter, StarSelector, WorkingGroup};
use crate::error::HomogError;
use crate::homog::HomogBatch;
use crate::math::{mad_std, median_mut};
use crate::store::CatalogStore;

const MODEL_SPEC: &str = "median-fallback";

pub struct MedianModel {
    wg: WorkingGroup,
    parameter: Parameter,
}

impl MedianModel {
    pub fn new(wg: WorkingGroup, parameter: Parameter) -> MedianModel {
        MedianModel { wg, parameter }
    }

    pub fn homogenise(
        &self,
        store: &mut dyn CatalogStore,
        selector: &StarSelector,
    ) -> Result<HomogBatch, HomogError> {
        let stars = store.select_stars(self.wg, self.parameter, selector)?;
        let rows = store.measurements(self.wg, self.parameter, &NodeFilter::any())?;

        let mut values: BTreeMap<&str, Vec<(f64, f64)>> = BTreeMap::new();
        for star in &stars {
            values.insert(star.as_str(), Vec::new());
        }
        for row in &rows {
            let Some(bucket) = values.get_mut(row.star_id.as_str()) else {
                continue;
            };
            if !row.quality_pass {
                continue;
            }
            if let Some(value) = row.value.filter(|v| v.is_finite()) {
                bucket.push((value, row.uncertainty.unwrap_or(f64::NAN)));
            }
        }

        let mut batch = HomogBatch::default();
        for star in &stars {
            let entries = &values[star.as_str()];
            if entries.is_empty() {
                warn!(star_id = %star, wg = %self.wg, parameter = %self.parameter,
                    "unresolved: no accepted measurements");
                batch.unresolved.push(star.clone());
                continue;
            }

            let mut sample: Vec<f64> = entries.iter().map(|(v, _)| *v).collect();
            let value = median_mut(&mut sample).unwrap_or(f64::NAN);
            let spread = mad_std(&sample).unwrap_or(0.0);
            let uncertainty = if spread > 0.0 {
                spread / (sample.len() as f64).sqrt()
            } else {
                // All nodes agree exactly (or a single node): fall back to the
                // mean reported uncertainty.
                let reported: Vec<f64> = entries
                    .iter()
                    .map(|(_, u)| *u)
                    .filter(|u| u.is_finite() && *u > 0.0)
                    .collect();
                if reported.is_empty() {
                    f64::NAN
                } else {
                    reported.iter().sum::<f64>() / reported.len() as f64
                }
            };

            store.upsert_consensus(ConsensusResult {
                star_id: star.clone(),
                wg: self.wg,
                parameter: self.parameter,
                value,
                uncertainty,
                source_model: MODEL_SPEC.to_string(),
                n_nodes: entries.len(),
            })?;
            batch.results.insert(star.clone(), (value, uncertainty));
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MeasurementRow;
    use crate::store::MemoryStore;

    fn row(star: &str, node: &str, value: f64) -> MeasurementRow {
        MeasurementRow {
            star_id: star.to_string(),
            node_name: node.to_string(),
            value: Some(value),
            uncertainty: Some(0.08),
            quality_pass: true,
            setup: None,
            provenance: None,
        }
    }

    #[test]
    fn median_of_disagreeing_nodes() {
        let wg = WorkingGroup(1);
        let mut store = MemoryStore::new();
        for (node, value) in [("N-A", 0.10), ("N-B", 0.20), ("N-C", 0.90)] {
            store.insert_measurement(wg, Parameter::Feh, row("s1", node, value));
        }
        let model = MedianModel::new(wg, Parameter::Feh);
        let batch = model
            .homogenise(&mut store, &StarSelector::All)
            .unwrap();
        let (value, uncertainty) = batch.results["s1"];
        assert!((value - 0.20).abs() < 1e-12);
        assert!(uncertainty > 0.0);
    }

    #[test]
    fn exact_agreement_falls_back_to_reported_uncertainty() {
        let wg = WorkingGroup(1);
        let mut store = MemoryStore::new();
        for node in ["N-A", "N-B"] {
            store.insert_measurement(wg, Parameter::Feh, row("s1", node, 0.25));
        }
        let model = MedianModel::new(wg, Parameter::Feh);
        let batch = model.homogenise(&mut store, &StarSelector::All).unwrap();
        let (value, uncertainty) = batch.results["s1"];
        assert_eq!(value, 0.25);
        assert!((uncertainty - 0.08).abs() < 1e-12);
    }

    #[test]
    fn star_without_accepted_rows_is_unresolved() {
        let wg = WorkingGroup(1);
        let mut store = MemoryStore::new();
        let mut bad = row("s1", "N-A", 0.5);
        bad.quality_pass = false;
        store.insert_measurement(wg, Parameter::Feh, bad);
        store.insert_measurement(wg, Parameter::Feh, row("s2", "N-A", 0.1));

        let model = MedianModel::new(wg, Parameter::Feh);
        let batch = model.homogenise(&mut store, &StarSelector::All).unwrap();
        assert_eq!(batch.unresolved, vec!["s1".to_string()]);
        assert_eq!(batch.n_homogenised(), 1);
    }
}
