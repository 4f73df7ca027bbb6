//! In-memory catalog store with JSON snapshots.
//!
//! This is the reference implementation of [`CatalogStore`]: the CLI loads a
//! catalog snapshot from JSON, runs fits/homogenisation against it, and writes
//! the snapshot (now carrying consensus rows) back out. Tests construct it
//! directly.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{
    BenchmarkStar, ConsensusResult, MeasurementRow, NodeFilter, Parameter, StarSelector,
    WorkingGroup,
};
use crate::error::StoreError;
use crate::store::CatalogStore;

/// One measurement row as stored, tagged with its (wg, parameter) partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMeasurement {
    pub wg: WorkingGroup,
    pub parameter: Parameter,
    #[serde(flatten)]
    pub row: MeasurementRow,
}

/// One benchmark truth row as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBenchmark {
    pub parameter: Parameter,
    #[serde(flatten)]
    pub star: BenchmarkStar,
}

/// Serialized snapshot layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    measurements: Vec<StoredMeasurement>,
    #[serde(default)]
    benchmarks: Vec<StoredBenchmark>,
    #[serde(default)]
    consensus: Vec<ConsensusResult>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    measurements: Vec<StoredMeasurement>,
    benchmarks: Vec<StoredBenchmark>,
    consensus: BTreeMap<(String, WorkingGroup, Parameter), ConsensusResult>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn insert_measurement(
        &mut self,
        wg: WorkingGroup,
        parameter: Parameter,
        row: MeasurementRow,
    ) {
        self.measurements.push(StoredMeasurement { wg, parameter, row });
    }

    pub fn insert_benchmark(&mut self, parameter: Parameter, star: BenchmarkStar) {
        self.benchmarks.push(StoredBenchmark { parameter, star });
    }

    /// Consensus rows in key order (stable across runs).
    pub fn consensus_rows(&self) -> impl Iterator<Item = &ConsensusResult> {
        self.consensus.values()
    }

    pub fn consensus_for(
        &self,
        star_id: &str,
        wg: WorkingGroup,
        parameter: Parameter,
    ) -> Option<&ConsensusResult> {
        self.consensus
            .get(&(star_id.to_string(), wg, parameter))
    }

    pub fn load_json(path: &Path) -> Result<MemoryStore, StoreError> {
        let file = File::open(path).map_err(|e| StoreError::Catalog {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let parsed: CatalogFile =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| StoreError::Catalog {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;

        let mut store = MemoryStore::new();
        store.measurements = parsed.measurements;
        store.benchmarks = parsed.benchmarks;
        for row in parsed.consensus {
            store
                .consensus
                .insert((row.star_id.clone(), row.wg, row.parameter), row);
        }
        info!(
            path = %path.display(),
            measurements = store.measurements.len(),
            benchmarks = store.benchmarks.len(),
            "loaded catalog snapshot"
        );
        Ok(store)
    }

    pub fn save_json(&self, path: &Path) -> Result<(), StoreError> {
        let file = File::create(path).map_err(|e| StoreError::Catalog {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let snapshot = CatalogFile {
            measurements: self.measurements.clone(),
            benchmarks: self.benchmarks.clone(),
            consensus: self.consensus.values().cloned().collect(),
        };
        serde_json::to_writer_pretty(BufWriter::new(file), &snapshot).map_err(|e| {
            StoreError::Catalog {
                path: path.to_path_buf(),
                detail: e.to_string(),
            }
        })?;
        Ok(())
    }
}

impl CatalogStore for MemoryStore {
    fn measurements(
        &self,
        wg: WorkingGroup,
        parameter: Parameter,
        filter: &NodeFilter,
    ) -> Result<Vec<MeasurementRow>, StoreError> {
        Ok(self
            .measurements
            .iter()
            .filter(|m| m.wg == wg && m.parameter == parameter && filter.matches(&m.row.node_name))
            .map(|m| m.row.clone())
            .collect())
    }

    fn benchmarks(&self, parameter: Parameter) -> Result<Vec<BenchmarkStar>, StoreError> {
        Ok(self
            .benchmarks
            .iter()
            .filter(|b| b.parameter == parameter)
            .map(|b| b.star.clone())
            .collect())
    }

    fn select_stars(
        &self,
        wg: WorkingGroup,
        parameter: Parameter,
        selector: &StarSelector,
    ) -> Result<Vec<String>, StoreError> {
        let mut stars: Vec<String> = match selector {
            StarSelector::All => self
                .measurements
                .iter()
                .filter(|m| m.wg == wg && m.parameter == parameter)
                .map(|m| m.row.star_id.clone())
                .collect(),
            StarSelector::Ids(ids) => ids.clone(),
            StarSelector::Setup(prefix) => self
                .measurements
                .iter()
                .filter(|m| {
                    m.wg == wg
                        && m.parameter == parameter
                        && m.row
                            .setup
                            .as_deref()
                            .is_some_and(|s| s.starts_with(prefix.as_str()))
                })
                .map(|m| m.row.star_id.clone())
                .collect(),
        };
        stars.sort();
        stars.dedup();
        Ok(stars)
    }

    fn upsert_consensus(&mut self, result: ConsensusResult) -> Result<(), StoreError> {
        self.consensus.insert(
            (result.star_id.clone(), result.wg, result.parameter),
            result,
        );
        Ok(())
    }
}
