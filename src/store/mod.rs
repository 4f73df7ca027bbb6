//! Catalog store contract.
//!
//! Schema creation, connection management and raw-file ingestion are external
//! collaborators; the core only depends on this read/upsert contract. The
//! in-memory implementation in [`memory`] backs the CLI (JSON snapshots) and
//! the test suite.

pub mod memory;

pub use memory::MemoryStore;

use crate::domain::{
    BenchmarkStar, ConsensusResult, MeasurementRow, NodeFilter, Parameter, StarSelector,
    WorkingGroup,
};
use crate::error::StoreError;

/// Read/write access to the measurement and consensus tables.
pub trait CatalogStore {
    /// All measurement rows for one (working group, parameter), restricted to
    /// nodes accepted by `filter`. QC-failed rows are included (callers decide
    /// whether they are auditing or fitting); missing values come back as
    /// `None`.
    fn measurements(
        &self,
        wg: WorkingGroup,
        parameter: Parameter,
        filter: &NodeFilter,
    ) -> Result<Vec<MeasurementRow>, StoreError>;

    /// Benchmark truth table for one parameter.
    fn benchmarks(&self, parameter: Parameter) -> Result<Vec<BenchmarkStar>, StoreError>;

    /// Distinct star ids matching a selector, in deterministic (sorted) order.
    fn select_stars(
        &self,
        wg: WorkingGroup,
        parameter: Parameter,
        selector: &StarSelector,
    ) -> Result<Vec<String>, StoreError>;

    /// Idempotent upsert keyed on (star, working group, parameter):
    /// a prior consensus row for the same key is overwritten.
    fn upsert_consensus(&mut self, result: ConsensusResult) -> Result<(), StoreError>;
}
