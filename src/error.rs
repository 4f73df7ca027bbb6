//! Error taxonomy for the homogenisation pipeline.
//!
//! Propagation policy:
//!
//! - preparation and model-compatibility errors abort the current
//!   (working group, parameter) unit immediately
//! - inference failures (optimizer/sampler) are fatal for the fit; a fit that
//!   did not complete is never persisted or used
//! - per-star unresolved cases are *not* errors: they are logged, collected,
//!   and reported in the batch summary

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{Parameter, WorkingGroup};

/// Raised when raw store rows cannot be turned into fit-ready structures.
#[derive(Debug, Clone, Error)]
pub enum DataPreparationError {
    #[error("no nodes in {wg} match the filter '{filter}' for parameter '{parameter}'")]
    NoMatchingNodes {
        wg: WorkingGroup,
        parameter: Parameter,
        filter: String,
    },

    #[error("node '{node}' violates the expected naming prefix '{prefix}'")]
    InconsistentNodeName { node: String, prefix: String },

    #[error(
        "only {usable} usable benchmark star(s) for parameter '{parameter}' (need at least {required})"
    )]
    InsufficientBenchmarks {
        parameter: Parameter,
        usable: usize,
        required: usize,
    },

    #[error("no accepted measurements overlap the benchmark set for {wg}/{parameter}")]
    NoBenchmarkOverlap {
        wg: WorkingGroup,
        parameter: Parameter,
    },
}

/// Raised when the optimizer or sampler fails to produce a usable fit.
#[derive(Debug, Clone, Error)]
pub enum InferenceConvergenceError {
    #[error("optimizer exhausted its budget of {budget} evaluations without converging")]
    OptimizerBudgetExhausted { budget: usize },

    #[error("objective became non-finite at the starting point")]
    NonFiniteObjective,

    #[error("chains did not mix: split R-hat {rhat:.3} exceeds threshold {threshold:.3}")]
    ChainsNotMixed { rhat: f64, threshold: f64 },

    #[error("sampler produced no usable posterior draws")]
    NoUsableDraws,
}

/// Raised when a persisted model does not match the requested context.
#[derive(Debug, Clone, Error)]
pub enum ModelCompatibilityError {
    #[error("model file schema version {found} is not supported (reader expects {expected})")]
    SchemaVersion { expected: u32, found: u32 },

    #[error("model was fit for {found}, requested {requested}")]
    WorkingGroup {
        requested: WorkingGroup,
        found: WorkingGroup,
    },

    #[error("model was fit for parameter '{found}', requested '{requested}'")]
    Parameter {
        requested: Parameter,
        found: Parameter,
    },

    #[error("model file at '{}' is not a recognised ensemble model: {detail}", .path.display())]
    Malformed { path: PathBuf, detail: String },
}

/// Raised by catalog store implementations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("catalog file '{}': {detail}", .path.display())]
    Catalog { path: PathBuf, detail: String },
}

/// Top-level error for the binary and the pipeline entry points.
#[derive(Debug, Error)]
pub enum HomogError {
    #[error(transparent)]
    Preparation(#[from] DataPreparationError),

    #[error(transparent)]
    Convergence(#[from] InferenceConvergenceError),

    #[error(transparent)]
    Compatibility(#[from] ModelCompatibilityError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("configuration: {0}")]
    Config(String),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}
