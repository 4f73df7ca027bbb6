//! Model persistence.
//!
//! A fitted ensemble model is written as versioned JSON: fit parameters, the
//! node-name-to-index mapping, and metadata (working group, parameter, model
//! spec, creation time). `read(write(fit))` reproduces node ordering
//! bit-identically and every fit parameter exactly (JSON floats round-trip
//! through the shortest-representation encoder serde_json uses).

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{HomogError, ModelCompatibilityError};
use crate::fit::EnsembleFit;

/// Bumped whenever the on-disk layout changes incompatibly.
pub const MODEL_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    schema_version: u32,
    tool: String,
    created_utc: DateTime<Utc>,
    #[serde(flatten)]
    fit: EnsembleFit,
}

/// Serialize a fitted model. Only call with a fit that completed both
/// inference stages; failed fits must never reach persistence.
pub fn write_model(path: &Path, fit: &EnsembleFit) -> Result<(), HomogError> {
    let file = File::create(path)?;
    let wrapper = ModelFile {
        schema_version: MODEL_SCHEMA_VERSION,
        tool: env!("CARGO_PKG_NAME").to_string(),
        created_utc: Utc::now(),
        fit: fit.clone(),
    };
    serde_json::to_writer_pretty(BufWriter::new(file), &wrapper)?;
    info!(path = %path.display(), model_spec = %fit.model_spec, "wrote model file");
    Ok(())
}

/// Deserialize a model file, rejecting unknown schema versions.
pub fn read_model(path: &Path) -> Result<EnsembleFit, HomogError> {
    let file = File::open(path)?;
    let raw: serde_json::Value = serde_json::from_reader(BufReader::new(file))?;

    let version = raw
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ModelCompatibilityError::Malformed {
            path: path.to_path_buf(),
            detail: "missing schema_version".to_string(),
        })? as u32;
    if version != MODEL_SCHEMA_VERSION {
        return Err(ModelCompatibilityError::SchemaVersion {
            expected: MODEL_SCHEMA_VERSION,
            found: version,
        }
        .into());
    }

    let wrapper: ModelFile =
        serde_json::from_value(raw).map_err(|e| ModelCompatibilityError::Malformed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    Ok(wrapper.fit)
}
