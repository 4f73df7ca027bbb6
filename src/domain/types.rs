//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during preparation and fitting
//! - exported to/reloaded from JSON catalog snapshots
//! - embedded in persisted model files

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Stellar parameter being homogenised.
///
/// `Feh` covers both `feh` and `mh` columns: nodes reporting `[M/H]` instead
/// of `[Fe/H]` are reconciled upstream at ingest time, so the core sees one
/// metallicity axis.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Parameter {
    /// Effective temperature (K).
    Teff,
    /// Surface gravity (dex).
    Logg,
    /// Metallicity (dex).
    Feh,
    /// Microturbulence (km/s).
    Xi,
}

impl Parameter {
    pub const ALL: [Parameter; 4] = [
        Parameter::Teff,
        Parameter::Logg,
        Parameter::Feh,
        Parameter::Xi,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Parameter::Teff => "teff",
            Parameter::Logg => "logg",
            Parameter::Feh => "feh",
            Parameter::Xi => "xi",
        }
    }

    /// Physical unit label for terminal output.
    pub fn unit_label(self) -> &'static str {
        match self {
            Parameter::Teff => "K",
            Parameter::Logg | Parameter::Feh => "dex",
            Parameter::Xi => "km/s",
        }
    }
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Organizational partition of contributing nodes (by instrument/survey track).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct WorkingGroup(pub u16);

impl WorkingGroup {
    /// Parse `"wg11"`, `"WG11"` or `"11"` into a working group id.
    pub fn parse(s: &str) -> Option<WorkingGroup> {
        let trimmed = s.trim().to_ascii_lowercase();
        let digits = trimmed.strip_prefix("wg").unwrap_or(&trimmed);
        digits.parse::<u16>().ok().map(WorkingGroup)
    }
}

impl std::fmt::Display for WorkingGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WG{}", self.0)
    }
}

/// One node's report of one parameter for one star, as read from the store.
///
/// `value: None` means the node returned a row but no estimate (the original
/// stores these as SQL `NaN`); such rows still matter because they pin down
/// which (star, node) pairs exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRow {
    pub star_id: String,
    pub node_name: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub uncertainty: Option<f64>,
    /// Quality-control outcome. Failed rows are excluded from inference but
    /// retained in the store for audit.
    pub quality_pass: bool,
    /// Survey setup the underlying spectrum came from, e.g. `UVES-580`.
    #[serde(default)]
    pub setup: Option<String>,
    /// Which raw file/row this report came from.
    #[serde(default)]
    pub provenance: Option<String>,
}

/// A star with an independently known "truth" value for one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkStar {
    pub star_id: String,
    pub truth: f64,
    pub truth_uncertainty: f64,
}

/// The homogenised output per star.
///
/// Upserts are keyed on (star, working group, parameter): superseded results
/// are replaced, not appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub star_id: String,
    pub wg: WorkingGroup,
    pub parameter: Parameter,
    pub value: f64,
    pub uncertainty: f64,
    /// Identity of the model that produced this row.
    pub source_model: String,
    /// How many node measurements contributed.
    pub n_nodes: usize,
}

/// Which stars to (re-)homogenise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StarSelector {
    /// Every star with at least one measurement row for the (wg, parameter).
    All,
    /// An explicit star-id list.
    Ids(Vec<String>),
    /// Stars observed with a setup whose name starts with this prefix,
    /// e.g. `"UVES"` or `"GIRAFFE"`.
    Setup(String),
}

/// Filter selecting which nodes contribute to a fit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeFilter {
    /// Required node-name prefix per survey instrument, e.g. `"UVES-"`.
    /// A node matching the survey but violating the prefix is a preparation
    /// error, not a silent drop.
    pub name_prefix: Option<String>,
}

impl NodeFilter {
    pub fn any() -> NodeFilter {
        NodeFilter { name_prefix: None }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> NodeFilter {
        NodeFilter {
            name_prefix: Some(prefix.into()),
        }
    }

    pub fn matches(&self, node_name: &str) -> bool {
        match &self.name_prefix {
            Some(prefix) => node_name.starts_with(prefix.as_str()),
            None => true,
        }
    }

    pub fn describe(&self) -> String {
        match &self.name_prefix {
            Some(prefix) => format!("{prefix}*"),
            None => "*".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_group_parses_common_spellings() {
        assert_eq!(WorkingGroup::parse("wg11"), Some(WorkingGroup(11)));
        assert_eq!(WorkingGroup::parse("WG1"), Some(WorkingGroup(1)));
        assert_eq!(WorkingGroup::parse(" 10 "), Some(WorkingGroup(10)));
        assert_eq!(WorkingGroup::parse("giraffe"), None);
    }

    #[test]
    fn node_filter_prefix_semantics() {
        let filter = NodeFilter::with_prefix("UVES-");
        assert!(filter.matches("UVES-Lumba"));
        assert!(!filter.matches("GIRAFFE-EPINARBO"));
        assert!(NodeFilter::any().matches("anything"));
    }
}
