//! Command-line parsing for the homogenisation pipeline.
//!
//! The goal of this module is to keep **argument parsing** and **command
//! dispatch** separate from the statistical code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::Parameter;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "homog",
    version,
    about = "Ensemble homogenisation of multi-node stellar parameters"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit the ensemble model for one (working group, parameter) and write a
    /// model file.
    Fit(FitArgs),
    /// Apply a fitted model to stars in the catalog and upsert consensus rows.
    Homogenise(HomogeniseArgs),
    /// Print the node/error-structure summary of a persisted model file.
    Summary(SummaryArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Catalog snapshot (JSON) holding measurements and benchmarks.
    #[arg(long)]
    pub catalog: PathBuf,

    /// Optional TOML config; defaults apply to anything not set.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Working group, e.g. `1` or `wg11`.
    #[arg(long, default_value = "1")]
    pub wg: String,

    /// Parameter to fit.
    #[arg(long, value_enum)]
    pub parameter: Parameter,

    /// Required node-name prefix, e.g. `UVES-`.
    #[arg(long)]
    pub node_prefix: Option<String>,

    /// Where to write the fitted model.
    #[arg(long)]
    pub model_out: PathBuf,
}

#[derive(Debug, Parser, Clone)]
pub struct HomogeniseArgs {
    /// Catalog snapshot (JSON); consensus rows are written back to it
    /// (or to --out if given).
    #[arg(long)]
    pub catalog: PathBuf,

    /// Fitted model file produced by `homog fit`.
    #[arg(long)]
    pub model: PathBuf,

    /// Working group the model must have been fit for.
    #[arg(long, default_value = "1")]
    pub wg: String,

    /// Parameter the model must have been fit for.
    #[arg(long, value_enum)]
    pub parameter: Parameter,

    /// Restrict to explicit star ids (repeatable). Default: all stars.
    #[arg(long = "star")]
    pub stars: Vec<String>,

    /// Restrict to stars observed with a setup prefix, e.g. `UVES`.
    #[arg(long)]
    pub setup: Option<String>,

    /// Write the updated catalog here instead of overwriting the input.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct SummaryArgs {
    /// Fitted model file.
    #[arg(long)]
    pub model: PathBuf,
}
