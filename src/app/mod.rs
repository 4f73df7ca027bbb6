//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - initializes logging
//! - parses CLI arguments
//! - dispatches to the fit / homogenise / summary pipelines

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::HomogError;

pub mod pipeline;

/// Entry point for the `homog` binary.
pub fn run() -> Result<(), HomogError> {
    // RUST_LOG controls verbosity; default to info so prunes/skips are
    // visible, since every skipped star must be auditable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Fit(args) => pipeline::run_fit(&args),
        Command::Homogenise(args) => pipeline::run_homogenise(&args),
        Command::Summary(args) => pipeline::run_summary(&args),
    }
}
