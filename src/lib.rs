//! `stellar-ensemble` library crate.
//!
//! The binary (`homog`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - modules are reusable (e.g., future daemon, notebooks, etc.)
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod fit;
pub mod homog;
pub mod math;
pub mod model_io;
pub mod prepare;
pub mod report;
pub mod store;
