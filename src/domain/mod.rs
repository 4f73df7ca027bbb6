//! Shared domain types for nodes, stars, measurements and consensus rows.

pub mod types;

pub use types::*;
