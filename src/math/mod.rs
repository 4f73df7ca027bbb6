//! Mathematical utilities: dense linear algebra helpers, the correlation
//! transform, and small order statistics.

pub mod corr;
pub mod linalg;
pub mod stats;

pub use corr::*;
pub use linalg::*;
pub use stats::*;
