//! Mathematical utilities: linear solvers and small statistics.

pub mod ols;
pub mod stats;

pub use ols::*;
pub use stats::*;
