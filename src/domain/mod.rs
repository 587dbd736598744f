//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - raw input records (`FundamentalRecord`, `MacroPoint`, `MacroTable`)
//! - intermediate tables (`FusedRow`, `LabeledRow`, `LabeledTable`)
//! - run configuration (`PipelineConfig` and its per-stage parts)

pub mod types;

pub use types::*;
