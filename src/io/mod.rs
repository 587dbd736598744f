//! Input/output helpers.
//!
//! - CSV ingest + validation (`ingest`)
//! - CSV exports and feature-table reading (`export`)
//! - output directory, JSON documents and model files (`artifacts`)

pub mod artifacts;
pub mod export;
pub mod ingest;

pub use artifacts::*;
pub use export::*;
pub use ingest::*;
