//! `credit-fusion` library crate.
//!
//! The binary (`cf`) is a thin wrapper around this library so that:
//!
//! - every pipeline stage is testable without spawning processes
//! - stages can be driven individually (fusion, labels, features, training)
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod eval;
pub mod features;
pub mod fusion;
pub mod io;
pub mod label;
pub mod math;
pub mod models;
pub mod report;
pub mod train;
