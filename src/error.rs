//! Error types.
//!
//! Library code returns [`PipelineError`] for anything that aborts a run.
//! Row-level problems never abort; they are tallied as [`RowIssue`]s in the
//! per-stage statistics instead.
//!
//! The binary converts errors into [`AppError`], which carries the process exit
//! code:
//!
//! - `2`: bad input files or configuration
//! - `3`: empty or degenerate data (nothing sensible to train/evaluate)
//! - `4`: computation or artifact I/O failure

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Debug for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// Fatal pipeline failures.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("input error: {0}")]
    Input(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{stage}: table is empty after exclusions")]
    EmptyTable { stage: &'static str },

    /// A split holds a single class, so training or AUC/KS is undefined.
    #[error("degenerate label in {split} split: {positives} positives out of {rows} rows")]
    DegenerateLabel {
        split: &'static str,
        rows: usize,
        positives: usize,
    },

    #[error("cannot evaluate {model}: {reason}")]
    EvaluationImpossible { model: String, reason: String },

    #[error("computation failed: {0}")]
    Computation(String),

    #[error("artifact error: {0}")]
    Artifact(String),
}

impl PipelineError {
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Input(_) | PipelineError::Config(_) => 2,
            PipelineError::EmptyTable { .. }
            | PipelineError::DegenerateLabel { .. }
            | PipelineError::EvaluationImpossible { .. } => 3,
            PipelineError::Computation(_) | PipelineError::Artifact(_) => 4,
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

/// Soft, row-level data issues. Counted, logged, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowIssue {
    /// A required macro series has no value at or before the row date.
    DataGap,
    /// The label window runs past the last spread observation.
    HorizonOverrun,
    /// No spread observation falls inside the label window.
    EmptyWindow,
    /// No spread observation at or before the row date to compare against.
    MissingBaseline,
    /// A ratio input is missing.
    MissingInput,
    /// A ratio denominator is zero.
    ZeroDenominator,
    /// A ratio evaluated to NaN or infinity.
    NonFinite,
}

impl RowIssue {
    pub fn label(self) -> &'static str {
        match self {
            RowIssue::DataGap => "data gap",
            RowIssue::HorizonOverrun => "label window past data horizon",
            RowIssue::EmptyWindow => "empty label window",
            RowIssue::MissingBaseline => "no spread baseline",
            RowIssue::MissingInput => "missing ratio input",
            RowIssue::ZeroDenominator => "zero denominator",
            RowIssue::NonFinite => "non-finite ratio",
        }
    }
}
