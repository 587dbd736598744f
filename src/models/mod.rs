//! Classifiers and the scoring interface the evaluator relies on.
//!
//! Every model produces a raw score on the log-odds scale. Models that can
//! attribute that score exactly return [`Contributions`]; the evaluator falls
//! back to sampling otherwise.

pub mod gbt;
pub mod impute;
pub mod logistic;
pub mod matrix;

use serde::{Deserialize, Serialize};

use crate::domain::ModelKind;
use crate::error::PipelineError;
use crate::features::FeatureSpec;
use crate::math::sigmoid;

pub use gbt::GbtModel;
pub use logistic::{CoefficientTable, LogisticModel};
pub use matrix::FeatureMatrix;

/// Additive decomposition of a raw score: `baseline + Σ values == raw_score`.
#[derive(Debug, Clone, PartialEq)]
pub struct Contributions {
    pub baseline: f64,
    pub values: Vec<f64>,
}

impl Contributions {
    pub fn total(&self) -> f64 {
        self.baseline + self.values.iter().sum::<f64>()
    }
}

pub trait Scorer: Send + Sync {
    fn n_features(&self) -> usize;

    /// Log-odds score. Missing features are `NaN`.
    fn raw_score(&self, x: &[f64]) -> f64;

    fn probability(&self, x: &[f64]) -> f64 {
        sigmoid(self.raw_score(x))
    }

    /// Exact per-feature attribution, if the model supports it.
    fn contributions(&self, _x: &[f64]) -> Option<Contributions> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrainedModel {
    Logistic(LogisticModel),
    Gbt(GbtModel),
}

impl TrainedModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            TrainedModel::Logistic(_) => ModelKind::Logistic,
            TrainedModel::Gbt(_) => ModelKind::Gbt,
        }
    }

    fn scorer(&self) -> &dyn Scorer {
        match self {
            TrainedModel::Logistic(m) => m,
            TrainedModel::Gbt(m) => m,
        }
    }
}

impl Scorer for TrainedModel {
    fn n_features(&self) -> usize {
        self.scorer().n_features()
    }

    fn raw_score(&self, x: &[f64]) -> f64 {
        self.scorer().raw_score(x)
    }

    fn contributions(&self, x: &[f64]) -> Option<Contributions> {
        self.scorer().contributions(x)
    }
}

pub const ARTIFACT_VERSION: u32 = 1;

/// A persisted model together with everything needed to score new rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u32,
    pub features: FeatureSpec,
    pub model: TrainedModel,
    pub label_horizon_days: i64,
    pub label_threshold_bp: f64,
    pub train_rows: usize,
    pub train_positives: usize,
}

impl ModelArtifact {
    pub fn kind(&self) -> ModelKind {
        self.model.kind()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        bincode::serialize(self)
            .map_err(|e| PipelineError::Artifact(format!("encode {} model: {e}", self.kind())))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PipelineError> {
        let artifact: Self = bincode::deserialize(bytes)
            .map_err(|e| PipelineError::Artifact(format!("decode model: {e}")))?;
        if artifact.version != ARTIFACT_VERSION {
            return Err(PipelineError::Artifact(format!(
                "model artifact version {} is not supported (expected {ARTIFACT_VERSION})",
                artifact.version
            )));
        }
        if artifact.model.n_features() != artifact.features.width() {
            return Err(PipelineError::Artifact(format!(
                "model expects {} features but its feature spec has {}",
                artifact.model.n_features(),
                artifact.features.width()
            )));
        }
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GbtParams, MacroRoles};

    #[test]
    fn artifact_bytes_restore_identical_scores() {
        let spec = FeatureSpec::for_series(&["HIGH_YIELD_OAS".to_string()], &MacroRoles::default());
        let width = spec.width();
        let mut x = FeatureMatrix::new(width);
        let mut y = Vec::new();
        for i in 0..60 {
            let v = f64::from(i);
            let mut row = vec![Some(v / 60.0); width];
            row[1] = None;
            x.push_row(&row);
            y.push(u8::from(i >= 40));
        }
        let params = GbtParams {
            n_rounds: 5,
            ..GbtParams::default()
        };
        let model = GbtModel::fit(&x, &y, &params, 1).unwrap();
        let artifact = ModelArtifact {
            version: ARTIFACT_VERSION,
            features: spec,
            model: TrainedModel::Gbt(model),
            label_horizon_days: 90,
            label_threshold_bp: 500.0,
            train_rows: 60,
            train_positives: 20,
        };

        let restored = ModelArtifact::from_bytes(&artifact.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.kind(), ModelKind::Gbt);
        for row in x.rows() {
            assert_eq!(restored.model.raw_score(row), artifact.model.raw_score(row));
        }
    }

    #[test]
    fn garbage_bytes_are_an_artifact_error() {
        assert!(matches!(
            ModelArtifact::from_bytes(&[1, 2, 3]),
            Err(PipelineError::Artifact(_))
        ));
    }
}
