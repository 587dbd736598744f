//! Out-of-sample evaluation and per-prediction attribution.

pub mod attribution;
pub mod metrics;

use chrono::NaiveDate;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{EvalConfig, ModelKind};
use crate::error::PipelineError;
use crate::math::sigmoid;
use crate::models::{Contributions, FeatureMatrix, Scorer};
use crate::train::ValidationSet;

pub use attribution::{Background, permutation_shapley};
pub use metrics::{ConfusionMatrix, RocPoint, auc, ks_statistic, roc_curve};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionMethod {
    /// Exact contributions supplied by the model (linear terms, TreeSHAP).
    Native,
    PermutationShapley,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleAttribution {
    pub entity: String,
    pub date: NaiveDate,
    pub label: u8,
    pub baseline: f64,
    pub raw_score: f64,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub mean_abs_attribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub model: ModelKind,
    pub rows: usize,
    pub positives: usize,
    pub auc: f64,
    pub ks: f64,
    pub threshold: f64,
    pub confusion: ConfusionMatrix,
    #[serde(skip)]
    pub roc: Vec<RocPoint>,
    pub attribution_method: AttributionMethod,
    /// Largest |baseline + Σφ - raw| seen across explained samples.
    pub max_additivity_error: f64,
    /// Sorted by descending mean |φ|.
    pub importances: Vec<FeatureImportance>,
    pub attributions: Vec<SampleAttribution>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub feature_names: Vec<String>,
    pub models: Vec<ModelEvaluation>,
}

pub struct Evaluator {
    config: EvalConfig,
}

impl Evaluator {
    pub fn new(config: EvalConfig) -> Self {
        Self { config }
    }

    /// Score the validation rows, compute metrics and explain the first
    /// `max_attribution_samples` predictions.
    ///
    /// `background` is the training matrix; it is only sampled when the model
    /// has no native contributions.
    pub fn evaluate(
        &self,
        kind: ModelKind,
        model: &dyn Scorer,
        validation: &ValidationSet,
        background: &FeatureMatrix,
        feature_names: &[String],
    ) -> Result<ModelEvaluation, PipelineError> {
        let x = &validation.matrix;
        let labels = &validation.labels;
        if x.n_rows() == 0 {
            return Err(PipelineError::EvaluationImpossible {
                model: kind.to_string(),
                reason: "validation set is empty".into(),
            });
        }

        let raw: Vec<f64> = (0..x.n_rows())
            .into_par_iter()
            .map(|i| model.raw_score(x.row(i)))
            .collect();
        let probabilities: Vec<f64> = raw.iter().map(|&r| sigmoid(r)).collect();

        let single_class = || PipelineError::EvaluationImpossible {
            model: kind.to_string(),
            reason: "validation labels contain a single class".into(),
        };
        let auc = auc(&raw, labels).ok_or_else(single_class)?;
        let ks = ks_statistic(&raw, labels).ok_or_else(single_class)?;
        let roc = roc_curve(&probabilities, labels);
        let confusion =
            ConfusionMatrix::at_threshold(&probabilities, labels, self.config.threshold);
        info!("{kind}: validation AUC {auc:.4}, KS {ks:.4}");

        let (attribution_method, attributions) = self.attribute(model, validation, background)?;
        let max_additivity_error = self.check_additivity(kind, &attributions)?;
        debug!("{kind}: max additivity error {max_additivity_error:.3e}");

        let importances = importances(feature_names, &attributions);

        Ok(ModelEvaluation {
            model: kind,
            rows: x.n_rows(),
            positives: labels.iter().filter(|&&y| y == 1).count(),
            auc,
            ks,
            threshold: self.config.threshold,
            confusion,
            roc,
            attribution_method,
            max_additivity_error,
            importances,
            attributions,
        })
    }

    fn attribute(
        &self,
        model: &dyn Scorer,
        validation: &ValidationSet,
        background: &FeatureMatrix,
    ) -> Result<(AttributionMethod, Vec<SampleAttribution>), PipelineError> {
        let x = &validation.matrix;
        let n = x.n_rows().min(self.config.max_attribution_samples);
        if n == 0 {
            return Ok((AttributionMethod::Native, Vec::new()));
        }

        let method = if model.contributions(x.row(0)).is_some() {
            AttributionMethod::Native
        } else {
            AttributionMethod::PermutationShapley
        };
        let bg = match method {
            AttributionMethod::Native => None,
            AttributionMethod::PermutationShapley => Some(Background::sample(
                model,
                background,
                self.config.background_size,
                self.config.seed,
            )),
        };

        let attributions = (0..n)
            .into_par_iter()
            .map(|i| {
                let row = x.row(i);
                let contributions = match &bg {
                    None => model.contributions(row).ok_or_else(|| {
                        PipelineError::Computation(
                            "model stopped returning native contributions".into(),
                        )
                    })?,
                    Some(bg) => permutation_shapley(
                        model,
                        row,
                        bg,
                        self.config.permutations,
                        self.config.seed.wrapping_add(i as u64 + 1),
                    ),
                };
                Ok(sample_attribution(validation, i, model.raw_score(row), contributions))
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;
        Ok((method, attributions))
    }

    fn check_additivity(
        &self,
        kind: ModelKind,
        attributions: &[SampleAttribution],
    ) -> Result<f64, PipelineError> {
        let mut worst: f64 = 0.0;
        for a in attributions {
            let total = a.baseline + a.values.iter().sum::<f64>();
            let err = (total - a.raw_score).abs();
            if err > self.config.additivity_tolerance * a.raw_score.abs().max(1.0) {
                return Err(PipelineError::Computation(format!(
                    "{kind}: attributions for {} on {} sum to {total:.6} but the raw score is {:.6}",
                    a.entity, a.date, a.raw_score
                )));
            }
            worst = worst.max(err);
        }
        Ok(worst)
    }
}

fn sample_attribution(
    validation: &ValidationSet,
    i: usize,
    raw_score: f64,
    c: Contributions,
) -> SampleAttribution {
    SampleAttribution {
        entity: validation.entities[i].clone(),
        date: validation.dates[i],
        label: validation.labels[i],
        baseline: c.baseline,
        raw_score,
        values: c.values,
    }
}

fn importances(
    feature_names: &[String],
    attributions: &[SampleAttribution],
) -> Vec<FeatureImportance> {
    let n = attributions.len().max(1) as f64;
    let mut out: Vec<FeatureImportance> = feature_names
        .iter()
        .enumerate()
        .map(|(j, name)| FeatureImportance {
            feature: name.clone(),
            mean_abs_attribution: attributions.iter().map(|a| a.values[j].abs()).sum::<f64>() / n,
        })
        .collect();
    out.sort_by(|a, b| b.mean_abs_attribution.total_cmp(&a.mean_abs_attribution));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    struct Linear;

    impl Scorer for Linear {
        fn n_features(&self) -> usize {
            2
        }

        fn raw_score(&self, x: &[f64]) -> f64 {
            2.0 * x[0] - x[1]
        }
    }

    /// Claims native support but returns contributions that do not add up.
    struct Broken;

    impl Scorer for Broken {
        fn n_features(&self) -> usize {
            2
        }

        fn raw_score(&self, x: &[f64]) -> f64 {
            x[0]
        }

        fn contributions(&self, x: &[f64]) -> Option<Contributions> {
            Some(Contributions {
                baseline: 0.0,
                values: vec![x[0] + 1.0, 0.0],
            })
        }
    }

    fn validation(labels: Vec<u8>) -> ValidationSet {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let rows: Vec<Vec<Option<f64>>> = labels
            .iter()
            .enumerate()
            .map(|(i, &y)| vec![Some(f64::from(y) + i as f64 * 0.01), Some(0.5)])
            .collect();
        ValidationSet {
            entities: vec!["ACME".into(); labels.len()],
            dates: (0..labels.len()).map(|i| start + Duration::days(i as i64)).collect(),
            matrix: FeatureMatrix::from_rows(2, rows.iter().map(Vec::as_slice)),
            labels,
        }
    }

    fn names() -> Vec<String> {
        vec!["a".into(), "b".into()]
    }

    #[test]
    fn fallback_attribution_is_additive_and_ranked() {
        let v = validation(vec![0, 1, 0, 1, 1, 0]);
        let eval = Evaluator::new(EvalConfig {
            max_attribution_samples: 4,
            background_size: 3,
            ..EvalConfig::default()
        })
        .evaluate(ModelKind::Logistic, &Linear, &v, &v.matrix, &names())
        .unwrap();
        assert_eq!(eval.attribution_method, AttributionMethod::PermutationShapley);
        assert_eq!(eval.attributions.len(), 4);
        assert_eq!(eval.auc, 1.0);
        assert_eq!(eval.importances[0].feature, "a");
        assert_eq!(eval.importances[1].mean_abs_attribution, 0.0);
    }

    #[test]
    fn single_class_validation_cannot_be_evaluated() {
        let v = validation(vec![0, 0, 0]);
        let err = Evaluator::new(EvalConfig::default())
            .evaluate(ModelKind::Gbt, &Linear, &v, &v.matrix, &names())
            .unwrap_err();
        assert!(matches!(err, PipelineError::EvaluationImpossible { .. }));
    }

    #[test]
    fn non_additive_contributions_are_fatal() {
        let v = validation(vec![0, 1]);
        let err = Evaluator::new(EvalConfig::default())
            .evaluate(ModelKind::Gbt, &Broken, &v, &v.matrix, &names())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Computation(_)));
    }
}
