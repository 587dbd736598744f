//! Chronological train/validation split and model fitting.
//!
//! The split is by date, never random: every training row is dated strictly
//! before the cutoff and every validation row on or after it. With purging
//! enabled, training rows whose label window `(t, t + H]` reaches the cutoff
//! are dropped too, so no training label is computed from validation-period
//! spreads.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{LabeledRow, LabeledTable, ModelKind, TrainConfig};
use crate::error::PipelineError;
use crate::models::{FeatureMatrix, GbtModel, LogisticModel, Scorer, TrainedModel};

/// Where the data was cut and what landed on each side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitSummary {
    pub cutoff: NaiveDate,
    pub train_rows: usize,
    pub train_positives: usize,
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub purged_rows: usize,
    pub validation_rows: usize,
    pub validation_positives: usize,
    pub validation_start: NaiveDate,
    pub validation_end: NaiveDate,
}

/// Validation rows in table order, ready for scoring.
#[derive(Debug, Clone)]
pub struct ValidationSet {
    pub entities: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub labels: Vec<u8>,
    pub matrix: FeatureMatrix,
}

#[derive(Debug, Clone)]
pub struct TrainingOutput {
    pub feature_names: Vec<String>,
    pub split: SplitSummary,
    pub models: Vec<TrainedModel>,
    /// Training features; background data for sampled attributions.
    pub train_matrix: FeatureMatrix,
    pub validation: ValidationSet,
    /// Validation probabilities per model, aligned with `validation`.
    pub predictions: BTreeMap<ModelKind, Vec<f64>>,
}

impl TrainingOutput {
    pub fn model(&self, kind: ModelKind) -> Option<&TrainedModel> {
        self.models.iter().find(|m| m.kind() == kind)
    }
}

pub struct ModelTrainer {
    config: TrainConfig,
}

impl ModelTrainer {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn train(&self, table: &LabeledTable) -> Result<TrainingOutput, PipelineError> {
        if table.rows.is_empty() {
            return Err(PipelineError::EmptyTable { stage: "training" });
        }
        let cutoff = match self.config.cutoff {
            Some(c) => c,
            None => default_cutoff(&table.rows, self.config.validation_fraction)?,
        };

        let horizon = Duration::days(self.config.horizon_days);
        let mut train: Vec<&LabeledRow> = Vec::new();
        let mut validation: Vec<&LabeledRow> = Vec::new();
        let mut purged_rows = 0;
        for row in &table.rows {
            if row.date >= cutoff {
                validation.push(row);
            } else if self.config.purge && row.date + horizon >= cutoff {
                purged_rows += 1;
            } else {
                train.push(row);
            }
        }

        let split = summarize(cutoff, &train, &validation, purged_rows)?;
        info!(
            "split at {cutoff}: {} train rows ({} positive, {} purged), {} validation rows ({} positive)",
            split.train_rows,
            split.train_positives,
            purged_rows,
            split.validation_rows,
            split.validation_positives
        );

        let width = table.feature_names.len();
        let train_matrix = FeatureMatrix::from_labeled(width, &train);
        let train_labels: Vec<u8> = train.iter().map(|r| r.label).collect();

        let (logistic, gbt) = rayon::join(
            || {
                LogisticModel::fit(
                    &train_matrix,
                    &train_labels,
                    &table.feature_names,
                    &self.config.logistic,
                )
            },
            || GbtModel::fit(&train_matrix, &train_labels, &self.config.gbt, self.config.seed),
        );
        let logistic = logistic?;
        info!(
            "logistic regression: {} iterations, converged = {}",
            logistic.iterations, logistic.converged
        );
        let gbt = gbt?;
        info!(
            "gradient-boosted trees: {} trees, final train log-loss {:.5}",
            gbt.trees.len(),
            gbt.train_loss.last().copied().unwrap_or(f64::NAN)
        );

        let models = vec![TrainedModel::Logistic(logistic), TrainedModel::Gbt(gbt)];
        let validation = ValidationSet {
            entities: validation.iter().map(|r| r.entity.clone()).collect(),
            dates: validation.iter().map(|r| r.date).collect(),
            labels: validation.iter().map(|r| r.label).collect(),
            matrix: FeatureMatrix::from_labeled(width, &validation),
        };

        let predictions = models
            .iter()
            .map(|m| {
                let probs: Vec<f64> = (0..validation.matrix.n_rows())
                    .into_par_iter()
                    .map(|i| m.probability(validation.matrix.row(i)))
                    .collect();
                (m.kind(), probs)
            })
            .collect();

        Ok(TrainingOutput {
            feature_names: table.feature_names.clone(),
            split,
            models,
            train_matrix,
            validation,
            predictions,
        })
    }
}

/// First distinct date at or after the `(1 - validation_fraction)` quantile.
fn default_cutoff(
    rows: &[LabeledRow],
    validation_fraction: f64,
) -> Result<NaiveDate, PipelineError> {
    if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
        return Err(PipelineError::Config(format!(
            "validation fraction must be in (0, 1), got {validation_fraction}"
        )));
    }
    let dates: Vec<NaiveDate> = rows
        .iter()
        .map(|r| r.date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if dates.len() < 2 {
        return Err(PipelineError::Config(format!(
            "a chronological split needs at least 2 distinct dates, found {}",
            dates.len()
        )));
    }
    let idx = ((dates.len() as f64) * (1.0 - validation_fraction)).floor() as usize;
    Ok(dates[idx.clamp(1, dates.len() - 1)])
}

fn summarize(
    cutoff: NaiveDate,
    train: &[&LabeledRow],
    validation: &[&LabeledRow],
    purged_rows: usize,
) -> Result<SplitSummary, PipelineError> {
    let span = |rows: &[&LabeledRow]| {
        let first = rows.iter().map(|r| r.date).min();
        let last = rows.iter().map(|r| r.date).max();
        first.zip(last)
    };
    let Some((train_start, train_end)) = span(train) else {
        return Err(PipelineError::EmptyTable { stage: "train split" });
    };
    let Some((validation_start, validation_end)) = span(validation) else {
        return Err(PipelineError::EmptyTable { stage: "validation split" });
    };

    let train_positives = train.iter().filter(|r| r.label == 1).count();
    let validation_positives = validation.iter().filter(|r| r.label == 1).count();
    if train_positives == 0 || train_positives == train.len() {
        return Err(PipelineError::DegenerateLabel {
            split: "train",
            rows: train.len(),
            positives: train_positives,
        });
    }
    if validation_positives == 0 || validation_positives == validation.len() {
        return Err(PipelineError::DegenerateLabel {
            split: "validation",
            rows: validation.len(),
            positives: validation_positives,
        });
    }
    let base_rate = train_positives as f64 / train.len() as f64;
    if base_rate < 0.01 {
        warn!("training positive rate is {:.3}%; metrics will be noisy", base_rate * 100.0);
    }

    Ok(SplitSummary {
        cutoff,
        train_rows: train.len(),
        train_positives,
        train_start,
        train_end,
        purged_rows,
        validation_rows: validation.len(),
        validation_positives,
        validation_start,
        validation_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GbtParams;

    fn d(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + Duration::days(offset)
    }

    /// One entity, daily rows; label follows the sign of the single feature.
    fn table(days: i64) -> LabeledTable {
        let rows = (0..days)
            .map(|i| {
                let x = ((i * 37) % 11) as f64 - 5.0;
                LabeledRow {
                    entity: "ACME".into(),
                    date: d(i),
                    features: vec![Some(x), if i % 7 == 0 { None } else { Some(x * 0.5) }],
                    label: u8::from(x > 0.0),
                }
            })
            .collect();
        LabeledTable {
            feature_names: vec!["a".into(), "b".into()],
            rows,
        }
    }

    fn config() -> TrainConfig {
        TrainConfig {
            horizon_days: 10,
            gbt: GbtParams {
                n_rounds: 10,
                ..GbtParams::default()
            },
            ..TrainConfig::default()
        }
    }

    #[test]
    fn split_is_chronological_and_purged() {
        let out = ModelTrainer::new(config()).train(&table(200)).unwrap();
        let s = &out.split;
        assert_eq!(s.cutoff, d(160));
        assert!(s.train_end < s.cutoff && s.validation_start == s.cutoff);
        // Days 150..=159 have windows reaching day 160.
        assert_eq!(s.purged_rows, 10);
        assert_eq!(s.train_end, d(149));
        assert_eq!(s.train_rows + s.purged_rows + s.validation_rows, 200);
        assert_eq!(out.validation.labels.len(), 40);
        assert_eq!(out.predictions[&ModelKind::Gbt].len(), 40);
        assert_eq!(out.models.len(), 2);
    }

    #[test]
    fn purge_can_be_disabled() {
        let cfg = TrainConfig {
            purge: false,
            cutoff: Some(d(100)),
            ..config()
        };
        let out = ModelTrainer::new(cfg).train(&table(200)).unwrap();
        assert_eq!(out.split.purged_rows, 0);
        assert_eq!(out.split.train_rows, 100);
    }

    #[test]
    fn single_class_training_split_is_rejected() {
        let mut t = table(100);
        for row in t.rows.iter_mut().filter(|r| r.date < d(80)) {
            row.label = 0;
        }
        let err = ModelTrainer::new(config()).train(&t).unwrap_err();
        assert!(matches!(err, PipelineError::DegenerateLabel { split: "train", .. }));
    }

    #[test]
    fn cutoff_after_all_rows_leaves_validation_empty() {
        let cfg = TrainConfig {
            cutoff: Some(d(1000)),
            ..config()
        };
        let err = ModelTrainer::new(cfg).train(&table(50)).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyTable { stage: "validation split" }));
    }

    #[test]
    fn empty_table_fails_fast() {
        let t = LabeledTable {
            feature_names: vec!["a".into()],
            rows: Vec::new(),
        };
        assert!(matches!(
            ModelTrainer::new(config()).train(&t),
            Err(PipelineError::EmptyTable { .. })
        ));
    }
}
