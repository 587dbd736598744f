//! The end-to-end workflow shared by the `run`, `features` and `score` commands:
//! ingest -> fusion -> labels -> features -> training -> evaluation -> artifacts.
//!
//! Stages run strictly in sequence; parallelism lives inside the stages. The
//! command handlers only format what comes back.

use std::path::{Path, PathBuf};

use log::info;
use rayon::prelude::*;
use serde::Serialize;

use crate::domain::{ModelKind, PipelineConfig};
use crate::error::PipelineError;
use crate::eval::{EvaluationReport, Evaluator, auc, ks_statistic};
use crate::features::{FeatureBuilder, FeatureOutput, FeatureStats};
use crate::fusion::{FusionStats, TemporalFusionEngine};
use crate::io::{self, FeatureFile, MANIFEST_FILE, MODELS_DIR};
use crate::label::{LabelGenerator, LabelStats};
use crate::math::sigmoid;
use crate::models::{ARTIFACT_VERSION, FeatureMatrix, ModelArtifact, Scorer, TrainedModel};
use crate::train::{ModelTrainer, SplitSummary, TrainingOutput};

pub const FEATURES_FILE: &str = "features.csv";
pub const PREDICTIONS_FILE: &str = "validation_predictions.csv";
pub const EVALUATION_FILE: &str = "evaluation.json";
pub const COEFFICIENTS_FILE: &str = "logistic_coefficients.json";

/// Ingest counts recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputSummary {
    pub fundamentals_rows_read: usize,
    pub fundamentals_records: usize,
    pub fundamentals_row_errors: usize,
    pub macro_rows_read: usize,
    pub macro_points: usize,
    pub macro_series: Vec<String>,
    pub macro_blank_values: usize,
    pub macro_row_errors: usize,
}

/// Everything up to and including the labeled feature table.
#[derive(Debug, Clone)]
pub struct FeatureRun {
    pub inputs: InputSummary,
    pub fusion: FusionStats,
    pub labels: LabelStats,
    pub features: FeatureOutput,
}

/// All computed outputs of a single `cf run`.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub features: FeatureRun,
    pub training: TrainingOutput,
    pub evaluation: EvaluationReport,
    /// Files written, relative to the output directory.
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Written first so an interrupted run can still be cleared by the next one.
    Incomplete,
    FeaturesOnly,
    Complete,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunManifest<'a> {
    pub tool: &'static str,
    pub version: &'static str,
    pub status: RunStatus,
    pub config: &'a PipelineConfig,
    pub inputs: Option<&'a InputSummary>,
    pub fusion: Option<&'a FusionStats>,
    pub labels: Option<&'a LabelStats>,
    pub features: Option<&'a FeatureStats>,
    pub feature_names: Option<&'a [String]>,
    pub split: Option<&'a SplitSummary>,
    pub files: &'a [String],
}

impl<'a> RunManifest<'a> {
    fn new(config: &'a PipelineConfig, status: RunStatus, files: &'a [String]) -> Self {
        Self {
            tool: "cf",
            version: env!("CARGO_PKG_VERSION"),
            status,
            config,
            inputs: None,
            fusion: None,
            labels: None,
            features: None,
            feature_names: None,
            split: None,
            files,
        }
    }

    fn with_features(mut self, run: &'a FeatureRun) -> Self {
        self.inputs = Some(&run.inputs);
        self.fusion = Some(&run.fusion);
        self.labels = Some(&run.labels);
        self.features = Some(&run.features.stats);
        self.feature_names = Some(&run.features.table.feature_names);
        self
    }
}

/// Ingest both inputs and build the labeled feature table.
pub fn build_features(config: &PipelineConfig) -> Result<FeatureRun, PipelineError> {
    let fundamentals = io::load_fundamentals(&config.fundamentals_path, &config.fusion)?;
    let macro_data = io::load_macro(&config.macro_path)?;

    let inputs = InputSummary {
        fundamentals_rows_read: fundamentals.rows_read,
        fundamentals_records: fundamentals.records.len(),
        fundamentals_row_errors: fundamentals.row_errors.len(),
        macro_rows_read: macro_data.rows_read,
        macro_points: macro_data.table.n_points(),
        macro_series: macro_data.table.series_ids(),
        macro_blank_values: macro_data.blank_values,
        macro_row_errors: macro_data.row_errors.len(),
    };

    let spread = macro_data
        .table
        .observations(&config.label.spread_series)
        .ok_or_else(|| {
            PipelineError::Input(format!(
                "spread series `{}` is not present in the macro input (found: {})",
                config.label.spread_series,
                inputs.macro_series.join(", ")
            ))
        })?;

    let fused = TemporalFusionEngine::new(config.fusion.clone())
        .fuse(&fundamentals.records, &macro_data.table)?;
    let labels = LabelGenerator::new(config.label.clone()).generate(spread, &fused.dates())?;
    let features = FeatureBuilder::new(config.roles.clone()).build(&fused, &labels)?;
    info!(
        "feature table: {} rows x {} features, {} positive",
        features.table.rows.len(),
        features.table.feature_names.len(),
        features.table.positives()
    );

    Ok(FeatureRun {
        inputs,
        fusion: fused.stats,
        labels: labels.stats,
        features,
    })
}

/// `cf features`: build the feature table and write it with a manifest.
pub fn run_features(config: &PipelineConfig) -> Result<FeatureRun, PipelineError> {
    let out = &config.output_dir;
    io::prepare_output_dir(out)?;
    let mut files = Vec::new();
    let manifest = RunManifest::new(config, RunStatus::Incomplete, &files);
    io::write_json(&out.join(MANIFEST_FILE), &manifest)?;

    let run = build_features(config)?;
    io::write_features_csv(&out.join(FEATURES_FILE), &run.features.table)?;
    files.push(FEATURES_FILE.to_string());

    let manifest = RunManifest::new(config, RunStatus::FeaturesOnly, &files).with_features(&run);
    io::write_json(&out.join(MANIFEST_FILE), &manifest)?;
    Ok(run)
}

/// `cf run`: the full pipeline.
pub fn run_pipeline(config: &PipelineConfig) -> Result<RunOutput, PipelineError> {
    let out = &config.output_dir;
    io::prepare_output_dir(out)?;
    let mut files: Vec<String> = Vec::new();
    let manifest = RunManifest::new(config, RunStatus::Incomplete, &files);
    io::write_json(&out.join(MANIFEST_FILE), &manifest)?;

    let features = build_features(config)?;
    io::write_features_csv(&out.join(FEATURES_FILE), &features.features.table)?;
    files.push(FEATURES_FILE.to_string());

    let training = ModelTrainer::new(config.train.clone()).train(&features.features.table)?;
    for model in &training.models {
        let artifact = ModelArtifact {
            version: ARTIFACT_VERSION,
            features: features.features.spec.clone(),
            model: model.clone(),
            label_horizon_days: config.label.horizon_days,
            label_threshold_bp: config.label.threshold_bp,
            train_rows: training.split.train_rows,
            train_positives: training.split.train_positives,
        };
        let rel = model_file(model.kind());
        io::write_model(&out.join(&rel), &artifact)?;
        files.push(rel);

        if let TrainedModel::Logistic(logistic) = model {
            let table = logistic.coefficient_table(&training.feature_names);
            io::write_json(&out.join(COEFFICIENTS_FILE), &table)?;
            files.push(COEFFICIENTS_FILE.to_string());
        }
    }

    let predictions: Vec<(ModelKind, &[f64])> = training
        .predictions
        .iter()
        .map(|(kind, p)| (*kind, p.as_slice()))
        .collect();
    io::write_predictions_csv(&out.join(PREDICTIONS_FILE), &training.validation, &predictions)?;
    files.push(PREDICTIONS_FILE.to_string());

    let evaluator = Evaluator::new(config.eval.clone());
    let names = &training.feature_names;
    let mut evaluation = EvaluationReport {
        feature_names: names.clone(),
        models: Vec::new(),
    };
    for model in &training.models {
        let kind = model.kind();
        let result = evaluator.evaluate(
            kind,
            model,
            &training.validation,
            &training.train_matrix,
            names,
        )?;

        let roc_file = format!("roc_{}.csv", kind.id());
        io::write_roc_csv(&out.join(&roc_file), &result.roc)?;
        files.push(roc_file);
        let attr_file = format!("attributions_{}.csv", kind.id());
        io::write_attributions_csv(&out.join(&attr_file), names, &result.attributions)?;
        files.push(attr_file);

        evaluation.models.push(result);
    }
    io::write_json(&out.join(EVALUATION_FILE), &evaluation)?;
    files.push(EVALUATION_FILE.to_string());
    files.push(MANIFEST_FILE.to_string());

    let mut manifest =
        RunManifest::new(config, RunStatus::Complete, &files).with_features(&features);
    manifest.split = Some(&training.split);
    io::write_json(&out.join(MANIFEST_FILE), &manifest)?;
    info!("run complete: {} files in {}", files.len(), out.display());

    Ok(RunOutput {
        features,
        training,
        evaluation,
        files,
    })
}

pub fn model_file(kind: ModelKind) -> String {
    format!("{MODELS_DIR}/{}.bin", kind.id())
}

/// Scores for a feature file, with ranking metrics when labels are present.
#[derive(Debug, Clone)]
pub struct ScoreOutput {
    pub artifact: ModelArtifact,
    pub file: FeatureFile,
    pub raw: Vec<f64>,
    pub probabilities: Vec<f64>,
    pub auc: Option<f64>,
    pub ks: Option<f64>,
}

/// `cf score`: apply a saved model to a feature CSV.
pub fn run_score(
    model_path: &Path,
    features_path: &Path,
    out: Option<&PathBuf>,
) -> Result<ScoreOutput, PipelineError> {
    let artifact = io::read_model(model_path)?;
    let file = io::read_features_csv(features_path, &artifact.features.names)?;
    let matrix = FeatureMatrix::from_rows(
        artifact.features.width(),
        file.rows.iter().map(Vec::as_slice),
    );

    let raw: Vec<f64> = (0..matrix.n_rows())
        .into_par_iter()
        .map(|i| artifact.model.raw_score(matrix.row(i)))
        .collect();
    let probabilities: Vec<f64> = raw.iter().map(|&r| sigmoid(r)).collect();

    // Metrics only over rows that carry a label.
    let (labeled_scores, labels): (Vec<f64>, Vec<u8>) = raw
        .iter()
        .zip(&file.labels)
        .filter_map(|(&s, y)| y.map(|y| (s, y)))
        .unzip();
    let auc = auc(&labeled_scores, &labels);
    let ks = ks_statistic(&labeled_scores, &labels);

    if let Some(path) = out {
        io::write_scores_csv(path, &file, &raw, &probabilities)?;
    }
    Ok(ScoreOutput {
        artifact,
        file,
        raw,
        probabilities,
        auc,
        ks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SampleConfig, write_sample};
    use crate::domain::{
        EvalConfig, FusionConfig, GbtParams, LabelConfig, MacroRoles, TrainConfig,
    };

    fn config(inputs: &Path, out: PathBuf) -> PipelineConfig {
        PipelineConfig {
            fundamentals_path: inputs.join(crate::data::FUNDAMENTALS_FILE),
            macro_path: inputs.join(crate::data::MACRO_FILE),
            output_dir: out,
            fusion: FusionConfig::default(),
            label: LabelConfig::default(),
            roles: MacroRoles::default(),
            train: TrainConfig {
                gbt: GbtParams {
                    n_rounds: 20,
                    learning_rate: 0.2,
                    ..GbtParams::default()
                },
                ..TrainConfig::default()
            },
            eval: EvalConfig {
                max_attribution_samples: 50,
                ..EvalConfig::default()
            },
        }
    }

    fn sample(dir: &Path) {
        write_sample(
            dir,
            &SampleConfig {
                years: 4,
                entities: 3,
                ..SampleConfig::default()
            },
        )
        .unwrap();
    }

    #[test]
    fn full_run_writes_every_artifact_and_is_deterministic() {
        let inputs = tempfile::tempdir().unwrap();
        sample(inputs.path());
        let out_a = tempfile::tempdir().unwrap();
        let out_b = tempfile::tempdir().unwrap();

        let a = run_pipeline(&config(inputs.path(), out_a.path().join("run"))).unwrap();
        let b = run_pipeline(&config(inputs.path(), out_b.path().join("run"))).unwrap();

        for file in &a.files {
            assert!(out_a.path().join("run").join(file).is_file(), "missing {file}");
        }
        assert!(a.files.contains(&"models/gbt.bin".to_string()));
        assert!(a.files.contains(&COEFFICIENTS_FILE.to_string()));
        let coefficients: crate::models::CoefficientTable = serde_json::from_slice(
            &std::fs::read(out_a.path().join("run").join(COEFFICIENTS_FILE)).unwrap(),
        )
        .unwrap();
        for name in &a.training.feature_names {
            assert!(coefficients.raw_coefficients.contains_key(name), "no coefficient for {name}");
        }
        assert_eq!(a.evaluation.models.len(), 2);
        for m in &a.evaluation.models {
            assert!((0.0..=1.0).contains(&m.auc));
            assert!(m.max_additivity_error <= 1e-6);
            assert_eq!(m.attributions.len(), 50.min(a.training.split.validation_rows));
        }
        assert!(a.training.split.train_end < a.training.split.cutoff);

        // The manifest records the output path, so it legitimately differs.
        let compared = [
            FEATURES_FILE,
            PREDICTIONS_FILE,
            EVALUATION_FILE,
            COEFFICIENTS_FILE,
            "models/gbt.bin",
        ];
        for file in compared {
            let fa = std::fs::read(out_a.path().join("run").join(file)).unwrap();
            let fb = std::fs::read(out_b.path().join("run").join(file)).unwrap();
            assert!(fa == fb, "{file} differs between identical runs");
        }
        assert_eq!(a.evaluation, b.evaluation);
        assert_eq!(a.training.split, b.training.split);
    }

    #[test]
    fn rerun_replaces_previous_outputs_and_score_matches() {
        let inputs = tempfile::tempdir().unwrap();
        sample(inputs.path());
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("run");
        let cfg = config(inputs.path(), out.clone());

        run_features(&cfg).unwrap();
        std::fs::write(out.join("stray.txt"), "x").unwrap();
        let run = run_pipeline(&cfg).unwrap();
        assert!(!out.join("stray.txt").exists());

        let scored = run_score(
            &out.join(model_file(ModelKind::Logistic)),
            &out.join(FEATURES_FILE),
            None,
        )
        .unwrap();
        assert_eq!(scored.raw.len(), run.features.features.table.rows.len());
        assert!(scored.auc.is_some());

        // Validation rows score identically through the saved artifact.
        let first_val = run.training.validation.dates[0];
        let idx = scored
            .file
            .dates
            .iter()
            .zip(&scored.file.entities)
            .position(|(d, e)| *d == first_val && *e == run.training.validation.entities[0])
            .unwrap();
        let expected = run.training.predictions[&ModelKind::Logistic][0];
        assert!((scored.probabilities[idx] - expected).abs() < 1e-9);
    }

    #[test]
    fn missing_spread_series_is_an_input_error() {
        let inputs = tempfile::tempdir().unwrap();
        sample(inputs.path());
        let root = tempfile::tempdir().unwrap();
        let mut cfg = config(inputs.path(), root.path().join("run"));
        cfg.label.spread_series = "NOT_THERE".into();
        assert!(matches!(build_features(&cfg), Err(PipelineError::Input(_))));
    }
}
