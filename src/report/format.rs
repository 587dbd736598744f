//! Formatted terminal output.
//!
//! All summary formatting lives here so the pipeline stays free of printing
//! and output changes stay localized.

use std::collections::BTreeMap;

use crate::app::pipeline::{FeatureRun, RunOutput, ScoreOutput};
use crate::domain::PipelineConfig;
use crate::error::RowIssue;
use crate::eval::ModelEvaluation;
use crate::train::SplitSummary;

/// Stage statistics shared by `cf run` and `cf features`.
pub fn format_feature_summary(run: &FeatureRun, config: &PipelineConfig) -> String {
    let mut out = String::new();

    out.push_str("=== cf - credit stress early warning ===\n");
    out.push_str(&format!(
        "Label: {} rises >= {:.0}bp within {} days (unit scale x{})\n",
        config.label.spread_series,
        config.label.threshold_bp,
        config.label.horizon_days,
        run.labels.unit_scale
    ));

    let inputs = &run.inputs;
    out.push_str(&format!(
        "Fundamentals: {} records from {} rows ({} rejected)\n",
        inputs.fundamentals_records, inputs.fundamentals_rows_read, inputs.fundamentals_row_errors
    ));
    out.push_str(&format!(
        "Macro: {} points in {} series from {} rows ({} blank, {} rejected)\n",
        inputs.macro_points,
        inputs.macro_series.len(),
        inputs.macro_rows_read,
        inputs.macro_blank_values,
        inputs.macro_row_errors
    ));

    let fusion = &run.fusion;
    out.push_str(&format!(
        "Fusion: {} entities x {} days -> {} rows",
        fusion.entities, fusion.calendar_days, fusion.rows_emitted
    ));
    if fusion.duplicate_records > 0 {
        out.push_str(&format!(" ({} duplicate records replaced)", fusion.duplicate_records));
    }
    out.push('\n');
    for (series, rows) in &fusion.data_gap_rows {
        out.push_str(&format!("  data gap in {series}: {rows} rows dropped\n"));
    }

    let labels = &run.labels;
    out.push_str(&format!(
        "Labels: {} dates, {} positive, {} negative{}\n",
        labels.dates,
        labels.positive_dates,
        labels.negative_dates,
        fmt_issues(&labels.undecidable)
    ));

    let stats = &run.features.stats;
    out.push_str(&format!(
        "Features: {} rows labeled, {} undecidable, {} columns\n",
        stats.rows_labeled,
        stats.rows_undecidable,
        run.features.spec.width()
    ));
    for (feature, reasons) in &stats.missing {
        out.push_str(&format!("  {feature}: missing{}\n", fmt_issues(reasons)));
    }

    out
}

/// Full `cf run` summary: stage stats, split, per-model metrics and drivers.
pub fn format_run_summary(run: &RunOutput, config: &PipelineConfig, top: usize) -> String {
    let mut out = format_feature_summary(&run.features, config);

    out.push('\n');
    out.push_str(&format_split(&run.training.split));

    out.push_str("\nValidation:\n");
    out.push_str(&format!(
        "{:<22} {:>7} {:>7} {:>6} {:>6} {:>6} {:>6} {:>7} {:>7} {:>10}\n",
        "model", "AUC", "KS", "TP", "FP", "TN", "FN", "prec", "recall", "max|err|"
    ));
    out.push_str(&format!(
        "{:-<22} {:-<7} {:-<7} {:-<6} {:-<6} {:-<6} {:-<6} {:-<7} {:-<7} {:-<10}\n",
        "", "", "", "", "", "", "", "", "", ""
    ));
    for m in &run.evaluation.models {
        let c = &m.confusion;
        out.push_str(&format!(
            "{:<22} {:>7.4} {:>7.4} {:>6} {:>6} {:>6} {:>6} {:>7} {:>7} {:>10.2e}\n",
            m.model.display_name(),
            m.auc,
            m.ks,
            c.true_positive,
            c.false_positive,
            c.true_negative,
            c.false_negative,
            fmt_share(c.precision()),
            fmt_share(c.recall()),
            m.max_additivity_error
        ));
    }

    for m in &run.evaluation.models {
        out.push('\n');
        out.push_str(&format_importances(m, top));
    }

    out.push_str(&format!(
        "\nWrote {} files to {}\n",
        run.files.len(),
        config.output_dir.display()
    ));
    out
}

pub fn format_split(split: &SplitSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("Split at {}:\n", split.cutoff));
    out.push_str(&format!(
        "  train      {:>7} rows {:>6} positive  [{} .. {}]\n",
        split.train_rows, split.train_positives, split.train_start, split.train_end
    ));
    out.push_str(&format!(
        "  validation {:>7} rows {:>6} positive  [{} .. {}]\n",
        split.validation_rows,
        split.validation_positives,
        split.validation_start,
        split.validation_end
    ));
    if split.purged_rows > 0 {
        out.push_str(&format!(
            "  purged     {:>7} rows (label window crosses cutoff)\n",
            split.purged_rows
        ));
    }
    out
}

fn format_importances(m: &ModelEvaluation, top: usize) -> String {
    let mut out = format!(
        "Top drivers, {} ({:?}, {} samples):\n",
        m.model.display_name(),
        m.attribution_method,
        m.attributions.len()
    );
    for imp in m.importances.iter().take(top) {
        out.push_str(&format!(
            "  {:<32} {:>10.4}\n",
            truncate(&imp.feature, 32),
            imp.mean_abs_attribution
        ));
    }
    out
}

pub fn format_score_summary(score: &ScoreOutput) -> String {
    let mut out = format!(
        "Scored {} rows with {} ({} features, trained on {} rows)\n",
        score.raw.len(),
        score.artifact.kind().display_name(),
        score.artifact.features.width(),
        score.artifact.train_rows
    );
    if let Some(max) = score.probabilities.iter().copied().reduce(f64::max) {
        let mean = score.probabilities.iter().sum::<f64>() / score.probabilities.len() as f64;
        out.push_str(&format!("Probability: mean {mean:.4}, max {max:.4}\n"));
    }
    match (score.auc, score.ks) {
        (Some(auc), Some(ks)) => out.push_str(&format!("Labeled rows: AUC {auc:.4}, KS {ks:.4}\n")),
        _ => out.push_str("No usable labels: AUC/KS not computed\n"),
    }
    out
}

/// `n/a` when the share is undefined (no predicted or no actual positives).
fn fmt_share(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.3}")).unwrap_or_else(|| "n/a".to_string())
}

fn fmt_issues(issues: &BTreeMap<RowIssue, usize>) -> String {
    if issues.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = issues.iter().map(|(k, v)| format!("{}: {v}", k.label())).collect();
    format!(" ({})", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}
