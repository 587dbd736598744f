//! CSV exports: feature table, validation predictions, ROC points and
//! per-sample attributions. Also reads a feature table back for scoring.
//!
//! Missing values are written as empty cells.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use chrono::NaiveDate;

use crate::domain::{LabeledTable, ModelKind};
use crate::error::PipelineError;
use crate::eval::{RocPoint, SampleAttribution};
use crate::io::ingest::{build_header_map, cell, parse_date, parse_value};
use crate::train::ValidationSet;

fn create(path: &Path) -> Result<csv::Writer<File>, PipelineError> {
    csv::Writer::from_path(path)
        .map_err(|e| PipelineError::Artifact(format!("Failed to create '{}': {e}", path.display())))
}

fn write_err(path: &Path) -> impl Fn(csv::Error) -> PipelineError + '_ {
    move |e| PipelineError::Artifact(format!("Failed to write '{}': {e}", path.display()))
}

fn flush(mut w: csv::Writer<File>, path: &Path) -> Result<(), PipelineError> {
    w.flush()
        .map_err(|e| PipelineError::Artifact(format!("Failed to flush '{}': {e}", path.display())))
}

fn fmt_opt(v: Option<f64>) -> String {
    v.filter(|x| x.is_finite()).map(|x| x.to_string()).unwrap_or_default()
}

/// `entity,date,<features...>,label`
pub fn write_features_csv(path: &Path, table: &LabeledTable) -> Result<(), PipelineError> {
    let mut w = create(path)?;
    let err = write_err(path);
    let mut header = vec!["entity".to_string(), "date".to_string()];
    header.extend(table.feature_names.iter().cloned());
    header.push("label".to_string());
    w.write_record(&header).map_err(&err)?;

    for row in &table.rows {
        let mut rec = Vec::with_capacity(header.len());
        rec.push(row.entity.clone());
        rec.push(row.date.to_string());
        rec.extend(row.features.iter().map(|v| fmt_opt(*v)));
        rec.push(row.label.to_string());
        w.write_record(&rec).map_err(&err)?;
    }
    flush(w, path)
}

/// `entity,date,label,p_<model>...`
pub fn write_predictions_csv(
    path: &Path,
    validation: &ValidationSet,
    predictions: &[(ModelKind, &[f64])],
) -> Result<(), PipelineError> {
    let mut w = create(path)?;
    let err = write_err(path);
    let mut header = vec!["entity".to_string(), "date".to_string(), "label".to_string()];
    header.extend(predictions.iter().map(|(k, _)| format!("p_{}", k.id())));
    w.write_record(&header).map_err(&err)?;

    for i in 0..validation.labels.len() {
        let mut rec = vec![
            validation.entities[i].clone(),
            validation.dates[i].to_string(),
            validation.labels[i].to_string(),
        ];
        rec.extend(predictions.iter().map(|(_, p)| format!("{:.10}", p[i])));
        w.write_record(&rec).map_err(&err)?;
    }
    flush(w, path)
}

/// `threshold,fpr,tpr`; the first point has an infinite threshold.
pub fn write_roc_csv(path: &Path, roc: &[RocPoint]) -> Result<(), PipelineError> {
    let mut w = create(path)?;
    let err = write_err(path);
    w.write_record(["threshold", "fpr", "tpr"]).map_err(&err)?;
    for p in roc {
        w.write_record([p.threshold.to_string(), p.fpr.to_string(), p.tpr.to_string()])
            .map_err(&err)?;
    }
    flush(w, path)
}

/// `entity,date,label,baseline,raw_score,<features...>`
pub fn write_attributions_csv(
    path: &Path,
    feature_names: &[String],
    attributions: &[SampleAttribution],
) -> Result<(), PipelineError> {
    let mut w = create(path)?;
    let err = write_err(path);
    let mut header: Vec<String> = ["entity", "date", "label", "baseline", "raw_score"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(feature_names.iter().cloned());
    w.write_record(&header).map_err(&err)?;

    for a in attributions {
        let mut rec = vec![
            a.entity.clone(),
            a.date.to_string(),
            a.label.to_string(),
            a.baseline.to_string(),
            a.raw_score.to_string(),
        ];
        rec.extend(a.values.iter().map(|v| v.to_string()));
        w.write_record(&rec).map_err(&err)?;
    }
    flush(w, path)
}

/// A feature table read back from CSV. `labels` holds `None` when the file
/// has no `label` column or the cell is blank.
#[derive(Debug, Clone)]
pub struct FeatureFile {
    pub entities: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<Vec<Option<f64>>>,
    pub labels: Vec<Option<u8>>,
}

/// Read a feature CSV, picking columns by the names the model was trained on.
pub fn read_features_csv(
    path: &Path,
    feature_names: &[String],
) -> Result<FeatureFile, PipelineError> {
    let file = File::open(path).map_err(|e| {
        PipelineError::Input(format!("Failed to open feature CSV '{}': {e}", path.display()))
    })?;
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);
    let headers = reader
        .headers()
        .map_err(|e| PipelineError::Input(format!("Failed to read feature CSV headers: {e}")))?
        .clone();
    let header_map: HashMap<String, usize> = build_header_map(&headers);

    let column = |name: &str| {
        header_map
            .get(&name.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| PipelineError::Input(format!("feature CSV is missing column `{name}`")))
    };
    let entity_col = column("entity")?;
    let date_col = column("date")?;
    let feature_cols = feature_names.iter().map(|n| column(n)).collect::<Result<Vec<_>, _>>()?;
    let label_col = header_map.get("label").copied();

    let mut out = FeatureFile {
        entities: Vec::new(),
        dates: Vec::new(),
        rows: Vec::new(),
        labels: Vec::new(),
    };
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let bad = |msg: String| PipelineError::Input(format!("feature CSV line {line}: {msg}"));
        let record = result.map_err(|e| bad(e.to_string()))?;

        let entity = cell(&record, entity_col).ok_or_else(|| bad("missing entity".into()))?;
        let date_cell = cell(&record, date_col).ok_or_else(|| bad("missing date".into()))?;
        let date = parse_date(date_cell).map_err(bad)?;
        let row = feature_cols
            .iter()
            .map(|&c| cell(&record, c).map(parse_value).transpose().map(Option::flatten))
            .collect::<Result<Vec<_>, _>>()
            .map_err(bad)?;
        let label = match label_col.and_then(|c| cell(&record, c)) {
            None => None,
            Some("0") => Some(0),
            Some("1") => Some(1),
            Some(other) => return Err(bad(format!("label must be 0 or 1, got '{other}'"))),
        };

        out.entities.push(entity.to_string());
        out.dates.push(date);
        out.rows.push(row);
        out.labels.push(label);
    }
    Ok(out)
}

/// `entity,date,probability,raw_score`
pub fn write_scores_csv(
    path: &Path,
    file: &FeatureFile,
    raw: &[f64],
    probs: &[f64],
) -> Result<(), PipelineError> {
    let mut w = create(path)?;
    let err = write_err(path);
    w.write_record(["entity", "date", "probability", "raw_score"]).map_err(&err)?;
    for i in 0..file.entities.len() {
        w.write_record([
            file.entities[i].clone(),
            file.dates[i].to_string(),
            format!("{:.10}", probs[i]),
            raw[i].to_string(),
        ])
        .map_err(&err)?;
    }
    flush(w, path)
}
