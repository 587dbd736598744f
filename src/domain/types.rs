//! Shared domain types.
//!
//! Most types here are plain data. They are serializable where they end up in
//! an artifact (feature table, model files, evaluation document, manifest).

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SPREAD_SERIES: &str = "HIGH_YIELD_OAS";
pub const DEFAULT_IG_SERIES: &str = "IG_OAS";
pub const DEFAULT_SHORT_RATE_SERIES: &str = "FED_FUNDS";
pub const DEFAULT_LONG_RATE_SERIES: &str = "US_10Y_RATE";

/// Units the spread series is quoted in.
///
/// The label threshold is always expressed in basis points; this only
/// controls how raw spread values are converted before the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SpreadUnit {
    /// Percent when the largest absolute value is below 50, else bp.
    Auto,
    Bp,
    /// Percent points (FRED OAS convention), converted via `× 100`.
    Percent,
}

/// Which days make up the fused calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CalendarMode {
    /// Union of dates observed in any macro series.
    Observed,
    /// Every calendar day between the first and last macro date.
    Daily,
}

/// Sliding-window maximum strategy for label computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WindowAlgorithm {
    Auto,
    Deque,
    Naive,
}

/// Trained model families.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Logistic,
    Gbt,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Logistic, ModelKind::Gbt];

    /// Short identifier used in file names and JSON keys.
    pub fn id(self) -> &'static str {
        match self {
            ModelKind::Logistic => "logistic",
            ModelKind::Gbt => "gbt",
        }
    }

    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Logistic => "Logistic (L2)",
            ModelKind::Gbt => "Gradient-boosted trees",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Raw accounting quantities from one annual report.
///
/// Every field is optional: sources routinely omit lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Fundamentals {
    pub total_assets: Option<f64>,
    pub total_liabilities: Option<f64>,
    pub total_debt: Option<f64>,
    pub total_equity: Option<f64>,
    pub net_income: Option<f64>,
    pub ebit: Option<f64>,
    pub interest_expense: Option<f64>,
    pub total_revenue: Option<f64>,
    pub cash: Option<f64>,
}

/// One fundamentals row per (entity, fiscal period).
#[derive(Debug, Clone, PartialEq)]
pub struct FundamentalRecord {
    pub entity: String,
    pub period_end: NaiveDate,
    /// First day the record is considered known (`period_end + report lag`).
    pub effective_date: NaiveDate,
    pub values: Fundamentals,
}

/// A single macro observation.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroPoint {
    pub series: String,
    pub date: NaiveDate,
    pub value: f64,
}

/// Macro observations grouped per series, each sorted by date.
#[derive(Debug, Clone, Default)]
pub struct MacroTable {
    series: BTreeMap<String, Vec<(NaiveDate, f64)>>,
}

impl MacroTable {
    /// Group points per series. Duplicate (series, date) pairs keep the later point.
    pub fn from_points(points: Vec<MacroPoint>) -> Self {
        let mut grouped: BTreeMap<String, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
        for p in points {
            grouped.entry(p.series).or_default().insert(p.date, p.value);
        }
        let series = grouped
            .into_iter()
            .map(|(id, obs)| (id, obs.into_iter().collect()))
            .collect();
        Self { series }
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(|obs| obs.is_empty())
    }

    /// Series ids in sorted order.
    pub fn series_ids(&self) -> Vec<String> {
        self.series.keys().cloned().collect()
    }

    pub fn contains(&self, series: &str) -> bool {
        self.series.contains_key(series)
    }

    pub fn observations(&self, series: &str) -> Option<&[(NaiveDate, f64)]> {
        self.series.get(series).map(Vec::as_slice)
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.series.values().filter_map(|obs| obs.first().map(|o| o.0)).min()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.series.values().filter_map(|obs| obs.last().map(|o| o.0)).max()
    }

    pub fn n_points(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    /// Build the shared day calendar.
    pub fn calendar(&self, mode: CalendarMode) -> Vec<NaiveDate> {
        match mode {
            CalendarMode::Observed => {
                let mut days: Vec<NaiveDate> = self
                    .series
                    .values()
                    .flat_map(|obs| obs.iter().map(|o| o.0))
                    .collect();
                days.sort_unstable();
                days.dedup();
                days
            }
            CalendarMode::Daily => {
                let (Some(first), Some(last)) = (self.first_date(), self.last_date()) else {
                    return Vec::new();
                };
                first
                    .iter_days()
                    .take_while(|d| *d <= last)
                    .collect()
            }
        }
    }
}

/// One row per (entity, calendar day): fundamentals known as of the day plus
/// that day's macro values.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedRow {
    pub entity: String,
    pub date: NaiveDate,
    /// Fiscal period end of the record being carried forward.
    pub period_end: NaiveDate,
    pub fundamentals: Fundamentals,
    /// Aligned with `FusedTable::series`; `None` when nothing is known yet.
    pub macro_values: Vec<Option<f64>>,
}

/// Feature vector plus label for one (entity, day).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledRow {
    pub entity: String,
    pub date: NaiveDate,
    /// `None` is the missing-value marker.
    pub features: Vec<Option<f64>>,
    pub label: u8,
}

/// The processed feature table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabeledTable {
    pub feature_names: Vec<String>,
    pub rows: Vec<LabeledRow>,
}

impl LabeledTable {
    pub fn positives(&self) -> usize {
        self.rows.iter().filter(|r| r.label == 1).count()
    }
}

/// Temporal fusion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    pub calendar: CalendarMode,
    /// Series a row cannot exist without; rows lacking them are data gaps.
    pub required_series: Vec<String>,
    /// Days between fiscal period end and the record becoming known.
    pub report_lag_days: i64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            calendar: CalendarMode::Observed,
            required_series: vec![DEFAULT_SPREAD_SERIES.to_string()],
            report_lag_days: 0,
        }
    }
}

impl FusionConfig {
    pub fn effective_date(&self, period_end: NaiveDate) -> NaiveDate {
        period_end + Duration::days(self.report_lag_days)
    }
}

/// Label construction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    pub spread_series: String,
    pub horizon_days: i64,
    pub threshold_bp: f64,
    pub spread_unit: SpreadUnit,
    pub algorithm: WindowAlgorithm,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            spread_series: DEFAULT_SPREAD_SERIES.to_string(),
            horizon_days: 90,
            threshold_bp: 500.0,
            spread_unit: SpreadUnit::Auto,
            algorithm: WindowAlgorithm::Auto,
        }
    }
}

/// Macro series used by the composite stress features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroRoles {
    pub high_yield: String,
    pub investment_grade: String,
    pub short_rate: String,
    pub long_rate: String,
}

impl Default for MacroRoles {
    fn default() -> Self {
        Self {
            high_yield: DEFAULT_SPREAD_SERIES.to_string(),
            investment_grade: DEFAULT_IG_SERIES.to_string(),
            short_rate: DEFAULT_SHORT_RATE_SERIES.to_string(),
            long_rate: DEFAULT_LONG_RATE_SERIES.to_string(),
        }
    }
}

/// Positive-class weight for the tree ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalePosWeight {
    /// negatives / positives in the training split.
    Auto,
    Value(f64),
}

impl FromStr for ScalePosWeight {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(ScalePosWeight::Auto);
        }
        let v: f64 = s
            .parse()
            .map_err(|_| format!("expected `auto` or a positive number, got `{s}`"))?;
        if !(v.is_finite() && v > 0.0) {
            return Err(format!("scale_pos_weight must be positive, got {v}"));
        }
        Ok(ScalePosWeight::Value(v))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticParams {
    /// L2 penalty on the (standardized) coefficients; intercept is not penalized.
    pub l2: f64,
    pub max_iter: usize,
    pub tolerance: f64,
    /// Reweight classes to equal total weight.
    pub balance_classes: bool,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            l2: 1.0,
            max_iter: 100,
            tolerance: 1e-8,
            balance_classes: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbtParams {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights.
    pub lambda: f64,
    /// Minimum gain for a split.
    pub gamma: f64,
    pub subsample: f64,
    pub max_bins: usize,
    pub scale_pos_weight: ScalePosWeight,
}

impl Default for GbtParams {
    fn default() -> Self {
        Self {
            n_rounds: 100,
            learning_rate: 0.05,
            max_depth: 4,
            min_child_weight: 1.0,
            lambda: 1.0,
            gamma: 0.0,
            subsample: 1.0,
            max_bins: 64,
            scale_pos_weight: ScalePosWeight::Value(1.0),
        }
    }
}

/// Train/validation split and model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Rows dated before the cutoff train; rows on/after it validate.
    pub cutoff: Option<NaiveDate>,
    /// Share of distinct dates used for validation when no cutoff is given.
    pub validation_fraction: f64,
    /// Drop training rows whose label window reaches the cutoff.
    pub purge: bool,
    pub horizon_days: i64,
    pub seed: u64,
    pub logistic: LogisticParams,
    pub gbt: GbtParams,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            cutoff: None,
            validation_fraction: 0.2,
            purge: true,
            horizon_days: 90,
            seed: 42,
            logistic: LogisticParams::default(),
            gbt: GbtParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Probability cut-off for the confusion matrix.
    pub threshold: f64,
    pub max_attribution_samples: usize,
    /// Relative tolerance of the additivity check.
    pub additivity_tolerance: f64,
    /// Background rows for permutation Shapley.
    pub background_size: usize,
    /// Permutations per sample for permutation Shapley.
    pub permutations: usize,
    pub seed: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            max_attribution_samples: 500,
            additivity_tolerance: 1e-4,
            background_size: 100,
            permutations: 16,
            seed: 42,
        }
    }
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus environment and defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub fundamentals_path: PathBuf,
    pub macro_path: PathBuf,
    pub output_dir: PathBuf,
    pub fusion: FusionConfig,
    pub label: LabelConfig,
    pub roles: MacroRoles,
    pub train: TrainConfig,
    pub eval: EvalConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn macro_table_sorts_and_dedups() {
        let table = MacroTable::from_points(vec![
            MacroPoint { series: "B".into(), date: d(2020, 1, 3), value: 3.0 },
            MacroPoint { series: "A".into(), date: d(2020, 1, 2), value: 1.0 },
            MacroPoint { series: "A".into(), date: d(2020, 1, 1), value: 0.5 },
            MacroPoint { series: "A".into(), date: d(2020, 1, 2), value: 2.0 },
        ]);
        assert_eq!(table.series_ids(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(
            table.observations("A").unwrap(),
            &[(d(2020, 1, 1), 0.5), (d(2020, 1, 2), 2.0)]
        );
        assert_eq!(table.n_points(), 3);
    }

    #[test]
    fn calendars_cover_expected_days() {
        let table = MacroTable::from_points(vec![
            MacroPoint { series: "A".into(), date: d(2020, 1, 1), value: 1.0 },
            MacroPoint { series: "B".into(), date: d(2020, 1, 5), value: 1.0 },
        ]);
        assert_eq!(table.calendar(CalendarMode::Observed), vec![d(2020, 1, 1), d(2020, 1, 5)]);
        assert_eq!(table.calendar(CalendarMode::Daily).len(), 5);
    }

    #[test]
    fn scale_pos_weight_parses() {
        assert_eq!("auto".parse::<ScalePosWeight>(), Ok(ScalePosWeight::Auto));
        assert_eq!("2.5".parse::<ScalePosWeight>(), Ok(ScalePosWeight::Value(2.5)));
        assert!("-1".parse::<ScalePosWeight>().is_err());
    }
}
