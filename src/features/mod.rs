//! Engineered features for the labeled table.
//!
//! The column set is decided once per run from the fused table and then
//! frozen into a [`FeatureSpec`], which the model artifacts carry so scoring
//! uses exactly the training columns. Every value is a function of a single
//! fused row, so nothing dated after the row can leak in.

use std::collections::BTreeMap;

use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{Fundamentals, FusedRow, LabeledRow, LabeledTable, MacroRoles};
use crate::error::{PipelineError, RowIssue};
use crate::fusion::FusedTable;
use crate::label::LabelSet;

/// Balance-sheet and income-statement ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ratio {
    Leverage,
    DebtToEquity,
    InterestCoverage,
    ProfitMargin,
    LiquidityRatio,
}

impl Ratio {
    pub const ALL: [Ratio; 5] = [
        Ratio::Leverage,
        Ratio::DebtToEquity,
        Ratio::InterestCoverage,
        Ratio::ProfitMargin,
        Ratio::LiquidityRatio,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Ratio::Leverage => "leverage",
            Ratio::DebtToEquity => "debt_to_equity",
            Ratio::InterestCoverage => "interest_coverage",
            Ratio::ProfitMargin => "profit_margin",
            Ratio::LiquidityRatio => "liquidity_ratio",
        }
    }

    fn operands(self, f: &Fundamentals) -> (Option<f64>, Option<f64>) {
        match self {
            Ratio::Leverage => (f.total_debt, f.total_assets),
            Ratio::DebtToEquity => (f.total_debt, f.total_equity),
            Ratio::InterestCoverage => (f.ebit, f.interest_expense),
            Ratio::ProfitMargin => (f.net_income, f.total_revenue),
            Ratio::LiquidityRatio => (f.cash, f.total_assets),
        }
    }
}

/// How one feature column is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureColumn {
    Ratio(Ratio),
    /// Raw macro level, by index into the fused series list.
    MacroLevel { series: usize },
    /// `minuend - subtrahend`, both macro series indices.
    MacroSpread { minuend: usize, subtrahend: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub names: Vec<String>,
    pub columns: Vec<FeatureColumn>,
    /// Macro series ids the `MacroLevel`/`MacroSpread` indices refer to.
    pub series: Vec<String>,
}

impl FeatureSpec {
    /// Ratios, one level per macro series, then the stress composites whose
    /// inputs are available.
    pub fn for_series(series: &[String], roles: &MacroRoles) -> Self {
        let mut names = Vec::new();
        let mut columns = Vec::new();

        for ratio in Ratio::ALL {
            names.push(ratio.name().to_string());
            columns.push(FeatureColumn::Ratio(ratio));
        }
        for (idx, id) in series.iter().enumerate() {
            names.push(id.to_ascii_lowercase());
            columns.push(FeatureColumn::MacroLevel { series: idx });
        }

        let position = |id: &str| series.iter().position(|s| s == id);
        let (hy, ig) = (position(&roles.high_yield), position(&roles.investment_grade));
        if let (Some(hy), Some(ig)) = (hy, ig) {
            names.push("credit_quality_spread".to_string());
            columns.push(FeatureColumn::MacroSpread { minuend: hy, subtrahend: ig });
        }
        let (long, short) = (position(&roles.long_rate), position(&roles.short_rate));
        if let (Some(long), Some(short)) = (long, short) {
            names.push("term_spread".to_string());
            columns.push(FeatureColumn::MacroSpread { minuend: long, subtrahend: short });
        }

        Self {
            names,
            columns,
            series: series.to_vec(),
        }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Compute every column for one fused row.
    pub fn compute(&self, row: &FusedRow) -> Vec<FeatureCell> {
        self.columns
            .iter()
            .map(|col| match *col {
                FeatureColumn::Ratio(ratio) => {
                    let (num, den) = ratio.operands(&row.fundamentals);
                    safe_ratio(num, den)
                }
                FeatureColumn::MacroLevel { series } => macro_value(row, series),
                FeatureColumn::MacroSpread { minuend, subtrahend } => {
                    match (macro_value(row, minuend), macro_value(row, subtrahend)) {
                        (FeatureCell::Value(a), FeatureCell::Value(b)) => FeatureCell::Value(a - b),
                        _ => FeatureCell::Missing(RowIssue::MissingInput),
                    }
                }
            })
            .collect()
    }
}

/// A computed feature value or the reason it is missing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureCell {
    Value(f64),
    Missing(RowIssue),
}

impl FeatureCell {
    pub fn value(self) -> Option<f64> {
        match self {
            FeatureCell::Value(v) => Some(v),
            FeatureCell::Missing(_) => None,
        }
    }
}

/// `num / den`, or the missing marker when the quotient is undefined.
pub fn safe_ratio(num: Option<f64>, den: Option<f64>) -> FeatureCell {
    let (Some(num), Some(den)) = (num, den) else {
        return FeatureCell::Missing(RowIssue::MissingInput);
    };
    if !(num.is_finite() && den.is_finite()) {
        return FeatureCell::Missing(RowIssue::NonFinite);
    }
    if den == 0.0 {
        return FeatureCell::Missing(RowIssue::ZeroDenominator);
    }
    let q = num / den;
    if q.is_finite() {
        FeatureCell::Value(q)
    } else {
        FeatureCell::Missing(RowIssue::NonFinite)
    }
}

fn macro_value(row: &FusedRow, series: usize) -> FeatureCell {
    match row.macro_values.get(series).copied().flatten() {
        Some(v) if v.is_finite() => FeatureCell::Value(v),
        Some(_) => FeatureCell::Missing(RowIssue::NonFinite),
        None => FeatureCell::Missing(RowIssue::DataGap),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub rows_in: usize,
    pub rows_labeled: usize,
    pub rows_undecidable: usize,
    /// Missing-marker counts: feature name -> reason -> rows.
    pub missing: BTreeMap<String, BTreeMap<RowIssue, usize>>,
}

/// Output of the feature stage.
#[derive(Debug, Clone)]
pub struct FeatureOutput {
    pub spec: FeatureSpec,
    pub table: LabeledTable,
    pub stats: FeatureStats,
}

pub struct FeatureBuilder {
    roles: MacroRoles,
}

impl FeatureBuilder {
    pub fn new(roles: MacroRoles) -> Self {
        Self { roles }
    }

    /// Build the labeled feature table. Rows without a decidable label are dropped.
    pub fn build(
        &self,
        fused: &FusedTable,
        labels: &LabelSet,
    ) -> Result<FeatureOutput, PipelineError> {
        let spec = FeatureSpec::for_series(&fused.series, &self.roles);

        let computed: Vec<(LabeledRow, Vec<FeatureCell>)> = fused
            .rows
            .par_iter()
            .filter_map(|row| {
                let label = labels.label(row.date)?;
                let cells = spec.compute(row);
                let labeled = LabeledRow {
                    entity: row.entity.clone(),
                    date: row.date,
                    features: cells.iter().map(|c| c.value()).collect(),
                    label,
                };
                Some((labeled, cells))
            })
            .collect();

        let mut stats = FeatureStats {
            rows_in: fused.rows.len(),
            rows_labeled: computed.len(),
            rows_undecidable: fused.rows.len() - computed.len(),
            ..FeatureStats::default()
        };
        for (_, cells) in &computed {
            for (name, cell) in spec.names.iter().zip(cells) {
                if let FeatureCell::Missing(issue) = cell {
                    *stats
                        .missing
                        .entry(name.clone())
                        .or_default()
                        .entry(*issue)
                        .or_default() += 1;
                }
            }
        }
        for (name, issues) in &stats.missing {
            let zero = issues.get(&RowIssue::ZeroDenominator).copied().unwrap_or(0);
            if zero > 0 {
                warn!("feature {name}: {zero} rows with a zero denominator marked missing");
            }
        }

        let rows: Vec<LabeledRow> = computed.into_iter().map(|(row, _)| row).collect();
        info!(
            "features: {} columns, {} labeled rows ({} dropped as undecidable)",
            spec.width(),
            stats.rows_labeled,
            stats.rows_undecidable
        );
        if rows.is_empty() {
            return Err(PipelineError::EmptyTable { stage: "labeling" });
        }

        let table = LabeledTable {
            feature_names: spec.names.clone(),
            rows,
        };
        Ok(FeatureOutput { spec, table, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CalendarMode, FundamentalRecord, FusionConfig, LabelConfig, MacroPoint, MacroTable,
        SpreadUnit,
    };
    use crate::fusion::TemporalFusionEngine;
    use crate::label::LabelGenerator;
    use chrono::{Duration, NaiveDate};

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, 1).unwrap() + Duration::days(n)
    }

    fn fundamentals() -> Fundamentals {
        Fundamentals {
            total_assets: Some(200.0),
            total_liabilities: Some(120.0),
            total_debt: Some(80.0),
            total_equity: Some(0.0),
            net_income: Some(10.0),
            ebit: Some(30.0),
            interest_expense: Some(6.0),
            total_revenue: Some(100.0),
            cash: None,
        }
    }

    fn roles() -> MacroRoles {
        MacroRoles {
            high_yield: "HY".into(),
            investment_grade: "IG".into(),
            short_rate: "FF".into(),
            long_rate: "T10".into(),
        }
    }

    #[test]
    fn ratios_handle_zero_and_missing_inputs() {
        assert_eq!(safe_ratio(Some(1.0), Some(4.0)), FeatureCell::Value(0.25));
        assert_eq!(
            safe_ratio(Some(1.0), Some(0.0)),
            FeatureCell::Missing(RowIssue::ZeroDenominator)
        );
        assert_eq!(safe_ratio(None, Some(1.0)), FeatureCell::Missing(RowIssue::MissingInput));
        assert_eq!(
            safe_ratio(Some(f64::NAN), Some(1.0)),
            FeatureCell::Missing(RowIssue::NonFinite)
        );
        assert_eq!(
            safe_ratio(Some(1e300), Some(1e-300)),
            FeatureCell::Missing(RowIssue::NonFinite)
        );
        assert_eq!(
            safe_ratio(Some(-0.0), Some(-0.0)),
            FeatureCell::Missing(RowIssue::ZeroDenominator)
        );
        assert_eq!(safe_ratio(Some(2e-13), Some(1e-13)), FeatureCell::Value(2.0));
    }

    #[test]
    fn feature_set_adds_composites_when_series_exist() {
        let series: Vec<String> = ["FF", "HY", "IG", "T10"].iter().map(|s| s.to_string()).collect();
        let spec = FeatureSpec::for_series(&series, &roles());
        assert_eq!(spec.width(), 5 + 4 + 2);
        assert_eq!(spec.names[5..9], ["ff", "hy", "ig", "t10"]);
        assert_eq!(spec.names[9], "credit_quality_spread");
        assert_eq!(spec.names[10], "term_spread");

        let row = FusedRow {
            entity: "ACME".into(),
            date: day(0),
            period_end: day(0),
            fundamentals: fundamentals(),
            macro_values: vec![Some(0.5), Some(450.0), Some(150.0), None],
        };
        let cells = spec.compute(&row);
        assert_eq!(cells[0], FeatureCell::Value(0.4));
        assert_eq!(cells[1], FeatureCell::Missing(RowIssue::ZeroDenominator));
        assert_eq!(cells[2], FeatureCell::Value(5.0));
        assert_eq!(cells[4], FeatureCell::Missing(RowIssue::MissingInput));
        assert_eq!(cells[8], FeatureCell::Missing(RowIssue::DataGap));
        assert_eq!(cells[9], FeatureCell::Value(300.0));
        assert_eq!(cells[10], FeatureCell::Missing(RowIssue::MissingInput));

        let partial = FeatureSpec::for_series(&series[..2], &roles());
        assert_eq!(partial.width(), 7);
    }

    #[test]
    fn single_record_gives_identical_fundamental_features() {
        let records = vec![FundamentalRecord {
            entity: "ACME".into(),
            period_end: day(-30),
            effective_date: day(-30),
            values: fundamentals(),
        }];
        // Ten consecutive days, plus later observations so their windows are decidable.
        let points: Vec<MacroPoint> = (0..10)
            .chain([50, 200])
            .map(|i| MacroPoint { series: "HY".into(), date: day(i), value: 400.0 })
            .collect();
        let table = MacroTable::from_points(points);
        let fused = TemporalFusionEngine::new(FusionConfig {
            calendar: CalendarMode::Observed,
            required_series: vec!["HY".into()],
            report_lag_days: 0,
        })
        .fuse(&records, &table)
        .unwrap();
        assert_eq!(fused.rows.len(), 12);

        let generator = LabelGenerator::new(LabelConfig {
            spread_series: "HY".into(),
            spread_unit: SpreadUnit::Bp,
            ..LabelConfig::default()
        });
        let labels = generator
            .generate(table.observations("HY").unwrap(), &fused.dates())
            .unwrap();

        let out = FeatureBuilder::new(roles()).build(&fused, &labels).unwrap();
        assert_eq!(out.table.rows.len(), 10);
        let first = &out.table.rows[0].features[..5];
        assert!(out.table.rows.iter().all(|r| &r.features[..5] == first));
        assert!(out.table.rows.iter().all(|r| r.label == 0));
        assert_eq!(out.stats.rows_undecidable, 2);
        assert_eq!(
            out.stats.missing["debt_to_equity"].get(&RowIssue::ZeroDenominator),
            Some(&10)
        );

        let rerun = FeatureBuilder::new(roles()).build(&fused, &labels).unwrap();
        assert_eq!(rerun.table, out.table);
    }
}
