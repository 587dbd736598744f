//! CSV ingest and normalization.
//!
//! Two inputs are read here:
//! - annual fundamentals, one row per (entity, fiscal period)
//! - macro series, either long (`series,date,value`) or wide (`date,<series>...`)
//!
//! Schema problems (missing key columns, unreadable file) abort with an input
//! error. Problems confined to a row are collected as [`RowError`]s and the row
//! is skipped, so one bad line never sinks a run.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use chrono::NaiveDate;
use csv::StringRecord;
use log::{info, warn};

use crate::domain::{FundamentalRecord, Fundamentals, FusionConfig, MacroPoint, MacroTable};
use crate::error::PipelineError;

const ENTITY_COLUMNS: [&str; 3] = ["entity", "symbol", "ticker"];
const PERIOD_COLUMNS: [&str; 4] = ["date", "period_end", "fiscal_period_end", "fiscaldateending"];
const SERIES_COLUMNS: [&str; 3] = ["series", "series_id", "indicator"];
const MACRO_DATE_COLUMNS: [&str; 2] = ["date", "observation_date"];

/// FRED series ids and the names the pipeline uses for them.
const FRED_ALIASES: [(&str, &str); 6] = [
    ("BAMLH0A0HYM2", "HIGH_YIELD_OAS"),
    ("BAMLC0A0CM", "IG_OAS"),
    ("TEDRATE", "TED_SPREAD"),
    ("VIXCLS", "VIX"),
    ("FEDFUNDS", "FED_FUNDS"),
    ("DGS10", "US_10Y_RATE"),
];

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct FundamentalsData {
    pub records: Vec<FundamentalRecord>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

#[derive(Debug, Clone)]
pub struct MacroData {
    pub table: MacroTable,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    /// Empty or `.` cells skipped without error.
    pub blank_values: usize,
    pub layout: MacroLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroLayout {
    Long,
    Wide,
}

/// Load the fundamentals CSV.
pub fn load_fundamentals(
    path: &Path,
    fusion: &FusionConfig,
) -> Result<FundamentalsData, PipelineError> {
    let (headers, mut reader) = open_csv(path, "fundamentals")?;
    let header_map = build_header_map(&headers);

    let missing = |what: &str| {
        PipelineError::Input(format!("fundamentals: missing required column {what}"))
    };
    let entity_col = resolve_column(&header_map, &ENTITY_COLUMNS)
        .ok_or_else(|| missing("`entity` (or `symbol`)"))?;
    let period_col = resolve_column(&header_map, &PERIOD_COLUMNS)
        .ok_or_else(|| missing("`date` (or `period_end`)"))?;

    let value_cols = FundamentalColumns::resolve(&header_map);
    if value_cols.is_empty() {
        return Err(PipelineError::Input(
            "fundamentals: no recognised accounting columns (e.g. `total_assets`, `total_debt`)".into(),
        ));
    }

    let mut records = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        rows_read += 1;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    id: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let Some(entity) = cell(&record, entity_col) else {
            row_errors.push(RowError {
                line,
                id: None,
                message: "Missing entity.".to_string(),
            });
            continue;
        };
        let period_end = match cell(&record, period_col).map(parse_date) {
            Some(Ok(d)) => d,
            Some(Err(e)) => {
                row_errors.push(RowError {
                    line,
                    id: Some(entity.to_string()),
                    message: e,
                });
                continue;
            }
            None => {
                row_errors.push(RowError {
                    line,
                    id: Some(entity.to_string()),
                    message: "Missing period end date.".to_string(),
                });
                continue;
            }
        };

        match value_cols.parse(&record) {
            Ok(values) => records.push(FundamentalRecord {
                entity: entity.to_string(),
                period_end,
                effective_date: fusion.effective_date(period_end),
                values,
            }),
            Err(message) => row_errors.push(RowError {
                line,
                id: Some(entity.to_string()),
                message,
            }),
        }
    }

    log_row_errors("fundamentals", &row_errors);
    info!(
        "fundamentals: {} of {rows_read} rows loaded from {}",
        records.len(),
        path.display()
    );
    Ok(FundamentalsData {
        records,
        row_errors,
        rows_read,
    })
}

/// Column indices for each accounting field.
struct FundamentalColumns {
    total_assets: Option<usize>,
    total_liabilities: Option<usize>,
    total_debt: Option<usize>,
    total_equity: Option<usize>,
    net_income: Option<usize>,
    ebit: Option<usize>,
    interest_expense: Option<usize>,
    total_revenue: Option<usize>,
    cash: Option<usize>,
}

impl FundamentalColumns {
    fn resolve(h: &HashMap<String, usize>) -> Self {
        Self {
            total_assets: resolve_column(h, &["total_assets", "totalassets_bal", "totalassets"]),
            total_liabilities: resolve_column(
                h,
                &["total_liabilities", "totalliabilities_bal", "totalliabilities"],
            ),
            total_debt: resolve_column(h, &["total_debt", "totaldebt_bal", "totaldebt"]),
            total_equity: resolve_column(
                h,
                &[
                    "total_equity",
                    "totalshareholderequity_bal",
                    "totalstockholdersequity_bal",
                    "totalequity",
                ],
            ),
            net_income: resolve_column(h, &["net_income", "netincome_inc", "netincome"]),
            ebit: resolve_column(
                h,
                &["ebit", "ebit_inc", "operating_income", "operatingincome_inc"],
            ),
            interest_expense: resolve_column(
                h,
                &["interest_expense", "interestexpense_inc", "interestexpense"],
            ),
            total_revenue: resolve_column(
                h,
                &["total_revenue", "totalrevenue_inc", "totalrevenue"],
            ),
            cash: resolve_column(
                h,
                &["cash", "cashandshortterminvestments_bal", "cash_and_equivalents"],
            ),
        }
    }

    fn is_empty(&self) -> bool {
        [
            self.total_assets,
            self.total_liabilities,
            self.total_debt,
            self.total_equity,
            self.net_income,
            self.ebit,
            self.interest_expense,
            self.total_revenue,
            self.cash,
        ]
        .iter()
        .all(Option::is_none)
    }

    fn parse(&self, record: &StringRecord) -> Result<Fundamentals, String> {
        let field = |col: Option<usize>, name: &str| -> Result<Option<f64>, String> {
            match col.and_then(|c| cell(record, c)) {
                None => Ok(None),
                Some(raw) => parse_value(raw).map_err(|e| format!("`{name}`: {e}")),
            }
        };
        Ok(Fundamentals {
            total_assets: field(self.total_assets, "total_assets")?,
            total_liabilities: field(self.total_liabilities, "total_liabilities")?,
            total_debt: field(self.total_debt, "total_debt")?,
            total_equity: field(self.total_equity, "total_equity")?,
            net_income: field(self.net_income, "net_income")?,
            ebit: field(self.ebit, "ebit")?,
            interest_expense: field(self.interest_expense, "interest_expense")?,
            total_revenue: field(self.total_revenue, "total_revenue")?,
            cash: field(self.cash, "cash")?,
        })
    }
}

/// Load the macro CSV in either layout.
pub fn load_macro(path: &Path) -> Result<MacroData, PipelineError> {
    let (headers, mut reader) = open_csv(path, "macro")?;
    let header_map = build_header_map(&headers);

    let date_col = resolve_column(&header_map, &MACRO_DATE_COLUMNS)
        .ok_or_else(|| PipelineError::Input("macro: missing required column `date`".into()))?;
    let long = resolve_column(&header_map, &SERIES_COLUMNS).zip(header_map.get("value").copied());
    let layout = if long.is_some() { MacroLayout::Long } else { MacroLayout::Wide };

    // Wide layout: every non-date column is a series, named by its header.
    let wide_series: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != date_col)
        .map(|(idx, name)| (idx, canonical_series_id(clean_header(name))))
        .filter(|(_, name)| !name.is_empty())
        .collect();
    if layout == MacroLayout::Wide && wide_series.is_empty() {
        return Err(PipelineError::Input(
            "macro: expected `series,date,value` columns or at least one series column next to `date`".into(),
        ));
    }

    let mut points = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;
    let mut blank_values = 0usize;

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        rows_read += 1;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    id: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let date = match cell(&record, date_col).map(parse_date) {
            Some(Ok(d)) => d,
            Some(Err(e)) => {
                row_errors.push(RowError { line, id: None, message: e });
                continue;
            }
            None => {
                row_errors.push(RowError {
                    line,
                    id: None,
                    message: "Missing date.".to_string(),
                });
                continue;
            }
        };

        let cells: Vec<(String, Option<&str>)> = match long {
            Some((series_col, value_col)) => {
                let Some(series) = cell(&record, series_col) else {
                    row_errors.push(RowError {
                        line,
                        id: None,
                        message: "Missing series id.".to_string(),
                    });
                    continue;
                };
                vec![(canonical_series_id(series), cell(&record, value_col))]
            }
            None => wide_series
                .iter()
                .map(|(col, name)| (name.clone(), cell(&record, *col)))
                .collect(),
        };

        for (series, raw) in cells {
            match raw.map(parse_value) {
                None | Some(Ok(None)) => blank_values += 1,
                Some(Ok(Some(value))) => points.push(MacroPoint { series, date, value }),
                Some(Err(e)) => row_errors.push(RowError {
                    line,
                    id: Some(series),
                    message: e,
                }),
            }
        }
    }

    log_row_errors("macro", &row_errors);
    let table = MacroTable::from_points(points);
    info!(
        "macro: {} observations across {} series from {} ({blank_values} blank cells skipped)",
        table.n_points(),
        table.series_ids().len(),
        path.display()
    );
    Ok(MacroData {
        table,
        row_errors,
        rows_read,
        blank_values,
        layout,
    })
}

fn open_csv(path: &Path, what: &str) -> Result<(StringRecord, csv::Reader<File>), PipelineError> {
    let file = File::open(path).map_err(|e| {
        PipelineError::Input(format!("Failed to open {what} CSV '{}': {e}", path.display()))
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);
    let headers = reader
        .headers()
        .map_err(|e| PipelineError::Input(format!("Failed to read {what} CSV headers: {e}")))?
        .clone();
    Ok((headers, reader))
}

fn log_row_errors(what: &str, errors: &[RowError]) {
    if errors.is_empty() {
        return;
    }
    warn!("{what}: skipped {} bad rows", errors.len());
    for e in errors.iter().take(5) {
        warn!(
            "  line {}{}: {}",
            e.line,
            e.id.as_deref().map(|id| format!(" ({id})")).unwrap_or_default(),
            e.message
        );
    }
}

pub(crate) fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (clean_header(name).to_ascii_lowercase(), idx))
        .collect()
}

/// Strip whitespace and the UTF-8 BOM spreadsheet tools put on the first header.
fn clean_header(name: &str) -> &str {
    name.trim().trim_start_matches('\u{feff}')
}

fn resolve_column(header_map: &HashMap<String, usize>, aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|a| header_map.get(*a).copied())
}

fn canonical_series_id(name: &str) -> String {
    FRED_ALIASES
        .iter()
        .find(|(fred, _)| fred.eq_ignore_ascii_case(name))
        .map(|(_, ours)| (*ours).to_string())
        .unwrap_or_else(|| name.to_string())
}

pub(crate) fn cell(record: &StringRecord, idx: usize) -> Option<&str> {
    record.get(idx).map(str::trim).filter(|s| !s.is_empty())
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, String> {
    const FMTS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"];
    // Timestamps such as `2020-03-31 00:00:00` keep only the date part.
    let date_part = match s.char_indices().nth(10) {
        Some((i, ' ' | 'T')) => &s[..i],
        _ => s,
    };
    for fmt in FMTS {
        if let Ok(d) = NaiveDate::parse_from_str(date_part, fmt) {
            return Ok(d);
        }
    }
    Err(format!(
        "Invalid date '{s}'. Expected one of: YYYY-MM-DD, DD/MM/YYYY, DD-MM-YYYY, YYYY/MM/DD."
    ))
}

/// Numeric cell: `.` (FRED's missing marker) and `NaN` are blank, anything
/// else must parse to a finite number.
pub(crate) fn parse_value(s: &str) -> Result<Option<f64>, String> {
    if s == "." || s.eq_ignore_ascii_case("nan") || s.eq_ignore_ascii_case("na") {
        return Ok(None);
    }
    let v: f64 = s.parse().map_err(|_| format!("Invalid number '{s}'."))?;
    if v.is_finite() { Ok(Some(v)) } else { Err(format!("Non-finite number '{s}'.")) }
}
