//! Temporal fusion of annual fundamentals onto the daily macro calendar.
//!
//! Each entity's records form a date-sorted arena; every calendar day picks
//! the latest record whose effective date is on or before the day (binary
//! search). Macro series are forward-filled onto the same calendar once and
//! shared by all entities.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::domain::{FundamentalRecord, FusedRow, FusionConfig, MacroTable};
use crate::error::PipelineError;

/// Output of the fusion stage.
#[derive(Debug, Clone)]
pub struct FusedTable {
    /// Macro series ids, in the order of `FusedRow::macro_values`.
    pub series: Vec<String>,
    /// Rows ordered by (entity, date).
    pub rows: Vec<FusedRow>,
    pub stats: FusionStats,
}

impl FusedTable {
    pub fn series_index(&self, series: &str) -> Option<usize> {
        self.series.iter().position(|s| s == series)
    }

    /// Distinct row dates, ascending.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.rows.iter().map(|r| r.date).collect();
        dates.sort_unstable();
        dates.dedup();
        dates
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionStats {
    pub entities: usize,
    pub calendar_days: usize,
    pub rows_emitted: usize,
    /// Rows excluded because a required series had no prior value, per series.
    pub data_gap_rows: BTreeMap<String, usize>,
    pub duplicate_records: usize,
}

/// Date-sorted fundamentals of one entity.
#[derive(Debug, Clone)]
struct EntityHistory {
    entity: String,
    records: Vec<FundamentalRecord>,
}

impl EntityHistory {
    /// Latest record effective on or before `day`.
    fn as_of(&self, day: NaiveDate) -> Option<&FundamentalRecord> {
        let idx = self.records.partition_point(|r| r.effective_date <= day);
        idx.checked_sub(1).map(|i| &self.records[i])
    }

    fn first_effective(&self) -> Option<NaiveDate> {
        self.records.first().map(|r| r.effective_date)
    }
}

pub struct TemporalFusionEngine {
    config: FusionConfig,
}

impl TemporalFusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    /// Produce one fused row per (entity, calendar day) on/after the entity's
    /// first effective date.
    pub fn fuse(
        &self,
        fundamentals: &[FundamentalRecord],
        macro_table: &MacroTable,
    ) -> Result<FusedTable, PipelineError> {
        if self.config.report_lag_days < 0 {
            return Err(PipelineError::Config(format!(
                "report lag must be >= 0 days (got {}): a record cannot be known before its period ends",
                self.config.report_lag_days
            )));
        }
        if fundamentals.is_empty() {
            return Err(PipelineError::Input("no fundamental records to fuse".into()));
        }
        if let Some(early) = fundamentals.iter().find(|r| r.effective_date < r.period_end) {
            return Err(PipelineError::Input(format!(
                "{}: effective date {} precedes period end {}",
                early.entity, early.effective_date, early.period_end
            )));
        }
        if macro_table.is_empty() {
            return Err(PipelineError::Input("no macro observations to fuse".into()));
        }
        for required in &self.config.required_series {
            if !macro_table.contains(required) {
                return Err(PipelineError::Input(format!(
                    "required macro series `{required}` is not present in the macro input"
                )));
            }
        }

        let (histories, duplicates) = build_histories(fundamentals);
        let calendar = macro_table.calendar(self.config.calendar);
        let series = macro_table.series_ids();

        // Forward-fill every series onto the calendar once.
        let aligned: Vec<Vec<Option<f64>>> = series
            .iter()
            .map(|id| forward_fill(macro_table.observations(id).unwrap_or(&[]), &calendar))
            .collect();

        let required: Vec<usize> = self
            .config
            .required_series
            .iter()
            .filter_map(|id| series.iter().position(|s| s == id))
            .collect();

        let mut stats = FusionStats {
            entities: histories.len(),
            calendar_days: calendar.len(),
            duplicate_records: duplicates,
            ..FusionStats::default()
        };

        let mut rows = Vec::new();
        for history in &histories {
            let Some(first) = history.first_effective() else {
                continue;
            };
            let start = calendar.partition_point(|d| *d < first);
            for (day_idx, &day) in calendar.iter().enumerate().skip(start) {
                let Some(record) = history.as_of(day) else {
                    continue;
                };

                if let Some(&gap) = required.iter().find(|&&s| aligned[s][day_idx].is_none()) {
                    *stats.data_gap_rows.entry(series[gap].clone()).or_default() += 1;
                    continue;
                }

                rows.push(FusedRow {
                    entity: history.entity.clone(),
                    date: day,
                    period_end: record.period_end,
                    fundamentals: record.values,
                    macro_values: aligned.iter().map(|col| col[day_idx]).collect(),
                });
            }
            debug!("fused entity {} from {first}", history.entity);
        }

        stats.rows_emitted = rows.len();
        let gaps: usize = stats.data_gap_rows.values().sum();
        if gaps > 0 {
            warn!("excluded {gaps} fused rows with no prior value for a required series");
        }
        if duplicates > 0 {
            warn!("{duplicates} duplicate fundamental records replaced by later rows");
        }
        info!(
            "fusion: {} entities x {} calendar days -> {} rows",
            stats.entities, stats.calendar_days, stats.rows_emitted
        );

        if rows.is_empty() {
            return Err(PipelineError::EmptyTable { stage: "fusion" });
        }

        Ok(FusedTable { series, rows, stats })
    }
}

/// Group records per entity and sort by effective date.
///
/// Records sharing an (entity, effective date) key keep the later input row.
fn build_histories(records: &[FundamentalRecord]) -> (Vec<EntityHistory>, usize) {
    let mut grouped: BTreeMap<&str, BTreeMap<NaiveDate, &FundamentalRecord>> = BTreeMap::new();
    let mut duplicates = 0;
    for r in records {
        if grouped
            .entry(r.entity.as_str())
            .or_default()
            .insert(r.effective_date, r)
            .is_some()
        {
            duplicates += 1;
        }
    }

    let histories = grouped
        .into_iter()
        .map(|(entity, by_date)| EntityHistory {
            entity: entity.to_string(),
            records: by_date.into_values().cloned().collect(),
        })
        .collect();
    (histories, duplicates)
}

/// Carry the last observation on or before each calendar day.
///
/// `obs` and `calendar` must both be sorted ascending.
pub fn forward_fill(obs: &[(NaiveDate, f64)], calendar: &[NaiveDate]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(calendar.len());
    let mut next = 0;
    let mut last = None;
    for &day in calendar {
        while next < obs.len() && obs[next].0 <= day {
            last = Some(obs[next].1);
            next += 1;
        }
        out.push(last);
    }
    out
}
