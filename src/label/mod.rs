//! Forward-looking credit-stress labels.
//!
//! Label(t) = 1 when the spread series rises by at least the threshold at any
//! observation inside `(t, t + horizon]`, measured against the spread known on
//! day `t`. Days whose window cannot be fully observed are undecidable and
//! their rows are dropped, never labeled 0.
//!
//! The label depends only on the shared macro series, so it is computed once
//! per date and then joined onto every entity's row for that date.

pub mod window;

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::domain::{LabelConfig, SpreadUnit, WindowAlgorithm};
use crate::error::{PipelineError, RowIssue};

/// Up to this many spread observations the naive scan is used under `auto`.
const NAIVE_SCAN_MAX_OBS: usize = 2_048;

/// Threshold for `SpreadUnit::Auto`: spreads below this are taken as percent.
const PERCENT_AUTO_LIMIT: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOutcome {
    Positive,
    Negative,
    Undecidable(RowIssue),
}

impl LabelOutcome {
    pub fn value(self) -> Option<u8> {
        match self {
            LabelOutcome::Positive => Some(1),
            LabelOutcome::Negative => Some(0),
            LabelOutcome::Undecidable(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelStats {
    pub dates: usize,
    pub positive_dates: usize,
    pub negative_dates: usize,
    pub undecidable: BTreeMap<RowIssue, usize>,
    /// Multiplier applied to raw spread values to get basis points.
    pub unit_scale: f64,
}

/// Per-date labels.
#[derive(Debug, Clone)]
pub struct LabelSet {
    outcomes: BTreeMap<NaiveDate, LabelOutcome>,
    pub stats: LabelStats,
}

impl LabelSet {
    pub fn outcome(&self, date: NaiveDate) -> Option<LabelOutcome> {
        self.outcomes.get(&date).copied()
    }

    pub fn label(&self, date: NaiveDate) -> Option<u8> {
        self.outcome(date).and_then(LabelOutcome::value)
    }
}

pub struct LabelGenerator {
    config: LabelConfig,
}

impl LabelGenerator {
    pub fn new(config: LabelConfig) -> Self {
        Self { config }
    }

    /// Label every date in `dates` from the raw spread observations.
    ///
    /// `spread` must be sorted by date (as stored in `MacroTable`).
    pub fn generate(
        &self,
        spread: &[(NaiveDate, f64)],
        dates: &[NaiveDate],
    ) -> Result<LabelSet, PipelineError> {
        if self.config.horizon_days <= 0 {
            return Err(PipelineError::Config(format!(
                "label horizon must be positive, got {} days",
                self.config.horizon_days
            )));
        }
        if !(self.config.threshold_bp.is_finite() && self.config.threshold_bp > 0.0) {
            return Err(PipelineError::Config(format!(
                "spread threshold must be positive, got {}",
                self.config.threshold_bp
            )));
        }
        if spread.is_empty() {
            return Err(PipelineError::Input(format!(
                "spread series `{}` has no observations",
                self.config.spread_series
            )));
        }

        let mut queries = dates.to_vec();
        queries.sort_unstable();
        queries.dedup();

        let scale = unit_scale(self.config.spread_unit, spread);
        let horizon = Duration::days(self.config.horizon_days);
        let maxima = match self.resolve_algorithm(spread.len()) {
            WindowAlgorithm::Naive => window::forward_max_naive(spread, &queries, horizon),
            _ => window::forward_max_deque(spread, &queries, horizon),
        };
        let last_obs = spread[spread.len() - 1].0;

        let mut stats = LabelStats {
            dates: queries.len(),
            unit_scale: scale,
            ..LabelStats::default()
        };
        let mut outcomes = BTreeMap::new();

        for (&t, window_max) in queries.iter().zip(maxima) {
            let outcome = self.classify(t, window_max, spread, last_obs, horizon, scale);
            match outcome {
                LabelOutcome::Positive => stats.positive_dates += 1,
                LabelOutcome::Negative => stats.negative_dates += 1,
                LabelOutcome::Undecidable(issue) => {
                    *stats.undecidable.entry(issue).or_default() += 1
                }
            }
            outcomes.insert(t, outcome);
        }

        info!(
            "labels: {} dates, {} positive, {} negative, {} undecidable (scale x{scale})",
            stats.dates,
            stats.positive_dates,
            stats.negative_dates,
            stats.undecidable.values().sum::<usize>()
        );
        for (issue, n) in &stats.undecidable {
            debug!("labels: {n} dates dropped ({})", issue.label());
        }

        Ok(LabelSet { outcomes, stats })
    }

    fn classify(
        &self,
        t: NaiveDate,
        window_max: Option<f64>,
        spread: &[(NaiveDate, f64)],
        last_obs: NaiveDate,
        horizon: Duration,
        scale: f64,
    ) -> LabelOutcome {
        if t + horizon > last_obs {
            return LabelOutcome::Undecidable(RowIssue::HorizonOverrun);
        }
        let Some(base_idx) = spread.partition_point(|o| o.0 <= t).checked_sub(1) else {
            return LabelOutcome::Undecidable(RowIssue::MissingBaseline);
        };
        let Some(window_max) = window_max else {
            return LabelOutcome::Undecidable(RowIssue::EmptyWindow);
        };

        let jump_bp = (window_max - spread[base_idx].1) * scale;
        if jump_bp >= self.config.threshold_bp {
            LabelOutcome::Positive
        } else {
            LabelOutcome::Negative
        }
    }

    fn resolve_algorithm(&self, n_obs: usize) -> WindowAlgorithm {
        match self.config.algorithm {
            WindowAlgorithm::Auto if n_obs <= NAIVE_SCAN_MAX_OBS => WindowAlgorithm::Naive,
            WindowAlgorithm::Auto => WindowAlgorithm::Deque,
            other => other,
        }
    }
}

/// Multiplier converting raw spread values into basis points.
pub fn unit_scale(unit: SpreadUnit, spread: &[(NaiveDate, f64)]) -> f64 {
    match unit {
        SpreadUnit::Bp => 1.0,
        SpreadUnit::Percent => 100.0,
        SpreadUnit::Auto => {
            let max_abs = spread.iter().map(|o| o.1.abs()).fold(0.0, f64::max);
            if max_abs < PERCENT_AUTO_LIMIT { 100.0 } else { 1.0 }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + Duration::days(n)
    }

    fn generator(algorithm: WindowAlgorithm) -> LabelGenerator {
        LabelGenerator::new(LabelConfig {
            spread_series: "HY".into(),
            horizon_days: 90,
            threshold_bp: 500.0,
            spread_unit: SpreadUnit::Bp,
            algorithm,
        })
    }

    fn spike_series() -> Vec<(NaiveDate, f64)> {
        vec![
            (day(0), 100.0),
            (day(30), 100.0),
            (day(60), 650.0),
            (day(90), 100.0),
            (day(120), 100.0),
        ]
    }

    #[test]
    fn spike_inside_window_is_positive() {
        for algorithm in [WindowAlgorithm::Naive, WindowAlgorithm::Deque] {
            let labels = generator(algorithm)
                .generate(&spike_series(), &[day(0), day(30), day(120)])
                .unwrap();
            assert_eq!(labels.outcome(day(0)), Some(LabelOutcome::Positive));
            assert_eq!(labels.outcome(day(30)), Some(LabelOutcome::Positive));
            assert_eq!(
                labels.outcome(day(120)),
                Some(LabelOutcome::Undecidable(RowIssue::HorizonOverrun))
            );
            assert_eq!(labels.label(day(120)), None);
        }
    }

    #[test]
    fn window_near_horizon_is_dropped_not_negative() {
        let labels = generator(WindowAlgorithm::Auto)
            .generate(&spike_series(), &[day(60), day(100)])
            .unwrap();
        assert_eq!(labels.label(day(60)), None);
        assert_eq!(labels.label(day(100)), None);
        assert_eq!(labels.stats.negative_dates, 0);
        assert_eq!(labels.stats.undecidable.get(&RowIssue::HorizonOverrun), Some(&2));
    }

    #[test]
    fn threshold_is_inclusive_and_relative_to_day_t() {
        let spread = vec![(day(0), 200.0), (day(10), 700.0), (day(20), 699.0), (day(200), 0.0)];
        let labels = generator(WindowAlgorithm::Naive)
            .generate(&spread, &[day(0), day(5), day(10)])
            .unwrap();
        assert_eq!(labels.label(day(0)), Some(1));
        // Baseline for day 5 is the day-0 observation (200).
        assert_eq!(labels.label(day(5)), Some(1));
        assert_eq!(labels.label(day(10)), Some(0));
    }

    #[test]
    fn empty_window_and_missing_baseline_are_undecidable() {
        let spread = vec![(day(10), 100.0), (day(200), 100.0), (day(400), 100.0)];
        let labels = generator(WindowAlgorithm::Deque)
            .generate(&spread, &[day(5), day(20)])
            .unwrap();
        assert_eq!(
            labels.outcome(day(5)),
            Some(LabelOutcome::Undecidable(RowIssue::MissingBaseline))
        );
        assert_eq!(
            labels.outcome(day(20)),
            Some(LabelOutcome::Undecidable(RowIssue::EmptyWindow))
        );
    }

    #[test]
    fn percent_series_are_scaled_to_bp() {
        let spread = vec![(day(0), 3.0), (day(30), 8.5), (day(200), 3.0)];
        let labels = generator(WindowAlgorithm::Naive);
        let auto = LabelGenerator::new(LabelConfig {
            spread_unit: SpreadUnit::Auto,
            ..labels.config.clone()
        });
        let out = auto.generate(&spread, &[day(0)]).unwrap();
        assert_eq!(out.stats.unit_scale, 100.0);
        assert_eq!(out.label(day(0)), Some(1));

        // Read as bp the same jump is only 5.5bp.
        assert_eq!(labels.generate(&spread, &[day(0)]).unwrap().label(day(0)), Some(0));
    }

    #[test]
    fn changing_data_after_window_does_not_change_label() {
        let mut spread: Vec<(NaiveDate, f64)> =
            (0..400).map(|i| (day(i), 300.0 + (i % 17) as f64)).collect();
        let before = generator(WindowAlgorithm::Deque).generate(&spread, &[day(50)]).unwrap();
        spread[200].1 = 5_000.0;
        let after = generator(WindowAlgorithm::Deque).generate(&spread, &[day(50)]).unwrap();
        assert_eq!(before.label(day(50)), after.label(day(50)));
    }

    #[test]
    fn non_positive_horizon_is_rejected() {
        let g = LabelGenerator::new(LabelConfig {
            horizon_days: 0,
            ..LabelConfig::default()
        });
        assert!(matches!(g.generate(&spike_series(), &[day(0)]), Err(PipelineError::Config(_))));
    }
}
