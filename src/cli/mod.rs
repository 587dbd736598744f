//! Command-line parsing for the `cf` binary.
//!
//! Argument parsing and command dispatch stay separate from the pipeline code.
//! Every flag can also be supplied through a `CF_*` environment variable (a
//! `.env` file in the working directory is loaded first).

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::domain::{
    CalendarMode, DEFAULT_IG_SERIES, DEFAULT_LONG_RATE_SERIES, DEFAULT_SHORT_RATE_SERIES,
    DEFAULT_SPREAD_SERIES, ScalePosWeight, SpreadUnit, WindowAlgorithm,
};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "cf",
    version,
    about = "Credit-stress early warning: fuse annual fundamentals with daily macro series, label forward spread jumps, train and explain classifiers"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Full pipeline: fuse, label, build features, train both models, evaluate and explain.
    Run(RunArgs),
    /// Fuse, label and build features only; writes `features.csv`.
    Features(InputArgs),
    /// Score a feature CSV with a saved model artifact.
    Score(ScoreArgs),
    /// Write synthetic fundamentals and macro CSVs.
    Sample(SampleArgs),
}

/// Inputs, fusion, labeling and feature options shared by `run` and `features`.
#[derive(Debug, Args, Clone)]
pub struct InputArgs {
    /// Annual fundamentals CSV (entity, period end date, accounting columns).
    #[arg(long, env = "CF_FUNDAMENTALS", value_name = "CSV")]
    pub fundamentals: PathBuf,

    /// Macro CSV, long (`series,date,value`) or wide (`date,<series>...`).
    #[arg(long = "macro", env = "CF_MACRO", value_name = "CSV")]
    pub macro_path: PathBuf,

    /// Output directory (cleared on rerun if it holds a previous run).
    #[arg(short, long, env = "CF_OUT", default_value = "cf-output")]
    pub out: PathBuf,

    /// Fused calendar: union of observed macro dates, or every calendar day.
    #[arg(long, env = "CF_CALENDAR", value_enum, default_value_t = CalendarMode::Observed)]
    pub calendar: CalendarMode,

    /// Days between fiscal period end and the report becoming usable.
    #[arg(
        long,
        env = "CF_REPORT_LAG_DAYS",
        default_value_t = 0,
        value_parser = clap::value_parser!(i64).range(0..)
    )]
    pub report_lag_days: i64,

    /// Series a fused row cannot exist without (comma separated). Defaults to the spread series.
    #[arg(long, env = "CF_REQUIRE", value_delimiter = ',')]
    pub require: Vec<String>,

    /// Spread series the label is computed from.
    #[arg(long, env = "CF_SPREAD_SERIES", default_value = DEFAULT_SPREAD_SERIES)]
    pub spread_series: String,

    /// Label horizon in calendar days.
    #[arg(long, env = "CF_HORIZON_DAYS", default_value_t = 90)]
    pub horizon_days: i64,

    /// Spread increase (bp) that counts as a jump.
    #[arg(long, env = "CF_THRESHOLD_BP", default_value_t = 500.0)]
    pub threshold_bp: f64,

    /// Units of the spread series.
    #[arg(long, env = "CF_SPREAD_UNIT", value_enum, default_value_t = SpreadUnit::Auto)]
    pub spread_unit: SpreadUnit,

    /// Forward-window maximum algorithm.
    #[arg(long, env = "CF_WINDOW", value_enum, default_value_t = WindowAlgorithm::Auto)]
    pub window: WindowAlgorithm,

    /// Investment-grade spread series (for the credit quality spread feature).
    #[arg(long, env = "CF_IG_SERIES", default_value = DEFAULT_IG_SERIES)]
    pub ig_series: String,

    /// Short rate series (for the term spread feature).
    #[arg(long, env = "CF_SHORT_RATE_SERIES", default_value = DEFAULT_SHORT_RATE_SERIES)]
    pub short_rate_series: String,

    /// Long rate series (for the term spread feature).
    #[arg(long, env = "CF_LONG_RATE_SERIES", default_value = DEFAULT_LONG_RATE_SERIES)]
    pub long_rate_series: String,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Train on rows dated before this day, validate on the rest.
    #[arg(long, env = "CF_CUTOFF", value_name = "YYYY-MM-DD")]
    pub cutoff: Option<NaiveDate>,

    /// Share of distinct dates held out when no cutoff is given.
    #[arg(long, env = "CF_VALIDATION_FRACTION", default_value_t = 0.2)]
    pub validation_fraction: f64,

    /// Keep training rows whose label window reaches into the validation period.
    #[arg(long, env = "CF_NO_PURGE")]
    pub no_purge: bool,

    /// Seed for subsampling and sampled attributions.
    #[arg(long, env = "CF_SEED", default_value_t = 42)]
    pub seed: u64,

    /// Logistic regression L2 penalty.
    #[arg(long, env = "CF_L2", default_value_t = 1.0)]
    pub l2: f64,

    #[arg(long, env = "CF_LOGISTIC_MAX_ITER", default_value_t = 100)]
    pub logistic_max_iter: usize,

    /// Reweight logistic regression classes to equal total weight.
    #[arg(long, env = "CF_BALANCE_CLASSES")]
    pub balance_classes: bool,

    /// Boosting rounds.
    #[arg(long, env = "CF_N_ROUNDS", default_value_t = 100)]
    pub n_rounds: usize,

    #[arg(long, env = "CF_LEARNING_RATE", default_value_t = 0.05)]
    pub learning_rate: f64,

    #[arg(long, env = "CF_MAX_DEPTH", default_value_t = 4)]
    pub max_depth: usize,

    #[arg(long, env = "CF_MIN_CHILD_WEIGHT", default_value_t = 1.0)]
    pub min_child_weight: f64,

    /// L2 regularization on leaf values.
    #[arg(long, env = "CF_LAMBDA", default_value_t = 1.0)]
    pub lambda: f64,

    /// Minimum split gain.
    #[arg(long, env = "CF_GAMMA", default_value_t = 0.0)]
    pub gamma: f64,

    /// Row share sampled per boosting round.
    #[arg(long, env = "CF_SUBSAMPLE", default_value_t = 1.0)]
    pub subsample: f64,

    #[arg(long, env = "CF_MAX_BINS", default_value_t = 64)]
    pub max_bins: usize,

    /// Positive class weight for the trees: a number or `auto` (negatives / positives).
    #[arg(long, env = "CF_SCALE_POS_WEIGHT", default_value = "1")]
    pub scale_pos_weight: ScalePosWeight,

    /// Probability cut-off for the confusion matrix.
    #[arg(long, env = "CF_DECISION_THRESHOLD", default_value_t = 0.5)]
    pub decision_threshold: f64,

    /// Validation rows explained per model.
    #[arg(long, env = "CF_ATTRIBUTION_SAMPLES", default_value_t = 500)]
    pub attribution_samples: usize,

    /// Relative tolerance for `baseline + Σ attributions == raw score`.
    #[arg(long, env = "CF_ADDITIVITY_TOLERANCE", default_value_t = 1e-4)]
    pub additivity_tolerance: f64,

    /// Background rows for sampled Shapley values.
    #[arg(long, env = "CF_BACKGROUND_SIZE", default_value_t = 100)]
    pub background_size: usize,

    /// Feature orders per sample for sampled Shapley values.
    #[arg(long, env = "CF_PERMUTATIONS", default_value_t = 16)]
    pub permutations: usize,

    /// Top features to list per model in the summary.
    #[arg(long, default_value_t = 8)]
    pub top: usize,
}

#[derive(Debug, Args, Clone)]
pub struct ScoreArgs {
    /// Model artifact written by `cf run` (`models/<model>.bin`).
    #[arg(long, value_name = "BIN")]
    pub model: PathBuf,

    /// Feature CSV in the `features.csv` layout.
    #[arg(long, value_name = "CSV")]
    pub features: PathBuf,

    /// Where to write scores (defaults to stdout summary only).
    #[arg(short, long, value_name = "CSV")]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SampleArgs {
    /// Directory for `fundamentals.csv` and `macro.csv`.
    #[arg(short, long, env = "CF_SAMPLE_OUT", default_value = "cf-sample")]
    pub out: PathBuf,

    /// First calendar day of the macro panel.
    #[arg(long, default_value = "2012-01-02")]
    pub start: NaiveDate,

    #[arg(long, default_value_t = 10)]
    pub years: u32,

    #[arg(long, default_value_t = 20)]
    pub entities: usize,

    /// Stress episodes spread evenly over the sample.
    #[arg(long, default_value_t = 5)]
    pub episodes: usize,

    #[arg(long, default_value_t = 7)]
    pub seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "cf",
            "run",
            "--fundamentals",
            "f.csv",
            "--macro",
            "m.csv",
            "--cutoff",
            "2020-06-30",
            "--scale-pos-weight",
            "auto",
            "--require",
            "HIGH_YIELD_OAS,VIX",
            "--no-purge",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.cutoff, NaiveDate::from_ymd_opt(2020, 6, 30));
        assert_eq!(args.scale_pos_weight, ScalePosWeight::Auto);
        assert_eq!(args.input.require, vec!["HIGH_YIELD_OAS".to_string(), "VIX".to_string()]);
        assert!(args.no_purge);
        assert_eq!(args.input.horizon_days, 90);
    }

    #[test]
    fn negative_report_lag_is_refused() {
        let parsed = Cli::try_parse_from([
            "cf",
            "features",
            "--fundamentals",
            "f.csv",
            "--macro",
            "m.csv",
            "--report-lag-days=-30",
        ]);
        assert!(parsed.is_err());
    }
}
