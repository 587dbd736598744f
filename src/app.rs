//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and initializes logging
//! - parses CLI arguments
//! - turns flags into a [`PipelineConfig`]
//! - runs the requested command and prints its summary

use clap::Parser;
use log::info;

use crate::cli::{Command, InputArgs, RunArgs, SampleArgs, ScoreArgs};
use crate::data::SampleConfig;
use crate::domain::{
    EvalConfig, FusionConfig, GbtParams, LabelConfig, LogisticParams, MacroRoles, PipelineConfig,
    TrainConfig,
};
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `cf` binary.
pub fn run() -> Result<(), AppError> {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = crate::cli::Cli::parse();
    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Features(args) => handle_features(args),
        Command::Score(args) => handle_score(args),
        Command::Sample(args) => handle_sample(args),
    }
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let config = pipeline_config_from_args(&args);
    let run = pipeline::run_pipeline(&config)?;
    println!("{}", crate::report::format_run_summary(&run, &config, args.top));
    Ok(())
}

fn handle_features(args: InputArgs) -> Result<(), AppError> {
    let config = features_config_from_args(&args);
    let run = pipeline::run_features(&config)?;
    println!("{}", crate::report::format_feature_summary(&run, &config));
    println!(
        "Wrote {} to {}",
        pipeline::FEATURES_FILE,
        config.output_dir.display()
    );
    Ok(())
}

fn handle_score(args: ScoreArgs) -> Result<(), AppError> {
    let score = pipeline::run_score(&args.model, &args.features, args.out.as_ref())?;
    print!("{}", crate::report::format_score_summary(&score));
    if let Some(path) = &args.out {
        println!("Wrote scores to {}", path.display());
    }
    Ok(())
}

fn handle_sample(args: SampleArgs) -> Result<(), AppError> {
    let config = SampleConfig {
        start: args.start,
        years: args.years,
        entities: args.entities,
        stress_episodes: args.episodes,
        seed: args.seed,
        ..SampleConfig::default()
    };
    let summary = crate::data::write_sample(&args.out, &config)?;
    info!("stress episodes start on {:?}", summary.stress_starts);
    println!(
        "Wrote {} ({} days) and {} ({} rows)",
        summary.macro_path.display(),
        summary.macro_days,
        summary.fundamentals_path.display(),
        summary.fundamentals_rows
    );
    Ok(())
}

/// Config for `cf features`: training and evaluation keep their defaults.
pub fn features_config_from_args(args: &InputArgs) -> PipelineConfig {
    let required_series = if args.require.is_empty() {
        vec![args.spread_series.clone()]
    } else {
        args.require.clone()
    };

    PipelineConfig {
        fundamentals_path: args.fundamentals.clone(),
        macro_path: args.macro_path.clone(),
        output_dir: args.out.clone(),
        fusion: FusionConfig {
            calendar: args.calendar,
            required_series,
            report_lag_days: args.report_lag_days,
        },
        label: LabelConfig {
            spread_series: args.spread_series.clone(),
            horizon_days: args.horizon_days,
            threshold_bp: args.threshold_bp,
            spread_unit: args.spread_unit,
            algorithm: args.window,
        },
        roles: MacroRoles {
            high_yield: args.spread_series.clone(),
            investment_grade: args.ig_series.clone(),
            short_rate: args.short_rate_series.clone(),
            long_rate: args.long_rate_series.clone(),
        },
        train: TrainConfig {
            horizon_days: args.horizon_days,
            ..TrainConfig::default()
        },
        eval: EvalConfig::default(),
    }
}

pub fn pipeline_config_from_args(args: &RunArgs) -> PipelineConfig {
    let base = features_config_from_args(&args.input);
    PipelineConfig {
        train: TrainConfig {
            cutoff: args.cutoff,
            validation_fraction: args.validation_fraction,
            purge: !args.no_purge,
            horizon_days: args.input.horizon_days,
            seed: args.seed,
            logistic: LogisticParams {
                l2: args.l2,
                max_iter: args.logistic_max_iter,
                balance_classes: args.balance_classes,
                ..LogisticParams::default()
            },
            gbt: GbtParams {
                n_rounds: args.n_rounds,
                learning_rate: args.learning_rate,
                max_depth: args.max_depth,
                min_child_weight: args.min_child_weight,
                lambda: args.lambda,
                gamma: args.gamma,
                subsample: args.subsample,
                max_bins: args.max_bins,
                scale_pos_weight: args.scale_pos_weight,
            },
        },
        eval: EvalConfig {
            threshold: args.decision_threshold,
            max_attribution_samples: args.attribution_samples,
            additivity_tolerance: args.additivity_tolerance,
            background_size: args.background_size,
            permutations: args.permutations,
            seed: args.seed,
        },
        ..base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["cf", "run", "--fundamentals", "f.csv", "--macro", "m.csv"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Run(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn required_series_default_to_the_spread_series() {
        let config = pipeline_config_from_args(&run_args(&["--spread-series", "HY"]));
        assert_eq!(config.fusion.required_series, vec!["HY".to_string()]);
        assert_eq!(config.roles.high_yield, "HY");
        assert!(config.train.purge);
        assert_eq!(config.train.horizon_days, 90);
    }

    #[test]
    fn run_flags_reach_every_stage() {
        let config = pipeline_config_from_args(&run_args(&[
            "--horizon-days",
            "60",
            "--no-purge",
            "--n-rounds",
            "7",
            "--seed",
            "3",
            "--decision-threshold",
            "0.3",
        ]));
        assert_eq!(config.label.horizon_days, 60);
        assert_eq!(config.train.horizon_days, 60);
        assert!(!config.train.purge);
        assert_eq!(config.train.gbt.n_rounds, 7);
        assert_eq!(config.eval.seed, 3);
        assert_eq!(config.eval.threshold, 0.3);
    }
}
