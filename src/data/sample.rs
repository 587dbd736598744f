//! Synthetic macro and fundamentals data for demos and tests.
//!
//! The macro panel is built on weekdays. The high-yield OAS (in percent, as
//! FRED quotes it) is an Ornstein–Uhlenbeck base level plus a stress
//! component. Stress episodes are spaced evenly across the sample with a
//! seeded jitter; each ramps the spread up by several hundred basis points
//! over a few weeks and then decays. That guarantees jump labels in every
//! part of the timeline, including the chronological validation tail. The
//! other series are noisy functions of the spread level, and the policy rate
//! is published monthly only, so forward filling gets exercised.
//!
//! Fundamentals are annual (Dec 31) per entity, with a few omitted lines and
//! zero interest expense sprinkled in.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use log::info;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{LogNormal, Normal};

use crate::domain::{
    DEFAULT_IG_SERIES, DEFAULT_LONG_RATE_SERIES, DEFAULT_SHORT_RATE_SERIES, DEFAULT_SPREAD_SERIES,
};
use crate::error::PipelineError;

pub const MACRO_FILE: &str = "macro.csv";
pub const FUNDAMENTALS_FILE: &str = "fundamentals.csv";

const TED_SERIES: &str = "TED_SPREAD";
const VIX_SERIES: &str = "VIX";

/// Days over which a stress episode ramps up.
const RAMP_DAYS: usize = 15;
/// Daily decay of the stress component.
const STRESS_DECAY: f64 = 0.012;

#[derive(Debug, Clone)]
pub struct SampleConfig {
    pub start: NaiveDate,
    pub years: u32,
    pub entities: usize,
    /// Evenly spaced stress episodes across the sample.
    pub stress_episodes: usize,
    /// Mean episode size in spread percent points.
    pub stress_size: f64,
    /// Share of macro cells blanked out as `.`.
    pub blank_share: f64,
    pub seed: u64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2012, 1, 2).unwrap_or_default(),
            years: 10,
            entities: 20,
            stress_episodes: 5,
            stress_size: 6.5,
            blank_share: 0.01,
            seed: 7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleSummary {
    pub macro_path: PathBuf,
    pub fundamentals_path: PathBuf,
    pub macro_days: usize,
    pub fundamentals_rows: usize,
    pub stress_starts: Vec<NaiveDate>,
}

/// Generate both CSVs into `dir` (created if needed).
pub fn write_sample(dir: &Path, config: &SampleConfig) -> Result<SampleSummary, PipelineError> {
    validate(config)?;
    fs::create_dir_all(dir).map_err(|e| {
        PipelineError::Artifact(format!("Failed to create '{}': {e}", dir.display()))
    })?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let days = business_days(config.start, config.years);
    let panel = simulate_macro(&days, config, &mut rng)?;
    let macro_path = dir.join(MACRO_FILE);
    write_macro_csv(&macro_path, &days, &panel, config.blank_share, &mut rng)?;

    let fundamentals_path = dir.join(FUNDAMENTALS_FILE);
    let first_year = config.start.year() - 1;
    let last_year = days.last().map_or(config.start.year(), |d| d.year());
    let fundamentals_rows = write_fundamentals_csv(
        &fundamentals_path,
        config.entities,
        first_year,
        last_year,
        &mut rng,
    )?;

    info!(
        "sample: {} macro days, {} fundamentals rows, {} stress episodes in {}",
        days.len(),
        fundamentals_rows,
        panel.stress_starts.len(),
        dir.display()
    );
    Ok(SampleSummary {
        macro_path,
        fundamentals_path,
        macro_days: days.len(),
        fundamentals_rows,
        stress_starts: panel.stress_starts.iter().map(|&i| days[i]).collect(),
    })
}

fn validate(config: &SampleConfig) -> Result<(), PipelineError> {
    if config.years == 0 || config.entities == 0 {
        return Err(PipelineError::Config("sample: years and entities must be > 0".into()));
    }
    if !(0.0..0.5).contains(&config.blank_share) {
        return Err(PipelineError::Config("sample: blank share must be in [0, 0.5)".into()));
    }
    if !(config.stress_size.is_finite() && config.stress_size > 0.0) {
        return Err(PipelineError::Config("sample: stress size must be > 0".into()));
    }
    Ok(())
}

fn business_days(start: NaiveDate, years: u32) -> Vec<NaiveDate> {
    let end = start + Duration::days((f64::from(years) * 365.25).round() as i64);
    start
        .iter_days()
        .take_while(|d| *d < end)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}

struct MacroPanel {
    /// `(series id, values per day)`; `None` = not published that day.
    series: Vec<(&'static str, Vec<Option<f64>>)>,
    stress_starts: Vec<usize>,
}

fn simulate_macro(
    days: &[NaiveDate],
    config: &SampleConfig,
    rng: &mut StdRng,
) -> Result<MacroPanel, PipelineError> {
    let n = days.len();
    let noise = Normal::<f64>::new(0.0, 1.0)
        .map_err(|e| PipelineError::Computation(format!("noise distribution: {e}")))?;
    let size = Normal::new(config.stress_size, 0.1 * config.stress_size)
        .map_err(|e| PipelineError::Computation(format!("stress distribution: {e}")))?;

    // Episode k starts near (k + 0.5) / K of the sample.
    let k = config.stress_episodes;
    let jitter = (n / (8 * k.max(1))).max(1) as i64;
    let mut stress_starts: Vec<usize> = (0..k)
        .map(|i| {
            let center = ((i as f64 + 0.5) / k as f64 * n as f64) as i64;
            (center + rng.gen_range(-jitter..=jitter)).clamp(0, n as i64 - 1) as usize
        })
        .collect();
    stress_starts.sort_unstable();
    stress_starts.dedup();

    let mut ramp = vec![0.0; n];
    for &s in &stress_starts {
        let per_day = size.sample(rng).max(0.5 * config.stress_size) / RAMP_DAYS as f64;
        for r in ramp.iter_mut().skip(s).take(RAMP_DAYS) {
            *r += per_day;
        }
    }

    let mut hy = Vec::with_capacity(n);
    let (mut base, mut stress) = (4.0_f64, 0.0_f64);
    for r in &ramp {
        base += 0.02 * (4.0 - base) + 0.04 * noise.sample(rng);
        stress = stress * (1.0 - STRESS_DECAY) + r;
        hy.push((base + stress).max(1.0));
    }

    let mut ig = Vec::with_capacity(n);
    let mut vix = Vec::with_capacity(n);
    let mut ted = Vec::with_capacity(n);
    let mut ten_year = Vec::with_capacity(n);
    let mut fed_funds = Vec::with_capacity(n);
    let mut rate = 2.5_f64;
    let mut policy = 1.0_f64;
    for (i, &h) in hy.iter().enumerate() {
        ig.push(Some(0.28 * h + 0.05 * noise.sample(rng)));
        vix.push(Some((8.0 + 2.5 * h + 1.5 * noise.sample(rng)).max(9.0)));
        ted.push(Some((0.1 + 0.04 * h + 0.02 * noise.sample(rng)).max(0.0)));
        rate = (rate + 0.03 * noise.sample(rng)).clamp(0.5, 6.0);
        ten_year.push(Some(rate));

        let new_month = i == 0 || days[i].month() != days[i - 1].month();
        if new_month {
            policy = (policy + 0.15 * noise.sample(rng)).clamp(0.0, 5.5);
            fed_funds.push(Some(policy));
        } else {
            fed_funds.push(None);
        }
    }

    Ok(MacroPanel {
        series: vec![
            (DEFAULT_SPREAD_SERIES, hy.into_iter().map(Some).collect()),
            (DEFAULT_IG_SERIES, ig),
            (TED_SERIES, ted),
            (VIX_SERIES, vix),
            (DEFAULT_SHORT_RATE_SERIES, fed_funds),
            (DEFAULT_LONG_RATE_SERIES, ten_year),
        ],
        stress_starts,
    })
}

fn csv_err(path: &Path) -> impl Fn(csv::Error) -> PipelineError + '_ {
    move |e| PipelineError::Artifact(format!("Failed to write '{}': {e}", path.display()))
}

/// Wide layout. The spread series is never blanked so labels stay dense.
fn write_macro_csv(
    path: &Path,
    days: &[NaiveDate],
    panel: &MacroPanel,
    blank_share: f64,
    rng: &mut StdRng,
) -> Result<(), PipelineError> {
    let err = csv_err(path);
    let mut w = csv::Writer::from_path(path).map_err(&err)?;
    let mut header = vec!["date".to_string()];
    header.extend(panel.series.iter().map(|(id, _)| id.to_string()));
    w.write_record(&header).map_err(&err)?;

    for (i, day) in days.iter().enumerate() {
        let mut rec = vec![day.to_string()];
        for (id, values) in &panel.series {
            let blank = *id != DEFAULT_SPREAD_SERIES && rng.gen_bool(blank_share);
            rec.push(match values[i] {
                Some(v) if !blank => format!("{v:.4}"),
                _ => ".".to_string(),
            });
        }
        w.write_record(&rec).map_err(&err)?;
    }
    w.flush()
        .map_err(|e| PipelineError::Artifact(format!("Failed to flush '{}': {e}", path.display())))
}

fn write_fundamentals_csv(
    path: &Path,
    entities: usize,
    first_year: i32,
    last_year: i32,
    rng: &mut StdRng,
) -> Result<usize, PipelineError> {
    let err = csv_err(path);
    let assets_dist = LogNormal::new(21.0, 1.0)
        .map_err(|e| PipelineError::Computation(format!("assets distribution: {e}")))?;
    let drift = Normal::<f64>::new(0.0, 0.05)
        .map_err(|e| PipelineError::Computation(format!("drift distribution: {e}")))?;

    let mut w = csv::Writer::from_path(path).map_err(&err)?;
    w.write_record([
        "entity",
        "period_end",
        "total_assets",
        "total_liabilities",
        "total_debt",
        "total_equity",
        "net_income",
        "ebit",
        "interest_expense",
        "total_revenue",
        "cash",
    ])
    .map_err(&err)?;

    let mut rows = 0;
    for e in 0..entities {
        let entity = format!("ENT{:03}", e + 1);
        let mut assets: f64 = assets_dist.sample(rng);
        let mut leverage: f64 = rng.gen_range(0.1..0.7);
        let margin: f64 = rng.gen_range(-0.05..0.2);
        for year in first_year..=last_year {
            let Some(period_end) = NaiveDate::from_ymd_opt(year, 12, 31) else {
                continue;
            };
            assets *= (1.0 + drift.sample(rng)).max(0.5);
            leverage = (leverage + drift.sample(rng)).clamp(0.02, 0.95);
            let debt = leverage * assets;
            let liabilities = (debt * 1.25).min(assets * 0.98);
            let revenue = assets * rng.gen_range(0.3..1.2);
            let ebit = revenue * (margin + 0.05 + drift.sample(rng));
            let interest = if rng.gen_bool(0.05) { 0.0 } else { debt * rng.gen_range(0.02..0.08) };
            let net_income = (ebit - interest) * 0.75;
            let cash = assets * rng.gen_range(0.02..0.2);

            let mut cell = |v: f64| {
                if rng.gen_bool(0.03) {
                    String::new()
                } else {
                    format!("{v:.2}")
                }
            };
            let rec = [
                entity.clone(),
                period_end.to_string(),
                cell(assets),
                cell(liabilities),
                cell(debt),
                cell(assets - liabilities),
                cell(net_income),
                cell(ebit),
                cell(interest),
                cell(revenue),
                cell(cash),
            ];
            w.write_record(&rec).map_err(&err)?;
            rows += 1;
        }
    }
    w.flush().map_err(|e| {
        PipelineError::Artifact(format!("Failed to flush '{}': {e}", path.display()))
    })?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_reproducible_and_has_stress() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let config = SampleConfig {
            years: 2,
            entities: 3,
            ..SampleConfig::default()
        };
        let sa = write_sample(a.path(), &config).unwrap();
        let sb = write_sample(b.path(), &config).unwrap();

        assert_eq!(fs::read(&sa.macro_path).unwrap(), fs::read(&sb.macro_path).unwrap());
        assert_eq!(
            fs::read(&sa.fundamentals_path).unwrap(),
            fs::read(&sb.fundamentals_path).unwrap()
        );
        assert_eq!(sa.stress_starts.len(), 5);
        // Dec 31 of the prior year through the last sampled year.
        assert_eq!(sa.fundamentals_rows, 3 * 4);
        assert!(sa.macro_days > 500);
    }

    #[test]
    fn business_days_skip_weekends() {
        let days = business_days(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 1);
        assert!(days.iter().all(|d| d.weekday().number_from_monday() <= 5));
        assert_eq!(days.len(), 261);
    }

    #[test]
    fn invalid_sample_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = SampleConfig {
            entities: 0,
            ..SampleConfig::default()
        };
        assert!(matches!(write_sample(dir.path(), &config), Err(PipelineError::Config(_))));
    }
}
