use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use rayon::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

use matchcast::calibration::{self, BlendMode, Outcome, Prob3};
use matchcast::config::Config;
use matchcast::predictor::{PredictionResult, Predictor};

const DEFAULT_SKIP: usize = 50;
const DEFAULT_HOME_GOALS: &str = "FTHG";
const DEFAULT_AWAY_GOALS: &str = "FTAG";

struct Sample {
    outcome: Outcome,
    home_goals: f64,
    away_goals: f64,
    result: PredictionResult,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = Config::from_env();
    if let Some(path) = parse_path_arg("--history") {
        config.history_path = path;
    }
    if let Some(path) = parse_path_arg("--artifacts") {
        config.artifact_dir = path;
    }
    let skip = parse_usize_arg("--skip").unwrap_or(DEFAULT_SKIP);
    let home_col = parse_string_arg("--home-goals").unwrap_or_else(|| DEFAULT_HOME_GOALS.to_string());
    let away_col = parse_string_arg("--away-goals").unwrap_or_else(|| DEFAULT_AWAY_GOALS.to_string());

    let predictor = Predictor::load(&config).context("load predictor")?;
    let records = predictor.history().records();
    if records.len() <= skip {
        return Err(anyhow!(
            "history has {} matches, nothing left after skipping {skip}",
            records.len()
        ));
    }

    info!(matches = records.len() - skip, "auditing walk-forward predictions");
    let results = records[skip..]
        .par_iter()
        .map(|m| {
            let (Some(home_goals), Some(away_goals)) = (m.number(&home_col), m.number(&away_col))
            else {
                return None;
            };
            let result = predictor
                .predict_at(&m.home_team, &m.away_team, m.date)
                .ok()?;
            Some(Sample {
                outcome: calibration::classify_outcome(
                    home_goals.round() as i32,
                    away_goals.round() as i32,
                ),
                home_goals,
                away_goals,
                result,
            })
        })
        .collect::<Vec<_>>();

    let attempted = results.len();
    let samples = results.into_iter().flatten().collect::<Vec<_>>();
    if samples.is_empty() {
        return Err(anyhow!(
            "no auditable matches (goal columns {home_col}/{away_col} missing or no prior history)"
        ));
    }

    let outcomes = samples.iter().map(|s| s.outcome).collect::<Vec<_>>();
    let classifier = samples
        .iter()
        .map(|s| s.result.classifier_probs)
        .collect::<Vec<_>>();
    let scoring = samples
        .iter()
        .map(|s| s.result.scoring_probs)
        .collect::<Vec<_>>();
    let blended = samples
        .iter()
        .map(|s| s.result.blended_probs)
        .collect::<Vec<_>>();
    let uniform = vec![Prob3::uniform(); samples.len()];

    println!("Walk-forward audit");
    println!("History: {}", config.history_path.display());
    println!("Artifacts: {}", config.artifact_dir.display());
    println!(
        "Samples: {} (skipped {} of {attempted} after warm-up {skip})",
        samples.len(),
        attempted - samples.len()
    );
    if let (Some(first), Some(last)) = (records.get(skip), records.last()) {
        println!("Range: {} -> {}", first.date, last.date);
    }
    println!();

    let home_pairs = samples
        .iter()
        .map(|s| (s.result.raw_scoreline.home, s.home_goals))
        .collect::<Vec<_>>();
    let away_pairs = samples
        .iter()
        .map(|s| (s.result.raw_scoreline.away, s.away_goals))
        .collect::<Vec<_>>();
    print_regression("Home goals regressor", &home_pairs);
    print_regression("Away goals regressor", &away_pairs);
    println!();

    print_metrics("Classifier", calibration::evaluate_probs(&classifier, &outcomes));
    print_metrics("Scoring process", calibration::evaluate_probs(&scoring, &outcomes));
    print_metrics("Blended + sharpened", calibration::evaluate_probs(&blended, &outcomes));
    print_metrics("Uniform baseline", calibration::evaluate_probs(&uniform, &outcomes));

    println!();
    println!("Blended by mode:");
    for mode in [BlendMode::Mismatch, BlendMode::Elite, BlendMode::Grind] {
        let (preds, outs): (Vec<Prob3>, Vec<Outcome>) = samples
            .iter()
            .filter(|s| s.result.mode == mode)
            .map(|s| (s.result.blended_probs, s.outcome))
            .unzip();
        if preds.is_empty() {
            continue;
        }
        print_metrics(&format!("  {mode:?}"), calibration::evaluate_probs(&preds, &outs));
    }

    Ok(())
}

fn print_regression(label: &str, pairs: &[(f64, f64)]) {
    let n = pairs.len() as f64;
    let mae = pairs.iter().map(|(p, y)| (p - y).abs()).sum::<f64>() / n;
    let mean = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let ss_res = pairs.iter().map(|(p, y)| (y - p).powi(2)).sum::<f64>();
    let ss_tot = pairs.iter().map(|(_, y)| (y - mean).powi(2)).sum::<f64>();
    let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };
    println!("{label}: mae={mae:.3} r2={r2:.3}");
}

fn print_metrics(label: &str, metrics: calibration::Metrics) {
    println!("{label}:");
    println!(
        "  samples={} brier={:.4} log_loss={:.4} accuracy={:.3}",
        metrics.samples, metrics.brier, metrics.log_loss, metrics.accuracy
    );
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    parse_string_arg(name).map(PathBuf::from)
}

fn parse_string_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && !raw.trim().is_empty()
        {
            return Some(raw.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn parse_usize_arg(name: &str) -> Option<usize> {
    parse_string_arg(name).and_then(|raw| raw.parse::<usize>().ok())
}
