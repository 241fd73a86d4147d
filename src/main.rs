use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

use matchcast::config::Config;
use matchcast::match_history::parse_match_date;
use matchcast::predictor::{PredictionResult, PredictionService, wall_clock_now};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    let service = PredictionService::new();
    let predictor = service.init_from_config(&config).with_context(|| {
        format!(
            "initialise predictor (history {}, artifacts {})",
            config.history_path.display(),
            config.artifact_dir.display()
        )
    })?;

    if has_flag("--teams") {
        for team in predictor.list_teams() {
            println!("{team}");
        }
        return Ok(());
    }

    let home = parse_string_arg("--home").ok_or_else(|| anyhow!("missing --home <team>"))?;
    let away = parse_string_arg("--away").ok_or_else(|| anyhow!("missing --away <team>"))?;

    if has_flag("--modifiers") {
        let report = predictor.venue_report(&home, &away)?;
        println!("{} ({:.0}) vs {} ({:.0})", home, report.home_rating, away, report.away_rating);
        println!(
            "  tier={:?} home_mod={:.2} away_mod={:.2}",
            report.venue.tier, report.venue.home, report.venue.away
        );
        println!(
            "  intensity_gap={:.3} -> {}",
            report.intensity_gap,
            report.verdict.label()
        );
        return Ok(());
    }

    let as_of = match parse_string_arg("--as-of") {
        Some(raw) => Some(parse_match_date(&raw).ok_or_else(|| anyhow!("unparseable --as-of {raw:?}"))?),
        None => None,
    };

    if has_flag("--features") {
        let at = as_of.unwrap_or_else(wall_clock_now);
        let features = predictor.features_at(&home, &away, at)?;
        for (name, value) in features.iter() {
            println!("{name:<40} {value:>10.4}");
        }
        return Ok(());
    }

    let result = match as_of {
        Some(at) => predictor.predict_at(&home, &away, at)?,
        None => predictor.predict(&home, &away)?,
    };

    if has_flag("--json") {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("serialize prediction")?
        );
    } else {
        print_result(&result);
    }
    Ok(())
}

fn print_result(r: &PredictionResult) {
    println!("{} vs {}", r.home_team, r.away_team);
    println!(
        "  scoreline {} (raw {:.2} - {:.2})",
        r.scoreline, r.raw_scoreline.home, r.raw_scoreline.away
    );
    println!(
        "  classifier {:?} ({:.1}%)",
        r.classifier_label,
        r.classifier_confidence * 100.0
    );
    for (label, p) in [
        ("classifier", r.classifier_probs),
        ("scoring", r.scoring_probs),
        ("blended", r.blended_probs),
    ] {
        println!(
            "  {label:<10} home={:.1}% draw={:.1}% away={:.1}%",
            p.home * 100.0,
            p.draw * 100.0,
            p.away * 100.0
        );
    }
    println!(
        "  mode={:?} weights={:.2}/{:.2} T={:.2} venue={:.2}/{:.2}",
        r.mode, r.weights.classifier, r.weights.regression, r.temperature, r.venue.home, r.venue.away
    );
    println!("  winner: {}", r.predicted_winner);
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

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}
