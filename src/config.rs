use std::env;
use std::path::PathBuf;

use crate::win_prob::DEFAULT_MAX_GOALS;

const DEFAULT_HISTORY_PATH: &str = "data_artifacts/history.sqlite";
const DEFAULT_ARTIFACT_DIR: &str = "model_artifacts";

/// Tunables of the feature builder and probability engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineParams {
    pub max_goals: u32,
    pub ewma_span: f64,
    pub ewma_lookback: usize,
    pub season_window: usize,
    pub rest_days_cap: i64,
    pub rating_field: String,
    pub opponent_rating_field: String,
    pub scoring_field: String,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            max_goals: DEFAULT_MAX_GOALS,
            ewma_span: 15.0,
            ewma_lookback: 10,
            season_window: 12,
            rest_days_cap: 14,
            rating_field: "elo".to_string(),
            opponent_rating_field: "Avg_Opponent_Elo_L5".to_string(),
            scoring_field: "expected_goals".to_string(),
        }
    }
}

impl EngineParams {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_goals: env_parse("MATCHCAST_MAX_GOALS")
                .unwrap_or(d.max_goals)
                .clamp(1, 30),
            ewma_span: env_parse::<f64>("MATCHCAST_EWMA_SPAN")
                .filter(|v| v.is_finite())
                .unwrap_or(d.ewma_span)
                .max(1.0),
            ewma_lookback: env_parse("MATCHCAST_EWMA_LOOKBACK")
                .unwrap_or(d.ewma_lookback)
                .max(1),
            season_window: env_parse("MATCHCAST_SEASON_WINDOW")
                .unwrap_or(d.season_window)
                .max(1),
            rest_days_cap: env_parse("MATCHCAST_REST_DAYS_CAP")
                .unwrap_or(d.rest_days_cap)
                .max(1),
            ..d
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub history_path: PathBuf,
    pub artifact_dir: PathBuf,
    pub engine: EngineParams,
}

impl Config {
    /// Reads `.env.local` then `.env` (earlier files win) and the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");

        Self {
            history_path: opt_env("MATCHCAST_HISTORY")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_PATH)),
            artifact_dir: opt_env("MATCHCAST_ARTIFACTS")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_DIR)),
            engine: EngineParams::from_env(),
        }
    }
}

fn opt_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .and_then(|val| if val.trim().is_empty() { None } else { Some(val) })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    opt_env(key).and_then(|val| val.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_constants() {
        let p = EngineParams::default();
        assert_eq!(p.max_goals, 10);
        assert_eq!(p.ewma_span, 15.0);
        assert_eq!(p.ewma_lookback, 10);
        assert_eq!(p.season_window, 12);
        assert_eq!(p.rest_days_cap, 14);
        assert_eq!(p.rating_field, "elo");
    }

    #[test]
    fn unset_keys_fall_back() {
        assert_eq!(env_parse::<u32>("MATCHCAST_TEST_UNSET_KEY"), None);
        assert_eq!(opt_env("MATCHCAST_TEST_UNSET_KEY"), None);
    }
}
