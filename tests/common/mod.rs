#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use matchcast::config::EngineParams;
use matchcast::features::FeatureSchema;
use matchcast::match_history::{MatchHistory, MatchRecord};
use matchcast::models::{
    ClassifierModel, LinearRegressor, ModelArtifacts, RegressorModel, SoftmaxClassifier,
};
use matchcast::predictor::Predictor;

pub const FEATURES: [&str; 8] = [
    "expected_goals_Diff",
    "possession_Diff",
    "Elo_Gap_Diff",
    "Rest_Days_Diff",
    "HT_Home_Comfort",
    "AT_Away_Resilience",
    "SoS_Ratio",
    "Elo_Symmetry",
];

pub fn day(offset: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 6)
        .unwrap()
        .and_hms_opt(15, 0, 0)
        .unwrap()
        + Duration::days(offset)
}

pub fn schema() -> FeatureSchema {
    FeatureSchema::new(FEATURES.iter().map(|s| s.to_string()).collect()).unwrap()
}

/// Classifier leaning on the rating gap and xg form; regressors with a fixed home edge.
pub fn artifacts() -> ModelArtifacts {
    let mut home_row = vec![0.0; FEATURES.len()];
    home_row[0] = 0.8;
    home_row[2] = 0.004;
    let away_row = home_row.iter().map(|w| -w).collect::<Vec<_>>();
    let classifier = ClassifierModel::Softmax(SoftmaxClassifier {
        coefficients: vec![away_row, vec![0.0; FEATURES.len()], home_row],
        intercepts: vec![-0.1, -0.2, 0.15],
    });

    let mut home_coef = vec![0.0; FEATURES.len()];
    home_coef[0] = 0.35;
    home_coef[2] = 0.002;
    let away_coef = home_coef.iter().map(|w| -w).collect::<Vec<_>>();
    let home = RegressorModel::Linear(LinearRegressor {
        coefficients: home_coef,
        intercept: 1.45,
    });
    let away = RegressorModel::Linear(LinearRegressor {
        coefficients: away_coef,
        intercept: 1.15,
    });

    ModelArtifacts::new(
        FEATURES.len(),
        Box::new(classifier),
        Box::new(home),
        Box::new(away),
        None,
    )
    .unwrap()
}

pub struct Side<'a> {
    pub team: &'a str,
    pub elo: f64,
    pub xg: f64,
    pub possession: f64,
    pub goals: f64,
}

pub fn fixture(date: NaiveDateTime, home: &Side<'_>, away: &Side<'_>) -> MatchRecord {
    MatchRecord::new(date, home.team, away.team)
        .with_number("HT_elo", home.elo)
        .with_number("AT_elo", away.elo)
        .with_number("HT_expected_goals", home.xg)
        .with_number("AT_expected_goals", away.xg)
        .with_number("HT_possession", home.possession)
        .with_number("AT_possession", away.possession)
        .with_number("HT_Avg_Opponent_Elo_L5", 1600.0)
        .with_number("AT_Avg_Opponent_Elo_L5", 1600.0)
        .with_number("FTHG", home.goals)
        .with_number("FTAG", away.goals)
}

fn side(team: &str, elo: f64) -> Side<'_> {
    let strength = (elo - 1500.0) / 500.0;
    Side {
        team,
        elo,
        xg: 1.0 + strength,
        possession: 45.0 + 10.0 * strength,
        goals: (1.0 + strength).round(),
    }
}

/// Four clubs playing a double round robin, one round a week.
pub fn league_history() -> MatchHistory {
    let clubs = [
        ("Albion", 1960.0),
        ("Borough", 1900.0),
        ("County", 1620.0),
        ("Dynamo", 1500.0),
    ];
    let rounds: [[(usize, usize); 2]; 6] = [
        [(0, 1), (2, 3)],
        [(0, 2), (1, 3)],
        [(0, 3), (1, 2)],
        [(1, 0), (3, 2)],
        [(2, 0), (3, 1)],
        [(3, 0), (2, 1)],
    ];
    let mut records = Vec::new();
    for (week, round) in rounds.iter().enumerate() {
        for &(h, a) in round {
            let home = side(clubs[h].0, clubs[h].1);
            let away = side(clubs[a].0, clubs[a].1);
            records.push(fixture(day(7 * week as i64), &home, &away));
        }
    }
    MatchHistory::from_records(records)
}

pub fn predictor_for(history: MatchHistory) -> Predictor {
    Predictor::new(
        Arc::new(history),
        Arc::new(schema()),
        Arc::new(artifacts()),
        EngineParams::default(),
    )
    .unwrap()
}
