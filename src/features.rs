use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDateTime;

use crate::config::EngineParams;
use crate::error::PredictError;
use crate::match_history::{AWAY_PREFIX, Cell, HOME_PREFIX, HistoryView, TeamRow};
use crate::venue::{VenueModifiers, venue_modifiers};

pub const DEFAULT_RATING: f64 = 1500.0;
const DIFF_SUFFIX: &str = "_Diff";
const SYMMETRY_SCALE: f64 = 50.0;

const VENUE_SENSITIVE: &[&str] = &[
    "touches_in_opposition_box",
    "expected_goals",
    "big_chances",
    "possession",
];

pub const SOS_RATIO: &str = "SoS_Ratio";
pub const ELO_GAP_DIFF: &str = "Elo_Gap_Diff";
pub const ELO_GAP_ABSOLUTE: &str = "Elo_Gap_Absolute";
pub const ELO_SYMMETRY: &str = "Elo_Symmetry";
pub const HOME_SEASON_BASE: &str = "HT_xG_Season_Base";
pub const AWAY_SEASON_BASE: &str = "AT_xG_Season_Base";
pub const SEASON_CLASS_DIFF: &str = "Season_Class_Diff";
pub const REST_DAYS_DIFF: &str = "Rest_Days_Diff";
pub const QUALITY_INDEX_DIFF: &str = "Quality_Index_Diff";
pub const HOME_COMFORT: &str = "HT_Home_Comfort";
pub const AWAY_RESILIENCE: &str = "AT_Away_Resilience";

/// Features the builder computes itself instead of reading from stored columns.
pub const DERIVED_FEATURES: &[&str] = &[
    SOS_RATIO,
    ELO_GAP_DIFF,
    ELO_GAP_ABSOLUTE,
    ELO_SYMMETRY,
    HOME_SEASON_BASE,
    AWAY_SEASON_BASE,
    SEASON_CLASS_DIFF,
    REST_DAYS_DIFF,
    QUALITY_INDEX_DIFF,
    HOME_COMFORT,
    AWAY_RESILIENCE,
];

/// The ordered feature names the models were fitted on.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl FeatureSchema {
    pub fn new(names: Vec<String>) -> Result<Self, PredictError> {
        if names.is_empty() {
            return Err(PredictError::ArtifactsUnavailable(
                "feature list is empty".to_string(),
            ));
        }
        let mut index = HashMap::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            if index.insert(name.clone(), idx).is_some() {
                return Err(PredictError::ArtifactsUnavailable(format!(
                    "duplicate feature name {name:?}"
                )));
            }
        }
        Ok(Self { names, index })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Distinct `<base>` names of every `<base>_Diff` feature, sorted.
    pub fn diff_bases(&self) -> Vec<&str> {
        let bases = self
            .names
            .iter()
            .filter_map(|name| name.strip_suffix(DIFF_SUFFIX))
            .collect::<BTreeSet<_>>();
        bases.into_iter().collect()
    }

    pub fn static_names(&self) -> impl Iterator<Item = &str> {
        self.names
            .iter()
            .map(String::as_str)
            .filter(|name| !name.ends_with(DIFF_SUFFIX))
    }

    /// Every feature must be derivable or backed by stored columns.
    pub fn validate_against(&self, columns: &BTreeSet<String>) -> Result<(), PredictError> {
        let missing = self
            .names
            .iter()
            .filter(|name| !has_computation_path(name, columns))
            .cloned()
            .collect::<Vec<_>>();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PredictError::SchemaMismatch { missing })
        }
    }
}

fn has_computation_path(name: &str, columns: &BTreeSet<String>) -> bool {
    if DERIVED_FEATURES.contains(&name) {
        return true;
    }
    match name.strip_suffix(DIFF_SUFFIX) {
        Some(base) => {
            columns.contains(&format!("{HOME_PREFIX}{base}"))
                && columns.contains(&format!("{AWAY_PREFIX}{base}"))
        }
        None => {
            columns.contains(name)
                || columns.contains(&format!("{HOME_PREFIX}{name}"))
                || columns.contains(&format!("{AWAY_PREFIX}{name}"))
        }
    }
}

/// Dense row in schema order; every key exists from construction on.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector<'s> {
    schema: &'s FeatureSchema,
    values: Vec<f64>,
}

impl<'s> FeatureVector<'s> {
    pub fn zeros(schema: &'s FeatureSchema) -> Self {
        Self {
            schema,
            values: vec![0.0; schema.len()],
        }
    }

    /// Names outside the schema are dropped.
    pub fn set(&mut self, name: &str, value: f64) -> bool {
        match self.schema.index_of(name) {
            Some(idx) => {
                self.values[idx] = value;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema.index_of(name).map(|idx| self.values[idx])
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.schema
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    fn sanitize(&mut self) {
        for v in &mut self.values {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
    }
}

/// Latest rows and ratings of both sides, resolved once per request.
#[derive(Debug, Clone, Copy)]
pub struct Fixture<'a> {
    pub home: TeamRow<'a>,
    pub away: TeamRow<'a>,
    pub home_rating: f64,
    pub away_rating: f64,
}

impl<'a> Fixture<'a> {
    pub fn resolve(
        view: &HistoryView<'a>,
        home_team: &str,
        away_team: &str,
        params: &EngineParams,
    ) -> Result<Self, PredictError> {
        let home = view.latest(home_team)?;
        let away = view.latest(away_team)?;
        Ok(Self {
            home,
            away,
            home_rating: row_rating(&home, &params.rating_field),
            away_rating: row_rating(&away, &params.rating_field),
        })
    }

    pub fn venue(&self) -> VenueModifiers {
        venue_modifiers(self.home_rating, self.away_rating)
    }
}

fn row_rating(row: &TeamRow<'_>, field: &str) -> f64 {
    row.own_number(field).unwrap_or(DEFAULT_RATING)
}

pub fn is_venue_sensitive(base: &str) -> bool {
    VENUE_SENSITIVE
        .iter()
        .any(|sensitive| sensitive.eq_ignore_ascii_case(base))
}

pub fn build_features<'s>(
    schema: &'s FeatureSchema,
    view: &HistoryView<'_>,
    fixture: &Fixture<'_>,
    as_of: NaiveDateTime,
    params: &EngineParams,
) -> FeatureVector<'s> {
    let home_team = fixture.home.team();
    let away_team = fixture.away.team();
    let mut features = FeatureVector::zeros(schema);

    let venue = fixture.venue();
    let home_boost = quality_boost(fixture.home_rating);
    let away_boost = quality_boost(fixture.away_rating);

    let home_opp = fixture
        .home
        .own_number(&params.opponent_rating_field)
        .unwrap_or(DEFAULT_RATING);
    let away_opp = fixture
        .away
        .own_number(&params.opponent_rating_field)
        .unwrap_or(DEFAULT_RATING);
    let sos_ratio = if away_opp > 0.0 {
        home_opp / away_opp
    } else {
        1.0
    };

    for base in schema.diff_bases() {
        let h = view.ewma(home_team, base, params.ewma_span, params.ewma_lookback);
        let a = view.ewma(away_team, base, params.ewma_span, params.ewma_lookback);
        let diff = if is_venue_sensitive(base) {
            (h * venue.home - a * venue.away) * sos_ratio * (home_boost / away_boost)
        } else {
            h - a
        };
        features.set(&format!("{base}{DIFF_SUFFIX}"), diff);
    }

    features.set(HOME_COMFORT, venue.home);
    features.set(AWAY_RESILIENCE, venue.away);

    for name in schema.static_names() {
        if features.get(name) != Some(0.0) {
            continue;
        }
        features.set(name, static_value(&fixture.home, &fixture.away, name));
    }

    let gap = fixture.home_rating - fixture.away_rating;
    features.set(SOS_RATIO, sos_ratio);
    features.set(ELO_GAP_DIFF, gap);
    features.set(ELO_GAP_ABSOLUTE, gap.abs());
    features.set(ELO_SYMMETRY, (-gap.abs() / SYMMETRY_SCALE).exp());

    let home_base = view.trailing_mean(home_team, &params.scoring_field, params.season_window);
    let away_base = view.trailing_mean(away_team, &params.scoring_field, params.season_window);
    features.set(HOME_SEASON_BASE, home_base);
    features.set(AWAY_SEASON_BASE, away_base);
    features.set(SEASON_CLASS_DIFF, home_base - away_base);

    let rest_home = rest_days(fixture.home.date(), as_of, params.rest_days_cap);
    let rest_away = rest_days(fixture.away.date(), as_of, params.rest_days_cap);
    features.set(REST_DAYS_DIFF, rest_home - rest_away);

    let quality = features
        .get(&format!("{}{DIFF_SUFFIX}", params.scoring_field))
        .unwrap_or(0.0);
    features.set(QUALITY_INDEX_DIFF, quality);

    features.sanitize();
    features
}

fn quality_boost(rating: f64) -> f64 {
    1.0 + (rating - DEFAULT_RATING).max(0.0) / 1000.0
}

fn rest_days(last_played: NaiveDateTime, as_of: NaiveDateTime, cap: i64) -> f64 {
    (as_of - last_played).num_days().min(cap) as f64
}

// Missing lookups count as a numeric zero; text on either side falls back
// to the home value as a shared context field.
fn static_value(home: &TeamRow<'_>, away: &TeamRow<'_>, name: &str) -> f64 {
    let zero = Cell::Number(0.0);
    let h = home.lookup(name).unwrap_or(&zero);
    let a = away.lookup(name).unwrap_or(&zero);
    match (h, a) {
        (Cell::Number(h), Cell::Number(a)) => h - a,
        (h, _) => h.as_f64().unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_history::{MatchHistory, MatchRecord};
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn schema(names: &[&str]) -> FeatureSchema {
        FeatureSchema::new(names.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    fn history() -> MatchHistory {
        MatchHistory::from_records(vec![
            MatchRecord::new(day(1), "Lyon", "Nice")
                .with_number("HT_elo", 1600.0)
                .with_number("AT_elo", 1550.0)
                .with_number("HT_shots", 10.0)
                .with_number("AT_shots", 6.0)
                .with_number("HT_possession", 55.0)
                .with_number("AT_possession", 45.0)
                .with_number("HT_expected_goals", 1.5)
                .with_number("AT_expected_goals", 0.9)
                .with_number("HT_Avg_Opponent_Elo_L5", 1500.0)
                .with_number("AT_Avg_Opponent_Elo_L5", 1600.0)
                .with_number("HT_squad_value", 300.0)
                .with_number("AT_squad_value", 120.0)
                .with_text("League", "F1"),
            MatchRecord::new(day(8), "Nice", "Brest")
                .with_number("HT_elo", 1560.0)
                .with_number("AT_elo", 1480.0)
                .with_number("HT_shots", 12.0)
                .with_number("AT_shots", 8.0)
                .with_number("HT_possession", 50.0)
                .with_number("AT_possession", 50.0)
                .with_number("HT_expected_goals", 1.2)
                .with_number("AT_expected_goals", 1.0)
                .with_number("HT_Avg_Opponent_Elo_L5", 1500.0)
                .with_number("AT_Avg_Opponent_Elo_L5", 1500.0)
                .with_number("HT_squad_value", 150.0)
                .with_number("AT_squad_value", 90.0)
                .with_text("League", "F1"),
        ])
    }

    fn params() -> EngineParams {
        EngineParams::default()
    }

    #[test]
    fn schema_rejects_duplicates() {
        let err = FeatureSchema::new(vec!["a".into(), "a".into()]).unwrap_err();
        assert!(matches!(err, PredictError::ArtifactsUnavailable(_)));
    }

    #[test]
    fn validation_reports_unbacked_features() {
        let history = history();
        let s = schema(&["shots_Diff", "corners_Diff", "League", "Elo_Gap_Diff", "Mystery"]);
        match s.validate_against(history.columns()) {
            Err(PredictError::SchemaMismatch { missing }) => {
                assert_eq!(missing, vec!["corners_Diff", "Mystery"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        let ok = schema(&["shots_Diff", "squad_value", "SoS_Ratio"]);
        assert!(ok.validate_against(history.columns()).is_ok());
    }

    #[test]
    fn builds_every_schema_key_in_order() {
        let history = history();
        let s = schema(&[
            "shots_Diff",
            "possession_Diff",
            "squad_value",
            "League",
            "HT_Home_Comfort",
            "AT_Away_Resilience",
            "Elo_Gap_Diff",
            "Elo_Symmetry",
            "SoS_Ratio",
            "Rest_Days_Diff",
            "Quality_Index_Diff",
            "Season_Class_Diff",
        ]);
        let view = history.view();
        let fixture = Fixture::resolve(&view, "Lyon", "Nice", &params()).unwrap();
        assert_eq!(fixture.home_rating, 1600.0);
        assert_eq!(fixture.away_rating, 1560.0);

        let f = build_features(&s, &view, &fixture, day(15), &params());
        assert_eq!(f.values().len(), s.len());
        let names = f.iter().map(|(n, _)| n).collect::<Vec<_>>();
        assert_eq!(names, s.names());

        // Lyon shot 10 as home; Nice 6 as away then 12 as home.
        let nice = (6.0 * (1.0 - 2.0 / 16.0) + 12.0) / (1.0 - 2.0 / 16.0 + 1.0);
        assert!((f.get("shots_Diff").unwrap() - (10.0 - nice)).abs() < 1e-9);

        // Lyon's latest row has it at home, Nice's latest row at home too.
        assert_eq!(f.get("squad_value"), Some(150.0));
        assert_eq!(f.get("League"), Some(0.0));
        assert_eq!(f.get("HT_Home_Comfort"), Some(1.0));
        assert_eq!(f.get("AT_Away_Resilience"), Some(1.0));
        assert_eq!(f.get("Elo_Gap_Diff"), Some(40.0));
        assert!((f.get("Elo_Symmetry").unwrap() - (-0.8f64).exp()).abs() < 1e-12);
        assert_eq!(f.get("SoS_Ratio"), Some(1.0));
        // 14 days capped at 14 vs 7 days.
        assert_eq!(f.get("Rest_Days_Diff"), Some(7.0));
        assert_eq!(f.get("Quality_Index_Diff"), Some(0.0));
    }

    #[test]
    fn venue_sensitive_diffs_are_scaled() {
        let history = history();
        let s = schema(&["possession_Diff", "expected_goals_Diff", "Quality_Index_Diff"]);
        let view = history.view();
        let fixture = Fixture::resolve(&view, "Lyon", "Nice", &params()).unwrap();
        let f = build_features(&s, &view, &fixture, day(15), &params());

        let w = 1.0 - 2.0 / 16.0;
        let nice_pos = (45.0 * w + 50.0) / (w + 1.0);
        let boost = (1.0 + 0.1) / (1.0 + 0.06);
        let expected = (55.0 - nice_pos) * boost;
        assert!((f.get("possession_Diff").unwrap() - expected).abs() < 1e-9);
        assert_eq!(f.get("Quality_Index_Diff"), f.get("expected_goals_Diff"));
    }

    fn tiered_history(home_opp: Option<f64>, away_opp: Option<f64>) -> MatchHistory {
        let mut record = MatchRecord::new(day(1), "Monaco", "Lens")
            .with_number("HT_elo", 1900.0)
            .with_number("AT_elo", 1700.0)
            .with_number("HT_possession", 55.0)
            .with_number("AT_possession", 45.0)
            .with_number("HT_shots", 9.0)
            .with_number("AT_shots", 4.0);
        if let Some(v) = home_opp {
            record = record.with_number("HT_Avg_Opponent_Elo_L5", v);
        }
        if let Some(v) = away_opp {
            record = record.with_number("AT_Avg_Opponent_Elo_L5", v);
        }
        MatchHistory::from_records(vec![record])
    }

    fn tiered_features(history: &MatchHistory) -> Vec<(String, f64)> {
        let s = schema(&[
            "possession_Diff",
            "shots_Diff",
            "SoS_Ratio",
            "HT_Home_Comfort",
            "AT_Away_Resilience",
        ]);
        let view = history.view();
        let fixture = Fixture::resolve(&view, "Monaco", "Lens", &params()).unwrap();
        build_features(&s, &view, &fixture, day(8), &params())
            .iter()
            .map(|(n, v)| (n.to_string(), v))
            .collect()
    }

    fn value(features: &[(String, f64)], name: &str) -> f64 {
        features
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .unwrap()
    }

    #[test]
    fn venue_tier_and_schedule_scale_sensitive_diffs() {
        let history = tiered_history(Some(1650.0), Some(1500.0));
        let f = tiered_features(&history);

        // 1900 vs 1700 is a heavy mismatch with the home side stronger.
        assert_eq!(value(&f, "HT_Home_Comfort"), 1.0);
        assert_eq!(value(&f, "AT_Away_Resilience"), 0.95);
        let sos = 1650.0 / 1500.0;
        assert!((value(&f, "SoS_Ratio") - sos).abs() < 1e-12);

        let home_boost = 1.0 + 400.0 / 1000.0;
        let away_boost = 1.0 + 200.0 / 1000.0;
        let expected = (55.0 * 1.0 - 45.0 * 0.95) * sos * (home_boost / away_boost);
        assert!((value(&f, "possession_Diff") - expected).abs() < 1e-9);

        // Non-sensitive bases stay a plain difference.
        assert_eq!(value(&f, "shots_Diff"), 5.0);
    }

    #[test]
    fn schedule_ratio_defaults() {
        // A missing opponent rating reads as 1500.
        let f = tiered_features(&tiered_history(Some(1650.0), None));
        assert!((value(&f, "SoS_Ratio") - 1650.0 / 1500.0).abs() < 1e-12);
        let f = tiered_features(&tiered_history(None, Some(1200.0)));
        assert!((value(&f, "SoS_Ratio") - 1500.0 / 1200.0).abs() < 1e-12);

        // A non-positive away rating disables the ratio.
        let f = tiered_features(&tiered_history(Some(1650.0), Some(0.0)));
        assert_eq!(value(&f, "SoS_Ratio"), 1.0);
        let plain = (55.0 - 45.0 * 0.95) * (1.4 / 1.2);
        assert!((value(&f, "possession_Diff") - plain).abs() < 1e-9);
    }

    #[test]
    fn lookahead_rows_are_invisible() {
        let history = history();
        let s = schema(&["shots_Diff", "Rest_Days_Diff"]);
        let view = history.view_before(day(8));
        let fixture = Fixture::resolve(&view, "Lyon", "Nice", &params()).unwrap();
        assert_eq!(fixture.away_rating, 1550.0);
        let f = build_features(&s, &view, &fixture, day(8), &params());
        assert_eq!(f.get("shots_Diff"), Some(4.0));
        assert_eq!(f.get("Rest_Days_Diff"), Some(0.0));
        assert!(Fixture::resolve(&view, "Lyon", "Brest", &params()).is_err());
    }

    #[test]
    fn missing_rating_defaults() {
        let history = MatchHistory::from_records(vec![MatchRecord::new(day(2), "A", "B")]);
        let view = history.view();
        let fixture = Fixture::resolve(&view, "A", "B", &params()).unwrap();
        assert_eq!(fixture.home_rating, DEFAULT_RATING);
        assert_eq!(fixture.away_rating, DEFAULT_RATING);
    }

    #[test]
    fn venue_sensitivity_ignores_case() {
        assert!(is_venue_sensitive("Possession"));
        assert!(!is_venue_sensitive("shots"));
    }
}
