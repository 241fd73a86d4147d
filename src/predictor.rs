use std::fmt;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::debug;

use crate::calibration::{self, BlendMode, BlendWeights, Outcome, Prob3};
use crate::config::{Config, EngineParams};
use crate::error::PredictError;
use crate::features::{FeatureSchema, FeatureVector, Fixture, build_features};
use crate::match_history::{HistoryView, MatchHistory, load_history};
use crate::models::{CLASS_COUNT, ModelArtifacts};
use crate::venue::{VenueModifiers, VenueVerdict};
use crate::win_prob;

pub const DRAW_LABEL: &str = "Draw";

const CLASS_ORDER: [Outcome; CLASS_COUNT] = [Outcome::Away, Outcome::Draw, Outcome::Home];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Scoreline {
    pub home: u32,
    pub away: u32,
}

impl Scoreline {
    /// Half-to-even rounding; negative or undefined goal counts become 0.
    pub fn from_expected(home: f64, away: f64) -> Self {
        let round = |v: f64| v.max(0.0).round_ties_even() as u32;
        Self {
            home: round(home),
            away: round(away),
        }
    }
}

impl fmt::Display for Scoreline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.home, self.away)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RawScoreline {
    pub home: f64,
    pub away: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub home_team: String,
    pub away_team: String,
    pub scoreline: Scoreline,
    pub raw_scoreline: RawScoreline,
    pub classifier_label: Outcome,
    pub classifier_confidence: f64,
    pub classifier_probs: Prob3,
    pub scoring_probs: Prob3,
    pub blended_probs: Prob3,
    pub predicted_winner: String,
    pub mode: BlendMode,
    pub temperature: f64,
    pub weights: BlendWeights,
    pub venue: VenueModifiers,
    pub home_rating: f64,
    pub away_rating: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VenueReport {
    pub home_team: String,
    pub away_team: String,
    pub home_rating: f64,
    pub away_rating: f64,
    pub venue: VenueModifiers,
    pub intensity_gap: f64,
    pub verdict: VenueVerdict,
}

/// Orchestrates one prediction over shared, read-only history and models.
#[derive(Debug, Clone)]
pub struct Predictor {
    history: Arc<MatchHistory>,
    schema: Arc<FeatureSchema>,
    artifacts: Arc<ModelArtifacts>,
    params: EngineParams,
}

impl Predictor {
    /// Fails when the models disagree with the feature list, or when a feature
    /// has no way of being computed from the stored columns.
    pub fn new(
        history: Arc<MatchHistory>,
        schema: Arc<FeatureSchema>,
        artifacts: Arc<ModelArtifacts>,
        params: EngineParams,
    ) -> Result<Self, PredictError> {
        if artifacts.n_features() != schema.len() {
            return Err(PredictError::ArtifactsUnavailable(format!(
                "models expect {} features, feature list has {}",
                artifacts.n_features(),
                schema.len()
            )));
        }
        schema.validate_against(history.columns())?;
        Ok(Self {
            history,
            schema,
            artifacts,
            params,
        })
    }

    pub fn load(config: &Config) -> Result<Self, PredictError> {
        let history = load_history(&config.history_path).map_err(PredictError::unavailable)?;
        let (schema, artifacts) =
            ModelArtifacts::load_dir(&config.artifact_dir).map_err(PredictError::unavailable)?;
        Self::new(
            Arc::new(history),
            Arc::new(schema),
            Arc::new(artifacts),
            config.engine.clone(),
        )
    }

    pub fn history(&self) -> &MatchHistory {
        &self.history
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    pub fn list_teams(&self) -> Vec<String> {
        self.history.list_teams()
    }

    /// Live prediction: every stored match counts as history, rest measured to now.
    pub fn predict(&self, home_team: &str, away_team: &str) -> Result<PredictionResult, PredictError> {
        self.predict_in(&self.history.view(), home_team, away_team, wall_clock_now())
    }

    /// Prediction as it would have been made at `as_of`, from strictly earlier matches only.
    pub fn predict_at(
        &self,
        home_team: &str,
        away_team: &str,
        as_of: NaiveDateTime,
    ) -> Result<PredictionResult, PredictError> {
        self.predict_in(&self.history.view_before(as_of), home_team, away_team, as_of)
    }

    pub fn features_at(
        &self,
        home_team: &str,
        away_team: &str,
        as_of: NaiveDateTime,
    ) -> Result<FeatureVector<'_>, PredictError> {
        let view = self.history.view_before(as_of);
        let fixture = Fixture::resolve(&view, home_team, away_team, &self.params)?;
        Ok(build_features(&self.schema, &view, &fixture, as_of, &self.params))
    }

    pub fn venue_report(&self, home_team: &str, away_team: &str) -> Result<VenueReport, PredictError> {
        let view = self.history.view();
        let fixture = Fixture::resolve(&view, home_team, away_team, &self.params)?;
        let venue = fixture.venue();
        let intensity_gap = venue.home / venue.away;
        Ok(VenueReport {
            home_team: home_team.to_string(),
            away_team: away_team.to_string(),
            home_rating: fixture.home_rating,
            away_rating: fixture.away_rating,
            venue,
            intensity_gap,
            verdict: VenueVerdict::from_intensity_gap(intensity_gap),
        })
    }

    fn predict_in(
        &self,
        view: &HistoryView<'_>,
        home_team: &str,
        away_team: &str,
        as_of: NaiveDateTime,
    ) -> Result<PredictionResult, PredictError> {
        let fixture = Fixture::resolve(view, home_team, away_team, &self.params)?;
        let features = build_features(&self.schema, view, &fixture, as_of, &self.params);
        let scaled = self.artifacts.scale(features.values());

        let class_probs = self.artifacts.classify(&scaled);
        let (classifier_label, classifier_confidence) = class_argmax(class_probs);
        let classifier_probs = Prob3::from_class_order(class_probs);

        let (home_xg, away_xg) = self.artifacts.expected_goals(&scaled);
        let scoring_probs =
            win_prob::outcome_probs(home_xg.max(0.0), away_xg.max(0.0), self.params.max_goals);

        let plan = calibration::select_blend(fixture.home_rating, fixture.away_rating);
        debug!(
            home = home_team,
            away = away_team,
            home_rating = fixture.home_rating,
            away_rating = fixture.away_rating,
            mode = ?plan.mode,
            classifier_weight = plan.weights.classifier,
            temperature = plan.temperature,
            "blend plan"
        );
        let blended_probs = calibration::blend_and_sharpen(classifier_probs, scoring_probs, &plan);

        let predicted_winner = match calibration::argmax(blended_probs) {
            Outcome::Home => home_team.to_string(),
            Outcome::Away => away_team.to_string(),
            Outcome::Draw => DRAW_LABEL.to_string(),
        };

        Ok(PredictionResult {
            home_team: home_team.to_string(),
            away_team: away_team.to_string(),
            scoreline: Scoreline::from_expected(home_xg, away_xg),
            raw_scoreline: RawScoreline {
                home: home_xg,
                away: away_xg,
            },
            classifier_label,
            classifier_confidence,
            classifier_probs,
            scoring_probs,
            blended_probs,
            predicted_winner,
            mode: plan.mode,
            temperature: plan.temperature,
            weights: plan.weights,
            venue: fixture.venue(),
            home_rating: fixture.home_rating,
            away_rating: fixture.away_rating,
        })
    }
}

/// Current local wall-clock time, the same clock stored kickoff times are kept in.
pub fn wall_clock_now() -> NaiveDateTime {
    Local::now().naive_local()
}

// Earliest class wins ties.
fn class_argmax(p: [f64; CLASS_COUNT]) -> (Outcome, f64) {
    let mut best = 0;
    for idx in 1..CLASS_COUNT {
        if p[idx] > p[best] {
            best = idx;
        }
    }
    (CLASS_ORDER[best], p[best])
}

/// Init-once holder for the process-wide [`Predictor`].
///
/// Concurrent first callers run the loader once; everyone else blocks until it
/// finishes and then shares the result.
#[derive(Debug, Default)]
pub struct PredictionService {
    predictor: OnceCell<Predictor>,
}

impl PredictionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_with<F>(&self, load: F) -> Result<&Predictor, PredictError>
    where
        F: FnOnce() -> Result<Predictor, PredictError>,
    {
        self.predictor.get_or_try_init(load)
    }

    pub fn init_from_config(&self, config: &Config) -> Result<&Predictor, PredictError> {
        self.init_with(|| Predictor::load(config))
    }

    pub fn is_ready(&self) -> bool {
        self.predictor.get().is_some()
    }

    pub fn predictor(&self) -> Result<&Predictor, PredictError> {
        self.predictor.get().ok_or(PredictError::ModelsNotLoaded)
    }

    pub fn predict(&self, home_team: &str, away_team: &str) -> Result<PredictionResult, PredictError> {
        self.predictor()?.predict(home_team, away_team)
    }

    pub fn list_teams(&self) -> Result<Vec<String>, PredictError> {
        Ok(self.predictor()?.list_teams())
    }
}
