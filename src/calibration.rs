use serde::Serialize;

pub const ELITE_RATING: f64 = 1875.0;
pub const MISMATCH_GAP: f64 = 150.0;
const PROB_FLOOR: f64 = 1e-9;

const OUTCOMES: [Outcome; 3] = [Outcome::Home, Outcome::Draw, Outcome::Away];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prob3 {
    #[serde(rename = "home_win")]
    pub home: f64,
    pub draw: f64,
    #[serde(rename = "away_win")]
    pub away: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

impl Prob3 {
    pub fn uniform() -> Self {
        Self {
            home: 1.0 / 3.0,
            draw: 1.0 / 3.0,
            away: 1.0 / 3.0,
        }
    }

    /// From a classifier row in `[away, draw, home]` order.
    pub fn from_class_order(p: [f64; 3]) -> Self {
        Self {
            home: p[2],
            draw: p[1],
            away: p[0],
        }
    }

    pub fn sum(&self) -> f64 {
        self.home + self.draw + self.away
    }

    pub fn get(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Home => self.home,
            Outcome::Draw => self.draw,
            Outcome::Away => self.away,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlendMode {
    Elite,
    Mismatch,
    Grind,
}

impl BlendMode {
    pub fn classifier_weight(self) -> f64 {
        match self {
            BlendMode::Mismatch => 0.45,
            BlendMode::Elite => 0.35,
            BlendMode::Grind => 0.55,
        }
    }

    pub fn temperature(self) -> f64 {
        match self {
            BlendMode::Elite => 0.8,
            BlendMode::Mismatch => 0.9,
            BlendMode::Grind => 0.7,
        }
    }
}

/// Temperature for an optional mode; a mode the policy does not know leaves the blend untouched.
pub fn temperature_for(mode: Option<BlendMode>) -> f64 {
    mode.map_or(1.0, BlendMode::temperature)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BlendWeights {
    pub classifier: f64,
    pub regression: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BlendPlan {
    pub mode: BlendMode,
    pub weights: BlendWeights,
    pub temperature: f64,
}

pub fn select_blend(home_rating: f64, away_rating: f64) -> BlendPlan {
    let mode = if (home_rating - away_rating).abs() > MISMATCH_GAP {
        BlendMode::Mismatch
    } else if home_rating > ELITE_RATING && away_rating > ELITE_RATING {
        BlendMode::Elite
    } else {
        BlendMode::Grind
    };
    let classifier = mode.classifier_weight();
    BlendPlan {
        mode,
        weights: BlendWeights {
            classifier,
            regression: 1.0 - classifier,
        },
        temperature: mode.temperature(),
    }
}

pub fn blend(classifier: Prob3, scoring: Prob3, weights: BlendWeights) -> Prob3 {
    Prob3 {
        home: classifier.home * weights.classifier + scoring.home * weights.regression,
        draw: classifier.draw * weights.classifier + scoring.draw * weights.regression,
        away: classifier.away * weights.classifier + scoring.away * weights.regression,
    }
}

/// Log-space rescale by `1 / temperature`, renormalised.
///
/// Inputs need not sum to one; the output always does.
pub fn sharpen(prob: Prob3, temperature: f64) -> Prob3 {
    let t = if temperature.is_finite() && temperature > 0.0 {
        temperature
    } else {
        1.0
    };
    let floor = |v: f64| (if v.is_finite() { v.max(0.0) } else { 0.0 }) + PROB_FLOOR;
    let lh = floor(prob.home).ln() / t;
    let ld = floor(prob.draw).ln() / t;
    let la = floor(prob.away).ln() / t;

    let mx = lh.max(ld.max(la));
    let eh = (lh - mx).exp();
    let ed = (ld - mx).exp();
    let ea = (la - mx).exp();
    let den = eh + ed + ea;
    if !den.is_finite() || den <= 0.0 {
        return Prob3::uniform();
    }

    Prob3 {
        home: eh / den,
        draw: ed / den,
        away: ea / den,
    }
}

pub fn blend_and_sharpen(classifier: Prob3, scoring: Prob3, plan: &BlendPlan) -> Prob3 {
    sharpen(blend(classifier, scoring, plan.weights), plan.temperature)
}

pub fn classify_outcome(home_goals: i32, away_goals: i32) -> Outcome {
    if home_goals > away_goals {
        Outcome::Home
    } else if home_goals < away_goals {
        Outcome::Away
    } else {
        Outcome::Draw
    }
}

/// Brier score, log-loss and argmax accuracy of `predictions` against what happened.
///
/// Mismatched or empty inputs score as zero samples.
pub fn evaluate_probs(predictions: &[Prob3], outcomes: &[Outcome]) -> Metrics {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return Metrics::default();
    }

    let mut metrics = Metrics {
        samples: predictions.len(),
        ..Metrics::default()
    };
    let mut hits = 0usize;
    for (p, &actual) in predictions.iter().zip(outcomes) {
        metrics.brier += OUTCOMES
            .iter()
            .map(|&o| {
                let y = if o == actual { 1.0 } else { 0.0 };
                (p.get(o) - y).powi(2)
            })
            .sum::<f64>();
        metrics.log_loss -= p.get(actual).clamp(1e-12, 1.0).ln();
        hits += usize::from(argmax(*p) == actual);
    }

    let n = metrics.samples as f64;
    metrics.brier /= n;
    metrics.log_loss /= n;
    metrics.accuracy = hits as f64 / n;
    metrics
}

/// Ties resolve in key order: home, then draw, then away.
///
/// A draw level with away (but above home) is reported as the draw; only a
/// home tie outranks it.
pub fn argmax(p: Prob3) -> Outcome {
    if p.home >= p.draw && p.home >= p.away {
        Outcome::Home
    } else if p.draw >= p.away {
        Outcome::Draw
    } else {
        Outcome::Away
    }
}
