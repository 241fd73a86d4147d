use serde::Serialize;

pub const JUGGERNAUT_RATING: f64 = 2000.0;
pub const MISMATCH_GAP: f64 = 175.0;
pub const ELITE_RATING: f64 = 1875.0;
pub const GRIND_LINE: f64 = 1775.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VenueTier {
    Juggernaut,
    HeavyMismatch,
    EliteProtection,
    GrindZone,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VenueModifiers {
    pub tier: VenueTier,
    pub home: f64,
    pub away: f64,
}

pub struct VenueRule {
    pub tier: VenueTier,
    applies: fn(f64, f64) -> bool,
    modifiers: fn(f64, f64) -> (f64, f64),
}

/// Evaluated top to bottom; the first rule whose predicate holds decides both sides.
pub const VENUE_RULES: &[VenueRule] = &[
    VenueRule {
        tier: VenueTier::Juggernaut,
        applies: juggernaut_applies,
        modifiers: juggernaut_modifiers,
    },
    VenueRule {
        tier: VenueTier::HeavyMismatch,
        applies: mismatch_applies,
        modifiers: mismatch_modifiers,
    },
    VenueRule {
        tier: VenueTier::EliteProtection,
        applies: elite_applies,
        modifiers: elite_modifiers,
    },
    VenueRule {
        tier: VenueTier::GrindZone,
        applies: grind_applies,
        modifiers: grind_modifiers,
    },
];

fn juggernaut_applies(h: f64, a: f64) -> bool {
    h >= JUGGERNAUT_RATING || a >= JUGGERNAUT_RATING
}

fn juggernaut_modifiers(h: f64, a: f64) -> (f64, f64) {
    (
        if h >= JUGGERNAUT_RATING { 1.15 } else { 1.0 },
        if a >= JUGGERNAUT_RATING { 1.05 } else { 1.0 },
    )
}

fn mismatch_applies(h: f64, a: f64) -> bool {
    (h - a).abs() > MISMATCH_GAP
}

// Asymmetric: a big home favourite dampens the away side, a big away
// favourite gets a lift. There is no home-boost counterpart.
fn mismatch_modifiers(h: f64, a: f64) -> (f64, f64) {
    if h - a > MISMATCH_GAP {
        (1.0, 0.95)
    } else {
        (1.0, 1.05)
    }
}

// An elite away side alone also stops evaluation here, leaving both at 1.0.
fn elite_applies(h: f64, a: f64) -> bool {
    h > ELITE_RATING || a > ELITE_RATING
}

fn elite_modifiers(h: f64, _a: f64) -> (f64, f64) {
    (if h > ELITE_RATING { 1.05 } else { 1.0 }, 1.0)
}

fn grind_applies(h: f64, a: f64) -> bool {
    (h < GRIND_LINE && a > GRIND_LINE) || (a < GRIND_LINE && h > GRIND_LINE)
}

fn grind_modifiers(h: f64, a: f64) -> (f64, f64) {
    if h < GRIND_LINE && a > GRIND_LINE {
        (1.0, 1.05)
    } else {
        (1.0, 0.90)
    }
}

pub fn venue_modifiers(home_rating: f64, away_rating: f64) -> VenueModifiers {
    for rule in VENUE_RULES {
        if (rule.applies)(home_rating, away_rating) {
            let (home, away) = (rule.modifiers)(home_rating, away_rating);
            return VenueModifiers {
                tier: rule.tier,
                home,
                away,
            };
        }
    }
    VenueModifiers {
        tier: VenueTier::Neutral,
        home: 1.0,
        away: 1.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueVerdict {
    SignificantHomeAdvantage,
    SignificantAwayAdvantage,
    Balanced,
}

impl VenueVerdict {
    pub fn from_intensity_gap(gap: f64) -> Self {
        if gap > 1.10 {
            VenueVerdict::SignificantHomeAdvantage
        } else if gap < 0.95 {
            VenueVerdict::SignificantAwayAdvantage
        } else {
            VenueVerdict::Balanced
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VenueVerdict::SignificantHomeAdvantage => "significant home advantage",
            VenueVerdict::SignificantAwayAdvantage => "significant away advantage",
            VenueVerdict::Balanced => "balanced",
        }
    }
}
