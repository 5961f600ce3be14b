use std::fmt;

use serde::{Deserialize, Serialize};

use crate::calibration::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    Cs2,
    Khl,
    Football,
    Tennis,
    Other,
}

impl Sport {
    pub const ALL: [Sport; 5] = [
        Sport::Cs2,
        Sport::Khl,
        Sport::Football,
        Sport::Tennis,
        Sport::Other,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Sport::Cs2 => "cs2",
            Sport::Khl => "khl",
            Sport::Football => "football",
            Sport::Tennis => "tennis",
            Sport::Other => "other",
        }
    }

    /// Unknown tags map to `Other` rather than failing ingestion.
    pub fn from_tag(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cs2" | "csgo" | "cs" => Sport::Cs2,
            "khl" | "hockey" => Sport::Khl,
            "football" | "soccer" => Sport::Football,
            "tennis" => Sport::Tennis,
            _ => Sport::Other,
        }
    }

    pub fn profile(self) -> &'static SportProfile {
        match self {
            Sport::Cs2 => &CS2,
            Sport::Khl => &KHL,
            Sport::Football => &FOOTBALL,
            Sport::Tennis => &TENNIS,
            Sport::Other => &OTHER,
        }
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Everything sport-dependent the pipeline needs to know.
#[derive(Debug)]
pub struct SportProfile {
    pub sport: Sport,
    pub outcomes: &'static [Outcome],
    /// Keyword buckets, checked top to bottom against the lowercased tournament name.
    pub importance_tiers: &'static [(&'static [&'static str], u8)],
}

const TWO_WAY: &[Outcome] = &[Outcome::Team1, Outcome::Team2];
const THREE_WAY: &[Outcome] = &[Outcome::Team1, Outcome::Draw, Outcome::Team2];

pub const UNRANKED_IMPORTANCE: u8 = 4;

static CS2: SportProfile = SportProfile {
    sport: Sport::Cs2,
    outcomes: TWO_WAY,
    importance_tiers: &[
        (&["major", "championship", "world"], 10),
        (&["blast premier", "iem", "esl pro league"], 9),
        (&["esl", "blast"], 8),
        (&["premier", "masters", "showdown"], 7),
        (&["cup", "trophy", "open"], 6),
        (&["qualifier", "qualification"], 5),
    ],
};

static KHL: SportProfile = SportProfile {
    sport: Sport::Khl,
    outcomes: THREE_WAY,
    importance_tiers: &[
        (&["gagarin cup final", "final", "финал"], 10),
        (&["playoff", "плей-офф"], 9),
        (&["all-star", "матч звезд"], 6),
        (&["regular", "регуляр"], 5),
    ],
};

static FOOTBALL: SportProfile = SportProfile {
    sport: Sport::Football,
    outcomes: THREE_WAY,
    importance_tiers: &[
        (&["world cup", "champions league", "final"], 10),
        (&["euro", "copa america", "europa league"], 9),
        (&["premier league", "la liga", "bundesliga", "serie a", "ligue 1"], 8),
        (&["league"], 7),
        (&["cup", "trophy"], 6),
        (&["qualif", "friendly"], 5),
    ],
};

static TENNIS: SportProfile = SportProfile {
    sport: Sport::Tennis,
    outcomes: TWO_WAY,
    importance_tiers: &[
        (&["grand slam", "wimbledon", "roland garros", "us open", "australian open"], 10),
        (&["masters", "finals"], 9),
        (&["500"], 8),
        (&["250"], 7),
        (&["challenger"], 6),
        (&["qualif", "itf"], 5),
    ],
};

static OTHER: SportProfile = SportProfile {
    sport: Sport::Other,
    outcomes: THREE_WAY,
    importance_tiers: &[
        (&["major", "championship", "world", "final"], 10),
        (&["playoff", "premier"], 8),
        (&["cup", "open"], 6),
        (&["qualifier"], 5),
    ],
};

impl SportProfile {
    pub fn supports_draw(&self) -> bool {
        self.outcomes.contains(&Outcome::Draw)
    }

    pub fn supports(&self, outcome: Outcome) -> bool {
        self.outcomes.contains(&outcome)
    }

    pub fn tournament_importance(&self, tournament: &str) -> u8 {
        let name = tournament.trim().to_lowercase();
        if name.is_empty() {
            return UNRANKED_IMPORTANCE;
        }
        for (keywords, score) in self.importance_tiers {
            if keywords.iter().any(|k| name.contains(k)) {
                return *score;
            }
        }
        UNRANKED_IMPORTANCE
    }

    pub fn default_channel(&self) -> String {
        format!("@signals_{}", self.sport.tag())
    }
}
