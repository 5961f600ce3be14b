use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calibration::{Outcome, Prob3};
use crate::gate::SignalTier;
use crate::sport::Sport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Upcoming,
    Live,
    Finished,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Upcoming => "upcoming",
            MatchStatus::Live => "live",
            MatchStatus::Finished => "finished",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "upcoming" | "scheduled" => Some(MatchStatus::Upcoming),
            "live" => Some(MatchStatus::Live),
            "finished" | "ft" => Some(MatchStatus::Finished),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub team1: u32,
    pub team2: u32,
}

/// Decimal (European) odds per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketOdds {
    #[serde(default)]
    pub team1: Option<f64>,
    #[serde(default)]
    pub draw: Option<f64>,
    #[serde(default)]
    pub team2: Option<f64>,
}

impl MarketOdds {
    /// Returns the price only when it is a usable decimal multiplier.
    pub fn price(&self, outcome: Outcome) -> Option<f64> {
        let raw = match outcome {
            Outcome::Team1 => self.team1,
            Outcome::Draw => self.draw,
            Outcome::Team2 => self.team2,
        }?;
        (raw.is_finite() && raw > 1.0).then_some(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamResult {
    Win,
    Draw,
    Loss,
}

impl TeamResult {
    pub fn points(self) -> f64 {
        match self {
            TeamResult::Win => 3.0,
            TeamResult::Draw => 1.0,
            TeamResult::Loss => 0.0,
        }
    }

    pub fn signed(self) -> f64 {
        match self {
            TeamResult::Win => 1.0,
            TeamResult::Draw => 0.0,
            TeamResult::Loss => -1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: String,
    pub sport: Sport,
    pub team1: String,
    pub team2: String,
    #[serde(default)]
    pub tournament: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: MatchStatus,
    #[serde(default)]
    pub score: Option<Score>,
    #[serde(default)]
    pub odds: MarketOdds,
}

/// Case-insensitive team identity.
pub fn team_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl MatchRecord {
    pub fn is_team1(&self, team: &str) -> bool {
        team_key(&self.team1) == team_key(team)
    }

    pub fn is_team2(&self, team: &str) -> bool {
        team_key(&self.team2) == team_key(team)
    }

    pub fn involves(&self, team: &str) -> bool {
        self.is_team1(team) || self.is_team2(team)
    }

    pub fn opponent_of(&self, team: &str) -> Option<&str> {
        if self.is_team1(team) {
            Some(&self.team2)
        } else if self.is_team2(team) {
            Some(&self.team1)
        } else {
            None
        }
    }

    /// Finished with a known score; the only records that count as history.
    pub fn is_settled(&self) -> bool {
        self.status == MatchStatus::Finished && self.score.is_some()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        if self.status != MatchStatus::Finished {
            return None;
        }
        let s = self.score?;
        Some(crate::calibration::classify_outcome(
            s.team1 as i64,
            s.team2 as i64,
        ))
    }

    pub fn result_for(&self, team: &str) -> Option<TeamResult> {
        let outcome = self.outcome()?;
        let side = if self.is_team1(team) {
            Outcome::Team1
        } else if self.is_team2(team) {
            Outcome::Team2
        } else {
            return None;
        };
        Some(if outcome == Outcome::Draw {
            TeamResult::Draw
        } else if outcome == side {
            TeamResult::Win
        } else {
            TeamResult::Loss
        })
    }

    pub fn score_for(&self, team: &str) -> Option<u32> {
        let s = self.score?;
        if self.is_team1(team) {
            Some(s.team1)
        } else if self.is_team2(team) {
            Some(s.team2)
        } else {
            None
        }
    }

    pub fn score_against(&self, team: &str) -> Option<u32> {
        let s = self.score?;
        if self.is_team1(team) {
            Some(s.team2)
        } else if self.is_team2(team) {
            Some(s.team1)
        } else {
            None
        }
    }

    /// Price the market offered on `team` winning.
    pub fn odds_for_team(&self, team: &str) -> Option<f64> {
        if self.is_team1(team) {
            self.odds.price(Outcome::Team1)
        } else if self.is_team2(team) {
            self.odds.price(Outcome::Team2)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMethod {
    Ensemble,
    RuleBased,
}

impl PredictionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PredictionMethod::Ensemble => "ensemble",
            PredictionMethod::RuleBased => "rule_based",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "ensemble" => Some(PredictionMethod::Ensemble),
            "rule_based" => Some(PredictionMethod::RuleBased),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub match_id: String,
    pub outcome: Outcome,
    pub probabilities: Prob3,
    pub confidence: f64,
    pub method: PredictionMethod,
    /// Which ensemble (fingerprint + training time) or heuristic produced it.
    pub model_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Option<i64>,
    pub match_id: String,
    pub sport: Sport,
    pub team1: String,
    pub team2: String,
    pub outcome: Outcome,
    pub confidence: f64,
    pub expected_value: f64,
    pub odds: Option<f64>,
    pub tier: SignalTier,
    pub method: PredictionMethod,
    pub channel: String,
    pub created_at: DateTime<Utc>,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
}

impl Signal {
    pub fn pick_label(&self) -> &str {
        match self.outcome {
            Outcome::Team1 => &self.team1,
            Outcome::Team2 => &self.team2,
            Outcome::Draw => "Draw",
        }
    }

    /// Sets the published flag. Returns false if it was already set.
    pub fn mark_published(&mut self, at: DateTime<Utc>) -> bool {
        if self.published {
            return false;
        }
        self.published = true;
        self.published_at = Some(at);
        true
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} vs {}: {} @ {} conf={:.0}% ev={:+.3} ({})",
            self.sport,
            self.team1,
            self.team2,
            self.pick_label(),
            self.odds
                .map(|o| format!("{o:.2}"))
                .unwrap_or_else(|| "n/a".to_string()),
            self.confidence * 100.0,
            self.expected_value,
            self.tier.as_str(),
        )
    }
}
