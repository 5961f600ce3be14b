use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::calibration::{Outcome, Prob3};
use crate::domain::{MatchRecord, MarketOdds, team_key};
use crate::error::{PipelineError, Result};
use crate::head_to_head::HeadToHeadStats;
use crate::sport::SportProfile;
use crate::team_features::TeamFeatureSnapshot;

/// Column order of every feature vector. Models are trained against exactly
/// this layout; see [`schema_fingerprint`].
pub const FEATURE_NAMES: [&str; 38] = [
    "team1_win_rate",
    "team1_avg_scored",
    "team1_avg_conceded",
    "team1_recent_wins",
    "team1_recent_draws",
    "team1_recent_losses",
    "team1_momentum",
    "team1_consistency",
    "team1_strength_of_schedule",
    "team1_fatigue",
    "team1_form_trend",
    "team1_upset_rate",
    "team1_is_default",
    "team2_win_rate",
    "team2_avg_scored",
    "team2_avg_conceded",
    "team2_recent_wins",
    "team2_recent_draws",
    "team2_recent_losses",
    "team2_momentum",
    "team2_consistency",
    "team2_strength_of_schedule",
    "team2_fatigue",
    "team2_form_trend",
    "team2_upset_rate",
    "team2_is_default",
    "h2h_team1_win_rate",
    "h2h_team2_win_rate",
    "h2h_meetings",
    "h2h_avg_total_score",
    "implied_team1",
    "implied_draw",
    "implied_team2",
    "tournament_importance",
    "hours_until_kickoff",
    "is_weekend",
    "is_evening",
    "draw_supported",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

pub const IDX_TEAM1_WIN_RATE: usize = 0;
pub const IDX_TEAM2_WIN_RATE: usize = 13;
pub const IDX_IMPLIED_TEAM1: usize = 30;
pub const IDX_IMPLIED_DRAW: usize = 31;
pub const IDX_IMPLIED_TEAM2: usize = 32;

const EVENING_HOURS: std::ops::RangeInclusive<u32> = 18..=22;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn get(&self, idx: usize) -> f64 {
        self.values.get(idx).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Rejects vectors of the wrong width or with NaN/inf entries.
    pub fn validate(&self) -> Result<()> {
        if self.values.len() != FEATURE_COUNT {
            return Err(PipelineError::FeatureShape {
                expected: FEATURE_COUNT,
                got: self.values.len(),
            });
        }
        if let Some(index) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(PipelineError::NonFiniteFeature {
                index,
                name: FEATURE_NAMES[index],
            });
        }
        Ok(())
    }

    /// Market-implied distribution stored in the vector (all zero when the
    /// match had no usable odds).
    pub fn implied(&self) -> Prob3 {
        Prob3 {
            team1: self.get(IDX_IMPLIED_TEAM1),
            draw: self.get(IDX_IMPLIED_DRAW),
            team2: self.get(IDX_IMPLIED_TEAM2),
        }
    }
}

/// SHA-256 over the ordered column names.
pub fn schema_fingerprint() -> String {
    let mut hasher = Sha256::new();
    for name in FEATURE_NAMES {
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// `1/odds` over the priced outcomes the sport supports, rescaled to sum 1.
/// Unpriced or unsupported outcomes stay 0.
pub fn implied_probabilities(odds: &MarketOdds, profile: &SportProfile) -> Prob3 {
    let mut out = Prob3::zero();
    for outcome in profile.outcomes {
        if let Some(price) = odds.price(*outcome) {
            out.set(*outcome, 1.0 / price);
        }
    }
    let sum = out.sum();
    if sum <= 0.0 {
        return Prob3::zero();
    }
    Prob3 {
        team1: out.team1 / sum,
        draw: out.draw / sum,
        team2: out.team2 / sum,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchContext {
    pub tournament_importance: f64,
    pub hours_until_kickoff: f64,
    pub is_weekend: bool,
    pub is_evening: bool,
    pub draw_supported: bool,
}

impl MatchContext {
    pub fn of(m: &MatchRecord, now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let profile = m.sport.profile();
        let local = m.scheduled_at.with_timezone(&offset);
        let hours = (m.scheduled_at - now).num_hours() as f64;
        Self {
            tournament_importance: profile.tournament_importance(&m.tournament) as f64,
            hours_until_kickoff: hours.max(0.0),
            is_weekend: local.weekday().num_days_from_monday() >= 5,
            is_evening: EVENING_HOURS.contains(&local.hour()),
            draw_supported: profile.supports_draw(),
        }
    }
}

fn flag(v: bool) -> f64 {
    if v { 1.0 } else { 0.0 }
}

fn push_team(values: &mut Vec<f64>, s: &TeamFeatureSnapshot) {
    values.extend_from_slice(&[
        s.win_rate,
        s.avg_scored,
        s.avg_conceded,
        s.recent_wins as f64,
        s.recent_draws as f64,
        s.recent_losses as f64,
        s.momentum,
        s.consistency,
        s.strength_of_schedule,
        s.fatigue,
        s.form_trend,
        s.upset_rate,
        flag(s.is_default),
    ]);
}

/// Concatenates both snapshots, the H2H block (turned to face `m.team1`), the
/// implied market and the match context in `FEATURE_NAMES` order.
pub fn assemble(
    m: &MatchRecord,
    team1: &TeamFeatureSnapshot,
    team2: &TeamFeatureSnapshot,
    h2h: &HeadToHeadStats,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> FeatureVector {
    let h2h = if team_key(&h2h.team1) == team_key(&m.team1) {
        h2h.clone()
    } else {
        h2h.flipped()
    };
    let implied = implied_probabilities(&m.odds, m.sport.profile());
    let ctx = MatchContext::of(m, now, offset);

    let mut values = Vec::with_capacity(FEATURE_COUNT);
    push_team(&mut values, team1);
    push_team(&mut values, team2);
    values.extend_from_slice(&[
        h2h.team1_win_rate,
        h2h.team2_win_rate,
        h2h.meetings as f64,
        h2h.avg_total_score,
        implied.get(Outcome::Team1),
        implied.get(Outcome::Draw),
        implied.get(Outcome::Team2),
        ctx.tournament_importance,
        ctx.hours_until_kickoff,
        flag(ctx.is_weekend),
        flag(ctx.is_evening),
        flag(ctx.draw_supported),
    ]);
    FeatureVector { values }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MatchStatus;
    use crate::sport::Sport;
    use chrono::TimeZone;

    fn upcoming(sport: Sport, odds: MarketOdds) -> MatchRecord {
        MatchRecord {
            id: "u1".to_string(),
            sport,
            team1: "Alpha".to_string(),
            team2: "Beta".to_string(),
            tournament: "World Championship".to_string(),
            // Saturday 19:30 UTC
            scheduled_at: Utc.with_ymd_and_hms(2024, 6, 15, 19, 30, 0).unwrap(),
            status: MatchStatus::Upcoming,
            score: None,
            odds,
        }
    }

    #[test]
    fn implied_probabilities_are_renormalised() {
        let odds = MarketOdds {
            team1: Some(2.0),
            draw: Some(4.0),
            team2: Some(4.0),
        };
        let p = implied_probabilities(&odds, Sport::Football.profile());
        assert!((p.team1 - 0.5).abs() < 1e-12);
        assert!((p.draw - 0.25).abs() < 1e-12);
        assert!((p.sum() - 1.0).abs() < 1e-12);

        let two_way = implied_probabilities(&odds, Sport::Cs2.profile());
        assert_eq!(two_way.draw, 0.0);
        assert!((two_way.team1 - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn vector_width_is_fixed_for_every_sport() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 9, 30, 0).unwrap();
        for sport in Sport::ALL {
            let m = upcoming(sport, MarketOdds::default());
            let t1 = TeamFeatureSnapshot::neutral("Alpha", sport, now);
            let t2 = TeamFeatureSnapshot::neutral("Beta", sport, now);
            let h = HeadToHeadStats::neutral("Beta", "Alpha", sport, now);
            let v = assemble(&m, &t1, &t2, &h, now, crate::config::utc());
            assert_eq!(v.len(), FEATURE_COUNT);
            assert!(v.validate().is_ok());
            assert_eq!(v.implied(), Prob3::zero());
            assert!((v.get(34) - 10.0).abs() < 1e-12);
            assert_eq!(v.get(35), 1.0);
            assert_eq!(v.get(36), 1.0);
            assert_eq!(v.get(37), flag(sport.profile().supports_draw()));
        }
    }

    #[test]
    fn shape_errors_are_reported() {
        let short = FeatureVector { values: vec![0.0; 5] };
        assert!(matches!(
            short.validate(),
            Err(PipelineError::FeatureShape { expected: 38, got: 5 })
        ));
        let mut bad = FeatureVector { values: vec![0.0; FEATURE_COUNT] };
        bad.values[7] = f64::NAN;
        assert!(matches!(
            bad.validate(),
            Err(PipelineError::NonFiniteFeature { index: 7, .. })
        ));
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = schema_fingerprint();
        assert_eq!(a.len(), 64);
        assert_eq!(a, schema_fingerprint());
    }
}
