use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FeatureConfig;
use crate::domain::MatchRecord;
use crate::error::StoreError;
use crate::sport::Sport;
use crate::store::MatchStore;
use crate::team_features::FeatureCache;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadToHeadStats {
    pub team1: String,
    pub team2: String,
    pub sport: Sport,
    pub meetings: usize,
    pub team1_wins: u32,
    pub team2_wins: u32,
    pub draws: u32,
    pub team1_win_rate: f64,
    pub team2_win_rate: f64,
    pub avg_total_score: f64,
    pub is_default: bool,
    pub computed_at: DateTime<Utc>,
}

impl HeadToHeadStats {
    pub fn neutral(team1: &str, team2: &str, sport: Sport, now: DateTime<Utc>) -> Self {
        Self {
            team1: team1.to_string(),
            team2: team2.to_string(),
            sport,
            meetings: 0,
            team1_wins: 0,
            team2_wins: 0,
            draws: 0,
            team1_win_rate: 0.5,
            team2_win_rate: 0.5,
            avg_total_score: 0.0,
            is_default: true,
            computed_at: now,
        }
    }

    /// Same stats seen from the other side.
    pub fn flipped(&self) -> Self {
        Self {
            team1: self.team2.clone(),
            team2: self.team1.clone(),
            sport: self.sport,
            meetings: self.meetings,
            team1_wins: self.team2_wins,
            team2_wins: self.team1_wins,
            draws: self.draws,
            team1_win_rate: self.team2_win_rate,
            team2_win_rate: self.team1_win_rate,
            avg_total_score: self.avg_total_score,
            is_default: self.is_default,
            computed_at: self.computed_at,
        }
    }
}

/// Pairwise record over the latest `h2h_lookback` settled meetings before `now`.
/// Fewer than `h2h_min_meetings` gives the neutral 0.5/0.5 split.
pub fn analyze(
    history: &[MatchRecord],
    team1: &str,
    team2: &str,
    sport: Sport,
    now: DateTime<Utc>,
    cfg: &FeatureConfig,
) -> HeadToHeadStats {
    let mut meetings: Vec<&MatchRecord> = history
        .iter()
        .filter(|m| m.sport == sport && m.is_settled() && m.scheduled_at < now)
        .filter(|m| {
            (m.is_team1(team1) && m.is_team2(team2)) || (m.is_team1(team2) && m.is_team2(team1))
        })
        .collect();
    meetings.sort_by(|a, b| {
        b.scheduled_at
            .cmp(&a.scheduled_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    meetings.truncate(cfg.h2h_lookback);

    if meetings.len() < cfg.h2h_min_meetings.max(1) {
        return HeadToHeadStats::neutral(team1, team2, sport, now);
    }

    let mut out = HeadToHeadStats::neutral(team1, team2, sport, now);
    let mut total_score = 0.0;
    for m in &meetings {
        if let Some(s) = m.score {
            total_score += (s.team1 + s.team2) as f64;
        }
        match m.result_for(team1) {
            Some(crate::domain::TeamResult::Win) => out.team1_wins += 1,
            Some(crate::domain::TeamResult::Loss) => out.team2_wins += 1,
            Some(crate::domain::TeamResult::Draw) => out.draws += 1,
            None => {}
        }
    }
    let n = meetings.len() as f64;
    out.meetings = meetings.len();
    out.team1_win_rate = out.team1_wins as f64 / n;
    out.team2_win_rate = out.team2_wins as f64 / n;
    out.avg_total_score = total_score / n;
    out.is_default = false;
    out
}

/// Cache-aware H2H backed by a match store's pair query.
pub fn head_to_head(
    store: &dyn MatchStore,
    cache: &FeatureCache,
    team1: &str,
    team2: &str,
    sport: Sport,
    now: DateTime<Utc>,
    cfg: &FeatureConfig,
) -> Result<HeadToHeadStats, StoreError> {
    if let Some(hit) = cache.get_pair(team1, team2, sport, now) {
        return Ok(hit);
    }
    let limit = cfg.history_window.max(cfg.h2h_lookback);
    let history = store.get_pair_history(team1, team2, sport, limit)?;
    let stats = analyze(&history, team1, team2, sport, now, cfg);
    cache.put_pair(stats.clone());
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MarketOdds, MatchStatus, Score};
    use chrono::{Duration, TimeZone};

    fn meeting(day: i64, home: &str, away: &str, s1: u32, s2: u32) -> MatchRecord {
        MatchRecord {
            id: format!("h{day}"),
            sport: Sport::Cs2,
            team1: home.to_string(),
            team2: away.to_string(),
            tournament: String::new(),
            scheduled_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::days(day),
            status: MatchStatus::Finished,
            score: Some(Score { team1: s1, team2: s2 }),
            odds: MarketOdds::default(),
        }
    }

    #[test]
    fn single_meeting_is_neutral() {
        let history = vec![meeting(0, "Navi", "Vitality", 2, 0)];
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let s = analyze(&history, "Navi", "Vitality", Sport::Cs2, now, &FeatureConfig::default());
        assert!(s.is_default);
        assert_eq!(s.team1_win_rate, 0.5);
        assert_eq!(s.team2_win_rate, 0.5);
    }

    #[test]
    fn output_follows_caller_orientation() {
        let history = vec![
            meeting(0, "Navi", "Vitality", 2, 0),
            meeting(1, "Vitality", "Navi", 2, 1),
            meeting(2, "vitality", "NAVI", 0, 2),
            meeting(3, "Navi", "FaZe", 2, 0),
        ];
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let cfg = FeatureConfig::default();
        let a = analyze(&history, "Navi", "Vitality", Sport::Cs2, now, &cfg);
        assert_eq!(a.meetings, 3);
        assert_eq!(a.team1_wins, 2);
        assert_eq!(a.team2_wins, 1);
        assert!((a.avg_total_score - 7.0 / 3.0).abs() < 1e-12);

        let b = analyze(&history, "Vitality", "Navi", Sport::Cs2, now, &cfg);
        assert_eq!(b, a.flipped());
    }

    #[test]
    fn cached_pair_is_reoriented() {
        let cache = FeatureCache::new(Duration::hours(1));
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut stats = HeadToHeadStats::neutral("Navi", "Vitality", Sport::Cs2, now);
        stats.team1_win_rate = 0.7;
        stats.team2_win_rate = 0.3;
        cache.put_pair(stats);
        let hit = cache.get_pair("Vitality", "Navi", Sport::Cs2, now).unwrap();
        assert_eq!(hit.team1, "Vitality");
        assert!((hit.team1_win_rate - 0.3).abs() < 1e-12);
    }
}
