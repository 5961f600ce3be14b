use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::FeatureConfig;
use crate::domain::{MatchRecord, TeamResult, team_key};
use crate::error::StoreError;
use crate::head_to_head::HeadToHeadStats;
use crate::sport::Sport;
use crate::store::MatchStore;

/// Linearly decaying weights applied to the latest results, newest first.
const MOMENTUM_WEIGHTS: [f64; 10] = [1.0, 0.9, 0.8, 0.7, 0.6, 0.5, 0.4, 0.3, 0.2, 0.1];
const FORM_TREND_SPAN: usize = 5;
const FATIGUE_DAYS: i64 = 7;
const UPSET_ODDS: f64 = 2.0;
const NEUTRAL_RATE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamFeatureSnapshot {
    pub team: String,
    pub sport: Sport,
    pub matches_used: usize,
    /// Set when there was too little history; every stat is then neutral.
    pub is_default: bool,
    pub win_rate: f64,
    pub avg_scored: f64,
    pub avg_conceded: f64,
    pub recent_wins: u32,
    pub recent_draws: u32,
    pub recent_losses: u32,
    pub momentum: f64,
    pub consistency: f64,
    pub strength_of_schedule: f64,
    pub fatigue: f64,
    pub form_trend: f64,
    pub max_win_streak: u32,
    pub max_loss_streak: u32,
    pub upset_rate: f64,
    pub avg_winning_odds: f64,
    pub computed_at: DateTime<Utc>,
}

impl TeamFeatureSnapshot {
    pub fn neutral(team: &str, sport: Sport, now: DateTime<Utc>) -> Self {
        Self {
            team: team.to_string(),
            sport,
            matches_used: 0,
            is_default: true,
            win_rate: NEUTRAL_RATE,
            avg_scored: 0.0,
            avg_conceded: 0.0,
            recent_wins: 0,
            recent_draws: 0,
            recent_losses: 0,
            momentum: 0.0,
            consistency: 0.0,
            strength_of_schedule: NEUTRAL_RATE,
            fatigue: 0.0,
            form_trend: 0.0,
            max_win_streak: 0,
            max_loss_streak: 0,
            upset_rate: 0.0,
            avg_winning_odds: 0.0,
            computed_at: now,
        }
    }
}

/// The settled matches of `team` in `sport` that kicked off strictly before
/// `before`, newest first, at most `limit` of them.
pub fn settled_window<'a>(
    history: &'a [MatchRecord],
    team: &str,
    sport: Sport,
    before: DateTime<Utc>,
    limit: usize,
) -> Vec<&'a MatchRecord> {
    let mut out: Vec<&MatchRecord> = history
        .iter()
        .filter(|m| m.sport == sport && m.is_settled() && m.involves(team))
        .filter(|m| m.scheduled_at < before)
        .collect();
    out.sort_by(|a, b| {
        b.scheduled_at
            .cmp(&a.scheduled_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    out.truncate(limit);
    out
}

fn results_for(window: &[&MatchRecord], team: &str) -> Vec<TeamResult> {
    window.iter().filter_map(|m| m.result_for(team)).collect()
}

/// Win rate over a window, or the neutral rate when the window is too short.
pub fn window_win_rate(window: &[&MatchRecord], team: &str, min_history: usize) -> f64 {
    let results = results_for(window, team);
    if results.len() < min_history || results.is_empty() {
        return NEUTRAL_RATE;
    }
    let wins = results.iter().filter(|r| **r == TeamResult::Win).count();
    wins as f64 / results.len() as f64
}

/// Builds a snapshot from an already selected window (newest first).
/// `opponent_rate` supplies each opponent's own win rate; it is never asked to
/// recurse further.
pub fn aggregate(
    team: &str,
    sport: Sport,
    window: &[&MatchRecord],
    now: DateTime<Utc>,
    cfg: &FeatureConfig,
    opponent_rate: &dyn Fn(&str) -> f64,
) -> TeamFeatureSnapshot {
    let results = results_for(window, team);
    if results.len() < cfg.min_history || results.is_empty() {
        return TeamFeatureSnapshot::neutral(team, sport, now);
    }
    let n = results.len() as f64;

    let wins = results.iter().filter(|r| **r == TeamResult::Win).count();
    let mut scored = 0.0;
    let mut conceded = 0.0;
    for m in window {
        scored += m.score_for(team).unwrap_or(0) as f64;
        conceded += m.score_against(team).unwrap_or(0) as f64;
    }

    let recent = &results[..results.len().min(cfg.recent_form)];
    let count = |want: TeamResult| recent.iter().filter(|r| **r == want).count() as u32;

    let momentum = results
        .iter()
        .zip(MOMENTUM_WEIGHTS.iter())
        .map(|(r, w)| w * r.points())
        .sum::<f64>();

    let mean = results.iter().map(|r| r.signed()).sum::<f64>() / n;
    let variance = results
        .iter()
        .map(|r| (r.signed() - mean).powi(2))
        .sum::<f64>()
        / n;

    let form_trend = if results.len() >= FORM_TREND_SPAN {
        let late: f64 = results[..FORM_TREND_SPAN].iter().map(|r| r.points()).sum();
        let early_end = results.len().min(FORM_TREND_SPAN * 2);
        let early: f64 = results[FORM_TREND_SPAN..early_end]
            .iter()
            .map(|r| r.points())
            .sum();
        (late - early) / FORM_TREND_SPAN as f64
    } else {
        0.0
    };

    let (max_win_streak, max_loss_streak) = longest_streaks(&results);

    let opponents: Vec<f64> = window
        .iter()
        .filter_map(|m| m.opponent_of(team))
        .map(opponent_rate)
        .collect();
    let strength_of_schedule = if opponents.is_empty() {
        NEUTRAL_RATE
    } else {
        opponents.iter().sum::<f64>() / opponents.len() as f64
    };

    let fatigue_from = now - Duration::days(FATIGUE_DAYS);
    let fatigue = window
        .iter()
        .filter(|m| m.scheduled_at > fatigue_from && m.scheduled_at <= now)
        .count() as f64
        / FATIGUE_DAYS as f64;

    let mut priced = 0usize;
    let mut upsets = 0usize;
    let mut winning_odds = Vec::new();
    for m in window {
        let both_priced = m.odds.price(crate::calibration::Outcome::Team1).is_some()
            && m.odds.price(crate::calibration::Outcome::Team2).is_some();
        if !both_priced {
            continue;
        }
        priced += 1;
        if m.result_for(team) == Some(TeamResult::Win)
            && let Some(price) = m.odds_for_team(team)
        {
            winning_odds.push(price);
            if price > UPSET_ODDS {
                upsets += 1;
            }
        }
    }

    TeamFeatureSnapshot {
        team: team.to_string(),
        sport,
        matches_used: results.len(),
        is_default: false,
        win_rate: wins as f64 / n,
        avg_scored: scored / window.len() as f64,
        avg_conceded: conceded / window.len() as f64,
        recent_wins: count(TeamResult::Win),
        recent_draws: count(TeamResult::Draw),
        recent_losses: count(TeamResult::Loss),
        momentum,
        consistency: 1.0 / (1.0 + variance),
        strength_of_schedule,
        fatigue,
        form_trend,
        max_win_streak,
        max_loss_streak,
        upset_rate: if priced > 0 {
            upsets as f64 / priced as f64
        } else {
            0.0
        },
        avg_winning_odds: if winning_odds.is_empty() {
            0.0
        } else {
            winning_odds.iter().sum::<f64>() / winning_odds.len() as f64
        },
        computed_at: now,
    }
}

fn longest_streaks(results: &[TeamResult]) -> (u32, u32) {
    let (mut win_run, mut loss_run) = (0u32, 0u32);
    let (mut max_win, mut max_loss) = (0u32, 0u32);
    for r in results {
        match r {
            TeamResult::Win => {
                win_run += 1;
                loss_run = 0;
            }
            TeamResult::Loss => {
                loss_run += 1;
                win_run = 0;
            }
            TeamResult::Draw => {
                win_run = 0;
                loss_run = 0;
            }
        }
        max_win = max_win.max(win_run);
        max_loss = max_loss.max(loss_run);
    }
    (max_win, max_loss)
}

/// Snapshot of `team` computed purely from an in-memory match list, using only
/// matches before `now`. Used for training and replays.
pub fn snapshot_from_history(
    all: &[MatchRecord],
    team: &str,
    sport: Sport,
    now: DateTime<Utc>,
    cfg: &FeatureConfig,
) -> TeamFeatureSnapshot {
    let window = settled_window(all, team, sport, now, cfg.history_window);
    let mut rates: HashMap<String, f64> = HashMap::new();
    for m in &window {
        if let Some(opp) = m.opponent_of(team) {
            rates.entry(team_key(opp)).or_insert_with(|| {
                let opp_window = settled_window(all, opp, sport, now, cfg.history_window);
                window_win_rate(&opp_window, opp, cfg.min_history)
            });
        }
    }
    aggregate(team, sport, &window, now, cfg, &|opp| {
        rates.get(&team_key(opp)).copied().unwrap_or(NEUTRAL_RATE)
    })
}

type TeamKey = (Sport, String);
type PairKey = (Sport, String, String);

/// TTL cache for team snapshots and head-to-head stats. Writes are
/// last-writer-wins; the computation is deterministic for a given history.
#[derive(Debug)]
pub struct FeatureCache {
    ttl: Duration,
    teams: RwLock<HashMap<TeamKey, TeamFeatureSnapshot>>,
    pairs: RwLock<HashMap<PairKey, HeadToHeadStats>>,
}

fn is_fresh(computed_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    computed_at <= now && now - computed_at < ttl
}

pub(crate) fn pair_key(sport: Sport, a: &str, b: &str) -> (PairKey, bool) {
    let (ka, kb) = (team_key(a), team_key(b));
    if ka <= kb {
        ((sport, ka, kb), false)
    } else {
        ((sport, kb, ka), true)
    }
}

impl FeatureCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            teams: RwLock::new(HashMap::new()),
            pairs: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_team(&self, team: &str, sport: Sport, now: DateTime<Utc>) -> Option<TeamFeatureSnapshot> {
        let guard = self.teams.read().expect("feature cache lock poisoned");
        guard
            .get(&(sport, team_key(team)))
            .filter(|s| is_fresh(s.computed_at, now, self.ttl))
            .cloned()
    }

    pub fn put_team(&self, snapshot: TeamFeatureSnapshot) {
        let key = (snapshot.sport, team_key(&snapshot.team));
        let mut guard = self.teams.write().expect("feature cache lock poisoned");
        guard.insert(key, snapshot);
    }

    /// Cached stats oriented so that `team1` is the caller's first team.
    pub fn get_pair(
        &self,
        team1: &str,
        team2: &str,
        sport: Sport,
        now: DateTime<Utc>,
    ) -> Option<HeadToHeadStats> {
        let (key, swapped) = pair_key(sport, team1, team2);
        let guard = self.pairs.read().expect("feature cache lock poisoned");
        let stats = guard
            .get(&key)
            .filter(|s| is_fresh(s.computed_at, now, self.ttl))?;
        Some(if swapped { stats.flipped() } else { stats.clone() })
    }

    pub fn put_pair(&self, stats: HeadToHeadStats) {
        let (key, swapped) = pair_key(stats.sport, &stats.team1, &stats.team2);
        let canonical = if swapped { stats.flipped() } else { stats };
        let mut guard = self.pairs.write().expect("feature cache lock poisoned");
        guard.insert(key, canonical);
    }

    /// Drops the team's snapshot (in every sport) and every pair it is part of.
    pub fn invalidate_team(&self, team: &str) {
        let key = team_key(team);
        self.teams
            .write()
            .expect("feature cache lock poisoned")
            .retain(|(_, name), _| *name != key);
        self.pairs
            .write()
            .expect("feature cache lock poisoned")
            .retain(|(_, a, b), _| *a != key && *b != key);
    }

    pub fn clear(&self) {
        self.teams.write().expect("feature cache lock poisoned").clear();
        self.pairs.write().expect("feature cache lock poisoned").clear();
    }

    pub fn team_entries(&self) -> usize {
        self.teams.read().expect("feature cache lock poisoned").len()
    }
}

/// Cache-aware snapshot backed by a match store. Opponent win rates come from
/// fresh cached snapshots where available, otherwise from one store read each.
pub fn compute_team_features(
    store: &dyn MatchStore,
    cache: &FeatureCache,
    team: &str,
    sport: Sport,
    now: DateTime<Utc>,
    cfg: &FeatureConfig,
) -> Result<TeamFeatureSnapshot, StoreError> {
    if let Some(hit) = cache.get_team(team, sport, now) {
        return Ok(hit);
    }
    debug!(team, %sport, "team feature cache miss");

    let history = store.get_team_history(team, sport, cfg.history_window)?;
    let window = settled_window(&history, team, sport, now, cfg.history_window);
    if window.len() < cfg.min_history {
        let snapshot = TeamFeatureSnapshot::neutral(team, sport, now);
        cache.put_team(snapshot.clone());
        return Ok(snapshot);
    }

    let mut rates: HashMap<String, f64> = HashMap::new();
    for m in &window {
        let Some(opp) = m.opponent_of(team) else {
            continue;
        };
        let key = team_key(opp);
        if rates.contains_key(&key) {
            continue;
        }
        let rate = match cache.get_team(opp, sport, now) {
            Some(snapshot) => snapshot.win_rate,
            None => {
                let opp_history = store.get_team_history(opp, sport, cfg.history_window)?;
                let opp_window =
                    settled_window(&opp_history, opp, sport, now, cfg.history_window);
                window_win_rate(&opp_window, opp, cfg.min_history)
            }
        };
        rates.insert(key, rate);
    }

    let snapshot = aggregate(team, sport, &window, now, cfg, &|opp| {
        rates.get(&team_key(opp)).copied().unwrap_or(NEUTRAL_RATE)
    });
    cache.put_team(snapshot.clone());
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MarketOdds, MatchStatus, Score};
    use chrono::TimeZone;

    fn played(id: usize, day: i64, opp: &str, us: u32, them: u32) -> MatchRecord {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 18, 0, 0).unwrap();
        MatchRecord {
            id: format!("m{id}"),
            sport: Sport::Football,
            team1: "Alpha".to_string(),
            team2: opp.to_string(),
            tournament: "League".to_string(),
            scheduled_at: base + Duration::days(day),
            status: MatchStatus::Finished,
            score: Some(Score {
                team1: us,
                team2: them,
            }),
            odds: MarketOdds {
                team1: Some(2.5),
                draw: Some(3.2),
                team2: Some(2.6),
            },
        }
    }

    fn cfg() -> FeatureConfig {
        FeatureConfig::default()
    }

    #[test]
    fn momentum_weights_newest_result_highest() {
        // 12 matches, newest (day 11) is a win, the rest are losses.
        let mut history: Vec<MatchRecord> = (0..11).map(|i| played(i, i as i64, "Beta", 0, 1)).collect();
        history.push(played(11, 11, "Beta", 2, 0));
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let s = snapshot_from_history(&history, "Alpha", Sport::Football, now, &cfg());
        assert!(!s.is_default);
        assert_eq!(s.matches_used, 12);
        assert!((s.momentum - 3.0).abs() < 1e-12);
        assert_eq!(s.recent_wins, 1);
        assert_eq!(s.recent_losses, 9);
        assert_eq!(s.max_loss_streak, 11);
        assert!((s.upset_rate - 1.0 / 12.0).abs() < 1e-12);
        assert!((s.avg_winning_odds - 2.5).abs() < 1e-12);
    }

    #[test]
    fn consistency_is_one_for_identical_results() {
        let history: Vec<MatchRecord> = (0..10).map(|i| played(i, i as i64, "Beta", 1, 1)).collect();
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let s = snapshot_from_history(&history, "Alpha", Sport::Football, now, &cfg());
        assert!((s.consistency - 1.0).abs() < 1e-12);
        assert!((s.win_rate - 0.0).abs() < 1e-12);
        assert_eq!(s.recent_draws, 10);
    }

    #[test]
    fn future_matches_are_not_history() {
        let history: Vec<MatchRecord> = (0..12).map(|i| played(i, i as i64, "Beta", 1, 0)).collect();
        let now = history[5].scheduled_at;
        let s = snapshot_from_history(&history, "Alpha", Sport::Football, now, &cfg());
        assert!(s.is_default);
        assert!((s.win_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn fatigue_counts_last_week() {
        let history: Vec<MatchRecord> = (0..14).map(|i| played(i, i as i64, "Beta", 1, 0)).collect();
        let now = history[13].scheduled_at + Duration::hours(1);
        let s = snapshot_from_history(&history, "Alpha", Sport::Football, now, &cfg());
        assert!((s.fatigue - 1.0).abs() < 1e-12);
    }

    #[test]
    fn stale_entries_are_not_served() {
        let cache = FeatureCache::new(Duration::seconds(3600));
        let t0 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        cache.put_team(TeamFeatureSnapshot::neutral("Alpha", Sport::Cs2, t0));
        assert!(cache.get_team("ALPHA", Sport::Cs2, t0 + Duration::minutes(59)).is_some());
        assert!(cache.get_team("alpha", Sport::Cs2, t0 + Duration::minutes(60)).is_none());
        assert!(cache.get_team("alpha", Sport::Khl, t0).is_none());
        cache.invalidate_team("Alpha");
        assert_eq!(cache.team_entries(), 0);
    }
}
