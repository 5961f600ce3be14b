use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use signal_desk::clock::FixedClock;
use signal_desk::config::PipelineConfig;
use signal_desk::domain::{MarketOdds, MatchRecord, MatchStatus, Score};
use signal_desk::ensemble::EnsemblePredictor;
use signal_desk::features::{FEATURE_COUNT, FEATURE_NAMES};
use signal_desk::pipeline::SignalPipeline;
use signal_desk::sport::Sport;
use signal_desk::store::MemoryStore;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap()
}

fn played(id: &str, sport: Sport, days_ago: i64, team1: &str, team2: &str, s1: u32, s2: u32) -> MatchRecord {
    MatchRecord {
        id: id.to_string(),
        sport,
        team1: team1.to_string(),
        team2: team2.to_string(),
        tournament: "IEM Katowice".to_string(),
        scheduled_at: now() - Duration::days(days_ago),
        status: MatchStatus::Finished,
        score: Some(Score { team1: s1, team2: s2 }),
        odds: MarketOdds::default(),
    }
}

fn upcoming(sport: Sport, team1: &str, team2: &str) -> MatchRecord {
    MatchRecord {
        id: format!("next-{}", sport.tag()),
        sport,
        team1: team1.to_string(),
        team2: team2.to_string(),
        tournament: "IEM Katowice".to_string(),
        scheduled_at: now() + Duration::hours(6),
        status: MatchStatus::Upcoming,
        score: None,
        odds: MarketOdds::default(),
    }
}

fn history() -> Vec<MatchRecord> {
    let mut out = Vec::new();
    for day in 1..=12 {
        out.push(played(&format!("navi{day}"), Sport::Cs2, day, "NaVi", &format!("Opp{day}"), 2, 0));
    }
    for day in 1..=3 {
        out.push(played(&format!("spirit{day}"), Sport::Cs2, day, "Opp", "Spirit", 2, 0));
    }
    out
}

fn pipeline(store: Arc<MemoryStore>) -> SignalPipeline {
    SignalPipeline::new(
        PipelineConfig::default(),
        store.clone(),
        store.clone(),
        store,
        Arc::new(FixedClock::new(now())),
        EnsemblePredictor::rule_based_only(),
    )
    .unwrap()
}

#[test]
fn short_history_gives_the_neutral_snapshot() {
    let p = pipeline(Arc::new(MemoryStore::with_matches(history())));
    let s = p.compute_team_features("Spirit", Sport::Cs2).unwrap();
    assert!(s.is_default);
    assert_eq!(s.matches_used, 0);
    assert_eq!(s.win_rate, 0.5);
    assert_eq!(s.strength_of_schedule, 0.5);
    assert_eq!(s.recent_losses, 0);
}

#[test]
fn unbeaten_team_snapshot() {
    let p = pipeline(Arc::new(MemoryStore::with_matches(history())));
    let s = p.compute_team_features("navi", Sport::Cs2).unwrap();
    assert!(!s.is_default);
    assert_eq!(s.matches_used, 12);
    assert_eq!(s.win_rate, 1.0);
    assert_eq!(s.recent_wins, 10);
    assert_eq!(s.max_win_streak, 12);
    assert!((s.momentum - 16.5).abs() < 1e-9);
    assert!((s.consistency - 1.0).abs() < 1e-12);
    assert!((s.avg_scored - 2.0).abs() < 1e-12);
    assert_eq!(s.avg_conceded, 0.0);
    assert_eq!(s.form_trend, 0.0);
    // every opponent has a single game on record
    assert_eq!(s.strength_of_schedule, 0.5);
    assert!((s.fatigue - 6.0 / 7.0).abs() < 1e-12);
}

#[test]
fn vector_carries_both_sides_and_neutral_h2h() {
    let p = pipeline(Arc::new(MemoryStore::with_matches(history())));
    let v = p.build_features(&upcoming(Sport::Cs2, "NaVi", "Spirit")).unwrap();
    assert_eq!(v.len(), FEATURE_COUNT);
    assert_eq!(v.get(0), 1.0);
    assert_eq!(v.get(12), 0.0);
    assert_eq!(v.get(13), 0.5);
    assert_eq!(v.get(25), 1.0);
    let h2h = FEATURE_NAMES.iter().position(|n| *n == "h2h_meetings").unwrap();
    assert_eq!(v.get(h2h), 0.0);
    assert_eq!(v.get(h2h - 2), 0.5);
    assert_eq!(v.get(h2h - 1), 0.5);
}

#[test]
fn width_is_the_same_for_every_sport() {
    let p = pipeline(Arc::new(MemoryStore::new()));
    for sport in Sport::ALL {
        let v = p.build_features(&upcoming(sport, "Home", "Away")).unwrap();
        assert_eq!(v.len(), 38, "{sport}");
        assert!(v.validate().is_ok());
        let draw = FEATURE_NAMES.iter().position(|n| *n == "draw_supported").unwrap();
        let want = if sport.profile().supports_draw() { 1.0 } else { 0.0 };
        assert_eq!(v.get(draw), want, "{sport}");
    }
}

#[test]
fn invalidation_picks_up_new_results() {
    let store = Arc::new(MemoryStore::with_matches(history()));
    let p = pipeline(store.clone());
    assert!(p.compute_team_features("Spirit", Sport::Cs2).unwrap().is_default);

    for day in 4..=12 {
        store.upsert_match(played(&format!("spirit{day}"), Sport::Cs2, day, "Spirit", "Opp", 2, 1));
    }
    // still served from cache
    assert!(p.compute_team_features("Spirit", Sport::Cs2).unwrap().is_default);

    p.invalidate_team("SPIRIT");
    let fresh = p.compute_team_features("Spirit", Sport::Cs2).unwrap();
    assert!(!fresh.is_default);
    assert_eq!(fresh.matches_used, 12);
    assert!((fresh.win_rate - 0.75).abs() < 1e-12);
}

#[test]
fn head_to_head_needs_two_meetings() {
    let mut matches = history();
    matches.push(played("h1", Sport::Cs2, 20, "NaVi", "Spirit", 2, 1));
    let p = pipeline(Arc::new(MemoryStore::with_matches(matches.clone())));
    let one = p.head_to_head("NaVi", "Spirit", Sport::Cs2).unwrap();
    assert!(one.is_default);
    assert_eq!(one.team1_win_rate, 0.5);

    matches.push(played("h2", Sport::Cs2, 25, "Spirit", "NaVi", 2, 0));
    matches.push(played("h3", Sport::Cs2, 30, "Spirit", "NaVi", 0, 2));
    let p = pipeline(Arc::new(MemoryStore::with_matches(matches)));
    let h = p.head_to_head("Spirit", "NaVi", Sport::Cs2).unwrap();
    assert_eq!(h.meetings, 3);
    assert_eq!(h.team1, "Spirit");
    assert!((h.team1_win_rate - 1.0 / 3.0).abs() < 1e-12);
    assert!((h.team2_win_rate - 2.0 / 3.0).abs() < 1e-12);
    assert!((h.avg_total_score - 7.0 / 3.0).abs() < 1e-12);
}

#[test]
fn old_meetings_count_even_behind_a_long_history() {
    let mut matches = Vec::new();
    for day in 1..=120 {
        matches.push(played(&format!("busy{day}"), Sport::Cs2, day, "NaVi", &format!("Opp{day}"), 2, 1));
    }
    matches.push(played("old1", Sport::Cs2, 200, "NaVi", "Spirit", 2, 0));
    matches.push(played("old2", Sport::Cs2, 220, "Spirit", "NaVi", 2, 1));
    let p = pipeline(Arc::new(MemoryStore::with_matches(matches)));

    let h = p.head_to_head("NaVi", "Spirit", Sport::Cs2).unwrap();
    assert!(!h.is_default);
    assert_eq!(h.meetings, 2);
    assert_eq!(h.team1_wins, 1);
    assert_eq!(h.team2_wins, 1);
}
