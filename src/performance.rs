use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::domain::{MatchRecord, Signal};
use crate::gate::SignalTier;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TierStats {
    pub signals: usize,
    pub settled: usize,
    pub hits: usize,
    pub profit: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub total: usize,
    pub published: usize,
    pub settled: usize,
    pub hits: usize,
    pub hit_rate: f64,
    pub avg_confidence: f64,
    /// Net units won per unit staked over settled, priced signals.
    pub roi: f64,
    pub by_tier: BTreeMap<SignalTier, TierStats>,
}

/// Grades each signal against its match result. Unsettled matches count toward
/// totals only. Unpriced hits add nothing to profit.
pub fn summarize(signals: &[Signal], matches: &[MatchRecord]) -> PerformanceSummary {
    let by_id: HashMap<&str, &MatchRecord> = matches.iter().map(|m| (m.id.as_str(), m)).collect();
    let mut out = PerformanceSummary {
        total: signals.len(),
        ..PerformanceSummary::default()
    };
    if signals.is_empty() {
        return out;
    }

    let mut staked = 0usize;
    let mut profit = 0.0;
    let mut conf_sum = 0.0;
    for s in signals {
        conf_sum += s.confidence;
        if s.published {
            out.published += 1;
        }
        let tier = out.by_tier.entry(s.tier).or_default();
        tier.signals += 1;

        let Some(actual) = by_id.get(s.match_id.as_str()).and_then(|m| m.outcome()) else {
            continue;
        };
        out.settled += 1;
        tier.settled += 1;
        let hit = actual == s.outcome;
        if hit {
            out.hits += 1;
            tier.hits += 1;
        }
        if let Some(price) = s.odds {
            let pnl = if hit { price - 1.0 } else { -1.0 };
            staked += 1;
            profit += pnl;
            tier.profit += pnl;
        }
    }

    out.avg_confidence = conf_sum / signals.len() as f64;
    if out.settled > 0 {
        out.hit_rate = out.hits as f64 / out.settled as f64;
    }
    if staked > 0 {
        out.roi = profit / staked as f64;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Outcome;
    use crate::domain::{MarketOdds, MatchStatus, PredictionMethod, Score};
    use crate::sport::Sport;
    use chrono::{TimeZone, Utc};

    fn game(id: &str, s1: u32, s2: u32, finished: bool) -> MatchRecord {
        MatchRecord {
            id: id.to_string(),
            sport: Sport::Tennis,
            team1: "Sinner".to_string(),
            team2: "Alcaraz".to_string(),
            tournament: "Wimbledon".to_string(),
            scheduled_at: Utc.with_ymd_and_hms(2024, 7, 1, 13, 0, 0).unwrap(),
            status: if finished { MatchStatus::Finished } else { MatchStatus::Upcoming },
            score: finished.then_some(Score { team1: s1, team2: s2 }),
            odds: MarketOdds::default(),
        }
    }

    fn pick(id: &str, odds: f64, tier: SignalTier) -> Signal {
        Signal {
            id: None,
            match_id: id.to_string(),
            sport: Sport::Tennis,
            team1: "Sinner".to_string(),
            team2: "Alcaraz".to_string(),
            outcome: Outcome::Team1,
            confidence: 0.8,
            expected_value: 0.2,
            odds: Some(odds),
            tier,
            method: PredictionMethod::Ensemble,
            channel: "@signals_tennis".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap(),
            published: true,
            published_at: None,
        }
    }

    #[test]
    fn roi_counts_only_settled_priced_signals() {
        let matches = vec![game("w", 3, 1, true), game("l", 0, 3, true), game("u", 0, 0, false)];
        let signals = vec![
            pick("w", 2.0, SignalTier::HighValue),
            pick("l", 1.5, SignalTier::HighValue),
            pick("u", 1.5, SignalTier::ValueBet),
        ];
        let s = summarize(&signals, &matches);
        assert_eq!(s.total, 3);
        assert_eq!(s.settled, 2);
        assert_eq!(s.hits, 1);
        assert!((s.hit_rate - 0.5).abs() < 1e-12);
        assert!(s.roi.abs() < 1e-12);
        assert_eq!(s.by_tier[&SignalTier::ValueBet].settled, 0);
        assert_eq!(s.by_tier[&SignalTier::HighValue].hits, 1);
    }
}
