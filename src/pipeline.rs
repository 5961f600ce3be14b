use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::domain::{MatchRecord, PredictionResult, Signal};
use crate::ensemble::EnsemblePredictor;
use crate::error::{PipelineError, Result, StoreError};
use crate::features::{FeatureVector, assemble};
use crate::gate::SignalTier;
use crate::head_to_head::{self, HeadToHeadStats};
use crate::rate_limiter::RateLimiter;
use crate::sport::Sport;
use crate::store::{MatchStore, PublicationJournal, SignalStore};
use crate::team_features::{self, FeatureCache, TeamFeatureSnapshot};
use crate::value::outcome_value;

/// Prediction plus its value and gate verdict. `tier` is `None` when the gate
/// rejected the match.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub record: MatchRecord,
    pub prediction: PredictionResult,
    pub odds: Option<f64>,
    pub expected_value: f64,
    pub tier: Option<SignalTier>,
}

impl Evaluation {
    pub fn into_signal(self, channel: String, now: DateTime<Utc>) -> Option<Signal> {
        let tier = self.tier?;
        Some(Signal {
            id: None,
            match_id: self.record.id,
            sport: self.record.sport,
            team1: self.record.team1,
            team2: self.record.team2,
            outcome: self.prediction.outcome,
            confidence: self.prediction.confidence,
            expected_value: self.expected_value,
            odds: self.odds,
            tier,
            method: self.prediction.method,
            channel,
            created_at: now,
            published: false,
            published_at: None,
        })
    }
}

/// Everything one process needs to run the signal pipeline. Built once at
/// startup and shared by reference.
pub struct SignalPipeline {
    cfg: PipelineConfig,
    matches: Arc<dyn MatchStore>,
    signals: Arc<dyn SignalStore>,
    clock: Arc<dyn Clock>,
    cache: FeatureCache,
    predictor: EnsemblePredictor,
    limiter: RateLimiter,
}

impl SignalPipeline {
    pub fn new(
        cfg: PipelineConfig,
        matches: Arc<dyn MatchStore>,
        signals: Arc<dyn SignalStore>,
        journal: Arc<dyn PublicationJournal>,
        clock: Arc<dyn Clock>,
        predictor: EnsemblePredictor,
    ) -> Result<Self> {
        let limiter = RateLimiter::new(cfg.limiter, cfg.active_window, journal)?;
        Ok(Self {
            cache: FeatureCache::new(cfg.features.ttl),
            cfg,
            matches,
            signals,
            clock,
            predictor,
            limiter,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn predictor(&self) -> &EnsemblePredictor {
        &self.predictor
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn compute_team_features(&self, team: &str, sport: Sport) -> Result<TeamFeatureSnapshot> {
        self.team_features_at(team, sport, self.clock.now())
    }

    pub fn head_to_head(&self, team1: &str, team2: &str, sport: Sport) -> Result<HeadToHeadStats> {
        self.head_to_head_at(team1, team2, sport, self.clock.now())
    }

    pub fn build_features(&self, record: &MatchRecord) -> Result<FeatureVector> {
        self.features_at(record, self.clock.now())
    }

    pub fn predict_match(&self, record: &MatchRecord) -> Result<PredictionResult> {
        self.predict_at(record, self.clock.now())
    }

    pub fn evaluate_match(&self, record: &MatchRecord) -> Result<Evaluation> {
        self.evaluate_at(record, self.clock.now())
    }

    /// Drops cached snapshots and pairs of `team`, e.g. after a result lands.
    pub fn invalidate_team(&self, team: &str) {
        self.cache.invalidate_team(team);
    }

    /// One batch run: evaluate upcoming matches, gate them, and hand the
    /// survivors to the rate limiter. Per-match failures are logged and
    /// skipped; a store failure in the limiter aborts the run.
    pub fn generate_signals(&self) -> Result<Vec<Signal>> {
        let now = self.clock.now();
        let eligible = self
            .matches
            .get_upcoming(now + self.cfg.kickoff_buffer, self.cfg.upcoming_limit)?;

        let evaluations: Vec<Evaluation> = eligible
            .par_iter()
            .filter_map(|m| match self.evaluate_at(m, now) {
                Ok(e) => Some(e),
                Err(err) => {
                    warn!(match_id = %m.id, error = %err, "skipping match");
                    None
                }
            })
            .collect();
        let evaluated = evaluations.len();

        let candidates: Vec<Signal> = evaluations
            .into_iter()
            .filter_map(|e| {
                let channel = self.cfg.channel_for(e.record.sport);
                e.into_signal(channel, now)
            })
            .collect();
        let gated = candidates.len();

        let emitted = self
            .limiter
            .admit(candidates, self.signals.as_ref(), now)
            .inspect_err(|err| warn!(error = %err, "aborting run"))?;

        info!(
            eligible = eligible.len(),
            evaluated,
            gated,
            emitted = emitted.len(),
            rule_based = !self.predictor.is_trained(),
            "signal run finished"
        );
        Ok(emitted)
    }

    /// Sets the published flag once, in the store and on `signal`.
    pub fn mark_published(&self, signal: &mut Signal) -> Result<bool> {
        let Some(id) = signal.id else {
            return Err(PipelineError::StoreUnavailable(StoreError::Unavailable(format!(
                "signal for match {} was never saved",
                signal.match_id
            ))));
        };
        let now = self.clock.now();
        let changed = self.signals.mark_published(id, now)?;
        if changed {
            signal.mark_published(now);
        }
        Ok(changed)
    }

    fn team_features_at(
        &self,
        team: &str,
        sport: Sport,
        now: DateTime<Utc>,
    ) -> Result<TeamFeatureSnapshot> {
        Ok(team_features::compute_team_features(
            self.matches.as_ref(),
            &self.cache,
            team,
            sport,
            now,
            &self.cfg.features,
        )?)
    }

    fn head_to_head_at(
        &self,
        team1: &str,
        team2: &str,
        sport: Sport,
        now: DateTime<Utc>,
    ) -> Result<HeadToHeadStats> {
        Ok(head_to_head::head_to_head(
            self.matches.as_ref(),
            &self.cache,
            team1,
            team2,
            sport,
            now,
            &self.cfg.features,
        )?)
    }

    fn features_at(&self, record: &MatchRecord, now: DateTime<Utc>) -> Result<FeatureVector> {
        let t1 = self.team_features_at(&record.team1, record.sport, now)?;
        let t2 = self.team_features_at(&record.team2, record.sport, now)?;
        let h2h = self.head_to_head_at(&record.team1, &record.team2, record.sport, now)?;
        Ok(assemble(record, &t1, &t2, &h2h, now, self.cfg.utc_offset))
    }

    fn predict_at(&self, record: &MatchRecord, now: DateTime<Utc>) -> Result<PredictionResult> {
        let features = self.features_at(record, now)?;
        self.predictor
            .predict(&record.id, &features, record.sport.profile())
    }

    fn evaluate_at(&self, record: &MatchRecord, now: DateTime<Utc>) -> Result<Evaluation> {
        let prediction = self.predict_at(record, now)?;
        let (expected_value, odds) =
            outcome_value(&prediction.probabilities, prediction.outcome, &record.odds);
        let tier = self
            .cfg
            .gate
            .evaluate(prediction.confidence, expected_value, prediction.method);
        debug!(
            match_id = %record.id,
            outcome = prediction.outcome.label(),
            confidence = prediction.confidence,
            expected_value,
            tier = tier.map(|t| t.as_str()).unwrap_or("rejected"),
            "gate decision"
        );
        Ok(Evaluation {
            record: record.clone(),
            prediction,
            odds,
            expected_value,
            tier,
        })
    }
}
