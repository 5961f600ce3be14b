use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::calibration::{Metrics, Outcome, Prob3, argmax_with_preference};
use crate::domain::{PredictionMethod, PredictionResult};
use crate::error::{PipelineError, Result};
use crate::features::{FEATURE_COUNT, FeatureVector, IDX_TEAM1_WIN_RATE, IDX_TEAM2_WIN_RATE, schema_fingerprint};
use crate::forest::RandomForest;
use crate::logistic::SoftmaxRegression;
use crate::scaler::StandardScaler;
use crate::sport::SportProfile;

const RULE_SHIFT: f64 = 0.25;
const RULE_FLOOR: f64 = 0.01;
pub const RULE_BASED_ID: &str = "rule_based-v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainedModel {
    Forest(RandomForest),
    Logistic(SoftmaxRegression),
}

impl TrainedModel {
    pub fn name(&self) -> &'static str {
        match self {
            TrainedModel::Forest(_) => "random_forest",
            TrainedModel::Logistic(_) => "logistic_regression",
        }
    }

    pub fn predict_proba(&self, scaled: &[f64]) -> Prob3 {
        let p = match self {
            TrainedModel::Forest(m) => m.predict_proba(scaled),
            TrainedModel::Logistic(m) => m.predict_proba(scaled),
        };
        Prob3::from_array(p)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleMember {
    pub model: TrainedModel,
    pub validation: Metrics,
    pub weight: f64,
}

/// Scaler plus members in priority order (index 0 wins ties).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleModel {
    pub schema: String,
    pub feature_count: usize,
    pub trained_at: DateTime<Utc>,
    pub training_samples: usize,
    pub scaler: StandardScaler,
    pub members: Vec<EnsembleMember>,
}

/// Accuracies rescaled to sum 1; equal shares when none is positive.
pub fn weights_from_accuracy(accuracies: &[f64]) -> Vec<f64> {
    let clean: Vec<f64> = accuracies
        .iter()
        .map(|a| if a.is_finite() && *a > 0.0 { *a } else { 0.0 })
        .collect();
    let sum: f64 = clean.iter().sum();
    if sum <= 0.0 {
        let share = 1.0 / accuracies.len().max(1) as f64;
        return vec![share; accuracies.len()];
    }
    clean.iter().map(|a| a / sum).collect()
}

impl EnsembleModel {
    pub fn model_id(&self) -> String {
        format!(
            "ensemble-{}-{}",
            &self.schema[..self.schema.len().min(12)],
            self.trained_at.format("%Y%m%dT%H%M%SZ")
        )
    }

    pub fn needs_retrain(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.trained_at > max_age
    }

    /// Weighted average of member distributions restricted to the sport's
    /// outcomes, plus the tie-break preference of the first member.
    pub fn combine(&self, v: &FeatureVector, profile: &SportProfile) -> Result<(Prob3, Outcome)> {
        v.validate()?;
        if self.scaler.width() != v.len() {
            return Err(PipelineError::FeatureShape {
                expected: self.scaler.width(),
                got: v.len(),
            });
        }
        let scaled = self.scaler.transform(&v.values);
        let mut combined = Prob3::zero();
        let mut preferred = None;
        for member in &self.members {
            let p = member.model.predict_proba(&scaled).normalized(profile.outcomes);
            if preferred.is_none() {
                preferred = Some(argmax_with_preference(p, &[]));
            }
            for o in Outcome::ALL {
                combined.set(o, combined.get(o) + member.weight * p.get(o));
            }
        }
        let combined = combined.normalized(profile.outcomes);
        let preference: Vec<Outcome> = preferred.into_iter().collect();
        Ok((combined, argmax_with_preference(combined, &preference)))
    }

    /// Atomic write: tmp file, then rename over the target.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create model dir")?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string(self).context("serialize ensemble")?;
        fs::write(&tmp, json).context("write ensemble")?;
        fs::rename(&tmp, path).context("swap ensemble")?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            PipelineError::ModelUnavailable(format!("{}: {e}", path.display()))
        })?;
        let model: EnsembleModel = serde_json::from_str(&raw)
            .map_err(|e| PipelineError::ModelUnavailable(format!("{}: {e}", path.display())))?;
        if model.schema != schema_fingerprint() || model.feature_count != FEATURE_COUNT {
            return Err(PipelineError::ModelUnavailable(format!(
                "{} was trained on a different feature layout",
                path.display()
            )));
        }
        if model.members.is_empty() {
            return Err(PipelineError::ModelUnavailable(format!(
                "{} has no members",
                path.display()
            )));
        }
        Ok(model)
    }
}

/// Market-implied distribution nudged toward the side with the better win
/// rate. Used whenever no trained ensemble is available.
pub fn rule_based(v: &FeatureVector, profile: &SportProfile) -> Prob3 {
    let implied = v.implied();
    let mut p = if profile.outcomes.iter().map(|o| implied.get(*o)).sum::<f64>() > 0.0 {
        implied
    } else {
        Prob3::uniform()
    };
    let shift = RULE_SHIFT * (v.get(IDX_TEAM1_WIN_RATE) - v.get(IDX_TEAM2_WIN_RATE));
    p.team1 += shift;
    p.team2 -= shift;
    for o in profile.outcomes {
        p.set(*o, p.get(*o).max(RULE_FLOOR));
    }
    p.normalized(profile.outcomes)
}

/// Shared, read-only after construction; safe to call from many threads.
#[derive(Debug, Default)]
pub struct EnsemblePredictor {
    model: Option<EnsembleModel>,
}

impl EnsemblePredictor {
    pub fn new(model: Option<EnsembleModel>) -> Self {
        Self { model }
    }

    pub fn rule_based_only() -> Self {
        Self { model: None }
    }

    /// Loads the saved ensemble; any failure leaves the predictor in
    /// rule-based mode.
    pub fn load_or_fallback(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            warn!("no model path configured, using rule-based predictions");
            return Self::rule_based_only();
        };
        match EnsembleModel::load(path) {
            Ok(model) => {
                info!(model = %model.model_id(), "loaded ensemble");
                Self::new(Some(model))
            }
            Err(err) => {
                warn!(error = %err, "ensemble unavailable, using rule-based predictions");
                Self::rule_based_only()
            }
        }
    }

    pub fn model(&self) -> Option<&EnsembleModel> {
        self.model.as_ref()
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    pub fn predict(
        &self,
        match_id: &str,
        v: &FeatureVector,
        profile: &SportProfile,
    ) -> Result<PredictionResult> {
        v.validate()?;
        let (probabilities, outcome, method, model_id) = match &self.model {
            Some(model) => {
                let (p, outcome) = model.combine(v, profile)?;
                (p, outcome, PredictionMethod::Ensemble, model.model_id())
            }
            None => {
                let p = rule_based(v, profile);
                (
                    p,
                    argmax_with_preference(p, &[]),
                    PredictionMethod::RuleBased,
                    RULE_BASED_ID.to_string(),
                )
            }
        };
        Ok(PredictionResult {
            match_id: match_id.to_string(),
            outcome,
            probabilities,
            confidence: probabilities.get(outcome).clamp(0.0, 1.0),
            method,
            model_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sport::Sport;

    fn vector_with(implied: [f64; 3], wr1: f64, wr2: f64) -> FeatureVector {
        let mut values = vec![0.0; FEATURE_COUNT];
        values[IDX_TEAM1_WIN_RATE] = wr1;
        values[IDX_TEAM2_WIN_RATE] = wr2;
        values[crate::features::IDX_IMPLIED_TEAM1] = implied[0];
        values[crate::features::IDX_IMPLIED_DRAW] = implied[1];
        values[crate::features::IDX_IMPLIED_TEAM2] = implied[2];
        FeatureVector { values }
    }

    #[test]
    fn weights_follow_accuracy() {
        let w = weights_from_accuracy(&[0.6, 0.4]);
        assert!((w[0] - 0.6).abs() < 1e-12);
        assert_eq!(weights_from_accuracy(&[0.0, 0.0]), vec![0.5, 0.5]);
    }

    #[test]
    fn rule_based_shifts_toward_stronger_team() {
        let v = vector_with([0.5, 0.0, 0.5], 0.8, 0.4);
        let p = rule_based(&v, Sport::Cs2.profile());
        assert!((p.team1 - 0.6).abs() < 1e-12);
        assert!((p.team2 - 0.4).abs() < 1e-12);
        assert_eq!(p.draw, 0.0);
    }

    #[test]
    fn rule_based_without_odds_starts_uniform() {
        let v = vector_with([0.0, 0.0, 0.0], 0.5, 0.5);
        let p = rule_based(&v, Sport::Football.profile());
        assert!((p.team1 - 1.0 / 3.0).abs() < 1e-12);
        assert!((p.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn fallback_result_is_tagged() {
        let predictor = EnsemblePredictor::rule_based_only();
        let v = vector_with([0.7, 0.0, 0.3], 0.5, 0.5);
        let r = predictor.predict("m1", &v, Sport::Tennis.profile()).unwrap();
        assert_eq!(r.method, PredictionMethod::RuleBased);
        assert_eq!(r.outcome, Outcome::Team1);
        assert!((r.confidence - 0.7).abs() < 1e-12);
    }

    #[test]
    fn wrong_width_is_a_hard_error() {
        let predictor = EnsemblePredictor::rule_based_only();
        let v = FeatureVector { values: vec![0.0; 3] };
        assert!(matches!(
            predictor.predict("m1", &v, Sport::Cs2.profile()),
            Err(PipelineError::FeatureShape { .. })
        ));
    }

    #[test]
    fn missing_model_file_is_unavailable() {
        let err = EnsembleModel::load(Path::new("/nonexistent/ensemble.json")).unwrap_err();
        assert!(matches!(err, PipelineError::ModelUnavailable(_)));
    }
}
