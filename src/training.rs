use chrono::{DateTime, FixedOffset, Utc};
use rayon::prelude::*;
use tracing::info;

use crate::calibration::{Outcome, Prob3, evaluate_probs};
use crate::config::FeatureConfig;
use crate::domain::MatchRecord;
use crate::ensemble::{EnsembleMember, EnsembleModel, TrainedModel, weights_from_accuracy};
use crate::error::{PipelineError, Result};
use crate::features::{FEATURE_COUNT, FeatureVector, assemble, schema_fingerprint};
use crate::forest::{ForestParams, RandomForest};
use crate::head_to_head;
use crate::logistic::{LogisticParams, SoftmaxRegression};
use crate::scaler::StandardScaler;
use crate::sport::Sport;
use crate::team_features::snapshot_from_history;

pub const MIN_TRAINING_SAMPLES: usize = 100;

#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub match_id: String,
    pub sport: Sport,
    pub kickoff: DateTime<Utc>,
    pub features: FeatureVector,
    pub label: Outcome,
}

#[derive(Debug, Clone, Copy)]
pub struct TrainingOptions {
    pub forest: ForestParams,
    pub logistic: LogisticParams,
    pub validation_fraction: f64,
    pub min_samples: usize,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            forest: ForestParams::default(),
            logistic: LogisticParams::default(),
            validation_fraction: 0.2,
            min_samples: MIN_TRAINING_SAMPLES,
        }
    }
}

/// One sample per settled match, with features built only from what was known
/// at kickoff. Output is in kickoff order.
pub fn build_training_set(
    matches: &[MatchRecord],
    cfg: &FeatureConfig,
    offset: FixedOffset,
) -> Vec<TrainingSample> {
    let mut settled: Vec<&MatchRecord> = matches.iter().filter(|m| m.is_settled()).collect();
    settled.sort_by(|a, b| {
        a.scheduled_at
            .cmp(&b.scheduled_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    settled
        .par_iter()
        .filter_map(|m| {
            let label = m.outcome()?;
            let now = m.scheduled_at;
            let t1 = snapshot_from_history(matches, &m.team1, m.sport, now, cfg);
            let t2 = snapshot_from_history(matches, &m.team2, m.sport, now, cfg);
            let h2h = head_to_head::analyze(matches, &m.team1, &m.team2, m.sport, now, cfg);
            let features = assemble(m, &t1, &t2, &h2h, now, offset);
            features.validate().ok()?;
            Some(TrainingSample {
                match_id: m.id.clone(),
                sport: m.sport,
                kickoff: now,
                features,
                label,
            })
        })
        .collect()
}

fn member_metrics(
    model: &TrainedModel,
    rows: &[Vec<f64>],
    samples: &[TrainingSample],
) -> crate::calibration::Metrics {
    let preds: Vec<Prob3> = rows
        .iter()
        .zip(samples)
        .map(|(row, s)| model.predict_proba(row).normalized(s.sport.profile().outcomes))
        .collect();
    let labels: Vec<Outcome> = samples.iter().map(|s| s.label).collect();
    evaluate_probs(&preds, &labels)
}

/// Chronological split, scaler fit on the earlier part, members scored on the
/// later part. Validation accuracy becomes each member's weight.
pub fn train_ensemble(
    samples: &[TrainingSample],
    opts: &TrainingOptions,
    now: DateTime<Utc>,
) -> Result<EnsembleModel> {
    let required = opts.min_samples.max(2);
    if samples.len() < required {
        return Err(PipelineError::InsufficientTrainingData {
            samples: samples.len(),
            required,
        });
    }
    if let Some(bad) = samples.iter().find(|s| s.features.len() != FEATURE_COUNT) {
        return Err(PipelineError::FeatureShape {
            expected: FEATURE_COUNT,
            got: bad.features.len(),
        });
    }

    let fraction = opts.validation_fraction.clamp(0.05, 0.5);
    let validation_len = ((samples.len() as f64 * fraction).round() as usize).max(1);
    let split = samples.len() - validation_len;
    let (train, validation) = samples.split_at(split);

    let raw_train: Vec<Vec<f64>> = train.iter().map(|s| s.features.values.clone()).collect();
    let labels: Vec<usize> = train.iter().map(|s| s.label.index()).collect();
    let scaler = StandardScaler::fit(&raw_train);
    let train_rows = scaler.transform_all(&raw_train);
    let validation_rows: Vec<Vec<f64>> = validation
        .iter()
        .map(|s| scaler.transform(&s.features.values))
        .collect();

    let (forest, logistic) = rayon::join(
        || RandomForest::fit(&train_rows, &labels, opts.forest),
        || SoftmaxRegression::fit(&train_rows, &labels, opts.logistic),
    );
    let models = [TrainedModel::Forest(forest), TrainedModel::Logistic(logistic)];

    let metrics: Vec<_> = models
        .iter()
        .map(|m| member_metrics(m, &validation_rows, validation))
        .collect();
    let weights = weights_from_accuracy(&metrics.iter().map(|m| m.accuracy).collect::<Vec<_>>());

    let members: Vec<EnsembleMember> = models
        .into_iter()
        .zip(metrics)
        .zip(weights)
        .map(|((model, validation), weight)| {
            info!(
                member = model.name(),
                accuracy = validation.accuracy,
                brier = validation.brier,
                log_loss = validation.log_loss,
                weight,
                "validated ensemble member"
            );
            EnsembleMember {
                model,
                validation,
                weight,
            }
        })
        .collect();

    Ok(EnsembleModel {
        schema: schema_fingerprint(),
        feature_count: FEATURE_COUNT,
        trained_at: now,
        training_samples: train.len(),
        scaler,
        members,
    })
}
