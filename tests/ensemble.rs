use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use signal_desk::calibration::Outcome;
use signal_desk::clock::FixedClock;
use signal_desk::config::{FeatureConfig, PipelineConfig, utc};
use signal_desk::domain::{MarketOdds, MatchRecord, MatchStatus, PredictionMethod, Score};
use signal_desk::ensemble::{EnsembleModel, EnsemblePredictor};
use signal_desk::error::PipelineError;
use signal_desk::pipeline::SignalPipeline;
use signal_desk::sport::Sport;
use signal_desk::store::MemoryStore;
use signal_desk::training::{TrainingOptions, TrainingSample, build_training_set, train_ensemble};

const TEAMS: [&str; 6] = ["Ak Bars", "CSKA", "SKA", "Dynamo", "Avangard", "Metallurg"];

/// Round robin where the lower-indexed side always wins at home and draws away.
fn season(rounds: usize) -> Vec<MatchRecord> {
    let base = Utc.with_ymd_and_hms(2023, 9, 1, 16, 0, 0).unwrap();
    let mut out = Vec::new();
    for r in 0..rounds {
        for i in 0..TEAMS.len() {
            for j in 0..TEAMS.len() {
                if i == j || (i + j + r) % 2 == 1 {
                    continue;
                }
                let k = out.len();
                let (s1, s2) = if i < j { (4, 1) } else { (2, 2) };
                out.push(MatchRecord {
                    id: format!("khl{k:04}"),
                    sport: Sport::Khl,
                    team1: TEAMS[i].to_string(),
                    team2: TEAMS[j].to_string(),
                    tournament: "KHL Regular Season".to_string(),
                    scheduled_at: base + Duration::hours(8 * k as i64),
                    status: MatchStatus::Finished,
                    score: Some(Score { team1: s1, team2: s2 }),
                    odds: MarketOdds {
                        team1: Some(if i < j { 1.5 } else { 2.9 }),
                        draw: Some(4.2),
                        team2: Some(if i < j { 2.9 } else { 1.5 }),
                    },
                });
            }
        }
    }
    out
}

fn samples() -> Vec<TrainingSample> {
    build_training_set(&season(8), &FeatureConfig::default(), utc())
}

fn quick_options() -> TrainingOptions {
    let mut opts = TrainingOptions::default();
    opts.forest.n_trees = 25;
    opts
}

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("signal_desk_{}_{name}", std::process::id()))
        .join("ensemble.json")
}

#[test]
fn training_set_is_in_kickoff_order() {
    let samples = samples();
    assert_eq!(samples.len(), 120);
    assert!(samples.windows(2).all(|w| w[0].kickoff <= w[1].kickoff));
    assert!(samples.iter().all(|s| s.features.validate().is_ok()));
}

#[test]
fn ensemble_output_is_a_distribution() {
    let samples = samples();
    let now = Utc.with_ymd_and_hms(2023, 11, 1, 0, 0, 0).unwrap();
    let model = train_ensemble(&samples, &quick_options(), now).unwrap();
    assert_eq!(model.members.len(), 2);
    assert_eq!(model.training_samples, 96);
    let weight_sum: f64 = model.members.iter().map(|m| m.weight).sum();
    assert!((weight_sum - 1.0).abs() < 1e-9);

    let predictor = EnsemblePredictor::new(Some(model));
    for sample in samples.iter().rev().take(10) {
        let r = predictor
            .predict(&sample.match_id, &sample.features, Sport::Khl.profile())
            .unwrap();
        assert_eq!(r.method, PredictionMethod::Ensemble);
        assert!((r.probabilities.sum() - 1.0).abs() < 1e-6);
        assert!(r.probabilities.to_array().iter().all(|p| (0.0..=1.0).contains(p)));
        assert!((r.confidence - r.probabilities.get(r.outcome)).abs() < 1e-12);
    }

    let two_way = predictor
        .predict("x", &samples[100].features, Sport::Tennis.profile())
        .unwrap();
    assert_eq!(two_way.probabilities.draw, 0.0);
    assert_ne!(two_way.outcome, Outcome::Draw);
}

#[test]
fn saved_model_loads_back() {
    let samples = samples();
    let now = Utc.with_ymd_and_hms(2023, 11, 1, 0, 0, 0).unwrap();
    let model = train_ensemble(&samples, &quick_options(), now).unwrap();
    let path = scratch("roundtrip");
    model.save(&path).unwrap();

    let loaded = EnsembleModel::load(&path).unwrap();
    assert_eq!(loaded.model_id(), model.model_id());
    assert_eq!(loaded.members.len(), model.members.len());

    let a = EnsemblePredictor::new(Some(model));
    let b = EnsemblePredictor::load_or_fallback(Some(path.as_path()));
    assert!(b.is_trained());
    let v = &samples[110].features;
    let pa = a.predict("m", v, Sport::Khl.profile()).unwrap();
    let pb = b.predict("m", v, Sport::Khl.profile()).unwrap();
    for (x, y) in pa.probabilities.to_array().iter().zip(pb.probabilities.to_array()) {
        assert!((x - y).abs() < 1e-9);
    }
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn foreign_feature_layout_is_rejected() {
    let samples = samples();
    let mut model = train_ensemble(&samples, &quick_options(), Utc::now()).unwrap();
    model.schema = "0".repeat(64);
    let path = scratch("foreign");
    model.save(&path).unwrap();

    assert!(matches!(
        EnsembleModel::load(&path),
        Err(PipelineError::ModelUnavailable(_))
    ));
    assert!(!EnsemblePredictor::load_or_fallback(Some(path.as_path())).is_trained());
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn missing_or_corrupt_model_file_is_unavailable() {
    let path = scratch("corrupt");
    assert!(matches!(
        EnsembleModel::load(&path),
        Err(PipelineError::ModelUnavailable(_))
    ));

    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{\"members\": [").unwrap();
    assert!(matches!(
        EnsembleModel::load(&path),
        Err(PipelineError::ModelUnavailable(_))
    ));
    assert!(!EnsemblePredictor::load_or_fallback(Some(path.as_path())).is_trained());
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn staleness_follows_max_age() {
    let samples = samples();
    let trained = Utc.with_ymd_and_hms(2023, 11, 1, 0, 0, 0).unwrap();
    let model = train_ensemble(&samples, &quick_options(), trained).unwrap();
    assert!(!model.needs_retrain(trained + Duration::days(6), Duration::days(7)));
    assert!(model.needs_retrain(trained + Duration::days(8), Duration::days(7)));
}

#[test]
fn trained_pipeline_predicts_upcoming_matches() {
    let history = season(8);
    let last = history.last().map(|m| m.scheduled_at).unwrap();
    let model = train_ensemble(
        &build_training_set(&history, &FeatureConfig::default(), utc()),
        &quick_options(),
        last,
    )
    .unwrap();

    let store = Arc::new(MemoryStore::with_matches(history));
    let now = last + Duration::hours(12);
    let p = SignalPipeline::new(
        PipelineConfig::default(),
        store.clone(),
        store.clone(),
        store,
        Arc::new(FixedClock::new(now)),
        EnsemblePredictor::new(Some(model)),
    )
    .unwrap();

    let next = MatchRecord {
        id: "next".to_string(),
        sport: Sport::Khl,
        team1: "Ak Bars".to_string(),
        team2: "Metallurg".to_string(),
        tournament: "KHL Regular Season".to_string(),
        scheduled_at: now + Duration::hours(5),
        status: MatchStatus::Upcoming,
        score: None,
        odds: MarketOdds {
            team1: Some(1.5),
            draw: Some(4.2),
            team2: Some(2.9),
        },
    };
    let r = p.predict_match(&next).unwrap();
    assert_eq!(r.method, PredictionMethod::Ensemble);
    assert!(r.model_id.starts_with("ensemble-"));
    assert!((r.probabilities.sum() - 1.0).abs() < 1e-6);
    assert_eq!(p.predict_match(&next).unwrap(), r);
}
