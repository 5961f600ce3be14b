use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};

use signal_desk::calibration::{
    Outcome, Prob3, calibration_bins, evaluate_probs, expected_calibration_error,
};
use signal_desk::config::PipelineConfig;
use signal_desk::domain::MatchRecord;
use signal_desk::ensemble::EnsemblePredictor;
use signal_desk::logging;
use signal_desk::sqlite_store::SqliteStore;
use signal_desk::training;
use signal_desk::value::outcome_value;

const CALIBRATION_BINS: usize = 10;

/// Replays settled matches through the current predictor with features built
/// as of each kickoff, then grades probabilities and the gate's picks.
fn main() -> Result<()> {
    logging::load_dotenv();
    logging::init();

    let cfg = PipelineConfig::from_env();
    let db_path = parse_path_arg("--db")
        .or_else(|| cfg.db_path.clone())
        .context("unable to resolve sqlite path")?;
    let model_path = parse_path_arg("--model").or_else(|| cfg.model_path.clone());

    let store = SqliteStore::open(&db_path)?;
    let matches = store.load_settled_matches(None)?;
    let by_id: HashMap<&str, &MatchRecord> = matches.iter().map(|m| (m.id.as_str(), m)).collect();
    let predictor = EnsemblePredictor::load_or_fallback(model_path.as_deref());
    let samples = training::build_training_set(&matches, &cfg.features, cfg.utc_offset);

    let mut probs: Vec<Prob3> = Vec::with_capacity(samples.len());
    let mut labels: Vec<Outcome> = Vec::with_capacity(samples.len());
    let mut picks = 0usize;
    let mut hits = 0usize;
    let mut staked = 0usize;
    let mut profit = 0.0;
    for sample in &samples {
        let Some(record) = by_id.get(sample.match_id.as_str()) else {
            continue;
        };
        let prediction =
            match predictor.predict(&sample.match_id, &sample.features, sample.sport.profile()) {
                Ok(p) => p,
                Err(err) => {
                    println!("skip {}: {err}", sample.match_id);
                    continue;
                }
            };
        probs.push(prediction.probabilities);
        labels.push(sample.label);

        let (ev, price) =
            outcome_value(&prediction.probabilities, prediction.outcome, &record.odds);
        if cfg
            .gate
            .evaluate(prediction.confidence, ev, prediction.method)
            .is_none()
        {
            continue;
        }
        picks += 1;
        let hit = prediction.outcome == sample.label;
        if hit {
            hits += 1;
        }
        if let Some(price) = price {
            staked += 1;
            profit += if hit { price - 1.0 } else { -1.0 };
        }
    }

    let metrics = evaluate_probs(&probs, &labels);
    println!("Backtest");
    println!("DB: {}", db_path.display());
    println!(
        "Predictor: {}",
        predictor
            .model()
            .map(|m| m.model_id())
            .unwrap_or_else(|| "rule-based".to_string())
    );
    println!("Matches: {}", metrics.samples);
    println!("Accuracy: {:.3}", metrics.accuracy);
    println!("Brier: {:.4}", metrics.brier);
    println!("LogLoss: {:.4}", metrics.log_loss);
    for class in Outcome::ALL {
        let bins = calibration_bins(&probs, &labels, class, CALIBRATION_BINS);
        println!("ECE {}: {:.4}", class.label(), expected_calibration_error(&bins));
    }
    println!("Gated picks: {picks}");
    if picks > 0 {
        println!("Hit rate: {:.3}", hits as f64 / picks as f64);
    }
    if staked > 0 {
        println!("ROI: {:+.3} over {staked} priced picks", profit / staked as f64);
    }
    Ok(())
}

fn parse_path_arg(flag: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{flag}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&prefix) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == flag {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(PathBuf::from(next));
            }
        }
    }
    None
}
