use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;

use signal_desk::config::PipelineConfig;
use signal_desk::logging;
use signal_desk::sport::Sport;
use signal_desk::sqlite_store::SqliteStore;
use signal_desk::training::{self, TrainingOptions};

fn main() -> Result<()> {
    logging::load_dotenv();
    logging::init();

    let cfg = PipelineConfig::from_env();
    let db_path = parse_path_arg("--db")
        .or_else(|| cfg.db_path.clone())
        .context("unable to resolve sqlite path")?;
    let model_path = parse_path_arg("--out")
        .or_else(|| cfg.model_path.clone())
        .context("unable to resolve model path")?;
    let sport = parse_sport_arg();

    let store = SqliteStore::open(&db_path)?;
    let matches = store.load_settled_matches(sport)?;
    let samples = training::build_training_set(&matches, &cfg.features, cfg.utc_offset);
    let model = training::train_ensemble(&samples, &TrainingOptions::default(), Utc::now())
        .context("train ensemble")?;
    model.save(&model_path)?;

    println!("Training complete");
    println!("DB: {}", db_path.display());
    println!("Model: {} -> {}", model.model_id(), model_path.display());
    println!(
        "Samples: {} settled, {} train, {} validation",
        matches.len(),
        model.training_samples,
        samples.len() - model.training_samples
    );
    for member in &model.members {
        println!(
            "{:<20} acc={:.3} brier={:.4} logloss={:.4} weight={:.3}",
            member.model.name(),
            member.validation.accuracy,
            member.validation.brier,
            member.validation.log_loss,
            member.weight
        );
    }
    Ok(())
}

fn parse_sport_arg() -> Option<Sport> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix("--sport=") {
            return Some(Sport::from_tag(raw));
        }
        if arg == "--sport" {
            return args.get(idx + 1).map(|raw| Sport::from_tag(raw));
        }
    }
    None
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
