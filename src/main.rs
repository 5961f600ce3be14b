use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use signal_desk::clock::SystemClock;
use signal_desk::config::PipelineConfig;
use signal_desk::ensemble::EnsemblePredictor;
use signal_desk::logging;
use signal_desk::pipeline::SignalPipeline;
use signal_desk::sqlite_store::SqliteStore;

fn main() -> Result<()> {
    logging::load_dotenv();
    logging::init();

    let cfg = PipelineConfig::from_env();
    let db_path = parse_path_arg("--db")
        .or_else(|| cfg.db_path.clone())
        .context("unable to resolve sqlite path")?;
    let model_path = parse_path_arg("--model").or_else(|| cfg.model_path.clone());

    let store = Arc::new(SqliteStore::open(&db_path)?);
    let predictor = EnsemblePredictor::load_or_fallback(model_path.as_deref());
    if let Some(model) = predictor.model()
        && model.needs_retrain(chrono::Utc::now(), cfg.model_max_age)
    {
        warn!(
            model = %model.model_id(),
            trained_at = %model.trained_at,
            "ensemble is stale, run `train` to refresh it"
        );
    }

    let pipeline = SignalPipeline::new(
        cfg,
        store.clone(),
        store.clone(),
        store,
        Arc::new(SystemClock),
        predictor,
    )
    .context("initialise signal pipeline")?;

    let signals = pipeline
        .generate_signals()
        .context("signal run failed")?;

    println!("Signal run complete");
    println!("DB: {}", db_path.display());
    println!(
        "Mode: {}",
        if pipeline.predictor().is_trained() {
            "ensemble"
        } else {
            "rule-based"
        }
    );
    println!("Signals emitted: {}", signals.len());
    for signal in &signals {
        println!("  {signal}");
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
