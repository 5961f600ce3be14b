use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};

use signal_desk::config::PipelineConfig;
use signal_desk::logging;
use signal_desk::performance;
use signal_desk::sqlite_store::SqliteStore;
use signal_desk::store::{MatchStore, SignalStore};

const DEFAULT_DAYS: i64 = 30;

fn main() -> Result<()> {
    logging::load_dotenv();
    logging::init();

    let cfg = PipelineConfig::from_env();
    let db_path = parse_db_path_arg()
        .or(cfg.db_path)
        .context("unable to resolve sqlite path")?;
    let days = parse_days_arg().unwrap_or(DEFAULT_DAYS);

    let store = SqliteStore::open(&db_path)?;
    let since = Utc::now() - Duration::days(days);
    let signals = store.signals_since(since)?;
    let matches = store.get_matches(None, None, usize::MAX)?;
    let summary = performance::summarize(&signals, &matches);

    println!("Signal report, last {days} days");
    println!("DB: {}", db_path.display());
    println!(
        "Signals: {} ({} published, {} settled)",
        summary.total, summary.published, summary.settled
    );
    println!("Hits: {} hit_rate={:.3}", summary.hits, summary.hit_rate);
    println!("Avg confidence: {:.3}", summary.avg_confidence);
    println!("ROI: {:+.3}", summary.roi);
    for (tier, stats) in &summary.by_tier {
        println!(
            "{:<18} signals={} settled={} hits={} profit={:+.2}",
            tier.as_str(),
            stats.signals,
            stats.settled,
            stats.hits,
            stats.profit
        );
    }
    Ok(())
}

fn parse_days_arg() -> Option<i64> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix("--days=") {
            return raw.trim().parse::<i64>().ok().map(|d| d.clamp(1, 3650));
        }
        if arg == "--days" {
            return args
                .get(idx + 1)
                .and_then(|raw| raw.trim().parse::<i64>().ok())
                .map(|d| d.clamp(1, 3650));
        }
    }
    None
}

fn parse_db_path_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix("--db=") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == "--db" {
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
