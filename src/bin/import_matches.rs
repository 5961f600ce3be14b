use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use signal_desk::config::PipelineConfig;
use signal_desk::domain::MatchRecord;
use signal_desk::logging;
use signal_desk::sqlite_store::SqliteStore;

/// Loads a JSON array of match records and upserts it by match id.
fn main() -> Result<()> {
    logging::load_dotenv();
    logging::init();

    let input = std::env::args()
        .skip(1)
        .find(|arg| !arg.starts_with("--") && arg.ends_with(".json"))
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("usage: import_matches [--db <path>] <matches.json>"))?;

    let cfg = PipelineConfig::from_env();
    let db_path = parse_db_path_arg()
        .or(cfg.db_path)
        .context("unable to resolve sqlite path")?;

    let raw = fs::read_to_string(&input)
        .with_context(|| format!("read {}", input.display()))?;
    let matches: Vec<MatchRecord> =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", input.display()))?;

    let store = SqliteStore::open(&db_path)?;
    let upserted = store.upsert_matches(&matches)?;

    let mut per_sport: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for m in &matches {
        let entry = per_sport.entry(m.sport.tag()).or_default();
        entry.0 += 1;
        if m.is_settled() {
            entry.1 += 1;
        }
    }

    println!("Match import complete");
    println!("DB: {}", store.path().display());
    println!("Source: {}", input.display());
    println!("Matches upserted: {upserted}");
    for (sport, (total, settled)) in per_sport {
        println!("{sport}: {total} matches, {settled} settled");
    }
    Ok(())
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
