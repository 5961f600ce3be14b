use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use chrono::{Duration, FixedOffset, Local, Offset};

use crate::gate::GateConfig;
use crate::rate_limiter::LimiterConfig;
use crate::sport::Sport;

const CACHE_DIR: &str = "signal_desk";

/// Windows and thresholds shared by the team aggregator and the H2H analyzer.
#[derive(Debug, Clone)]
pub struct FeatureConfig {
    pub history_window: usize,
    pub min_history: usize,
    pub recent_form: usize,
    pub ttl: Duration,
    pub h2h_lookback: usize,
    pub h2h_min_meetings: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            history_window: 100,
            min_history: 10,
            recent_form: 10,
            ttl: Duration::seconds(3600),
            h2h_lookback: 20,
            h2h_min_meetings: 2,
        }
    }
}

impl FeatureConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            history_window: env_usize("SIGNAL_HISTORY_WINDOW", d.history_window, 10, 500),
            min_history: env_usize("SIGNAL_MIN_HISTORY", d.min_history, 1, 100),
            recent_form: env_usize("SIGNAL_RECENT_FORM", d.recent_form, 1, 50),
            ttl: Duration::seconds(env_i64("SIGNAL_FEATURE_TTL_SECS", 3600, 60, 86_400)),
            h2h_lookback: env_usize("SIGNAL_H2H_LOOKBACK", d.h2h_lookback, 2, 100),
            h2h_min_meetings: env_usize("SIGNAL_H2H_MIN_MEETINGS", d.h2h_min_meetings, 1, 20),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub features: FeatureConfig,
    pub gate: GateConfig,
    pub limiter: LimiterConfig,
    pub active_window: Duration,
    /// Local time zone used for weekend/evening flags and the daily cap reset.
    pub utc_offset: FixedOffset,
    pub kickoff_buffer: Duration,
    pub upcoming_limit: usize,
    pub channels: HashMap<Sport, String>,
    pub db_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub model_max_age: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            gate: GateConfig::default(),
            limiter: LimiterConfig::default(),
            active_window: Duration::hours(24),
            utc_offset: utc(),
            kickoff_buffer: Duration::minutes(30),
            upcoming_limit: 50,
            channels: default_channels(),
            db_path: app_cache_dir().map(|dir| dir.join("signals.sqlite")),
            model_path: app_cache_dir().map(|dir| dir.join("ensemble.json")),
            model_max_age: Duration::days(7),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();

        let local_minutes = Local::now().offset().fix().local_minus_utc() as i64 / 60;
        let offset_minutes = env_i64("SIGNAL_UTC_OFFSET_MINUTES", local_minutes, -720, 840);
        let utc_offset = FixedOffset::east_opt((offset_minutes * 60) as i32).unwrap_or(d.utc_offset);

        let mut channels = d.channels;
        for sport in Sport::ALL {
            let key = format!("SIGNAL_CHANNEL_{}", sport.tag().to_ascii_uppercase());
            if let Some(name) = env_string(&key) {
                channels.insert(sport, name);
            }
        }

        Self {
            features: FeatureConfig::from_env(),
            gate: GateConfig {
                min_confidence: env_f64("SIGNAL_MIN_CONFIDENCE", d.gate.min_confidence, 0.0, 1.0),
                min_ev: env_f64("SIGNAL_MIN_EV", d.gate.min_ev, -1.0, 5.0),
                rule_based_min_confidence: env_f64(
                    "SIGNAL_RULE_BASED_MIN_CONFIDENCE",
                    d.gate.rule_based_min_confidence,
                    0.0,
                    1.0,
                ),
                rule_based_min_ev: env_f64(
                    "SIGNAL_RULE_BASED_MIN_EV",
                    d.gate.rule_based_min_ev,
                    -1.0,
                    5.0,
                ),
            },
            limiter: LimiterConfig {
                max_signals_per_day: env_usize(
                    "SIGNAL_MAX_PER_DAY",
                    d.limiter.max_signals_per_day,
                    1,
                    100,
                ),
                channel_cooldown: Duration::minutes(env_i64(
                    "SIGNAL_CHANNEL_COOLDOWN_MIN",
                    d.limiter.channel_cooldown.num_minutes(),
                    0,
                    1440,
                )),
                utc_offset,
            },
            active_window: Duration::hours(env_i64("SIGNAL_ACTIVE_WINDOW_HOURS", 24, 1, 720)),
            utc_offset,
            kickoff_buffer: Duration::minutes(env_i64("SIGNAL_KICKOFF_BUFFER_MIN", 30, 0, 1440)),
            upcoming_limit: env_usize("SIGNAL_UPCOMING_LIMIT", d.upcoming_limit, 1, 1000),
            channels,
            db_path: env_string("SIGNAL_DB_PATH").map(PathBuf::from).or(d.db_path),
            model_path: env_string("SIGNAL_MODEL_PATH").map(PathBuf::from).or(d.model_path),
            model_max_age: Duration::days(env_i64("SIGNAL_MODEL_MAX_AGE_DAYS", 7, 1, 365)),
        }
    }

    pub fn channel_for(&self, sport: Sport) -> String {
        self.channels
            .get(&sport)
            .cloned()
            .unwrap_or_else(|| sport.profile().default_channel())
    }
}

fn default_channels() -> HashMap<Sport, String> {
    Sport::ALL
        .iter()
        .map(|s| (*s, s.profile().default_channel()))
        .collect()
}

pub fn utc() -> FixedOffset {
    Offset::fix(&chrono::Utc)
}

/// `$XDG_CACHE_HOME/signal_desk`, falling back to `$HOME/.cache/signal_desk`.
pub fn app_cache_dir() -> Option<PathBuf> {
    if let Ok(base) = env::var("XDG_CACHE_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(CACHE_DIR));
        }
    }
    let home = env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR))
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_usize(key: &str, default: usize, min: usize, max: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}

fn env_i64(key: &str, default: i64, min: i64, max: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}

fn env_f64(key: &str, default: f64, min: f64, max: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}
