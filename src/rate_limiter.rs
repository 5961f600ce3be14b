use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::Signal;
use crate::error::StoreError;
use crate::store::{PublicationJournal, SignalStore};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterConfig {
    pub max_signals_per_day: usize,
    pub channel_cooldown: Duration,
    /// Local zone whose midnight resets the daily counter.
    pub utc_offset: FixedOffset,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_signals_per_day: 10,
            channel_cooldown: Duration::minutes(60),
            utc_offset: crate::config::utc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    pub day: NaiveDate,
    pub emitted_today: usize,
    pub last_publish: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    Cooldown,
    DailyCap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicationState {
    pub channels: BTreeMap<String, ChannelState>,
}

impl PublicationState {
    pub fn last_publish(&self, channel: &str) -> Option<DateTime<Utc>> {
        self.channels.get(channel).and_then(|c| c.last_publish)
    }

    /// Emissions on `channel` during the local day containing `now`.
    pub fn emitted_today(&self, channel: &str, now: DateTime<Utc>, offset: FixedOffset) -> usize {
        let today = local_day(now, offset);
        self.channels
            .get(channel)
            .filter(|c| c.day == today)
            .map(|c| c.emitted_today)
            .unwrap_or(0)
    }

    pub fn blocked(&self, channel: &str, now: DateTime<Utc>, cfg: &LimiterConfig) -> Option<Block> {
        if let Some(last) = self.last_publish(channel)
            && now - last < cfg.channel_cooldown
        {
            return Some(Block::Cooldown);
        }
        if self.emitted_today(channel, now, cfg.utc_offset) >= cfg.max_signals_per_day {
            return Some(Block::DailyCap);
        }
        None
    }

    pub fn record(&mut self, channel: &str, now: DateTime<Utc>, offset: FixedOffset) {
        let today = local_day(now, offset);
        let entry = self
            .channels
            .entry(channel.to_string())
            .or_insert(ChannelState {
                day: today,
                emitted_today: 0,
                last_publish: None,
            });
        if entry.day != today {
            entry.day = today;
            entry.emitted_today = 0;
        }
        entry.emitted_today += 1;
        entry.last_publish = Some(now);
    }
}

fn local_day(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    at.with_timezone(&offset).date_naive()
}

/// Best first: confidence desc, newest first, then match id. Later duplicates
/// of a match id are dropped.
pub fn rank_candidates(mut candidates: Vec<Signal>) -> Vec<Signal> {
    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.match_id.cmp(&b.match_id))
    });
    let mut seen = HashSet::new();
    candidates.retain(|c| seen.insert(c.match_id.clone()));
    candidates
}

/// Sole owner of [`PublicationState`]. The whole dedup, cooldown, cap and
/// write sequence runs under one lock.
pub struct RateLimiter {
    cfg: LimiterConfig,
    active_window: Duration,
    journal: Arc<dyn PublicationJournal>,
    state: Mutex<PublicationState>,
}

impl RateLimiter {
    pub fn new(
        cfg: LimiterConfig,
        active_window: Duration,
        journal: Arc<dyn PublicationJournal>,
    ) -> Result<Self, StoreError> {
        let state = journal.load()?.unwrap_or_default();
        Ok(Self {
            cfg,
            active_window,
            journal,
            state: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.cfg
    }

    pub fn snapshot(&self) -> PublicationState {
        self.state.lock().expect("publication state lock poisoned").clone()
    }

    /// Saves and returns the admitted signals in emission order. Any store
    /// failure aborts; counters are committed only after the signal is saved.
    pub fn admit(
        &self,
        candidates: Vec<Signal>,
        store: &dyn SignalStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<Signal>, StoreError> {
        let mut state = self.state.lock().expect("publication state lock poisoned");
        let ranked = rank_candidates(candidates);
        let total = ranked.len();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut emitted = Vec::new();

        for mut candidate in ranked {
            if blocked.contains(&candidate.channel) {
                continue;
            }
            if let Some(reason) = state.blocked(&candidate.channel, now, &self.cfg) {
                debug!(channel = %candidate.channel, ?reason, "channel closed for this run");
                blocked.insert(candidate.channel.clone());
                continue;
            }
            if store.has_active_signal(&candidate.match_id, now, self.active_window)? {
                debug!(match_id = %candidate.match_id, "active signal exists, skipping");
                continue;
            }

            let id = store.save(&candidate)?;
            let mut next = state.clone();
            next.record(&candidate.channel, now, self.cfg.utc_offset);
            self.journal.commit(&next)?;
            *state = next;

            candidate.id = Some(id);
            emitted.push(candidate);
        }

        info!(candidates = total, emitted = emitted.len(), "rate limiter pass done");
        Ok(emitted)
    }
}
