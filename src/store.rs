use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};

use crate::domain::{MatchRecord, MatchStatus, Signal};
use crate::error::StoreError;
use crate::rate_limiter::PublicationState;
use crate::sport::Sport;

pub trait MatchStore: Send + Sync {
    /// Matches ordered by kickoff ascending (id breaks ties).
    fn get_matches(
        &self,
        sport: Option<Sport>,
        status: Option<MatchStatus>,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StoreError>;

    /// Upcoming matches kicking off strictly after `after`, earliest first.
    fn get_upcoming(
        &self,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StoreError>;

    /// Finished, scored matches of `team`, newest first.
    fn get_team_history(
        &self,
        team: &str,
        sport: Sport,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StoreError>;

    /// Finished, scored meetings of the two teams in either orientation,
    /// newest first.
    fn get_pair_history(
        &self,
        team1: &str,
        team2: &str,
        sport: Sport,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StoreError>;
}

pub trait SignalStore: Send + Sync {
    /// True when the match has a signal that is unpublished, or was published
    /// less than `active_window` before `now`.
    fn has_active_signal(
        &self,
        match_id: &str,
        now: DateTime<Utc>,
        active_window: Duration,
    ) -> Result<bool, StoreError>;

    fn save(&self, signal: &Signal) -> Result<i64, StoreError>;

    /// Sets the published flag once. Returns false if already published.
    fn mark_published(&self, id: i64, at: DateTime<Utc>) -> Result<bool, StoreError>;

    fn signals_since(&self, since: DateTime<Utc>) -> Result<Vec<Signal>, StoreError>;
}

/// Durable home of the rate limiter's counters.
pub trait PublicationJournal: Send + Sync {
    fn load(&self) -> Result<Option<PublicationState>, StoreError>;
    fn commit(&self, state: &PublicationState) -> Result<(), StoreError>;
}

pub(crate) fn is_active(
    published: bool,
    published_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    active_window: Duration,
) -> bool {
    if !published {
        return true;
    }
    match published_at {
        Some(at) => now - at < active_window,
        None => true,
    }
}

fn sort_by_kickoff(matches: &mut [MatchRecord]) {
    matches.sort_by(|a, b| {
        a.scheduled_at
            .cmp(&b.scheduled_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Process-local store for tests, replays and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    matches: RwLock<Vec<MatchRecord>>,
    signals: Mutex<Vec<Signal>>,
    journal: Mutex<Option<PublicationState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_matches(matches: Vec<MatchRecord>) -> Self {
        let store = Self::new();
        for m in matches {
            store.upsert_match(m);
        }
        store
    }

    /// Inserts or replaces by match id.
    pub fn upsert_match(&self, record: MatchRecord) {
        let mut guard = self.matches.write().expect("match store lock poisoned");
        match guard.iter_mut().find(|m| m.id == record.id) {
            Some(existing) => *existing = record,
            None => guard.push(record),
        }
    }

    pub fn all_matches(&self) -> Vec<MatchRecord> {
        self.matches.read().expect("match store lock poisoned").clone()
    }

    pub fn all_signals(&self) -> Vec<Signal> {
        self.signals.lock().expect("signal store lock poisoned").clone()
    }
}

impl MatchStore for MemoryStore {
    fn get_matches(
        &self,
        sport: Option<Sport>,
        status: Option<MatchStatus>,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let guard = self.matches.read().expect("match store lock poisoned");
        let mut out: Vec<MatchRecord> = guard
            .iter()
            .filter(|m| sport.is_none_or(|s| m.sport == s))
            .filter(|m| status.is_none_or(|s| m.status == s))
            .cloned()
            .collect();
        sort_by_kickoff(&mut out);
        out.truncate(limit);
        Ok(out)
    }

    fn get_upcoming(
        &self,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let guard = self.matches.read().expect("match store lock poisoned");
        let mut out: Vec<MatchRecord> = guard
            .iter()
            .filter(|m| m.status == MatchStatus::Upcoming && m.scheduled_at > after)
            .cloned()
            .collect();
        sort_by_kickoff(&mut out);
        out.truncate(limit);
        Ok(out)
    }

    fn get_team_history(
        &self,
        team: &str,
        sport: Sport,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let guard = self.matches.read().expect("match store lock poisoned");
        let mut out: Vec<MatchRecord> = guard
            .iter()
            .filter(|m| m.sport == sport && m.is_settled() && m.involves(team))
            .cloned()
            .collect();
        sort_by_kickoff(&mut out);
        out.reverse();
        out.truncate(limit);
        Ok(out)
    }

    fn get_pair_history(
        &self,
        team1: &str,
        team2: &str,
        sport: Sport,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let guard = self.matches.read().expect("match store lock poisoned");
        let mut out: Vec<MatchRecord> = guard
            .iter()
            .filter(|m| m.sport == sport && m.is_settled() && m.involves(team1) && m.involves(team2))
            .cloned()
            .collect();
        sort_by_kickoff(&mut out);
        out.reverse();
        out.truncate(limit);
        Ok(out)
    }
}

impl SignalStore for MemoryStore {
    fn has_active_signal(
        &self,
        match_id: &str,
        now: DateTime<Utc>,
        active_window: Duration,
    ) -> Result<bool, StoreError> {
        let guard = self.signals.lock().expect("signal store lock poisoned");
        Ok(guard.iter().any(|s| {
            s.match_id == match_id && is_active(s.published, s.published_at, now, active_window)
        }))
    }

    fn save(&self, signal: &Signal) -> Result<i64, StoreError> {
        let mut guard = self.signals.lock().expect("signal store lock poisoned");
        let id = guard.len() as i64 + 1;
        let mut stored = signal.clone();
        stored.id = Some(id);
        guard.push(stored);
        Ok(id)
    }

    fn mark_published(&self, id: i64, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut guard = self.signals.lock().expect("signal store lock poisoned");
        let Some(signal) = guard.iter_mut().find(|s| s.id == Some(id)) else {
            return Err(StoreError::Unavailable(format!("no signal with id {id}")));
        };
        Ok(signal.mark_published(at))
    }

    fn signals_since(&self, since: DateTime<Utc>) -> Result<Vec<Signal>, StoreError> {
        let guard = self.signals.lock().expect("signal store lock poisoned");
        Ok(guard
            .iter()
            .filter(|s| s.created_at >= since)
            .cloned()
            .collect())
    }
}

impl PublicationJournal for MemoryStore {
    fn load(&self) -> Result<Option<PublicationState>, StoreError> {
        Ok(self.journal.lock().expect("journal lock poisoned").clone())
    }

    fn commit(&self, state: &PublicationState) -> Result<(), StoreError> {
        *self.journal.lock().expect("journal lock poisoned") = Some(state.clone());
        Ok(())
    }
}
