use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::calibration::Outcome;
use crate::domain::{MarketOdds, MatchRecord, MatchStatus, PredictionMethod, Score, Signal, team_key};
use crate::error::StoreError;
use crate::gate::SignalTier;
use crate::rate_limiter::PublicationState;
use crate::sport::Sport;
use crate::store::{MatchStore, PublicationJournal, SignalStore, is_active};

/// SQLite-backed implementation of every store the pipeline consumes.
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

pub fn open_db(path: &Path) -> anyhow::Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS matches (
            match_id TEXT PRIMARY KEY,
            sport TEXT NOT NULL,
            team1 TEXT NOT NULL,
            team2 TEXT NOT NULL,
            team1_key TEXT NOT NULL,
            team2_key TEXT NOT NULL,
            tournament TEXT NOT NULL,
            scheduled_at TEXT NOT NULL,
            status TEXT NOT NULL,
            team1_score INTEGER NULL,
            team2_score INTEGER NULL,
            odds_team1 REAL NULL,
            odds_draw REAL NULL,
            odds_team2 REAL NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_status ON matches(status, scheduled_at);
        CREATE INDEX IF NOT EXISTS idx_matches_team1 ON matches(sport, team1_key);
        CREATE INDEX IF NOT EXISTS idx_matches_team2 ON matches(sport, team2_key);

        CREATE TABLE IF NOT EXISTS signals (
            signal_id INTEGER PRIMARY KEY AUTOINCREMENT,
            match_id TEXT NOT NULL,
            sport TEXT NOT NULL,
            team1 TEXT NOT NULL,
            team2 TEXT NOT NULL,
            outcome TEXT NOT NULL,
            confidence REAL NOT NULL,
            expected_value REAL NOT NULL,
            odds REAL NULL,
            tier TEXT NOT NULL,
            method TEXT NOT NULL,
            channel TEXT NOT NULL,
            created_at TEXT NOT NULL,
            published INTEGER NOT NULL,
            published_at TEXT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_signals_match ON signals(match_id);
        CREATE INDEX IF NOT EXISTS idx_signals_created ON signals(created_at);

        CREATE TABLE IF NOT EXISTS publication_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            state_json TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Unavailable(format!("bad timestamp {raw:?}: {e}")))
}

fn bool_to_i64(v: bool) -> i64 {
    if v { 1 } else { 0 }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

const MATCH_COLUMNS: &str = "match_id, sport, team1, team2, tournament, scheduled_at, status, \
     team1_score, team2_score, odds_team1, odds_draw, odds_team2";

struct MatchRow {
    id: String,
    sport: String,
    team1: String,
    team2: String,
    tournament: String,
    scheduled_at: String,
    status: String,
    team1_score: Option<i64>,
    team2_score: Option<i64>,
    odds: MarketOdds,
}

impl MatchRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sport: row.get(1)?,
            team1: row.get(2)?,
            team2: row.get(3)?,
            tournament: row.get(4)?,
            scheduled_at: row.get(5)?,
            status: row.get(6)?,
            team1_score: row.get(7)?,
            team2_score: row.get(8)?,
            odds: MarketOdds {
                team1: row.get(9)?,
                draw: row.get(10)?,
                team2: row.get(11)?,
            },
        })
    }

    fn into_record(self) -> Result<MatchRecord, StoreError> {
        let status = MatchStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Unavailable(format!("bad match status {:?}", self.status)))?;
        let score = match (self.team1_score, self.team2_score) {
            (Some(a), Some(b)) => Some(Score {
                team1: u32::try_from(a).unwrap_or(0),
                team2: u32::try_from(b).unwrap_or(0),
            }),
            _ => None,
        };
        Ok(MatchRecord {
            id: self.id,
            sport: Sport::from_tag(&self.sport),
            team1: self.team1,
            team2: self.team2,
            tournament: self.tournament,
            scheduled_at: parse_ts(&self.scheduled_at)?,
            status,
            score,
            odds: self.odds,
        })
    }
}

struct SignalRow {
    id: i64,
    match_id: String,
    sport: String,
    team1: String,
    team2: String,
    outcome: String,
    confidence: f64,
    expected_value: f64,
    odds: Option<f64>,
    tier: String,
    method: String,
    channel: String,
    created_at: String,
    published: i64,
    published_at: Option<String>,
}

impl SignalRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            match_id: row.get(1)?,
            sport: row.get(2)?,
            team1: row.get(3)?,
            team2: row.get(4)?,
            outcome: row.get(5)?,
            confidence: row.get(6)?,
            expected_value: row.get(7)?,
            odds: row.get(8)?,
            tier: row.get(9)?,
            method: row.get(10)?,
            channel: row.get(11)?,
            created_at: row.get(12)?,
            published: row.get(13)?,
            published_at: row.get(14)?,
        })
    }

    fn into_signal(self) -> Result<Signal, StoreError> {
        let bad = |what: &str, raw: &str| StoreError::Unavailable(format!("bad {what} {raw:?}"));
        Ok(Signal {
            id: Some(self.id),
            outcome: Outcome::parse(&self.outcome).ok_or_else(|| bad("outcome", &self.outcome))?,
            tier: SignalTier::parse(&self.tier).ok_or_else(|| bad("tier", &self.tier))?,
            method: PredictionMethod::parse(&self.method).ok_or_else(|| bad("method", &self.method))?,
            created_at: parse_ts(&self.created_at)?,
            published_at: self.published_at.as_deref().map(parse_ts).transpose()?,
            match_id: self.match_id,
            sport: Sport::from_tag(&self.sport),
            team1: self.team1,
            team2: self.team2,
            confidence: self.confidence,
            expected_value: self.expected_value,
            odds: self.odds,
            channel: self.channel,
            published: self.published != 0,
        })
    }
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = open_db(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite")?;
        init_schema(&conn)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts or refreshes matches by id in one transaction.
    pub fn upsert_matches(&self, matches: &[MatchRecord]) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock().expect("sqlite lock poisoned");
        let tx = conn.transaction()?;
        let now = ts(Utc::now());
        for m in matches {
            tx.execute(
                r#"
                INSERT INTO matches (
                    match_id, sport, team1, team2, team1_key, team2_key, tournament,
                    scheduled_at, status, team1_score, team2_score,
                    odds_team1, odds_draw, odds_team2, updated_at
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                    ?8, ?9, ?10, ?11,
                    ?12, ?13, ?14, ?15
                )
                ON CONFLICT(match_id) DO UPDATE SET
                    sport = excluded.sport,
                    team1 = excluded.team1,
                    team2 = excluded.team2,
                    team1_key = excluded.team1_key,
                    team2_key = excluded.team2_key,
                    tournament = excluded.tournament,
                    scheduled_at = excluded.scheduled_at,
                    status = excluded.status,
                    team1_score = excluded.team1_score,
                    team2_score = excluded.team2_score,
                    odds_team1 = excluded.odds_team1,
                    odds_draw = excluded.odds_draw,
                    odds_team2 = excluded.odds_team2,
                    updated_at = excluded.updated_at
                "#,
                params![
                    m.id,
                    m.sport.tag(),
                    m.team1,
                    m.team2,
                    team_key(&m.team1),
                    team_key(&m.team2),
                    m.tournament,
                    ts(m.scheduled_at),
                    m.status.as_str(),
                    m.score.map(|s| s.team1 as i64),
                    m.score.map(|s| s.team2 as i64),
                    m.odds.team1,
                    m.odds.draw,
                    m.odds.team2,
                    now,
                ],
            )?;
        }
        tx.commit()?;
        Ok(matches.len())
    }

    /// Every finished, scored match in kickoff order; the training input.
    pub fn load_settled_matches(&self, sport: Option<Sport>) -> Result<Vec<MatchRecord>, StoreError> {
        let all = self.get_matches(sport, Some(MatchStatus::Finished), usize::MAX)?;
        Ok(all.into_iter().filter(|m| m.score.is_some()).collect())
    }

    fn query_matches(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, MatchRow::read)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_record()?);
        }
        Ok(out)
    }
}

impl MatchStore for SqliteStore {
    fn get_matches(
        &self,
        sport: Option<Sport>,
        status: Option<MatchStatus>,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM matches
             WHERE (?1 IS NULL OR sport = ?1)
               AND (?2 IS NULL OR status = ?2)
             ORDER BY scheduled_at ASC, match_id ASC
             LIMIT ?3"
        );
        self.query_matches(
            &sql,
            params![
                sport.map(|s| s.tag()),
                status.map(|s| s.as_str()),
                sql_limit(limit)
            ],
        )
    }

    fn get_upcoming(
        &self,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM matches
             WHERE status = 'upcoming' AND scheduled_at > ?1
             ORDER BY scheduled_at ASC, match_id ASC
             LIMIT ?2"
        );
        self.query_matches(&sql, params![ts(after), sql_limit(limit)])
    }

    fn get_team_history(
        &self,
        team: &str,
        sport: Sport,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM matches
             WHERE sport = ?1
               AND status = 'finished'
               AND team1_score IS NOT NULL
               AND team2_score IS NOT NULL
               AND (team1_key = ?2 OR team2_key = ?2)
             ORDER BY scheduled_at DESC, match_id DESC
             LIMIT ?3"
        );
        self.query_matches(&sql, params![sport.tag(), team_key(team), sql_limit(limit)])
    }

    fn get_pair_history(
        &self,
        team1: &str,
        team2: &str,
        sport: Sport,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM matches
             WHERE sport = ?1
               AND status = 'finished'
               AND team1_score IS NOT NULL
               AND team2_score IS NOT NULL
               AND ((team1_key = ?2 AND team2_key = ?3) OR (team1_key = ?3 AND team2_key = ?2))
             ORDER BY scheduled_at DESC, match_id DESC
             LIMIT ?4"
        );
        self.query_matches(
            &sql,
            params![sport.tag(), team_key(team1), team_key(team2), sql_limit(limit)],
        )
    }
}

impl SignalStore for SqliteStore {
    fn has_active_signal(
        &self,
        match_id: &str,
        now: DateTime<Utc>,
        active_window: Duration,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        let mut stmt =
            conn.prepare("SELECT published, published_at FROM signals WHERE match_id = ?1")?;
        let rows = stmt.query_map(params![match_id], |row| {
            Ok((row.get::<_, i64>(0)? != 0, row.get::<_, Option<String>>(1)?))
        })?;
        for row in rows {
            let (published, published_at) = row?;
            let published_at = published_at.as_deref().map(parse_ts).transpose()?;
            if is_active(published, published_at, now, active_window) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn save(&self, signal: &Signal) -> Result<i64, StoreError> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        conn.execute(
            "INSERT INTO signals(match_id, sport, team1, team2, outcome, confidence, expected_value,
                                 odds, tier, method, channel, created_at, published, published_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                signal.match_id,
                signal.sport.tag(),
                signal.team1,
                signal.team2,
                signal.outcome.label(),
                signal.confidence,
                signal.expected_value,
                signal.odds,
                signal.tier.as_str(),
                signal.method.as_str(),
                signal.channel,
                ts(signal.created_at),
                bool_to_i64(signal.published),
                signal.published_at.map(ts),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn mark_published(&self, id: i64, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        let changed = conn.execute(
            "UPDATE signals SET published = 1, published_at = ?2
             WHERE signal_id = ?1 AND published = 0",
            params![id, ts(at)],
        )?;
        if changed > 0 {
            return Ok(true);
        }
        let exists = conn
            .query_row(
                "SELECT 1 FROM signals WHERE signal_id = ?1",
                params![id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::Unavailable(format!("no signal with id {id}"))),
        }
    }

    fn signals_since(&self, since: DateTime<Utc>) -> Result<Vec<Signal>, StoreError> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT signal_id, match_id, sport, team1, team2, outcome, confidence, expected_value,
                    odds, tier, method, channel, created_at, published, published_at
             FROM signals
             WHERE created_at >= ?1
             ORDER BY created_at ASC, signal_id ASC",
        )?;
        let rows = stmt.query_map(params![ts(since)], SignalRow::read)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_signal()?);
        }
        Ok(out)
    }
}

impl PublicationJournal for SqliteStore {
    fn load(&self) -> Result<Option<PublicationState>, StoreError> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        let raw = conn
            .query_row(
                "SELECT state_json FROM publication_state WHERE id = 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn commit(&self, state: &PublicationState) -> Result<(), StoreError> {
        let json = serde_json::to_string(state)?;
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        conn.execute(
            "INSERT INTO publication_state(id, state_json, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET state_json = excluded.state_json,
                                           updated_at = excluded.updated_at",
            params![json, ts(Utc::now())],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str, hour: u32, status: MatchStatus) -> MatchRecord {
        MatchRecord {
            id: id.to_string(),
            sport: Sport::Football,
            team1: "Arsenal".to_string(),
            team2: "Chelsea".to_string(),
            tournament: "Premier League".to_string(),
            scheduled_at: Utc.with_ymd_and_hms(2024, 3, 2, hour, 0, 0).unwrap(),
            status,
            score: (status == MatchStatus::Finished).then_some(Score { team1: 2, team2: 2 }),
            odds: MarketOdds {
                team1: Some(2.1),
                draw: Some(3.3),
                team2: None,
            },
        }
    }

    #[test]
    fn matches_survive_a_round_trip_through_sqlite() {
        let store = SqliteStore::in_memory().unwrap();
        let input = vec![
            record("x1", 12, MatchStatus::Finished),
            record("x2", 15, MatchStatus::Upcoming),
        ];
        assert_eq!(store.upsert_matches(&input).unwrap(), 2);
        let upcoming = store
            .get_matches(Some(Sport::Football), Some(MatchStatus::Upcoming), 10)
            .unwrap();
        assert_eq!(upcoming, vec![input[1].clone()]);
        let history = store.get_team_history("chelsea", Sport::Football, 10).unwrap();
        assert_eq!(history, vec![input[0].clone()]);
        let pair = store
            .get_pair_history("chelsea", "arsenal", Sport::Football, 10)
            .unwrap();
        assert_eq!(pair, vec![input[0].clone()]);
    }

    #[test]
    fn upcoming_query_is_bounded_below() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .upsert_matches(&[
                record("soon", 10, MatchStatus::Upcoming),
                record("x2", 12, MatchStatus::Finished),
                record("later", 15, MatchStatus::Upcoming),
            ])
            .unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap();
        let ids: Vec<String> = store
            .get_upcoming(after, 10)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["later".to_string()]);
    }

    #[test]
    fn journal_starts_empty_and_keeps_last_commit() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.load().unwrap(), None);
        let mut state = PublicationState::default();
        let at = Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap();
        state.record("@signals_football", at, crate::config::utc());
        store.commit(&state).unwrap();
        state.record("@signals_football", at, crate::config::utc());
        store.commit(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
    }
}
