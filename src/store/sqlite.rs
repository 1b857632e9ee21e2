use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::bets::{Bet, BetCreate, StoredBet};
use crate::clock::Clock;
use crate::eid::EventId;
use crate::semantic::storage::{decode_vector, encode_vector};

use super::{
    BetState, BetStore, CandidateStatus, EmbeddingStore, Event, EventAlias, EventCandidate,
    EventGraph, EventSummary, NewCandidate, StoreError, StoreStats, ID_CHUNK_SIZE,
};

const SCHEMA: &str = r#"
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;

    CREATE TABLE IF NOT EXISTS embeddings (
        hash TEXT NOT NULL,
        model TEXT NOT NULL,
        vector BLOB NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (hash, model)
    );

    CREATE TABLE IF NOT EXISTS bets (
        source TEXT NOT NULL,
        market_id TEXT NOT NULL,
        slug TEXT,
        title TEXT NOT NULL,
        description TEXT,
        url TEXT,
        close_time TEXT,
        content_hash TEXT NOT NULL,
        is_active INTEGER NOT NULL,
        first_seen_at INTEGER NOT NULL,
        last_seen_at INTEGER NOT NULL,
        inactive_at INTEGER,
        PRIMARY KEY (source, market_id)
    );
    CREATE INDEX IF NOT EXISTS idx_bets_content_hash ON bets(content_hash);
    CREATE INDEX IF NOT EXISTS idx_bets_active ON bets(is_active);

    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        title TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS event_aliases (
        event_id TEXT NOT NULL,
        source TEXT NOT NULL,
        market_id TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        similarity REAL,
        confidence REAL,
        method TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (source, market_id),
        FOREIGN KEY (event_id) REFERENCES events(id)
    );
    CREATE INDEX IF NOT EXISTS idx_event_aliases_event ON event_aliases(event_id);

    CREATE TABLE IF NOT EXISTS event_candidates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pair_key TEXT UNIQUE,
        a_source TEXT NOT NULL,
        a_market_id TEXT NOT NULL,
        b_source TEXT NOT NULL,
        b_market_id TEXT NOT NULL,
        similarity REAL NOT NULL,
        reason TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at INTEGER NOT NULL
    );
"#;

const BET_COLUMNS: &str = "source, market_id, slug, title, description, url, close_time, \
     is_active, first_seen_at, last_seen_at, inactive_at";

/// SQLite-backed store. Every write commits on its own.
pub struct SqliteStore {
    conn: Connection,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Open or create the database file and ensure the schema exists.
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        log::info!("Opening SQLite store at {}", path.display());
        let conn = Connection::open(path)?;
        Self::init(conn, clock)
    }

    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, clock)
    }

    fn init(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        log::debug!("store schema ready");
        Ok(Self { conn, clock })
    }

    fn now(&self) -> i64 {
        self.clock.now()
    }

    /// Distinct sources that have at least one active bet.
    pub fn list_sources(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT source FROM bets WHERE is_active = 1 ORDER BY source")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    /// Active bets of `source`, optionally filtered by a case-insensitive
    /// substring of title or description.
    pub fn search_active_bets(
        &self,
        source: &str,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredBet>, StoreError> {
        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{s}%"));
        let sql = format!(
            "SELECT {BET_COLUMNS} FROM bets
             WHERE source = ?1 AND is_active = 1
               AND (?2 IS NULL OR title LIKE ?2 OR description LIKE ?2)
             ORDER BY rowid
             LIMIT ?3"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![source, pattern, limit as i64], row_to_bet)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let count = |sql: &str| -> Result<usize, StoreError> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(StoreStats {
            active_bets: count("SELECT COUNT(*) FROM bets WHERE is_active = 1")?,
            inactive_bets: count("SELECT COUNT(*) FROM bets WHERE is_active = 0")?,
            embeddings: count("SELECT COUNT(*) FROM embeddings")?,
            events: count("SELECT COUNT(*) FROM events")?,
            aliases: count("SELECT COUNT(*) FROM event_aliases")?,
            pending_candidates: count(
                "SELECT COUNT(*) FROM event_candidates WHERE status = 'pending'",
            )?,
            conflict_candidates: count(
                "SELECT COUNT(*) FROM event_candidates WHERE status = 'conflict'",
            )?,
        })
    }
}

fn row_to_bet(row: &Row<'_>) -> rusqlite::Result<StoredBet> {
    let bet = Bet::from(BetCreate {
        source: row.get(0)?,
        market_id: row.get(1)?,
        slug: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        url: row.get(5)?,
        close_time: row.get(6)?,
    });
    Ok(StoredBet {
        bet,
        is_active: row.get::<_, i64>(7)? != 0,
        first_seen_at: row.get(8)?,
        last_seen_at: row.get(9)?,
        inactive_at: row.get(10)?,
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

impl BetStore for SqliteStore {
    fn bet_state(&self, source: &str, market_id: &str) -> Result<Option<BetState>, StoreError> {
        let state = self
            .conn
            .query_row(
                "SELECT content_hash, is_active FROM bets WHERE source = ?1 AND market_id = ?2",
                params![source, market_id],
                |row| {
                    Ok(BetState {
                        content_hash: row.get(0)?,
                        is_active: row.get::<_, i64>(1)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    fn insert_bet(&self, bet: &Bet) -> Result<(), StoreError> {
        let now = self.now();
        self.conn.execute(
            "INSERT INTO bets (source, market_id, slug, title, description, url, close_time,
                               content_hash, is_active, first_seen_at, last_seen_at, inactive_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?9, NULL)",
            params![
                bet.source(),
                bet.market_id(),
                bet.slug(),
                bet.title(),
                bet.description(),
                bet.url(),
                bet.close_time(),
                bet.content_hash(),
                now,
            ],
        )?;
        Ok(())
    }

    fn update_bet(&self, bet: &Bet) -> Result<(), StoreError> {
        let now = self.now();
        self.conn.execute(
            "UPDATE bets
             SET slug = ?1, title = ?2, description = ?3, url = ?4, close_time = ?5,
                 content_hash = ?6, is_active = 1, last_seen_at = ?7, inactive_at = NULL
             WHERE source = ?8 AND market_id = ?9",
            params![
                bet.slug(),
                bet.title(),
                bet.description(),
                bet.url(),
                bet.close_time(),
                bet.content_hash(),
                now,
                bet.source(),
                bet.market_id(),
            ],
        )?;
        Ok(())
    }

    fn mark_inactive_except(&self, source: &str, observed: &[String]) -> Result<usize, StoreError> {
        let now = self.now();
        let ids: Vec<&str> = observed
            .iter()
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let tx = self.conn.unchecked_transaction()?;

        let total_active: i64 = tx.query_row(
            "SELECT COUNT(*) FROM bets WHERE source = ? AND is_active = 1",
            [source],
            |row| row.get(0),
        )?;

        // Count observed ids that are currently active, without a NOT IN list.
        let mut active_seen: i64 = 0;
        for chunk in ids.chunks(ID_CHUNK_SIZE) {
            let sql = format!(
                "SELECT COUNT(*) FROM bets WHERE source = ? AND is_active = 1 AND market_id IN ({})",
                placeholders(chunk.len())
            );
            let bound = std::iter::once(source).chain(chunk.iter().copied());
            active_seen += tx.query_row(&sql, params_from_iter(bound), |row| row.get::<_, i64>(0))?;
        }
        let inactivated = (total_active - active_seen).max(0) as usize;

        log::info!("Blanket deactivating active bets for source={source}");
        tx.execute(
            "UPDATE bets SET is_active = 0, inactive_at = ? WHERE source = ? AND is_active = 1",
            params![now, source],
        )?;

        log::info!(
            "Reactivating {} bets for source={source} in chunks of {ID_CHUNK_SIZE}",
            ids.len()
        );
        for chunk in ids.chunks(ID_CHUNK_SIZE) {
            let sql = format!(
                "UPDATE bets SET is_active = 1, inactive_at = NULL WHERE source = ? AND market_id IN ({})",
                placeholders(chunk.len())
            );
            let bound = std::iter::once(source).chain(chunk.iter().copied());
            tx.execute(&sql, params_from_iter(bound))?;
        }

        tx.commit()?;
        Ok(inactivated)
    }

    fn get_bet(&self, source: &str, market_id: &str) -> Result<Option<StoredBet>, StoreError> {
        let sql = format!("SELECT {BET_COLUMNS} FROM bets WHERE source = ?1 AND market_id = ?2");
        let bet = self
            .conn
            .query_row(&sql, params![source, market_id], row_to_bet)
            .optional()?;
        Ok(bet)
    }

    fn active_bets(&self, source: &str) -> Result<Vec<StoredBet>, StoreError> {
        let sql = format!(
            "SELECT {BET_COLUMNS} FROM bets WHERE source = ?1 AND is_active = 1 ORDER BY rowid"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([source], row_to_bet)?;
        let bets = rows.collect::<Result<Vec<_>, _>>()?;
        log::debug!("Fetched {} active bets for source={source}", bets.len());
        Ok(bets)
    }
}

fn row_to_candidate(row: &Row<'_>) -> rusqlite::Result<EventCandidate> {
    let status = row
        .get::<_, String>(7)?
        .parse::<CandidateStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    Ok(EventCandidate {
        pair_key: row.get(0)?,
        a_source: row.get(1)?,
        a_market_id: row.get(2)?,
        b_source: row.get(3)?,
        b_market_id: row.get(4)?,
        similarity: row.get(5)?,
        reason: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        status,
        created_at: row.get(8)?,
    })
}

impl EventGraph for SqliteStore {
    fn event_for_bet(&self, source: &str, market_id: &str) -> Result<Option<EventId>, StoreError> {
        let id = self
            .conn
            .query_row(
                "SELECT event_id FROM event_aliases WHERE source = ?1 AND market_id = ?2",
                params![source, market_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(id.map(EventId::from))
    }

    fn create_event(&self, title: Option<&str>) -> Result<EventId, StoreError> {
        let id = EventId::generate();
        let now = self.now();
        log::info!("Creating event: id={id} title={title:?}");
        self.conn.execute(
            "INSERT INTO events (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![id.as_str(), title, now],
        )?;
        Ok(id)
    }

    fn link_bet(&self, alias: &EventAlias) -> Result<(), StoreError> {
        let now = self.now();
        log::info!(
            "Linking bet to event: event={} {}:{} method={} sim={:?}",
            alias.event_id,
            alias.source,
            alias.market_id,
            alias.method,
            alias.similarity
        );
        self.conn.execute(
            "INSERT INTO event_aliases (event_id, source, market_id, content_hash, similarity,
                                        confidence, method, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(source, market_id) DO UPDATE SET
               event_id = excluded.event_id,
               content_hash = excluded.content_hash,
               similarity = excluded.similarity,
               confidence = excluded.confidence,
               method = excluded.method,
               updated_at = excluded.updated_at",
            params![
                alias.event_id.as_str(),
                alias.source,
                alias.market_id,
                alias.content_hash,
                alias.similarity,
                alias.confidence,
                alias.method,
                now,
            ],
        )?;
        self.conn.execute(
            "UPDATE events SET updated_at = ?1 WHERE id = ?2",
            params![now, alias.event_id.as_str()],
        )?;
        Ok(())
    }

    fn enqueue_candidate(&self, candidate: &NewCandidate) -> Result<bool, StoreError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO event_candidates (pair_key, a_source, a_market_id, b_source,
                                                     b_market_id, similarity, reason, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                candidate.pair_key,
                candidate.a_source,
                candidate.a_market_id,
                candidate.b_source,
                candidate.b_market_id,
                candidate.similarity,
                candidate.reason,
                candidate.status.as_str(),
                self.now(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn aliases(&self, event_id: &EventId) -> Result<Vec<EventAlias>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, source, market_id, content_hash, similarity, confidence, method
             FROM event_aliases WHERE event_id = ?1 ORDER BY created_at, source, market_id",
        )?;
        let rows = stmt.query_map([event_id.as_str()], |row| {
            Ok(EventAlias {
                event_id: EventId::from(row.get::<_, String>(0)?),
                source: row.get(1)?,
                market_id: row.get(2)?,
                content_hash: row.get(3)?,
                similarity: row.get(4)?,
                confidence: row.get(5)?,
                method: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn candidates(&self, status: Option<CandidateStatus>) -> Result<Vec<EventCandidate>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT pair_key, a_source, a_market_id, b_source, b_market_id, similarity, reason,
                    status, created_at
             FROM event_candidates
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY id",
        )?;
        let rows = stmt.query_map([status.map(|s| s.as_str())], row_to_candidate)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn events(&self) -> Result<Vec<EventSummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT e.id, e.title, e.created_at, e.updated_at, COUNT(a.market_id)
             FROM events e
             LEFT JOIN event_aliases a ON a.event_id = e.id
             GROUP BY e.id
             ORDER BY e.created_at, e.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EventSummary {
                event: Event {
                    id: EventId::from(row.get::<_, String>(0)?),
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                },
                alias_count: row.get::<_, i64>(4)? as usize,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl EmbeddingStore for SqliteStore {
    fn get_embedding(&self, hash: &str, model: &str) -> Result<Option<Vec<f32>>, StoreError> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT vector FROM embeddings WHERE hash = ?1 AND model = ?2",
                params![hash, model],
                |row| row.get(0),
            )
            .optional()?;

        blob.map(|b| {
            decode_vector(&b).map_err(|source| StoreError::InvalidVector {
                hash: hash.to_string(),
                source,
            })
        })
        .transpose()
    }

    fn put_embedding(&self, hash: &str, model: &str, vector: &[f32]) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO embeddings (hash, model, vector, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(hash, model) DO UPDATE SET
               vector = excluded.vector,
               created_at = excluded.created_at",
            params![hash, model, encode_vector(vector), self.now()],
        )?;
        Ok(())
    }
}
