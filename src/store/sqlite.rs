//! SQLite-backed [`ChatStore`] implementation.
//!
//! Schema and query shape are ported from the original `chat-db` schema:
//! two tables, `chats` (one row per message) and `topics` (many-to-many,
//! unique on `(chat_id, lower(topic))`), joined on a per-topic self-join for
//! `N`-topic `AND` queries. Comparisons are case-insensitive throughout via
//! SQL `lower()`; topics are additionally lower-cased and deduplicated in
//! Rust before any SQL runs (see [`crate::protocol::payload::dedup_topics`]).
//!
//! Prepared-statement caching mirrors the original's `prepare_cached` policy:
//! four slots cover the zero-, one-, two- and three-topic query shapes; a
//! query with four or more topics builds its join on the fly and is prepared
//! uncached, since caching unboundedly many distinct join shapes would leak
//! memory over the life of a long-running server.

use super::{ChatRecord, ChatStore};
use crate::error::StoreError;
use rusqlite::{params_from_iter, Connection};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chats (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user        TEXT NOT NULL,
    room        TEXT NOT NULL,
    message     TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chats_room ON chats (room);

CREATE TABLE IF NOT EXISTS topics (
    chat_id INTEGER NOT NULL REFERENCES chats (id) ON DELETE CASCADE,
    topic   TEXT NOT NULL,
    UNIQUE (chat_id, topic)
);
CREATE INDEX IF NOT EXISTS idx_topics_topic ON topics (topic);
CREATE INDEX IF NOT EXISTS idx_topics_chat_id ON topics (chat_id);
";

/// Number of distinct topic-count join shapes kept as cached prepared
/// statements (N = 0, 1, 2, 3). Queries with N >= 4 topics are built and
/// prepared uncached on every call.
const MAX_CACHED_QUERY_N_TOPICS: usize = 4;

pub struct SqliteChatStore {
    conn: Mutex<Connection>,
    last_error: Mutex<Option<String>>,
}

impl SqliteChatStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(SqliteChatStore {
            conn: Mutex::new(conn),
            last_error: Mutex::new(None),
        })
    }

    fn record_error(&self, err: rusqlite::Error) -> StoreError {
        let msg = err.to_string();
        *self.last_error.lock().unwrap() = Some(msg.clone());
        StoreError::Backend(msg)
    }

    /// Build the `N`-topic self-join query. Each topic gets its own aliased
    /// join against `topics`, constrained to the same `chat_id` and matched
    /// case-insensitively; the outer query orders by decreasing `id`
    /// (insertion order, not wall-clock time) and applies the caller's limit.
    fn build_query_sql(n_topics: usize) -> String {
        let mut sql = String::from(
            "SELECT c.id, c.user, c.room, c.message, c.created_at \
             FROM chats c",
        );
        for i in 0..n_topics {
            sql.push_str(&format!(
                " JOIN topics t{i} ON t{i}.chat_id = c.id AND lower(t{i}.topic) = lower(?{topic_param})",
                i = i,
                topic_param = i + 2,
            ));
        }
        sql.push_str(" WHERE lower(c.room) = lower(?1) ORDER BY c.id DESC LIMIT ?");
        sql.push_str(&(n_topics + 2).to_string());
        sql
    }

    fn topic_rows_for(conn: &Connection, chat_id: i64) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare_cached(
            "SELECT topic FROM topics WHERE chat_id = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map([chat_id], |row| row.get::<_, String>(0))?;
        rows.collect()
    }
}

impl ChatStore for SqliteChatStore {
    fn add(
        &self,
        user: &str,
        room: &str,
        topics: &[String],
        message: &str,
    ) -> Result<(), StoreError> {
        let topics = crate::protocol::payload::dedup_topics(topics);
        let created_at = chrono::Utc::now().timestamp_millis();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(|e| self.record_error(e))?;

        let chat_id: i64 = {
            tx.execute(
                "INSERT INTO chats (user, room, message, created_at) \
                 VALUES (lower(?1), lower(?2), ?3, ?4)",
                rusqlite::params![user, room, message, created_at],
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
            tx.last_insert_rowid()
        };

        for topic in &topics {
            tx.execute(
                "INSERT OR IGNORE INTO topics (chat_id, topic) VALUES (?1, ?2)",
                rusqlite::params![chat_id, topic],
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        tx.commit().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn count_room(&self, room: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chats WHERE lower(room) = lower(?1)",
                [room],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(count as usize)
    }

    fn count_topic(&self, topic: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(DISTINCT chat_id) FROM topics WHERE lower(topic) = lower(?1)",
                [topic],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(count as usize)
    }

    fn query(
        &self,
        room: &str,
        topics: &[String],
        limit: usize,
        sink: &mut dyn FnMut(ChatRecord) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        let topics = crate::protocol::payload::dedup_topics(topics);
        let conn = self.conn.lock().unwrap();
        let sql = Self::build_query_sql(topics.len());

        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(topics.len() + 2);
        params.push(Box::new(room.to_string()));
        for t in &topics {
            params.push(Box::new(t.clone()));
        }
        params.push(Box::new(limit as i64));

        fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, String, String, i64)> {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        }

        let raw_rows: Vec<(i64, String, String, String, i64)> = if topics.len() < MAX_CACHED_QUERY_N_TOPICS {
            let mut stmt = conn
                .prepare_cached(&sql)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            stmt.query_map(params_from_iter(params.iter().map(|p| p.as_ref())), map_row)
                .and_then(Iterator::collect)
                .map_err(|e| StoreError::Backend(e.to_string()))?
        } else {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            stmt.query_map(params_from_iter(params.iter().map(|p| p.as_ref())), map_row)
                .and_then(Iterator::collect)
                .map_err(|e| StoreError::Backend(e.to_string()))?
        };

        for (id, user, room, message, created_at) in raw_rows {
            let topics = Self::topic_rows_for(&conn, id)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let record = ChatRecord {
                id,
                user,
                room,
                message,
                created_at_millis: created_at,
                topics,
            };
            if let ControlFlow::Break(()) = sink(record) {
                break;
            }
        }
        Ok(())
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }
}
