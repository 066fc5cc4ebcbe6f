use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{LogQuery, LogStore, Order};
use crate::error::StoreError;
use crate::record::{LogRecord, LogStream};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS task_log_line (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    stream TEXT NOT NULL,
    message TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_task_log_line_task_id ON task_log_line(task_id, id);
";

/// SQLite-backed store. Every call runs on the blocking pool; the connection is
/// shared behind a mutex so inserts are serialized and ids stay ordered.
#[derive(Clone)]
pub struct SqliteLogStore {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    conn: Connection,
    last_ts: Option<DateTime<Utc>>,
}

impl SqliteLogStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        let last_ts: Option<String> = conn
            .query_row(
                "SELECT timestamp FROM task_log_line ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let last_ts = last_ts.map(|s| parse_ts(&s)).transpose()?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner { conn, last_ts })),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Inner) -> Result<T, StoreError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut g = inner.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut g)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Timestamp(format!("{s}: {e}")))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode(raw: (i64, String, String, String, String)) -> Result<LogRecord, StoreError> {
    let (id, job_id, timestamp, stream, message) = raw;
    let stream = LogStream::parse(&stream)
        .ok_or_else(|| StoreError::Query(format!("unknown stream '{stream}' for id {id}")))?;
    Ok(LogRecord {
        id,
        job_id,
        stream,
        timestamp: parse_ts(&timestamp)?,
        message,
    })
}

#[async_trait]
impl LogStore for SqliteLogStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(
        &self,
        job_id: &str,
        stream: LogStream,
        message: &str,
    ) -> Result<LogRecord, StoreError> {
        let job_id = job_id.to_string();
        let message = message.to_string();
        self.with_conn(move |inner| {
            // Round to the stored precision before comparing so a re-read
            // record equals the one returned here.
            let now = parse_ts(&format_ts(&Utc::now()))?;
            let timestamp = match inner.last_ts {
                Some(last) if last > now => last,
                _ => now,
            };
            inner
                .conn
                .execute(
                    "INSERT INTO task_log_line (task_id, timestamp, stream, message) VALUES (?1, ?2, ?3, ?4)",
                    params![job_id, format_ts(&timestamp), stream.as_str(), message],
                )
                .map_err(|e| StoreError::WriteFailure {
                    task_id: job_id.clone(),
                    reason: e.to_string(),
                })?;
            inner.last_ts = Some(timestamp);
            Ok(LogRecord {
                id: inner.conn.last_insert_rowid(),
                job_id,
                stream,
                timestamp,
                message,
            })
        })
        .await
    }

    async fn query(&self, job_id: &str, query: LogQuery) -> Result<Vec<LogRecord>, StoreError> {
        let job_id = job_id.to_string();
        self.with_conn(move |inner| {
            let order = match query.order {
                Order::Ascending => "ASC",
                Order::Descending => "DESC",
            };
            let limit = query
                .limit
                .map(|n| i64::try_from(n).unwrap_or(i64::MAX))
                .unwrap_or(-1);
            let sql = format!(
                "SELECT id, task_id, timestamp, stream, message FROM task_log_line \
                 WHERE task_id = ?1 ORDER BY id {order} LIMIT ?2"
            );
            let mut stmt = inner.conn.prepare(&sql)?;
            let rows = stmt.query_map(params![job_id, limit], row_to_record)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(decode(row?)?);
            }
            Ok(out)
        })
        .await
    }

    async fn count(&self, job_id: &str) -> Result<usize, StoreError> {
        let job_id = job_id.to_string();
        self.with_conn(move |inner| {
            let n: i64 = inner.conn.query_row(
                "SELECT COUNT(*) FROM task_log_line WHERE task_id = ?1",
                params![job_id],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
        .await
    }

    async fn job_ids(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        self.with_conn(move |inner| {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let mut stmt = inner.conn.prepare(
                "SELECT task_id FROM task_log_line GROUP BY task_id ORDER BY MAX(id) DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn append_then_query_round_trips() {
        let store = SqliteLogStore::open_in_memory().unwrap();
        let a = store.append("job", LogStream::Stdout, "hello").await.unwrap();
        let b = store.append("job", LogStream::Stderr, "oops").await.unwrap();
        store.append("other", LogStream::Stdout, "x").await.unwrap();

        let records = store.query("job", LogQuery::all()).await.unwrap();
        assert_eq!(records, vec![a, b]);
        assert_eq!(store.count("job").await.unwrap(), 2);
        assert_eq!(store.job_ids(10).await.unwrap(), vec!["other", "job"]);
    }

    #[tokio::test]
    async fn reopening_keeps_history_and_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasklog.db");

        let first = SqliteLogStore::open(&path).unwrap();
        for i in 0..3 {
            first
                .append("job", LogStream::Stdout, &format!("line {i}"))
                .await
                .unwrap();
        }
        drop(first);

        let second = SqliteLogStore::open(&path).unwrap();
        let next = second.append("job", LogStream::Stdout, "line 3").await.unwrap();
        let records = second.query("job", LogQuery::all()).await.unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records.last().unwrap(), &next);
        for pair in records.windows(2) {
            assert!(pair[0].id < pair[1].id);
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }

        let newest = second.query("job", LogQuery::newest(2)).await.unwrap();
        assert_eq!(newest[0].message, "line 3");
        assert_eq!(newest[1].message, "line 2");
    }
}
