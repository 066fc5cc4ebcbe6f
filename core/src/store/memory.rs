use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{apply_query, LogQuery, LogStore};
use crate::error::StoreError;
use crate::record::{LogRecord, LogStream};

/// In-process store. Ids start at 1 and are shared across jobs.
#[derive(Default)]
pub struct MemoryLogStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    records: Vec<LogRecord>,
    last_id: i64,
    last_ts: Option<DateTime<Utc>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(
        &self,
        job_id: &str,
        stream: LogStream,
        message: &str,
    ) -> Result<LogRecord, StoreError> {
        let mut g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // Wall clocks can step backwards; keep timestamp order equal to id order.
        let now = Utc::now();
        let timestamp = match g.last_ts {
            Some(last) if last > now => last,
            _ => now,
        };
        g.last_id += 1;
        g.last_ts = Some(timestamp);
        let record = LogRecord {
            id: g.last_id,
            job_id: job_id.to_string(),
            stream,
            timestamp,
            message: message.to_string(),
        };
        g.records.push(record.clone());
        Ok(record)
    }

    async fn query(&self, job_id: &str, query: LogQuery) -> Result<Vec<LogRecord>, StoreError> {
        let g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let records = g
            .records
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect();
        Ok(apply_query(records, query))
    }

    async fn count(&self, job_id: &str) -> Result<usize, StoreError> {
        let g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(g.records.iter().filter(|r| r.job_id == job_id).count())
    }

    async fn job_ids(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<String> = Vec::new();
        for record in g.records.iter().rev() {
            if out.len() >= limit {
                break;
            }
            if !out.iter().any(|id| id == &record.job_id) {
                out.push(record.job_id.clone());
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn ids_and_timestamps_ascend_per_job() {
        let store = MemoryLogStore::new();
        for i in 0..20 {
            let job = if i % 2 == 0 { "a" } else { "b" };
            store
                .append(job, LogStream::Stdout, &format!("line {i}"))
                .await
                .unwrap();
        }

        let a = store.query("a", LogQuery::all()).await.unwrap();
        assert_eq!(a.len(), 10);
        for pair in a.windows(2) {
            assert!(pair[0].id < pair[1].id);
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
        assert_eq!(a[0].message, "line 0");
    }

    #[tokio::test]
    async fn newest_returns_tail_in_reverse() {
        let store = MemoryLogStore::new();
        for i in 0..5 {
            store
                .append("job", LogStream::Stdout, &i.to_string())
                .await
                .unwrap();
        }
        let tail = store.query("job", LogQuery::newest(2)).await.unwrap();
        let messages: Vec<_> = tail.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["4", "3"]);
    }

    #[tokio::test]
    async fn job_ids_most_recent_first() {
        let store = MemoryLogStore::new();
        store.append("old", LogStream::Stdout, "x").await.unwrap();
        store.append("mid", LogStream::Stdout, "x").await.unwrap();
        store.append("new", LogStream::Stderr, "x").await.unwrap();
        store.append("mid", LogStream::Stdout, "y").await.unwrap();

        assert_eq!(store.job_ids(10).await.unwrap(), vec!["mid", "new", "old"]);
        assert_eq!(store.job_ids(1).await.unwrap(), vec!["mid"]);
        assert_eq!(store.count("mid").await.unwrap(), 2);
        assert_eq!(store.count("none").await.unwrap(), 0);
    }
}
