//! Append-only log line storage, queried by job id in insertion order.

mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{StoreConfig, StoreKind};
use crate::error::StoreError;
use crate::record::{LogRecord, LogStream};

pub use memory::MemoryLogStore;
pub use sqlite::SqliteLogStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogQuery {
    pub order: Order,
    pub limit: Option<usize>,
}

impl LogQuery {
    /// Full history, oldest first. This is what replay uses.
    pub fn all() -> Self {
        Self {
            order: Order::Ascending,
            limit: None,
        }
    }

    /// The newest `n` records, newest first.
    pub fn newest(n: usize) -> Self {
        Self {
            order: Order::Descending,
            limit: Some(n),
        }
    }
}

#[async_trait]
pub trait LogStore: Send + Sync {
    fn name(&self) -> &str;

    /// Persist one line. The store assigns `id` and `timestamp`; both are
    /// monotonic in insertion order.
    async fn append(
        &self,
        job_id: &str,
        stream: LogStream,
        message: &str,
    ) -> Result<LogRecord, StoreError>;

    async fn query(&self, job_id: &str, query: LogQuery) -> Result<Vec<LogRecord>, StoreError>;

    async fn count(&self, job_id: &str) -> Result<usize, StoreError>;

    /// Distinct job ids, most recently written first.
    async fn job_ids(&self, limit: usize) -> Result<Vec<String>, StoreError>;
}

pub async fn open_store(cfg: &StoreConfig) -> Result<Arc<dyn LogStore>, StoreError> {
    match cfg.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryLogStore::new())),
        StoreKind::Sqlite => {
            let path = cfg.path.clone();
            if let Some(parent) = std::path::Path::new(&path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let store = tokio::task::spawn_blocking(move || SqliteLogStore::open(path))
                .await
                .map_err(|e| StoreError::Join(e.to_string()))??;
            Ok(Arc::new(store))
        }
    }
}

/// `records` arrive oldest first.
pub(crate) fn apply_query(mut records: Vec<LogRecord>, query: LogQuery) -> Vec<LogRecord> {
    match query.order {
        Order::Ascending => {
            if let Some(limit) = query.limit {
                records.truncate(limit);
            }
        }
        Order::Descending => {
            records.reverse();
            if let Some(limit) = query.limit {
                records.truncate(limit);
            }
        }
    }
    records
}
