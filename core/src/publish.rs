use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::{channel_for, MessageBus};
use crate::error::{BusError, StoreError};
use crate::record::{BroadcastMessage, LogRecord, LogStream};
use crate::store::LogStore;

/// Where a Log Writer hands each finished line.
#[async_trait]
pub trait LineSink: Send + Sync {
    async fn emit(
        &self,
        job_id: &str,
        stream: LogStream,
        line: &str,
    ) -> Result<LogRecord, StoreError>;
}

/// Store-then-broadcast. The store write is the durable step; the bus push is
/// best effort and a failure there only costs live viewers the line.
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn LogStore>,
    bus: Arc<dyn MessageBus>,
}

impl Publisher {
    pub fn new(store: Arc<dyn LogStore>, bus: Arc<dyn MessageBus>) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    /// Persist one line and push it to the job's channel.
    pub async fn record(
        &self,
        job_id: &str,
        stream: LogStream,
        line: &str,
    ) -> Result<LogRecord, StoreError> {
        let record = match self.store.append(job_id, stream, line).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(task_id = %job_id, stream = %stream, error = %e, "log store write failed");
                return Err(e);
            }
        };
        self.publish(&record).await;
        Ok(record)
    }

    /// Push an already stored record. Bus failures are logged, never returned.
    pub async fn publish(&self, record: &LogRecord) {
        let msg = BroadcastMessage::NewLog(record.clone());
        if let Err(e) = self.try_publish(&record.job_id, &msg).await {
            tracing::error!(
                task_id = %record.job_id,
                id = record.id,
                error = %e,
                "bus publish failed, live viewers miss this line"
            );
        }
    }

    pub async fn publish_message(&self, job_id: &str, msg: &BroadcastMessage) {
        if let Err(e) = self.try_publish(job_id, msg).await {
            tracing::error!(task_id = %job_id, kind = msg.kind(), error = %e, "bus publish failed");
        }
    }

    pub async fn try_publish(&self, job_id: &str, msg: &BroadcastMessage) -> Result<(), BusError> {
        let payload = msg.to_json()?;
        self.bus.publish(&channel_for(job_id), payload).await
    }
}

#[async_trait]
impl LineSink for Publisher {
    async fn emit(
        &self,
        job_id: &str,
        stream: LogStream,
        line: &str,
    ) -> Result<LogRecord, StoreError> {
        self.record(job_id, stream, line).await
    }
}
