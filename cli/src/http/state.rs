//! HTTP服务器状态管理

use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tasklog_core::api::{
    AppConfig, JobRunner, JobTracker, LogStore, MessageBus, Publisher, SubscriptionRegistry,
};
use tokio::sync::broadcast;

/// 应用状态（在所有handlers间共享）
#[derive(Clone)]
pub struct AppState {
    pub session_id: String,
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn LogStore>,
    pub bus: Arc<dyn MessageBus>,
    pub registry: Arc<SubscriptionRegistry>,
    pub runner: JobRunner,
    pub stats: Arc<RwLock<ServerStats>>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(
        session_id: String,
        config: AppConfig,
        store: Arc<dyn LogStore>,
        bus: Arc<dyn MessageBus>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let registry = SubscriptionRegistry::new(config.stream.subscriber_queue_capacity);
        let publisher = Publisher::new(store.clone(), bus.clone());
        let tracker = Arc::new(JobTracker::default());
        Self {
            session_id,
            config: Arc::new(config),
            store,
            bus,
            registry,
            runner: JobRunner::new(publisher, tracker),
            stats: Arc::new(RwLock::new(ServerStats::new())),
            shutdown_tx,
        }
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        self.runner.tracker()
    }

    pub fn record_request(&self, endpoint: &str) {
        self.stats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .increment_request(endpoint);
    }

    pub fn record_error(&self) {
        self.stats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .increment_error();
    }
}

/// 服务器统计信息
pub struct ServerStats {
    pub requests_total: u64,
    pub requests_by_endpoint: HashMap<String, u64>,
    pub errors_total: u64,
    pub streams_opened: u64,
    pub start_time: DateTime<Local>,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            requests_total: 0,
            requests_by_endpoint: HashMap::new(),
            errors_total: 0,
            streams_opened: 0,
            start_time: Local::now(),
        }
    }

    pub fn increment_request(&mut self, endpoint: &str) {
        self.requests_total += 1;
        *self
            .requests_by_endpoint
            .entry(endpoint.to_string())
            .or_insert(0) += 1;
    }

    pub fn increment_error(&mut self) {
        self.errors_total += 1;
    }

    pub fn uptime_seconds(&self) -> f64 {
        let now = Local::now();
        (now - self.start_time).num_milliseconds() as f64 / 1000.0
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}
