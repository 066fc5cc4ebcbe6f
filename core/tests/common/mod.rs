#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tasklog_core::api::{
    BroadcastMessage, BusRelay, LocalBus, LogStore, MemoryLogStore, Publisher, StreamSession,
    SubscriptionRegistry,
};
use tokio::sync::broadcast;

pub const KEEPALIVE: Duration = Duration::from_secs(5);

/// One server's worth of wiring on an in-process bus.
pub struct Harness {
    pub store: Arc<MemoryLogStore>,
    pub bus: Arc<LocalBus>,
    pub registry: Arc<SubscriptionRegistry>,
    pub publisher: Publisher,
    pub relay: BusRelay,
    pub shutdown: broadcast::Sender<()>,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryLogStore::new());
        let bus = Arc::new(LocalBus::new(1024));
        let registry = SubscriptionRegistry::new(256);
        let publisher = Publisher::new(store.clone(), bus.clone());
        let (shutdown, _) = broadcast::channel(1);
        let relay = BusRelay::start(bus.clone(), registry.clone(), shutdown.subscribe()).await;
        Self {
            store,
            bus,
            registry,
            publisher,
            relay,
            shutdown,
        }
    }

    pub fn viewer(&self, job_id: &str) -> StreamSession {
        let store: Arc<dyn LogStore> = self.store.clone();
        StreamSession::open(job_id, store, &self.registry, KEEPALIVE)
    }
}

/// Pull messages until `n` log records were seen, skipping keepalives.
pub async fn collect_logs(session: &mut StreamSession, n: usize) -> Vec<BroadcastMessage> {
    let mut out = Vec::new();
    while out.len() < n {
        match session.next().await {
            Some(msg @ BroadcastMessage::NewLog(_)) => out.push(msg),
            Some(_) => continue,
            None => break,
        }
    }
    out
}

pub fn ids(msgs: &[BroadcastMessage]) -> Vec<i64> {
    msgs.iter().filter_map(BroadcastMessage::record_id).collect()
}

/// Let the relay and job tasks run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
