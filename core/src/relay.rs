//! Bus listener feeding the local Subscription Registry.
//!
//! One relay runs per server process, subscribed to every job channel. A
//! payload for a job nobody here is watching is discarded before parsing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::bus::{job_id_from_channel, BusMessage, MessageBus, ALL_JOBS_PATTERN};
use crate::error::BusError;
use crate::record::BroadcastMessage;
use crate::registry::SubscriptionRegistry;

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct RelayStats {
    delivered: AtomicU64,
    malformed: AtomicU64,
    skipped: AtomicU64,
}

impl RelayStats {
    /// Payloads handed to at least one local viewer.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Payloads for jobs without local viewers.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

pub struct BusRelay {
    task: JoinHandle<()>,
    stats: Arc<RelayStats>,
}

impl BusRelay {
    /// Subscribe and start relaying. The first subscription is made before
    /// this returns, so anything published afterwards is seen. If the bus is
    /// unreachable the relay keeps retrying in the background.
    pub async fn start(
        bus: Arc<dyn MessageBus>,
        registry: Arc<SubscriptionRegistry>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let stats = Arc::new(RelayStats::default());
        let first = bus.subscribe(ALL_JOBS_PATTERN).await;
        if let Err(e) = &first {
            tracing::error!(bus = bus.name(), error = %e, "bus subscribe failed, live updates paused");
        }

        let task_stats = stats.clone();
        let task = tokio::spawn(async move {
            let mut subscription = first.ok();
            loop {
                let mut sub = match subscription.take() {
                    Some(sub) => sub,
                    None => {
                        tokio::select! {
                            _ = shutdown.recv() => break,
                            _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                        }
                        match bus.subscribe(ALL_JOBS_PATTERN).await {
                            Ok(sub) => {
                                tracing::info!(bus = bus.name(), "bus subscription restored");
                                sub
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "bus still unavailable");
                                continue;
                            }
                        }
                    }
                };

                let closed = loop {
                    tokio::select! {
                        _ = shutdown.recv() => break false,
                        next = sub.recv() => match next {
                            Ok(msg) => dispatch(&registry, &task_stats, msg),
                            Err(BusError::Closed) => break true,
                            Err(e) => {
                                tracing::warn!(error = %e, "bus receive failed");
                                break true;
                            }
                        }
                    }
                };
                if !closed {
                    break;
                }
                tracing::warn!(bus = bus.name(), "bus subscription lost, resubscribing");
            }
            tracing::info!("bus relay stopped");
        });

        Self { task, stats }
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        self.stats.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the relay to stop after the shutdown signal.
    pub async fn join(mut self) {
        let _ = (&mut self.task).await;
    }
}

impl Drop for BusRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn dispatch(registry: &SubscriptionRegistry, stats: &RelayStats, msg: BusMessage) {
    let Some(job_id) = job_id_from_channel(&msg.channel) else {
        stats.malformed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(channel = %msg.channel, "message on unexpected channel dropped");
        return;
    };
    let parsed = match BroadcastMessage::from_json(&msg.payload) {
        Ok(parsed) => parsed,
        Err(e) => {
            stats.malformed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(task_id = %job_id, error = %e, "malformed bus payload dropped");
            return;
        }
    };

    if registry.broadcast_local(job_id, Arc::new(parsed)) > 0 {
        stats.delivered.fetch_add(1, Ordering::Relaxed);
    } else {
        stats.skipped.fetch_add(1, Ordering::Relaxed);
    }
}
