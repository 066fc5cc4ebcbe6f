//! In-process map of job id to the viewer connections currently watching it.
//!
//! One mutex covers every job. Work done while holding it is bookkeeping only:
//! map lookups, `Arc` clones and non-blocking `try_send`. Serialization and
//! I/O always happen before a message reaches `broadcast_local`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::record::BroadcastMessage;

pub type HandleId = u64;

/// Messages are shared between every handle of a job, never copied per viewer.
pub type SharedMessage = Arc<BroadcastMessage>;

struct Slot {
    tx: mpsc::Sender<SharedMessage>,
    alive: Arc<AtomicBool>,
}

pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<String, HashMap<HandleId, Slot>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl SubscriptionRegistry {
    pub fn new(queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashMap<HandleId, Slot>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a handle for `job_id` and register it. The handle unregisters
    /// itself when released or dropped.
    pub fn subscribe(self: &Arc<Self>, job_id: &str) -> SubscriberHandle {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let alive = Arc::new(AtomicBool::new(true));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let connections = self.register(
            job_id,
            id,
            Slot {
                tx,
                alive: alive.clone(),
            },
        );
        tracing::debug!(task_id = %job_id, handle = id, connections, "viewer registered");

        SubscriberHandle {
            id,
            job_id: job_id.to_string(),
            rx,
            alive,
            registry: self.clone(),
            released: false,
        }
    }

    fn register(&self, job_id: &str, id: HandleId, slot: Slot) -> usize {
        let mut entries = self.lock();
        let set = entries.entry(job_id.to_string()).or_default();
        set.insert(id, slot);
        set.len()
    }

    /// Remove one handle; the job entry goes with its last handle.
    /// Returns whether the handle was present.
    pub fn unregister(&self, job_id: &str, id: HandleId) -> bool {
        let (removed, remaining) = {
            let mut entries = self.lock();
            let Some(set) = entries.get_mut(job_id) else {
                return false;
            };
            let removed = set.remove(&id);
            let remaining = set.len();
            if remaining == 0 {
                entries.remove(job_id);
            }
            (removed, remaining)
        };

        match removed {
            Some(slot) => {
                slot.alive.store(false, Ordering::SeqCst);
                tracing::debug!(task_id = %job_id, handle = id, remaining, "viewer unregistered");
                if remaining == 0 {
                    tracing::debug!(task_id = %job_id, "no more viewers, entry removed");
                }
                true
            }
            None => false,
        }
    }

    /// Enqueue `message` on every handle of `job_id`. A full or closed queue
    /// marks its handle dead and removes it. Returns how many handles took it.
    pub fn broadcast_local(&self, job_id: &str, message: SharedMessage) -> usize {
        let mut dead: Vec<(HandleId, Slot)> = Vec::new();
        let delivered = {
            let mut entries = self.lock();
            let Some(set) = entries.get_mut(job_id) else {
                return 0;
            };

            let mut delivered = 0;
            let mut dead_ids = Vec::new();
            for (id, slot) in set.iter() {
                match slot.tx.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => dead_ids.push(*id),
                }
            }
            for id in dead_ids {
                if let Some(slot) = set.remove(&id) {
                    dead.push((id, slot));
                }
            }
            if set.is_empty() {
                entries.remove(job_id);
            }
            delivered
        };

        for (id, slot) in dead {
            slot.alive.store(false, Ordering::SeqCst);
            tracing::warn!(task_id = %job_id, handle = id, "viewer queue full or closed, handle dropped");
        }
        delivered
    }

    /// Number of jobs with at least one handle.
    pub fn job_count(&self) -> usize {
        self.lock().len()
    }

    pub fn handle_count(&self, job_id: &str) -> usize {
        self.lock().get(job_id).map(HashMap::len).unwrap_or(0)
    }

    pub fn total_handles(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }

    pub fn contains(&self, job_id: &str, id: HandleId) -> bool {
        self.lock()
            .get(job_id)
            .map(|set| set.contains_key(&id))
            .unwrap_or(false)
    }
}

/// One viewer's inbound queue. Owned by the connection that created it.
pub struct SubscriberHandle {
    id: HandleId,
    job_id: String,
    rx: mpsc::Receiver<SharedMessage>,
    alive: Arc<AtomicBool>,
    registry: Arc<SubscriptionRegistry>,
    released: bool,
}

impl SubscriberHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// False once the registry dropped this handle or it was released.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Next queued message. `None` means the handle was evicted and its queue
    /// drained.
    pub async fn recv(&mut self) -> Option<SharedMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SharedMessage> {
        self.rx.try_recv().ok()
    }

    /// Unregister now. Later calls, and the eventual drop, do nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.alive.store(false, Ordering::SeqCst);
        self.registry.unregister(&self.job_id, self.id);
        self.rx.close();
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.release();
    }
}
