use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;

use crate::jobs::JobStatus;
use crate::record::{BroadcastMessage, LogRecord};
use crate::registry::{SubscriberHandle, SubscriptionRegistry};
use crate::store::{LogQuery, LogStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Replaying,
    Live,
    Draining,
    Closed,
}

/// One viewer connection.
///
/// The registry handle is taken in [`StreamSession::open`], before the
/// history query runs, so a line stored while replay is in progress is queued
/// on the handle rather than lost. Queued lines already covered by replay are
/// recognised by id and skipped. Live lines are never compared with each
/// other: two streams of one job can reach the bus out of id order.
pub struct StreamSession {
    job_id: String,
    state: SessionState,
    store: Arc<dyn LogStore>,
    handle: Option<SubscriberHandle>,
    keepalive: Duration,
    replay: Option<VecDeque<LogRecord>>,
    replay_max: i64,
    last_id: i64,
    finished: Option<JobStatus>,
    emitted: u64,
}

impl StreamSession {
    pub fn open(
        job_id: &str,
        store: Arc<dyn LogStore>,
        registry: &Arc<SubscriptionRegistry>,
        keepalive: Duration,
    ) -> Self {
        let handle = registry.subscribe(job_id);
        tracing::info!(task_id = %job_id, handle = handle.id(), "viewer connected");
        Self {
            job_id: job_id.to_string(),
            state: SessionState::Init,
            store,
            handle: Some(handle),
            keepalive,
            replay: None,
            replay_max: 0,
            last_id: 0,
            finished: None,
            emitted: 0,
        }
    }

    /// The job already reached `status` when the viewer connected. After
    /// replay the session sends `done` and closes instead of going live.
    /// `Unknown` counts as finished: nothing is left to emit a `done`.
    pub fn with_finished(mut self, status: Option<JobStatus>) -> Self {
        self.finished = status.filter(|s| s.is_terminal() || *s == JobStatus::Unknown);
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Highest record id sent to the viewer so far.
    pub fn last_id(&self) -> i64 {
        self.last_id
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Next message for the viewer, or `None` once the session is closed.
    pub async fn next(&mut self) -> Option<BroadcastMessage> {
        let msg = self.advance().await;
        if msg.is_some() {
            self.emitted += 1;
        }
        msg
    }

    async fn advance(&mut self) -> Option<BroadcastMessage> {
        loop {
            match self.state {
                SessionState::Init => {
                    self.state = SessionState::Replaying;
                    return Some(BroadcastMessage::Connected {
                        job_id: self.job_id.clone(),
                    });
                }
                SessionState::Replaying => {
                    if let Some(record) = self.next_replayed().await {
                        return Some(record);
                    }
                    if self.state == SessionState::Closed {
                        return None;
                    }
                    self.replay_max = self.last_id;
                    match self.finished.take() {
                        Some(status) => {
                            self.state = SessionState::Draining;
                            return Some(BroadcastMessage::Done {
                                job_id: self.job_id.clone(),
                                status,
                            });
                        }
                        None => self.state = SessionState::Live,
                    }
                }
                SessionState::Live => return self.next_live().await,
                SessionState::Draining => {
                    while let Some(msg) = self.handle.as_mut().and_then(|h| h.try_recv()) {
                        if let BroadcastMessage::NewLog(record) = msg.as_ref() {
                            if self.take_live(record.id) {
                                return Some(msg.as_ref().clone());
                            }
                        }
                    }
                    self.close();
                }
                SessionState::Closed => return None,
            }
        }
    }

    async fn next_replayed(&mut self) -> Option<BroadcastMessage> {
        if self.replay.is_none() {
            match self.store.query(&self.job_id, LogQuery::all()).await {
                Ok(records) => {
                    tracing::debug!(task_id = %self.job_id, count = records.len(), "replaying history");
                    self.replay = Some(records.into());
                }
                Err(e) => {
                    tracing::error!(task_id = %self.job_id, error = %e, "history query failed, closing stream");
                    self.close();
                    return None;
                }
            }
        }

        let record = self.replay.as_mut()?.pop_front()?;
        self.last_id = self.last_id.max(record.id);
        Some(BroadcastMessage::NewLog(record))
    }

    async fn next_live(&mut self) -> Option<BroadcastMessage> {
        loop {
            let handle = self.handle.as_mut()?;
            let received = match tokio::time::timeout(self.keepalive, handle.recv()).await {
                Ok(received) => received,
                Err(_) => return Some(BroadcastMessage::Keepalive),
            };

            let Some(msg) = received else {
                tracing::warn!(task_id = %self.job_id, "viewer fell behind and was dropped");
                self.close();
                return None;
            };

            match msg.as_ref() {
                BroadcastMessage::NewLog(record) => {
                    if !self.take_live(record.id) {
                        continue;
                    }
                    return Some(msg.as_ref().clone());
                }
                BroadcastMessage::Done { .. } => {
                    self.state = SessionState::Draining;
                    return Some(msg.as_ref().clone());
                }
                BroadcastMessage::Connected { .. } | BroadcastMessage::Keepalive => continue,
            }
        }
    }

    /// Whether a live record still has to be sent, i.e. replay did not cover it.
    fn take_live(&mut self, id: i64) -> bool {
        if id <= self.replay_max {
            return false;
        }
        self.last_id = self.last_id.max(id);
        true
    }

    /// Release the registry handle. Safe to call more than once.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.replay = None;
        if let Some(mut handle) = self.handle.take() {
            handle.release();
            tracing::info!(task_id = %self.job_id, emitted = self.emitted, "viewer disconnected");
        }
    }

    /// Drive the session as a stream. Dropping the stream closes the session.
    pub fn into_stream(mut self) -> impl Stream<Item = BroadcastMessage> + Send {
        async_stream::stream! {
            while let Some(msg) = self.next().await {
                yield msg;
            }
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogStream;
    use crate::store::MemoryLogStore;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    const KEEPALIVE: Duration = Duration::from_secs(5);

    fn setup() -> (Arc<MemoryLogStore>, Arc<SubscriptionRegistry>) {
        (Arc::new(MemoryLogStore::new()), SubscriptionRegistry::new(16))
    }

    fn kinds(msgs: &[BroadcastMessage]) -> Vec<&'static str> {
        msgs.iter().map(BroadcastMessage::kind).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn connected_then_replay_in_id_order() {
        let (store, registry) = setup();
        for line in ["a", "b", "c"] {
            store.append("job", LogStream::Stdout, line).await.unwrap();
        }

        let mut session = StreamSession::open("job", store.clone(), &registry, KEEPALIVE);
        let mut got = Vec::new();
        for _ in 0..4 {
            got.push(session.next().await.unwrap());
        }
        assert_eq!(kinds(&got), vec!["connected", "new_log", "new_log", "new_log"]);
        let ids: Vec<i64> = got.iter().filter_map(BroadcastMessage::record_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(session.state(), SessionState::Replaying);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_live_stream_sends_keepalive() {
        let (store, registry) = setup();
        let mut session = StreamSession::open("job", store, &registry, KEEPALIVE);

        assert_eq!(session.next().await.unwrap().kind(), "connected");
        let start = tokio::time::Instant::now();
        assert_eq!(session.next().await, Some(BroadcastMessage::Keepalive));
        assert!(start.elapsed() >= KEEPALIVE);
        assert_eq!(session.state(), SessionState::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn live_lines_seen_during_replay_are_not_repeated() {
        let (store, registry) = setup();
        let first = store.append("job", LogStream::Stdout, "one").await.unwrap();

        let mut session = StreamSession::open("job", store.clone(), &registry, KEEPALIVE);
        // stored and broadcast after registration but before the query runs
        let second = store.append("job", LogStream::Stdout, "two").await.unwrap();
        registry.broadcast_local("job", Arc::new(BroadcastMessage::NewLog(second.clone())));
        let third = store.append("job", LogStream::Stderr, "three").await.unwrap();

        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(session.next().await.unwrap());
        }
        registry.broadcast_local("job", Arc::new(BroadcastMessage::NewLog(third.clone())));
        let fourth = store.append("job", LogStream::Stdout, "four").await.unwrap();
        registry.broadcast_local("job", Arc::new(BroadcastMessage::NewLog(fourth.clone())));
        got.push(session.next().await.unwrap());

        // 2 and 3 arrive twice (replay and queue); each is sent once
        assert_eq!(
            got,
            vec![
                BroadcastMessage::Connected {
                    job_id: "job".into()
                },
                BroadcastMessage::NewLog(first),
                BroadcastMessage::NewLog(second),
                BroadcastMessage::NewLog(third),
            ]
        );
        assert_eq!(session.next().await, Some(BroadcastMessage::NewLog(fourth)));
    }

    #[tokio::test(start_paused = true)]
    async fn live_lines_out_of_id_order_are_all_sent() {
        let (store, registry) = setup();
        let mut session = StreamSession::open("job", store.clone(), &registry, KEEPALIVE);
        assert_eq!(session.next().await.unwrap().kind(), "connected");

        let out = store.append("job", LogStream::Stdout, "out").await.unwrap();
        let err = store.append("job", LogStream::Stderr, "err").await.unwrap();
        // the stderr line reached the bus first
        registry.broadcast_local("job", Arc::new(BroadcastMessage::NewLog(err.clone())));
        registry.broadcast_local("job", Arc::new(BroadcastMessage::NewLog(out.clone())));

        // replay already holds both; the queued copies are skipped
        assert_eq!(session.next().await, Some(BroadcastMessage::NewLog(out.clone())));
        assert_eq!(session.next().await, Some(BroadcastMessage::NewLog(err.clone())));

        let late_out = store.append("job", LogStream::Stdout, "late out").await.unwrap();
        let late_err = store.append("job", LogStream::Stderr, "late err").await.unwrap();
        registry.broadcast_local("job", Arc::new(BroadcastMessage::NewLog(late_err.clone())));
        registry.broadcast_local("job", Arc::new(BroadcastMessage::NewLog(late_out.clone())));

        assert_eq!(session.next().await, Some(BroadcastMessage::NewLog(late_err)));
        assert_eq!(session.next().await, Some(BroadcastMessage::NewLog(late_out)));
        assert_eq!(session.last_id(), 4);
        assert_eq!(session.next().await, Some(BroadcastMessage::Keepalive));
    }

    #[tokio::test(start_paused = true)]
    async fn live_lines_after_empty_replay_keep_arrival_order() {
        let (store, registry) = setup();
        let mut session = StreamSession::open("job", store.clone(), &registry, KEEPALIVE);
        assert_eq!(session.next().await.unwrap().kind(), "connected");
        // empty replay: the session goes live
        assert_eq!(session.next().await, Some(BroadcastMessage::Keepalive));

        let five = LogRecord {
            id: 5,
            job_id: "job".into(),
            stream: LogStream::Stdout,
            timestamp: chrono::Utc::now(),
            message: "five".into(),
        };
        let six = LogRecord {
            id: 6,
            stream: LogStream::Stderr,
            message: "six".into(),
            ..five.clone()
        };
        registry.broadcast_local("job", Arc::new(BroadcastMessage::NewLog(six.clone())));
        registry.broadcast_local("job", Arc::new(BroadcastMessage::NewLog(five.clone())));

        assert_eq!(session.next().await, Some(BroadcastMessage::NewLog(six)));
        assert_eq!(session.next().await, Some(BroadcastMessage::NewLog(five)));
    }

    #[tokio::test(start_paused = true)]
    async fn done_drains_and_closes() {
        let (store, registry) = setup();
        let mut session = StreamSession::open("job", store.clone(), &registry, KEEPALIVE);
        assert_eq!(session.next().await.unwrap().kind(), "connected");

        let line = store.append("job", LogStream::Stdout, "last").await.unwrap();
        registry.broadcast_local("job", Arc::new(BroadcastMessage::NewLog(line)));
        registry.broadcast_local(
            "job",
            Arc::new(BroadcastMessage::Done {
                job_id: "job".into(),
                status: JobStatus::Success,
            }),
        );

        assert_eq!(session.next().await.unwrap().record_id(), Some(1));
        assert_eq!(session.next().await.unwrap().kind(), "done");
        assert_eq!(session.next().await, None);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(registry.job_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_job_replays_then_sends_done() {
        let (store, registry) = setup();
        store.append("job", LogStream::Stdout, "only").await.unwrap();
        let session = StreamSession::open("job", store, &registry, KEEPALIVE)
            .with_finished(Some(JobStatus::Failure));

        let got: Vec<_> = session.into_stream().collect().await;
        assert_eq!(kinds(&got), vec!["connected", "new_log", "done"]);
        assert_eq!(registry.job_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn untracked_job_replays_then_sends_unknown_done() {
        let (store, registry) = setup();
        store.append("old", LogStream::Stdout, "before restart").await.unwrap();
        let session = StreamSession::open("old", store, &registry, KEEPALIVE)
            .with_finished(Some(JobStatus::Unknown));

        let got: Vec<_> = session.into_stream().collect().await;
        assert_eq!(kinds(&got), vec!["connected", "new_log", "done"]);
        assert!(matches!(
            got.last(),
            Some(BroadcastMessage::Done { status: JobStatus::Unknown, .. })
        ));
        assert_eq!(registry.job_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn running_job_is_not_treated_as_finished() {
        let (store, registry) = setup();
        let mut session = StreamSession::open("job", store, &registry, KEEPALIVE)
            .with_finished(Some(JobStatus::Started));

        assert_eq!(session.next().await.unwrap().kind(), "connected");
        assert_eq!(session.next().await, Some(BroadcastMessage::Keepalive));
        assert_eq!(session.state(), SessionState::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn evicted_viewer_stream_ends() {
        let store = Arc::new(MemoryLogStore::new());
        let registry = SubscriptionRegistry::new(1);
        let mut session = StreamSession::open("job", store, &registry, KEEPALIVE);

        registry.broadcast_local("job", Arc::new(BroadcastMessage::Keepalive));
        registry.broadcast_local("job", Arc::new(BroadcastMessage::Keepalive));
        assert_eq!(registry.handle_count("job"), 0);

        assert_eq!(session.next().await.unwrap().kind(), "connected");
        assert_eq!(session.next().await, None);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_stream_unregisters() {
        let (store, registry) = setup();
        let other = StreamSession::open("job", store.clone(), &registry, KEEPALIVE);
        let stream = StreamSession::open("job", store, &registry, KEEPALIVE).into_stream();
        assert_eq!(registry.handle_count("job"), 2);

        drop(stream);
        assert_eq!(registry.handle_count("job"), 1);
        drop(other);
        assert_eq!(registry.job_count(), 0);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (store, registry) = setup();
        let mut session = StreamSession::open("job", store, &registry, KEEPALIVE);
        session.close();
        session.close();
        assert_eq!(session.next().await, None);
        assert_eq!(registry.total_handles(), 0);
    }
}
