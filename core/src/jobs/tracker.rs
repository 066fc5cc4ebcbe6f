use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::Value;

use super::{JobInfo, JobStatus};

/// Job status table, newest first. Holds at most `capacity` jobs; the oldest
/// finished ones are forgotten first.
pub struct JobTracker {
    inner: Mutex<Inner>,
    capacity: usize,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, JobInfo>,
    order: VecDeque<String>,
}

impl JobTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, info: JobInfo) {
        let mut inner = self.lock();
        let job_id = info.job_id.clone();
        if inner.jobs.insert(job_id.clone(), info).is_none() {
            inner.order.push_front(job_id);
        }

        while inner.order.len() > self.capacity {
            let victim = inner
                .order
                .iter()
                .rposition(|id| inner.jobs.get(id).is_some_and(|j| j.status.is_terminal()))
                .unwrap_or(inner.order.len() - 1);
            if let Some(id) = inner.order.remove(victim) {
                inner.jobs.remove(&id);
            }
        }
    }

    pub fn get(&self, job_id: &str) -> Option<JobInfo> {
        self.lock().jobs.get(job_id).cloned()
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.lock().jobs.get(job_id).map(|j| j.status)
    }

    /// Most recently created first.
    pub fn list(&self, limit: usize) -> Vec<JobInfo> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .take(limit)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mark_started(&self, job_id: &str) {
        self.update(job_id, |job| {
            job.status = JobStatus::Started;
            job.progress = Some(0);
        });
    }

    pub fn set_progress(&self, job_id: &str, percent: u8) {
        self.update(job_id, |job| {
            if !job.status.is_terminal() {
                job.status = JobStatus::Progress;
                job.progress = Some(percent);
            }
        });
    }

    pub fn finish(&self, job_id: &str, status: JobStatus, result: Option<Value>) {
        self.update(job_id, |job| {
            job.status = status;
            job.completed_at = Some(Utc::now());
            if status == JobStatus::Success {
                job.progress = Some(100);
            }
            job.result = result;
        });
    }

    fn update(&self, job_id: &str, f: impl FnOnce(&mut JobInfo)) {
        match self.lock().jobs.get_mut(job_id) {
            Some(job) => f(job),
            None => tracing::debug!(task_id = %job_id, "status update for untracked job ignored"),
        }
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new(1000)
    }
}
