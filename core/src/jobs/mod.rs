//! In-process job executor: runs job bodies inside a capture scope and keeps
//! a status table for the task API.

mod builtin;
mod command;
mod runner;
mod tracker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capture::{CaptureScope, LogWriter};
use crate::error::CaptureError;

pub use builtin::{
    build_job, normalize_duration, FailingJob, LongJob, QuickJob, TimedPrintJob, TriggerSpec,
    DEFAULT_DURATION_SECS, MAX_DURATION_SECS,
};
pub use command::CommandJob;
pub use runner::{JobHandle, JobRunner};
pub use tracker::JobTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Started,
    Progress,
    Success,
    Failure,
    /// Seen in the log store but not in the tracker.
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Started => "STARTED",
            JobStatus::Progress => "PROGRESS",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
            JobStatus::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    #[serde(rename = "task_id")]
    pub job_id: String,
    pub task_name: String,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: Option<u8>,
    pub result: Option<Value>,
}

impl JobInfo {
    pub fn pending(job_id: &str, task_name: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            task_name: task_name.to_string(),
            status: JobStatus::Pending,
            started_at: Some(Utc::now()),
            completed_at: None,
            progress: None,
            result: None,
        }
    }

    /// Placeholder for a job id that only exists in the log store.
    pub fn unknown(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            task_name: "Unknown".to_string(),
            status: JobStatus::Unknown,
            started_at: None,
            completed_at: None,
            progress: None,
            result: None,
        }
    }
}

/// A unit of background work. Output goes through the context, never to the
/// process's own stdout.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &mut JobContext) -> anyhow::Result<Value>;
}

/// What a running job sees: its id, its capture scope and its progress slot.
pub struct JobContext {
    job_id: String,
    scope: CaptureScope,
    tracker: std::sync::Arc<JobTracker>,
}

impl JobContext {
    pub(crate) fn new(
        job_id: &str,
        scope: CaptureScope,
        tracker: std::sync::Arc<JobTracker>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            scope,
            tracker,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Write one line to stdout. A store failure is logged and the line stays
    /// buffered; the next write or the final flush retries it.
    pub async fn println(&mut self, line: impl AsRef<str>) {
        write_line(self.scope.stdout(), line.as_ref()).await;
    }

    pub async fn eprintln(&mut self, line: impl AsRef<str>) {
        write_line(self.scope.stderr(), line.as_ref()).await;
    }

    pub fn stdout(&mut self) -> &mut LogWriter {
        self.scope.stdout()
    }

    pub fn stderr(&mut self) -> &mut LogWriter {
        self.scope.stderr()
    }

    pub fn split(&mut self) -> (&mut LogWriter, &mut LogWriter) {
        self.scope.split()
    }

    /// Progress in percent, clamped to 100. Marks the job `PROGRESS`.
    pub fn set_progress(&self, percent: u8) {
        self.tracker.set_progress(&self.job_id, percent.min(100));
    }

    pub(crate) async fn finish(self) -> Result<(), CaptureError> {
        self.scope.finish().await
    }
}

async fn write_line(writer: &mut LogWriter, line: &str) {
    let mut text = String::with_capacity(line.len() + 1);
    text.push_str(line);
    text.push('\n');
    if let Err(e) = writer.write(&text).await {
        tracing::error!(
            task_id = %writer.job_id(),
            stream = %writer.stream(),
            error = %e,
            "log line not stored, kept for retry"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Success).unwrap(),
            "\"SUCCESS\""
        );
        assert_eq!(
            serde_json::from_str::<JobStatus>("\"PROGRESS\"").unwrap(),
            JobStatus::Progress
        );
        assert!(JobStatus::Failure.is_terminal());
        assert!(!JobStatus::Started.is_terminal());
    }

    #[test]
    fn info_serializes_task_id() {
        let v = serde_json::to_value(JobInfo::unknown("abc")).unwrap();
        assert_eq!(v["task_id"], "abc");
        assert_eq!(v["status"], "UNKNOWN");
        assert_eq!(v["task_name"], "Unknown");
    }
}
