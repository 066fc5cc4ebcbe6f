use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{Job, JobContext, JobInfo, JobStatus, JobTracker};
use crate::capture::CaptureScope;
use crate::publish::{LineSink, Publisher};
use crate::record::BroadcastMessage;

/// Spawns jobs on the tokio runtime, one task per job.
#[derive(Clone)]
pub struct JobRunner {
    publisher: Publisher,
    tracker: Arc<JobTracker>,
}

/// Returned by [`JobRunner::spawn`]. Dropping it leaves the job running.
pub struct JobHandle {
    job_id: String,
    task: JoinHandle<JobStatus>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Wait for the job to finish and return its final status.
    pub async fn wait(self) -> JobStatus {
        self.task.await.unwrap_or(JobStatus::Failure)
    }
}

impl JobRunner {
    pub fn new(publisher: Publisher, tracker: Arc<JobTracker>) -> Self {
        Self { publisher, tracker }
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn spawn(&self, job: Box<dyn Job>) -> JobHandle {
        let job_id = Uuid::new_v4().to_string();
        self.tracker.insert(JobInfo::pending(&job_id, job.name()));
        tracing::info!(task_id = %job_id, task_name = job.name(), "job queued");

        let publisher = self.publisher.clone();
        let tracker = self.tracker.clone();
        let id = job_id.clone();
        let task = tokio::spawn(async move { execute(id, job, publisher, tracker).await });

        JobHandle { job_id, task }
    }
}

async fn execute(
    job_id: String,
    job: Box<dyn Job>,
    publisher: Publisher,
    tracker: Arc<JobTracker>,
) -> JobStatus {
    let name = job.name().to_string();
    let sink: Arc<dyn LineSink> = Arc::new(publisher.clone());
    let mut ctx = JobContext::new(&job_id, CaptureScope::new(&job_id, sink), tracker.clone());

    tracker.mark_started(&job_id);
    tracing::info!(task_id = %job_id, task_name = %name, "job started");

    let outcome = AssertUnwindSafe(job.run(&mut ctx)).catch_unwind().await;
    let (status, result) = match outcome {
        Ok(Ok(value)) => (JobStatus::Success, Some(value)),
        Ok(Err(e)) => {
            let message = format!("{e:#}");
            report_failure(&mut ctx, &name, &message).await;
            (JobStatus::Failure, Some(error_value(&message)))
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            report_failure(&mut ctx, &name, &message).await;
            (JobStatus::Failure, Some(error_value(&message)))
        }
    };

    if let Err(e) = ctx.finish().await {
        tracing::error!(task_id = %job_id, error = %e, "final flush of job output failed");
    }

    tracker.finish(&job_id, status, result);
    publisher
        .publish_message(
            &job_id,
            &BroadcastMessage::Done {
                job_id: job_id.clone(),
                status,
            },
        )
        .await;
    tracing::info!(task_id = %job_id, task_name = %name, status = %status, "job finished");
    status
}

async fn report_failure(ctx: &mut JobContext, name: &str, message: &str) {
    tracing::error!(task_id = %ctx.job_id(), task_name = %name, error = %message, "job failed");
    // partial stdout goes out before the error line
    if let Err(e) = ctx.stdout().flush().await {
        tracing::error!(task_id = %ctx.job_id(), error = %e, "stdout flush failed");
    }
    ctx.eprintln(format!("Error in {name}: {message}")).await;
}

fn error_value(message: &str) -> Value {
    json!({ "error": message })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
