use std::ops::RangeInclusive;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{CommandJob, Job, JobContext};
use crate::config::JobsConfig;
use crate::error::JobError;

pub const DEFAULT_DURATION_SECS: u64 = 60;
pub const MAX_DURATION_SECS: u64 = 300;

/// Body of a trigger request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerSpec {
    #[serde(default)]
    pub task_type: Option<String>,

    /// Seconds for `long`. Accepts a number or a numeric string.
    #[serde(default)]
    pub duration: Option<Value>,

    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,
}

impl TriggerSpec {
    pub fn task_type(&self) -> &str {
        self.task_type.as_deref().unwrap_or("long")
    }
}

/// Anything that is not an integer in 1..=300 becomes the default.
pub fn normalize_duration(raw: Option<&Value>) -> u64 {
    let parsed = match raw {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if (1..=MAX_DURATION_SECS as i64).contains(&n) => n as u64,
        _ => DEFAULT_DURATION_SECS,
    }
}

/// Build the job a trigger request asks for. Returns the job and, for `long`,
/// the normalized duration.
pub fn build_job(
    spec: &TriggerSpec,
    cfg: &JobsConfig,
) -> Result<(Box<dyn Job>, Option<u64>), JobError> {
    match spec.task_type() {
        "long" => {
            let seconds = normalize_duration(spec.duration.as_ref());
            Ok((Box::new(LongJob { seconds }), Some(seconds)))
        }
        "quick" => Ok((Box::new(QuickJob), None)),
        "failing" => Ok((Box::new(FailingJob), None)),
        "timed_print" => Ok((Box::new(TimedPrintJob), None)),
        "command" => {
            if !cfg.allow_commands {
                return Err(JobError::CommandsDisabled);
            }
            let program = spec
                .command
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .ok_or_else(|| JobError::Spawn("missing command".to_string()))?;
            Ok((
                Box::new(CommandJob::new(program, spec.args.clone())),
                None,
            ))
        }
        other => Err(JobError::UnknownTaskType(other.to_string())),
    }
}

/// Uniform-ish pick from `range`, seeded from a v4 uuid.
fn jitter(range: RangeInclusive<u64>) -> u64 {
    let (lo, hi) = (*range.start(), *range.end());
    if hi <= lo {
        return lo;
    }
    let span = (hi - lo + 1) as u128;
    lo + (Uuid::new_v4().as_u128() % span) as u64
}

pub struct LongJob {
    pub seconds: u64,
}

#[async_trait]
impl Job for LongJob {
    fn name(&self) -> &str {
        "long"
    }

    async fn run(&self, ctx: &mut JobContext) -> anyhow::Result<Value> {
        let total = self.seconds.max(1);
        for step in 1..=total {
            ctx.println(format!("Processing step {step}/{total}")).await;
            ctx.set_progress((step * 100 / total) as u8);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Ok(json!(format!("Completed {total} second task")))
    }
}

pub struct QuickJob;

#[async_trait]
impl Job for QuickJob {
    fn name(&self) -> &str {
        "quick"
    }

    async fn run(&self, ctx: &mut JobContext) -> anyhow::Result<Value> {
        ctx.println("Quick task started").await;
        for i in 1..=3 {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ctx.println(format!("Quick step {i}/3")).await;
            ctx.set_progress((i * 33) as u8);
        }
        ctx.println("Quick task finished").await;
        Ok(json!({ "status": "done" }))
    }
}

pub struct FailingJob;

#[async_trait]
impl Job for FailingJob {
    fn name(&self) -> &str {
        "failing"
    }

    async fn run(&self, ctx: &mut JobContext) -> anyhow::Result<Value> {
        ctx.println("Failing task started").await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        ctx.eprintln("Something is about to go wrong").await;
        anyhow::bail!("intentional failure for demonstration")
    }
}

/// Runs 5 to 10 seconds, printing a timestamped line every half second or so.
pub struct TimedPrintJob;

#[async_trait]
impl Job for TimedPrintJob {
    fn name(&self) -> &str {
        "timed_print"
    }

    async fn run(&self, ctx: &mut JobContext) -> anyhow::Result<Value> {
        let job_id = ctx.job_id().to_string();
        ctx.println(format!("Task {job_id} started manually")).await;
        ctx.set_progress(0);

        let duration = jitter(5..=10);
        ctx.println(format!(
            "Task will run for approximately {duration} seconds"
        ))
        .await;

        let end = tokio::time::Instant::now() + Duration::from_secs(duration);
        let total_iterations = duration * 2;
        let mut iteration = 0u64;
        while tokio::time::Instant::now() < end {
            iteration += 1;
            let progress = (iteration * 100 / total_iterations).min(99);
            ctx.set_progress(progress as u8);
            ctx.println(format!(
                "Iteration {iteration}: {} (Progress: {progress}%)",
                Utc::now().to_rfc3339()
            ))
            .await;
            tokio::time::sleep(Duration::from_millis(jitter(500..=1000))).await;
        }

        ctx.println(format!(
            "Task {job_id} completed successfully after {iteration} iterations"
        ))
        .await;
        Ok(json!({
            "status": "done",
            "iterations": iteration,
            "duration": duration,
        }))
    }
}
