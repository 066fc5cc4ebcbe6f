use std::process::Stdio;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use super::{Job, JobContext};
use crate::capture::pump_into;
use crate::error::JobError;

/// Runs an external program; its stdout and stderr become the job's log.
pub struct CommandJob {
    program: String,
    args: Vec<String>,
}

impl CommandJob {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Job for CommandJob {
    fn name(&self) -> &str {
        "command"
    }

    async fn run(&self, ctx: &mut JobContext) -> anyhow::Result<Value> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JobError::Spawn(format!("{}: {e}", self.program)))?;
        tracing::info!(task_id = %ctx.job_id(), program = %self.program, pid = ?child.id(), "command spawned");

        let stdout = child.stdout.take().context("child stdout not captured")?;
        let stderr = child.stderr.take().context("child stderr not captured")?;

        let (out_w, err_w) = ctx.split();
        let (out_res, err_res) = tokio::join!(pump_into(stdout, out_w), pump_into(stderr, err_w));
        let out_bytes = out_res?;
        let err_bytes = err_res?;

        let status = child.wait().await.context("waiting for command")?;
        tracing::debug!(
            task_id = %ctx.job_id(),
            out_bytes,
            err_bytes,
            status = %status,
            "command exited"
        );
        match status.code() {
            Some(0) => Ok(json!({ "exit_code": 0 })),
            Some(code) => anyhow::bail!("{} exited with code {code}", self.program),
            None => anyhow::bail!("{} terminated by signal", self.program),
        }
    }
}
