use std::io::Write;

use tasklog_core::api::{BroadcastMessage, CliError, JobStatus};

use super::cli::TailArgs;
use crate::http::RemoteClient;

pub async fn run(args: TailArgs) -> Result<i32, CliError> {
    let client = RemoteClient::new(args.server)?;
    follow(&client, &args.task_id, args.json).await
}

/// Print the stream until `done`. Exit code follows the task's final status.
pub(crate) async fn follow(
    client: &RemoteClient,
    task_id: &str,
    json: bool,
) -> Result<i32, CliError> {
    let stdout = std::io::stdout();
    let status = client
        .tail(task_id, |msg| {
            let mut out = stdout.lock();
            if json {
                if let Ok(line) = msg.to_json() {
                    let _ = writeln!(out, "{line}");
                }
                return;
            }
            if let Some(line) = render(msg) {
                let _ = writeln!(out, "{line}");
            }
        })
        .await?;

    Ok(exit_code(status))
}

fn render(msg: &BroadcastMessage) -> Option<String> {
    match msg {
        BroadcastMessage::NewLog(record) => {
            Some(format!("[{}] {}", record.stream.as_str(), record.message))
        }
        BroadcastMessage::Done { status, .. } => Some(format!("-- task finished: {status}")),
        BroadcastMessage::Connected { .. } | BroadcastMessage::Keepalive => None,
    }
}

fn exit_code(status: Option<JobStatus>) -> i32 {
    match status {
        Some(JobStatus::Success) => 0,
        Some(JobStatus::Failure) => 1,
        // stream ended without a final status
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasklog_core::api::{LogRecord, LogStream};

    #[test]
    fn renders_log_lines_with_stream_prefix() {
        let record = LogRecord {
            id: 1,
            job_id: "t".into(),
            stream: LogStream::Stderr,
            message: "boom".into(),
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(
            render(&BroadcastMessage::NewLog(record)).as_deref(),
            Some("[stderr] boom")
        );
        assert_eq!(render(&BroadcastMessage::Keepalive), None);
    }

    #[test]
    fn exit_code_follows_final_status() {
        assert_eq!(exit_code(Some(JobStatus::Success)), 0);
        assert_eq!(exit_code(Some(JobStatus::Failure)), 1);
        assert_eq!(exit_code(None), 3);
    }
}
