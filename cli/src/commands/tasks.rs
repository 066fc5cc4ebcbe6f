use tasklog_core::api::{CliError, JobInfo};

use super::cli::TasksArgs;
use crate::http::RemoteClient;

pub async fn run(args: TasksArgs) -> Result<i32, CliError> {
    let client = RemoteClient::new(args.server)?;
    let tasks = client.list_tasks().await?;

    if tasks.is_empty() {
        println!("no tasks");
        return Ok(0);
    }
    for task in &tasks {
        println!("{}", format_row(task));
    }
    Ok(0)
}

fn format_row(task: &JobInfo) -> String {
    let progress = task
        .progress
        .map(|p| format!("{p:>3}%"))
        .unwrap_or_else(|| "   -".to_string());
    format!(
        "{:<36}  {:<12}  {:<8}  {}",
        task.job_id,
        task.task_name,
        task.status.as_str(),
        progress
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_shows_status_and_progress() {
        let mut info = JobInfo::pending("abc", "quick");
        info.progress = Some(66);
        let row = format_row(&info);
        assert!(row.starts_with("abc "));
        assert!(row.contains("PENDING"));
        assert!(row.ends_with(" 66%"));

        let row = format_row(&JobInfo::unknown("old"));
        assert!(row.contains("UNKNOWN"));
        assert!(row.ends_with("   -"));
    }
}
