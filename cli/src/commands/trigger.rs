use tasklog_core::api::{CliError, TriggerSpec};

use super::cli::TriggerArgs;
use crate::http::RemoteClient;

pub async fn run(args: TriggerArgs) -> Result<i32, CliError> {
    let client = RemoteClient::new(args.server.clone())?;
    let spec = spec_from_args(&args);

    let resp = client.trigger(&spec).await?;
    println!("{}", resp.message);
    println!("task_id: {}", resp.task_id);

    if args.follow {
        return super::tail::follow(&client, &resp.task_id, false).await;
    }
    Ok(0)
}

fn spec_from_args(args: &TriggerArgs) -> TriggerSpec {
    TriggerSpec {
        task_type: Some(args.task_type.clone()),
        duration: args.duration.map(serde_json::Value::from),
        command: args.command.clone(),
        args: args.args.clone(),
    }
}
