use clap::{Args as ClapArgs, Parser, Subcommand};

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

#[derive(Parser, Debug)]
#[command(name = "tasklog", version, about = "Stream background job logs to live viewers")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a config file. Defaults to $TASKLOG_CONFIG, ~/.tasklog/config.toml, then ./tasklog.toml.
    #[arg(long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server.
    Serve(ServeArgs),
    /// Follow a task's log stream until it finishes.
    Tail(TailArgs),
    /// Start a built-in task on a running server.
    Trigger(TriggerArgs),
    /// List recent tasks.
    Tasks(TasksArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ServeArgs {
    /// Overrides `http_server.host`.
    #[arg(long)]
    pub host: Option<String>,

    /// Overrides `http_server.port`.
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TailArgs {
    pub task_id: String,

    #[arg(long, default_value = DEFAULT_SERVER)]
    pub server: String,

    /// Print each frame as JSON instead of `[stream] message`.
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TriggerArgs {
    /// long, quick, failing, timed_print or command.
    pub task_type: String,

    /// Seconds for `long` tasks, 1 to 300.
    #[arg(long)]
    pub duration: Option<u64>,

    /// Program to run for `command` tasks.
    #[arg(long)]
    pub command: Option<String>,

    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,

    #[arg(long, default_value = DEFAULT_SERVER)]
    pub server: String,

    /// Follow the new task's stream after triggering it.
    #[arg(long)]
    pub follow: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TasksArgs {
    #[arg(long, default_value = DEFAULT_SERVER)]
    pub server: String,
}
