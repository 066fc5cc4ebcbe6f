use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store write failed for task {task_id}: {reason}")]
    WriteFailure { task_id: String, reason: String },
    #[error("store query failed: {0}")]
    Query(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store worker failed: {0}")]
    Join(String),
}

#[derive(Error, Debug)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),
    #[error("bus subscription closed")]
    Closed,
    #[error("payload encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("{stream} capture failed: {source}")]
    Store {
        stream: &'static str,
        source: StoreError,
    },
    #[error("{stream} read failed: {source}")]
    StreamIo {
        stream: &'static str,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),
    #[error("command jobs are disabled")]
    CommandsDisabled,
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("job failed: {0}")]
    Failed(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}
