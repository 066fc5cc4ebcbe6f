//! Stable re-exports for consumers (`cli` and external crates).
//!
//! Prefer importing from `tasklog_core::api` instead of reaching into internal modules.

pub use crate::bus::{
    channel_for, job_id_from_channel, BusMessage, BusSubscription, ChannelPattern, LocalBus,
    MessageBus, Subscription, ALL_JOBS_PATTERN, CHANNEL_PREFIX,
};
pub use crate::capture::{pump_into, CaptureScope, LogWriter};
pub use crate::config::{
    get_tasklog_data_dir, load, load_default, load_from_path, AppConfig, BusConfig, HttpServerConfig,
    JobsConfig, LoggingConfig, StoreConfig, StoreKind, StreamConfig,
};
pub use crate::error::{BusError, CaptureError, CliError, ConfigError, JobError, StoreError};
pub use crate::jobs::{
    build_job, normalize_duration, CommandJob, Job, JobContext, JobHandle, JobInfo, JobRunner,
    JobStatus, JobTracker, TriggerSpec,
};
pub use crate::publish::{LineSink, Publisher};
pub use crate::record::{BroadcastMessage, LogRecord, LogStream};
pub use crate::registry::{HandleId, SharedMessage, SubscriberHandle, SubscriptionRegistry};
pub use crate::relay::{BusRelay, RelayStats};
pub use crate::store::{open_store, LogQuery, LogStore, MemoryLogStore, Order, SqliteLogStore};
pub use crate::stream::{encode_frame, FrameDecoder, SessionState, StreamSession};
