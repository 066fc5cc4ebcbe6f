mod load;
mod types;

pub use load::{get_tasklog_data_dir, load, load_default, load_from_path};
pub use types::{
    AppConfig, BusConfig, HttpServerConfig, JobsConfig, LoggingConfig, StoreConfig, StoreKind,
    StreamConfig,
};
