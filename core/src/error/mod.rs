#[allow(clippy::module_inception)]
pub mod error;

pub use error::{BusError, CaptureError, CliError, ConfigError, JobError, StoreError};
