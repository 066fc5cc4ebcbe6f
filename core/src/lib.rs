//! tasklog-core: capture the output of background jobs, persist it as ordered
//! log lines and relay new lines to live viewers.

pub mod api;
pub mod bus;
pub mod capture;
pub mod config;
pub mod error;
pub mod jobs;
pub mod publish;
pub mod record;
pub mod registry;
pub mod relay;
pub mod store;
pub mod stream;
