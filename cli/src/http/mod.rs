//! HTTP服务器模块 - 任务日志SSE流与任务API

pub mod client;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod sse;
pub mod state;
pub mod validation;

pub use client::RemoteClient;
pub use models::*;
pub use server::*;
pub use state::*;
