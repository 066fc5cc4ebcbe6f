//! HTTP API数据模型

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tasklog_core::api::{JobError, JobInfo, LogRecord, StoreError};

// ============= Tasks =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetailResponse {
    #[serde(flatten)]
    pub info: JobInfo,
    /// 最近的日志行，按时间顺序
    pub logs: Vec<LogRecord>,
    pub log_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub task_id: String,
    pub task_type: String,
    pub duration: Option<u64>,
    pub message: String,
}

// ============= Health =============

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub session_id: String,
    pub uptime_seconds: f64,
    pub requests_handled: u64,
    pub active_viewers: usize,
    pub watched_tasks: usize,
    pub store: String,
    pub timestamp: String,
}

// ============= Error Handling =============

#[derive(Debug)]
pub enum HttpServerError {
    InvalidRequest(String),
    Forbidden(String),
    Store(String),
    Timeout,
    Internal(String),
}

impl IntoResponse for HttpServerError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            Self::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST", msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            Self::Store(msg) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_ERROR", msg),
            Self::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
                "Request timeout".to_string(),
            ),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = serde_json::json!({
            "success": false,
            "error": message,
            "error_code": error_code,
        });

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for HttpServerError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<JobError> for HttpServerError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::UnknownTaskType(_) | JobError::Spawn(_) => {
                Self::InvalidRequest(e.to_string())
            }
            JobError::CommandsDisabled => Self::Forbidden(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}
