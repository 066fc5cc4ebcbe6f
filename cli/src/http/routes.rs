//! HTTP路由handlers

use std::collections::HashSet;

use axum::{
    extract::{Path, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use tasklog_core::api::{build_job, JobInfo, LogQuery, TriggerSpec};

use crate::http::{
    middleware::{create_middleware_stack, request_logger},
    models::*,
    sse::task_log_stream,
    state::AppState,
    validation::validate_task_id,
};

/// 创建所有路由
///
/// 超时与CORS层只挂在JSON API上；SSE路由在其后合并，不受超时限制。
pub fn create_router(state: AppState) -> Router {
    let timeout_secs = state.config.http_server.request_timeout_secs;

    let api = Router::new()
        .route("/api/tasks", get(list_tasks_handler))
        .route("/api/tasks/trigger", post(trigger_task_handler))
        .route("/api/tasks/:task_id", get(task_detail_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/shutdown", post(shutdown_handler))
        .layer(create_middleware_stack(timeout_secs));

    let stream = Router::new().route("/tasklog/sse/task/:task_id", get(task_log_stream));

    api.merge(stream)
        .layer(middleware::from_fn(request_logger))
        .with_state(state)
}

/// GET /api/tasks - 最近的任务列表
async fn list_tasks_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<JobInfo>>, HttpServerError> {
    state.record_request("/api/tasks");
    let limit = state.config.jobs.history_limit;

    let mut tasks = state.tracker().list(limit);
    if tasks.len() < limit {
        // 只存在于日志存储中的任务（例如服务重启之前的任务）
        let known: HashSet<String> = tasks.iter().map(|t| t.job_id.clone()).collect();
        let ids = state.store.job_ids(limit).await.map_err(|e| {
            state.record_error();
            HttpServerError::from(e)
        })?;
        tasks.extend(
            ids.into_iter()
                .filter(|id| !known.contains(id))
                .map(|id| JobInfo::unknown(&id)),
        );
        tasks.truncate(limit);
    }

    Ok(Json(tasks))
}

/// GET /api/tasks/{task_id} - 任务详情与最近日志
async fn task_detail_handler(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskDetailResponse>, HttpServerError> {
    state.record_request("/api/tasks/detail");
    validate_task_id(&task_id)?;

    let info = state
        .tracker()
        .get(&task_id)
        .unwrap_or_else(|| JobInfo::unknown(&task_id));

    let mut logs = state
        .store
        .query(&task_id, LogQuery::newest(state.config.jobs.detail_log_limit))
        .await
        .map_err(|e| {
            state.record_error();
            HttpServerError::from(e)
        })?;
    logs.reverse();
    tracing::debug!(task_id = %task_id, count = logs.len(), "retrieved log lines");

    Ok(Json(TaskDetailResponse {
        info,
        log_count: logs.len(),
        logs,
    }))
}

/// POST /api/tasks/trigger - 启动内置任务
async fn trigger_task_handler(
    State(state): State<AppState>,
    Json(spec): Json<TriggerSpec>,
) -> Result<Json<TriggerResponse>, HttpServerError> {
    state.record_request("/api/tasks/trigger");

    let (job, duration) = build_job(&spec, &state.config.jobs).map_err(|e| {
        state.record_error();
        HttpServerError::from(e)
    })?;
    let task_type = spec.task_type().to_string();
    let handle = state.runner.spawn(job);

    let message = match duration {
        Some(secs) => format!("Demo {task_type} task started with duration {secs} seconds"),
        None => format!("Demo {task_type} task started"),
    };

    Ok(Json(TriggerResponse {
        task_id: handle.job_id().to_string(),
        task_type,
        duration,
        message,
    }))
}

/// GET /health - 健康检查
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let (uptime_seconds, requests_handled) = {
        let stats = state
            .stats
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        (stats.uptime_seconds(), stats.requests_total)
    };

    Json(HealthResponse {
        status: "healthy".into(),
        session_id: state.session_id.clone(),
        uptime_seconds,
        requests_handled,
        active_viewers: state.registry.total_handles(),
        watched_tasks: state.registry.job_count(),
        store: state.store.name().to_string(),
        timestamp: Local::now().to_rfc3339(),
    })
}

/// POST /api/v1/shutdown - 优雅关闭
async fn shutdown_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let _ = state.shutdown_tx.send(());

    Json(serde_json::json!({
        "success": true,
        "message": "Shutdown signal sent"
    }))
}
