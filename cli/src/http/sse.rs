//! 任务日志SSE端点
//!
//! 每个连接对应一个 `StreamSession`：先回放历史日志，再转发实时日志，空闲时发送keepalive。
//! 客户端断开时响应体被丢弃，会话随之注销；服务器关闭时流主动结束。

use std::convert::Infallible;
use std::sync::PoisonError;

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::Stream;
use tasklog_core::api::{encode_frame, JobStatus, StreamSession};
use tokio::sync::broadcast;

use super::{models::HttpServerError, state::AppState, validation::validate_task_id};

/// GET /tasklog/sse/task/{task_id}
pub async fn task_log_stream(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, HttpServerError> {
    state.record_request("/tasklog/sse/task");
    validate_task_id(&task_id)?;

    // register first, then look at the tracker: a job finishing in between
    // still delivers its done message to this handle
    let session = StreamSession::open(
        &task_id,
        state.store.clone(),
        &state.registry,
        state.config.stream.keepalive(),
    );
    let finished = finished_status(&state, &task_id).await;
    let session = session.with_finished(finished);

    state
        .stats
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .streams_opened += 1;

    let body = Body::from_stream(frames(session, state.shutdown_tx.subscribe()));
    let headers = [
        (header::CONTENT_TYPE, "text/event-stream"),
        (header::CACHE_CONTROL, "no-cache"),
        (header::HeaderName::from_static("x-accel-buffering"), "no"),
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        (header::ACCESS_CONTROL_ALLOW_HEADERS, "Cache-Control"),
    ];

    Ok((headers, body).into_response())
}

/// 追踪器中没有记录（被淘汰或重启前的任务）但存储里有日志时，视为已结束，状态为 `UNKNOWN`。
async fn finished_status(state: &AppState, task_id: &str) -> Option<JobStatus> {
    if let Some(status) = state.tracker().status(task_id) {
        return Some(status);
    }
    match state.store.count(task_id).await {
        Ok(0) => None,
        Ok(_) => Some(JobStatus::Unknown),
        Err(e) => {
            tracing::warn!(task_id = %task_id, error = %e, "log count failed, streaming as live");
            None
        }
    }
}

fn frames(
    mut session: StreamSession,
    mut shutdown: broadcast::Receiver<()>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    async_stream::stream! {
        loop {
            let next = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!(task_id = %session.job_id(), "server shutting down, ending stream");
                    break;
                }
                next = session.next() => next,
            };
            let Some(msg) = next else { break };

            match encode_frame(&msg) {
                Ok(frame) => yield Ok(Bytes::from(frame)),
                Err(e) => {
                    tracing::error!(task_id = %session.job_id(), kind = msg.kind(), error = %e, "frame encode failed");
                }
            }
        }
        session.close();
    }
}
