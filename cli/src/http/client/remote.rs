//! 远程客户端 - 通过 HTTP 调用 tasklog 服务器

use futures::stream::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tasklog_core::api::{BroadcastMessage, CliError, FrameDecoder, JobInfo, JobStatus, TriggerSpec};

use crate::http::models::{TaskDetailResponse, TriggerResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 远程客户端
#[derive(Clone)]
pub struct RemoteClient {
    client: Client,
    server_url: String,
}

impl RemoteClient {
    /// 创建新的远程客户端
    ///
    /// 不设置整体超时：SSE连接是长连接，超时只加在普通请求上。
    pub fn new(server_url: impl Into<String>) -> Result<Self, CliError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CliError::Command(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            server_url: server_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// 触发任务
    pub async fn trigger(&self, spec: &TriggerSpec) -> Result<TriggerResponse, CliError> {
        let url = format!("{}/api/tasks/trigger", self.server_url);
        tracing::debug!(target: "tasklog.client", "Sending trigger request to {}", url);

        let response = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(spec)
            .send()
            .await
            .map_err(|e| CliError::Command(format!("Failed to send request: {e}")))?;
        decode_json(response).await
    }

    /// 任务列表
    pub async fn list_tasks(&self) -> Result<Vec<JobInfo>, CliError> {
        let url = format!("{}/api/tasks", self.server_url);
        let response = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| CliError::Command(format!("Failed to send request: {e}")))?;
        decode_json(response).await
    }

    pub async fn task_detail(&self, task_id: &str) -> Result<TaskDetailResponse, CliError> {
        let url = format!("{}/api/tasks/{}", self.server_url, task_id);
        let response = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| CliError::Command(format!("Failed to send request: {e}")))?;
        decode_json(response).await
    }

    /// 订阅任务日志流，每条消息回调一次
    ///
    /// 收到 `done` 时返回任务的最终状态；服务器关闭连接时返回 `None`。
    pub async fn tail<F>(&self, task_id: &str, mut on_message: F) -> Result<Option<JobStatus>, CliError>
    where
        F: FnMut(&BroadcastMessage),
    {
        let url = format!("{}/tasklog/sse/task/{}", self.server_url, task_id);
        tracing::debug!(target: "tasklog.client", "Opening event stream {}", url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| CliError::Command(format!("Failed to connect: {e}")))?;
        let response = check_status(response).await?;

        let mut decoder = FrameDecoder::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CliError::Command(format!("Stream error: {e}")))?;
            for data in decoder.push(&chunk) {
                let msg = match BroadcastMessage::from_json(&data) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!(target: "tasklog.client", error = %e, "ignoring malformed frame");
                        continue;
                    }
                };
                on_message(&msg);
                if let BroadcastMessage::Done { status, .. } = msg {
                    return Ok(Some(status));
                }
            }
        }

        Ok(None)
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<bool, CliError> {
        let url = format!("{}/health", self.server_url);

        let response = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| CliError::Command(format!("Health check failed: {e}")))?;

        Ok(response.status().is_success())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CliError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(CliError::Command(format!(
        "Request failed with status {status}: {error_text}"
    )))
}

async fn decode_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, CliError> {
    let response = check_status(response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| CliError::Command(format!("Invalid response body: {e}")))
}
