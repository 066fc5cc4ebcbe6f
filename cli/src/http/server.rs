//! HTTP服务器生命周期管理

use super::{routes::create_router, AppState};
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use tasklog_core::api::{get_tasklog_data_dir, BusRelay, CliError};
use tokio::signal;
use tracing::{info, warn};

/// HTTP服务器配置
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
        }
    }
}

/// 获取服务器状态文件目录
fn get_servers_dir() -> Result<PathBuf, CliError> {
    let servers_dir = get_tasklog_data_dir()?.join("servers");
    fs::create_dir_all(&servers_dir)
        .map_err(|e| CliError::Command(format!("Failed to create servers directory: {e}")))?;
    Ok(servers_dir)
}

fn state_file_path() -> Result<PathBuf, CliError> {
    Ok(get_servers_dir()?.join("tasklog.state"))
}

/// 写入服务器状态文件
fn write_state_file(session_id: &str, config: &ServerConfig) -> Result<(), CliError> {
    let state_file = state_file_path()?;

    let state = serde_json::json!({
        "session_id": session_id,
        "port": config.port,
        "pid": std::process::id(),
        "url": format!("http://{}:{}", config.host, config.port),
        "started_at": chrono::Local::now().to_rfc3339()
    });
    let text = serde_json::to_string_pretty(&state)
        .map_err(|e| CliError::Command(format!("Failed to encode state file: {e}")))?;

    fs::write(&state_file, text)
        .map_err(|e| CliError::Command(format!("Failed to write state file: {e}")))?;

    tracing::info!("State file written to: {}", state_file.display());
    Ok(())
}

fn remove_state_file() {
    match state_file_path() {
        Ok(path) => match fs::remove_file(&path) {
            Ok(()) => info!("State file removed: {}", path.display()),
            Err(e) => warn!("Failed to remove state file: {}", e),
        },
        Err(e) => warn!("Failed to locate state file: {}", e),
    }
}

/// 启动HTTP服务器并阻塞直到关闭
pub async fn start_server(config: ServerConfig, state: AppState) -> Result<(), CliError> {
    let session_id = state.session_id.clone();
    info!(
        "Starting HTTP server on {}:{} (session: {})",
        config.host, config.port, session_id
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| CliError::Command(format!("Invalid listen address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP server listening on http://{}", addr);

    // 总线订阅在接受连接前建立
    let relay = BusRelay::start(
        state.bus.clone(),
        state.registry.clone(),
        state.shutdown_tx.subscribe(),
    )
    .await;

    write_state_file(&session_id, &config)?;

    let app = create_router(state.clone());
    let shutdown_tx = state.shutdown_tx.clone();
    let mut shutdown_rx = state.shutdown_tx.subscribe();

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C signal");
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal from API");
                }
                _ = wait_for_sigterm() => {
                    info!("Received SIGTERM signal");
                }
            }

            info!("Starting graceful shutdown...");
            // 结束所有SSE流和总线中继
            let _ = shutdown_tx.send(());
        })
        .await;

    relay.join().await;
    remove_state_file();
    served?;

    info!("Server shutdown complete");
    Ok(())
}

/// 等待 SIGTERM 信号（Unix系统）
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to setup SIGTERM handler: {}", e);
            std::future::pending::<()>().await
        }
    }
}

/// Windows 系统不支持 SIGTERM，使用空操作
#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
