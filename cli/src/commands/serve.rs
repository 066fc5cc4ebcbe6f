use std::sync::Arc;

use tasklog_core::api::{open_store, AppConfig, CliError, LocalBus};
use tokio::sync::broadcast;

use super::cli::ServeArgs;
use crate::http::{start_server, AppState, ServerConfig};

pub async fn run(args: ServeArgs, mut cfg: AppConfig) -> Result<i32, CliError> {
    if let Some(host) = args.host {
        cfg.http_server.host = host;
    }
    if let Some(port) = args.port {
        cfg.http_server.port = port;
    }

    let store = open_store(&cfg.store).await?;
    tracing::info!(store = store.name(), "log store ready");
    let bus = Arc::new(LocalBus::new(cfg.bus.channel_capacity));

    let server_config = ServerConfig {
        host: cfg.http_server.host.clone(),
        port: cfg.http_server.port,
    };
    let session_id = uuid::Uuid::new_v4().to_string();
    let (shutdown_tx, _) = broadcast::channel(4);
    let state = AppState::new(session_id, cfg, store, bus, shutdown_tx);

    start_server(server_config, state).await?;
    Ok(0)
}
