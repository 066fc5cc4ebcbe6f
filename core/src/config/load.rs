use std::path::{Path, PathBuf};

use super::types::{AppConfig, StoreKind};
use crate::error::ConfigError;

/// Get the default tasklog data directory: ~/.tasklog
pub fn get_tasklog_data_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or_else(|| ConfigError::InvalidValue {
        key: "HOME",
        value: "<unset>".to_string(),
    })?;
    Ok(home.join(".tasklog"))
}

pub fn load_from_path(path: &Path) -> Result<AppConfig, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str::<AppConfig>(&s).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_default() -> Result<AppConfig, ConfigError> {
    load(None)
}

/// Resolve the config file, then apply env overrides and store defaults.
pub fn load(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let data_dir = get_tasklog_data_dir()?;

    // Priority 1: --config / $TASKLOG_CONFIG
    // Priority 2: ~/.tasklog/config.toml
    // Priority 3: ./tasklog.toml
    let explicit = explicit.map(Path::to_path_buf).or_else(|| {
        std::env::var("TASKLOG_CONFIG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
    });
    let home_config = data_dir.join("config.toml");
    let local_config = Path::new("tasklog.toml");

    let mut cfg = if let Some(path) = explicit {
        load_from_path(&path)?
    } else if home_config.exists() {
        load_from_path(&home_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg)?;

    if cfg.store.kind == StoreKind::Sqlite && cfg.store.path.trim().is_empty() {
        cfg.store.path = data_dir.join("tasklog.db").to_string_lossy().to_string();
    }

    Ok(cfg)
}

fn apply_env_overrides(cfg: &mut AppConfig) -> Result<(), ConfigError> {
    if let Ok(v) = std::env::var("TASKLOG_HOST") {
        if !v.trim().is_empty() {
            cfg.http_server.host = v;
        }
    }
    if let Ok(v) = std::env::var("TASKLOG_PORT") {
        if !v.trim().is_empty() {
            cfg.http_server.port = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "TASKLOG_PORT",
                    value: v.clone(),
                })?;
        }
    }
    if let Ok(v) = std::env::var("TASKLOG_STORE_PATH") {
        if !v.trim().is_empty() {
            cfg.store.kind = StoreKind::Sqlite;
            cfg.store.path = v;
        }
    }
    Ok(())
}
