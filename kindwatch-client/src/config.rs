use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::AppError;

pub const ENV_CONFIG: &str = "KINDWATCH_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_url: String,
    /// Dashboard refresh interval.
    #[serde(default = "default_interval")]
    pub poll_interval_secs: u64,
}

fn default_interval() -> u64 {
    30
}

impl ClientConfig {
    pub fn find_and_load(cli_value: Option<PathBuf>) -> Result<(PathBuf, Self), AppError> {
        let path = resolve_config_path(cli_value)?;
        let cfg = load_config(&path)?;
        Ok((path, cfg))
    }
}

pub fn resolve_config_path(cli_value: Option<PathBuf>) -> Result<PathBuf, AppError> {
    if let Some(p) = cli_value {
        return Ok(p);
    }
    if let Ok(p) = std::env::var(ENV_CONFIG) {
        return Ok(PathBuf::from(p));
    }
    default_config_path().ok_or_else(|| AppError::Config("could not determine config dir".into()))
}

pub fn default_config_path() -> Option<PathBuf> {
    let pd = ProjectDirs::from("dev", "kindwatch", "kindwatch")?;
    Some(pd.config_dir().join("client.yaml"))
}

pub fn load_config(path: &PathBuf) -> Result<ClientConfig, AppError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("read {} failed: {e}", path.display())))?;
    let cfg: ClientConfig = serde_yaml::from_str(&data)
        .map_err(|e| AppError::Config(format!("parse {} failed: {e}", path.display())))?;
    Ok(cfg)
}

pub fn save_config(path: &PathBuf, cfg: &ClientConfig) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let data = serde_yaml::to_string(cfg)
        .map_err(|e| AppError::Config(format!("serialize config failed: {e}")))?;
    std::fs::write(path, data)
        .map_err(|e| AppError::Config(format!("write {} failed: {e}", path.display())))
}

pub fn normalize_server_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", trimmed.trim_end_matches('/'))
    }
}
