//! Orchestrator settings loaded from `config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::paths::{default_scripts_dir, get_data_dir};

/// Settings read from `config.toml` in the data dir; missing keys take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Interpreter used to run the worker scripts.
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default)]
    pub scripts_dir: Option<PathBuf>,
    /// Working directory of the workers; their `logs/` tree lives here.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_python() -> String {
    "python".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            python: default_python(),
            scripts_dir: None,
            work_dir: None,
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn scripts_dir(&self) -> PathBuf {
        self.scripts_dir.clone().unwrap_or_else(default_scripts_dir)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(get_data_dir)
    }

    /// Listen address, with the port replaced by `$PORT` when it is set.
    pub fn listen_addr(&self) -> String {
        match std::env::var("PORT") {
            Ok(port) if !port.trim().is_empty() => with_port(&self.bind_addr, port.trim()),
            _ => self.bind_addr.clone(),
        }
    }

    pub fn log_filter(&self) -> log::LevelFilter {
        self.log_level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }
}

fn with_port(bind_addr: &str, port: &str) -> String {
    match bind_addr.rsplit_once(':') {
        Some((host, _)) => format!("{}:{}", host, port),
        None => format!("{}:{}", bind_addr, port),
    }
}

/// Load config from disk, writing the defaults out when the file does not exist yet.
pub fn load_config_from_disk(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let config = AppConfig::default();
        save_config_to_disk(path, &config)?;
        return Ok(config);
    }
    let content = fs::read_to_string(path).map_err(|e| AppError::config(e.to_string()))?;
    toml::from_str(&content).map_err(|e| AppError::config(e.to_string()))
}

pub fn save_config_to_disk(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::config(e.to_string()))?;
    }
    let content = toml::to_string_pretty(config).map_err(|e| AppError::config(e.to_string()))?;
    fs::write(path, content).map_err(|e| AppError::config(e.to_string()))
}
