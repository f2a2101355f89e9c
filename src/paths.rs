//! Centralized path utilities for the application.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// Get the root data directory for the application (~/.hwtest_orchestrator).
#[allow(clippy::expect_used)]
pub fn get_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot find home directory");
    home.join(".hwtest_orchestrator")
}

/// Get the path to the config file.
pub fn config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Get the path to the durable state file.
pub fn state_path() -> PathBuf {
    get_data_dir().join("state.toml")
}

/// Default location of the worker scripts.
pub fn default_scripts_dir() -> PathBuf {
    get_data_dir().join("scripts")
}

/// Ensure all required data directories exist.
pub fn ensure_data_dirs() -> Result<()> {
    let base = get_data_dir();
    fs::create_dir_all(&base).map_err(|e| AppError::io(e.to_string()))?;
    fs::create_dir_all(default_scripts_dir()).map_err(|e| AppError::io(e.to_string()))?;
    Ok(())
}

/// Directory the workers write their daily logs into, relative to their cwd.
pub fn get_logs_dir(work_dir: &Path) -> PathBuf {
    work_dir.join("logs")
}

/// Log written by a worker: `<work_dir>/logs/<date>/<instance_id>.log`.
pub fn get_log_file_path(work_dir: &Path, date: &str, instance_id: &str) -> PathBuf {
    get_logs_dir(work_dir)
        .join(date)
        .join(format!("{}.log", instance_id))
}
