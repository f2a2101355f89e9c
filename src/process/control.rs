//! Platform-specific process termination.

use tokio::process::Child;

use crate::error::{AppError, Result};

#[cfg(target_os = "windows")]
pub fn force_kill(pid: u32) -> Result<()> {
    let output = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output()
        .map_err(|e| AppError::process(format!("Failed to run taskkill: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(AppError::process(format!(
            "taskkill failed for pid {}: {}",
            pid,
            stderr.trim()
        )))
    }
}

/// SIGKILL the worker's process group, so helpers it spawned go down with it.
#[cfg(not(target_os = "windows"))]
pub fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    let target = Pid::from_raw(pid as i32);
    match getpgid(Some(target)) {
        Ok(pgid) => killpg(pgid, Signal::SIGKILL).map_err(|e| {
            AppError::process(format!(
                "Failed to kill process group {} (from pid {}): {}",
                pgid.as_raw(),
                pid,
                e
            ))
        }),
        Err(e) => kill(target, Signal::SIGKILL).map_err(|kill_err| {
            AppError::process(format!(
                "Failed to kill process {} (getpgid failed: {}): {}",
                pid, e, kill_err
            ))
        }),
    }
}

/// Kill a worker that has not been reaped yet. Not graceful.
pub(super) fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        if let Err(e) = force_kill(pid) {
            log::debug!("Force kill of PID {} failed: {}", pid, e);
        }
    }
    if let Err(e) = child.start_kill() {
        log::debug!("start_kill failed: {}", e);
    }
}
