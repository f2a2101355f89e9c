//! Resolving and invoking the external test-runner for a hardware type.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{AppError, Result};
use crate::hardware::HardwareType;
use crate::instance::Instance;

/// How to launch a worker: program, leading arguments and working directory.
/// The instance arguments from [`worker_args`] are appended after `args`.
#[derive(Debug, Clone)]
pub struct WorkerEntry {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
}

/// Maps a hardware type to its worker entry point.
pub trait WorkerResolver: Send + Sync {
    fn resolve(&self, hardware_type: HardwareType) -> Result<WorkerEntry>;
}

/// Runs `<python> <scripts_dir>/<type>_test.py` inside `work_dir`.
#[derive(Debug, Clone)]
pub struct PythonScripts {
    pub python: String,
    pub scripts_dir: PathBuf,
    pub work_dir: PathBuf,
}

impl WorkerResolver for PythonScripts {
    fn resolve(&self, hardware_type: HardwareType) -> Result<WorkerEntry> {
        let script = self.scripts_dir.join(hardware_type.script_name());
        if !script.is_file() {
            return Err(AppError::process(format!(
                "Worker script not found: {}",
                script.display()
            )));
        }

        std::fs::create_dir_all(&self.work_dir)
            .map_err(|e| AppError::io(format!("Failed to create work dir: {}", e)))?;

        Ok(WorkerEntry {
            program: OsString::from(&self.python),
            args: vec![script.into_os_string()],
            current_dir: Some(self.work_dir.clone()),
        })
    }
}

/// Invocation arguments for an instance, commands last.
pub fn worker_args(instance: &Instance) -> Vec<String> {
    let mut args = vec![
        "--port".to_string(),
        instance.port.clone(),
        "--baud".to_string(),
        instance.baud_rate.to_string(),
        "--cycles".to_string(),
        instance.num_cycles.to_string(),
        "--delay".to_string(),
        instance.command_delay.to_string(),
        "--id".to_string(),
        instance.id.clone(),
    ];
    if instance.hardware_type.worker_takes_project() {
        args.push("--project".to_string());
        args.push(instance.project_name.clone());
    }
    args.push("--commands".to_string());
    args.extend(instance.commands.iter().cloned());
    args
}

pub(super) fn build_command(entry: &WorkerEntry, instance: &Instance) -> Command {
    let mut cmd = Command::new(&entry.program);
    cmd.args(&entry.args)
        .args(worker_args(instance))
        .env("PYTHONUNBUFFERED", "1")
        .env("PYTHONIOENCODING", "utf-8")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &entry.current_dir {
        cmd.current_dir(dir);
    }

    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    #[cfg(unix)]
    {
        cmd.process_group(0);
    }

    cmd
}
