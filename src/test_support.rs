//! Shared fixtures for unit tests.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::Result;
use crate::hardware::HardwareType;
use crate::instance::{Instance, InstanceRegistry, InstanceStatus};
use crate::process::{WorkerEntry, WorkerResolver};
use crate::store::Store;

pub fn temp_store() -> (tempfile::TempDir, Arc<Store>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().join("state.toml")).unwrap());
    (dir, store)
}

pub fn insert_instance(
    registry: &InstanceRegistry,
    id: &str,
    hardware_type: HardwareType,
    port: &str,
) -> Instance {
    let defaults = hardware_type.defaults();
    let instance = Instance {
        id: id.to_string(),
        project_name: format!("project {}", id),
        hardware_type,
        port: port.to_string(),
        baud_rate: defaults.baud_rate,
        num_cycles: defaults.num_cycles,
        command_delay: defaults.command_delay,
        commands: defaults.commands(),
        status: InstanceStatus::Idle,
        created_at: Utc::now(),
    };
    registry.insert(instance.clone()).unwrap();
    instance
}

/// Poll `cond` until it holds, failing the test after ten seconds.
pub async fn wait_until<F: FnMut() -> bool>(mut cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Runs a shell snippet in place of the real worker. The worker arguments
/// land in `$1..` and are ignored.
pub struct ShellWorker {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ShellWorker {
    pub fn new(script: &str) -> Self {
        Self {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), script.into(), "worker".into()],
        }
    }

    pub fn with_program(program: PathBuf, script: &str) -> Self {
        let args = if script.is_empty() {
            Vec::new()
        } else {
            vec![script.into()]
        };
        Self { program, args }
    }
}

impl WorkerResolver for ShellWorker {
    fn resolve(&self, _hardware_type: HardwareType) -> Result<WorkerEntry> {
        Ok(WorkerEntry {
            program: self.program.clone().into_os_string(),
            args: self.args.clone(),
            current_dir: None,
        })
    }
}
