//! Worker process supervision.

mod control;
mod manager;
mod output;
mod worker;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

pub use manager::ProcessSupervisor;
pub use output::{ProgressRecord, WorkerOutput};
pub use worker::{worker_args, PythonScripts, WorkerEntry, WorkerResolver};

/// How long buffered stdout may keep flowing after the worker has exited.
const DRAIN_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Capacity of the worker event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEventKind {
    Started { pid: Option<u32>, port: String },
    Progress { record: ProgressRecord },
    Stopped,
    Exited { code: Option<i32> },
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerEvent {
    pub instance_id: String,
    /// Spawn number, distinguishes consecutive runs of one instance.
    pub run: u64,
    #[serde(flatten)]
    pub kind: WorkerEventKind,
}

/// Read-only view of a tracked worker.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub instance_id: String,
    pub run: u64,
    pub pid: Option<u32>,
    pub port: String,
    pub started_at: DateTime<Utc>,
    pub last_progress: Option<ProgressRecord>,
}

/// A live worker in the supervisor's map.
struct RunningProcess {
    run: u64,
    pid: Option<u32>,
    port: String,
    started_at: DateTime<Utc>,
    last_progress: Option<ProgressRecord>,
    /// Set once `wait()` has reaped the child, so its pid must not be signalled again.
    pid_exited: bool,
    /// Dropping or firing this asks the supervisory task to kill the worker.
    kill: Option<oneshot::Sender<()>>,
}

impl RunningProcess {
    fn info(&self, instance_id: &str) -> ProcessInfo {
        ProcessInfo {
            instance_id: instance_id.to_string(),
            run: self.run,
            pid: self.pid,
            port: self.port.clone(),
            started_at: self.started_at,
            last_progress: self.last_progress.clone(),
        }
    }

    fn request_kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}
