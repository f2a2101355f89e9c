//! Worker process tracking and lifecycle supervision.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::process::Child;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use super::control::{force_kill, terminate};
use super::output::{drain_lines, ProgressRecord, WorkerOutput};
use super::worker::{build_command, WorkerResolver};
use super::{
    ProcessInfo, RunningProcess, WorkerEvent, WorkerEventKind, DRAIN_GRACE_PERIOD,
    EVENT_CHANNEL_CAPACITY,
};
use crate::error::{AppError, ErrorKind, Result};
use crate::instance::{Instance, InstanceRegistry, InstanceStatus};

/// Owns the running-worker map.
///
/// An instance is running exactly when its id is a key in `processes`. Every
/// transition in or out of the map is mirrored into the instance's persisted
/// status while the map's write lock is still held. Lock order is
/// `processes`, then the store. The lock is never held across `.await`.
pub struct ProcessSupervisor {
    processes: RwLock<HashMap<String, RunningProcess>>,
    instances: InstanceRegistry,
    resolver: Arc<dyn WorkerResolver>,
    events: broadcast::Sender<WorkerEvent>,
    next_run: AtomicU64,
}

async fn finish_drain(mut task: JoinHandle<()>) {
    if tokio::time::timeout(DRAIN_GRACE_PERIOD, &mut task)
        .await
        .is_err()
    {
        task.abort();
    }
}

impl ProcessSupervisor {
    pub fn new(instances: InstanceRegistry, resolver: Arc<dyn WorkerResolver>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            processes: RwLock::new(HashMap::new()),
            instances,
            resolver,
            events,
            next_run: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, instance_id: &str, run: u64, kind: WorkerEventKind) {
        let _ = self.events.send(WorkerEvent {
            instance_id: instance_id.to_string(),
            run,
            kind,
        });
    }

    pub fn is_running(&self, instance_id: &str) -> bool {
        let procs = self.processes.read().unwrap_or_else(|e| e.into_inner());
        procs.contains_key(instance_id)
    }

    /// Id of the tracked worker holding `port`, if any.
    pub fn port_holder(&self, port: &str) -> Option<String> {
        let procs = self.processes.read().unwrap_or_else(|e| e.into_inner());
        procs
            .iter()
            .find(|(_, process)| process.port == port)
            .map(|(id, _)| id.clone())
    }

    pub fn port_in_use(&self, port: &str) -> bool {
        self.port_holder(port).is_some()
    }

    /// Snapshot of the tracked worker, including its latest progress record.
    pub fn get(&self, instance_id: &str) -> Option<ProcessInfo> {
        let procs = self.processes.read().unwrap_or_else(|e| e.into_inner());
        procs.get(instance_id).map(|process| process.info(instance_id))
    }

    pub fn running_ids(&self) -> Vec<String> {
        let procs = self.processes.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = procs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Spawn the worker for `instance` and return once it is tracked and
    /// persisted as running. Output and exit are handled in the background.
    pub fn start(self: &Arc<Self>, instance: &Instance) -> Result<ProcessInfo> {
        let id = instance.id.as_str();
        if self.is_running(id) {
            return Err(AppError::already_running(id));
        }

        let entry = self.resolver.resolve(instance.hardware_type)?;

        let mut procs = self.processes.write().unwrap_or_else(|e| e.into_inner());
        if procs.contains_key(id) {
            return Err(AppError::already_running(id));
        }
        if let Some((holder, _)) = procs.iter().find(|(_, p)| p.port == instance.port) {
            return Err(AppError::port_conflict(&instance.port, holder));
        }

        let mut child = build_command(&entry, instance)
            .spawn()
            .map_err(|e| AppError::process(format!("Failed to start worker for {}: {}", id, e)))?;

        let pid = child.id();
        let run = self.next_run.fetch_add(1, Ordering::Relaxed) + 1;
        let (kill_tx, kill_rx) = oneshot::channel();
        let process = RunningProcess {
            run,
            pid,
            port: instance.port.clone(),
            started_at: Utc::now(),
            last_progress: None,
            pid_exited: false,
            kill: Some(kill_tx),
        };
        let info = process.info(id);
        procs.insert(id.to_string(), process);

        // The persisted status follows the map under the same guard, so a
        // concurrent stop or exit can't interleave with it.
        if let Err(e) = self.instances.update_status(id, InstanceStatus::Running) {
            log::error!("Failed to persist running status for {}: {}", id, e);
            procs.remove(id);
            drop(procs);
            terminate(&mut child);
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
            return Err(e);
        }
        drop(procs);

        log::info!(
            "Instance {} worker started (pid: {:?}, port: {})",
            id,
            pid,
            instance.port
        );
        self.emit(
            id,
            run,
            WorkerEventKind::Started {
                pid,
                port: instance.port.clone(),
            },
        );

        let stdout_task = child.stdout.take().map(|stdout| {
            let supervisor = Arc::clone(self);
            let id = id.to_string();
            tokio::spawn(async move {
                drain_lines(stdout, |line| match WorkerOutput::parse(line) {
                    WorkerOutput::Progress(record) => {
                        log::info!("[{} progress] {}", id, line);
                        supervisor.record_progress(&id, run, record);
                    }
                    WorkerOutput::Text(text) => log::info!("[{} stdout] {}", id, text),
                })
                .await;
            })
        });

        let stderr_task = child.stderr.take().map(|stderr| {
            let id = id.to_string();
            tokio::spawn(async move {
                drain_lines(stderr, |line| log::warn!("[{} stderr] {}", id, line)).await;
            })
        });

        tokio::spawn(Arc::clone(self).supervise(
            id.to_string(),
            run,
            child,
            kill_rx,
            [stdout_task, stderr_task],
        ));

        Ok(info)
    }

    /// Wait for the worker to exit or for a kill request, then let the
    /// output drains finish and run the exit transition.
    async fn supervise(
        self: Arc<Self>,
        id: String,
        run: u64,
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        drains: [Option<JoinHandle<()>>; 2],
    ) {
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = kill_rx => None,
        };

        let status = match exited {
            Some(status) => status,
            None => {
                log::info!("Killing worker for instance {}", id);
                terminate(&mut child);
                child.wait().await
            }
        };
        self.mark_pid_exited(&id, run);

        for task in drains.into_iter().flatten() {
            finish_drain(task).await;
        }

        let code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                log::warn!("Failed to wait for worker of {}: {}", id, e);
                None
            }
        };
        self.on_exit(&id, run, code);
    }

    /// Exit transition for one worker run. Any exit code counts as finished.
    ///
    /// Only removes the entry if it still belongs to `run`, so a racing `stop`
    /// (or a newer run of the same instance) is left alone. Returns whether
    /// this call performed the transition.
    pub fn on_exit(&self, instance_id: &str, run: u64, exit_code: Option<i32>) -> bool {
        log::info!(
            "Instance {} worker exited with code {:?}",
            instance_id,
            exit_code
        );

        let transitioned = {
            let mut procs = self.processes.write().unwrap_or_else(|e| e.into_inner());
            if procs.get(instance_id).is_some_and(|p| p.run == run) {
                procs.remove(instance_id);
                self.persist_idle(instance_id);
                true
            } else {
                false
            }
        };

        self.emit(instance_id, run, WorkerEventKind::Exited { code: exit_code });
        transitioned
    }

    /// Kill the worker and mark the instance idle. Exit is observed later.
    pub fn stop(&self, instance_id: &str) -> Result<()> {
        let (mut process, persisted) = {
            let mut procs = self.processes.write().unwrap_or_else(|e| e.into_inner());
            let process = procs
                .remove(instance_id)
                .ok_or_else(|| AppError::not_running(instance_id))?;
            let persisted = self.instances.update_status(instance_id, InstanceStatus::Idle);
            (process, persisted)
        };

        log::info!(
            "Stopping instance {} (pid: {:?}, port: {})",
            instance_id,
            process.pid,
            process.port
        );
        process.request_kill();
        self.emit(instance_id, process.run, WorkerEventKind::Stopped);

        match persisted {
            Err(e) if e.kind() != ErrorKind::InstanceNotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Kill every tracked worker. Used on shutdown, so the kill is also sent
    /// directly instead of relying on the supervisory tasks to still run.
    pub fn stop_all(&self) {
        let entries: Vec<(String, RunningProcess)> = {
            let mut procs = self.processes.write().unwrap_or_else(|e| e.into_inner());
            let entries: Vec<_> = procs.drain().collect();
            for (id, _) in &entries {
                self.persist_idle(id);
            }
            entries
        };

        for (id, mut process) in entries {
            log::info!(
                "Stopping instance {} (pid: {:?}, port: {})",
                id,
                process.pid,
                process.port
            );
            process.request_kill();
            if let (Some(pid), false) = (process.pid, process.pid_exited) {
                if let Err(e) = force_kill(pid) {
                    log::warn!("Failed to kill worker PID {}: {}", pid, e);
                }
            }
            self.emit(&id, process.run, WorkerEventKind::Stopped);
        }
    }

    fn mark_pid_exited(&self, instance_id: &str, run: u64) {
        let mut procs = self.processes.write().unwrap_or_else(|e| e.into_inner());
        if let Some(process) = procs.get_mut(instance_id) {
            if process.run == run {
                process.pid_exited = true;
            }
        }
    }

    fn record_progress(&self, instance_id: &str, run: u64, record: ProgressRecord) {
        {
            let mut procs = self.processes.write().unwrap_or_else(|e| e.into_inner());
            if let Some(process) = procs.get_mut(instance_id) {
                if process.run == run {
                    process.last_progress = Some(record.clone());
                }
            }
        }
        self.emit(instance_id, run, WorkerEventKind::Progress { record });
    }

    fn persist_idle(&self, instance_id: &str) {
        match self.instances.update_status(instance_id, InstanceStatus::Idle) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::InstanceNotFound => {}
            Err(e) => log::error!("Failed to persist idle status for {}: {}", instance_id, e),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::hardware::HardwareType;
    use crate::test_support::{insert_instance, temp_store, wait_until, ShellWorker};

    fn supervisor(
        script: &str,
    ) -> (tempfile::TempDir, InstanceRegistry, Arc<ProcessSupervisor>) {
        let (dir, store) = temp_store();
        let registry = InstanceRegistry::new(store);
        let supervisor = Arc::new(ProcessSupervisor::new(
            registry.clone(),
            Arc::new(ShellWorker::new(script)),
        ));
        (dir, registry, supervisor)
    }

    async fn next_exit(rx: &mut broadcast::Receiver<WorkerEvent>) -> Option<i32> {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for worker event")
                .expect("event channel closed");
            if let WorkerEventKind::Exited { code } = event.kind {
                return code;
            }
        }
    }

    #[tokio::test]
    async fn start_stop_round() {
        let (_dir, registry, sup) = supervisor("exec sleep 30");
        let instance = insert_instance(&registry, "qtap_1", HardwareType::Qtap, "COM1");
        let mut rx = sup.subscribe();

        let info = sup.start(&instance).unwrap();
        assert!(info.pid.is_some());
        assert!(sup.is_running("qtap_1"));
        assert!(sup.port_in_use("COM1"));
        assert_eq!(registry.get("qtap_1").unwrap().status, InstanceStatus::Running);

        let err = sup.start(&instance).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyRunning);

        sup.stop("qtap_1").unwrap();
        assert!(!sup.is_running("qtap_1"));
        assert_eq!(registry.get("qtap_1").unwrap().status, InstanceStatus::Idle);

        // The kill is observed through the exit path, which is then a no-op.
        assert_eq!(next_exit(&mut rx).await, None);
        assert_eq!(registry.get("qtap_1").unwrap().status, InstanceStatus::Idle);

        let err = sup.stop("qtap_1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotRunning);
    }

    #[tokio::test]
    async fn port_is_exclusive_among_running_workers() {
        let (_dir, registry, sup) = supervisor("exec sleep 30");
        let first = insert_instance(&registry, "qswipe_1", HardwareType::Qswipe, "COM3");
        let second = insert_instance(&registry, "qswipe_2", HardwareType::Qswipe, "COM3");

        sup.start(&first).unwrap();
        let err = sup.start(&second).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PortConflict);
        assert_eq!(err.payload()["holder"], "qswipe_1");
        assert_eq!(sup.running_ids(), vec!["qswipe_1"]);
        assert_eq!(registry.get("qswipe_2").unwrap().status, InstanceStatus::Idle);

        sup.stop("qswipe_1").unwrap();
        sup.start(&second).unwrap();
        assert_eq!(sup.port_holder("COM3").as_deref(), Some("qswipe_2"));
        sup.stop_all();
        assert!(sup.running_ids().is_empty());
        assert_eq!(registry.get("qswipe_2").unwrap().status, InstanceStatus::Idle);
    }

    #[tokio::test]
    async fn natural_exit_returns_to_idle_and_forwards_progress() {
        let (_dir, registry, sup) = supervisor(
            r#"echo '{"cycle": 1, "total_cycles": 1}'; echo 'plain text'; echo oops >&2; exit 3"#,
        );
        let instance = insert_instance(&registry, "qba_1", HardwareType::Qba, "COM5");
        let mut rx = sup.subscribe();

        sup.start(&instance).unwrap();

        let mut progress = Vec::new();
        let code = loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap()
                .unwrap();
            match event.kind {
                WorkerEventKind::Progress { record } => progress.push(record),
                WorkerEventKind::Exited { code } => break code,
                _ => {}
            }
        };

        assert_eq!(code, Some(3));
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0]["cycle"], 1);
        assert!(!sup.is_running("qba_1"));
        assert_eq!(registry.get("qba_1").unwrap().status, InstanceStatus::Idle);
        assert_eq!(
            sup.stop("qba_1").unwrap_err().kind(),
            ErrorKind::NotRunning
        );
    }

    #[tokio::test]
    async fn stale_exit_does_not_touch_newer_run() {
        let (_dir, registry, sup) = supervisor("exec sleep 30");
        let instance = insert_instance(&registry, "qbq_1", HardwareType::Qbq, "COM7");

        let info = sup.start(&instance).unwrap();
        assert!(!sup.on_exit("qbq_1", info.run + 1, Some(0)));
        assert!(sup.is_running("qbq_1"));
        assert_eq!(registry.get("qbq_1").unwrap().status, InstanceStatus::Running);

        assert!(sup.on_exit("qbq_1", info.run, Some(0)));
        assert!(!sup.on_exit("qbq_1", info.run, Some(0)));
        assert!(!sup.is_running("qbq_1"));
        assert_eq!(registry.get("qbq_1").unwrap().status, InstanceStatus::Idle);
    }

    #[tokio::test]
    async fn last_progress_tracks_latest_record() {
        let (_dir, registry, sup) =
            supervisor(r#"echo '{"cycle": 1}'; echo '{"cycle": 2}'; exec sleep 30"#);
        let instance = insert_instance(&registry, "qtap_4", HardwareType::Qtap, "COM4");

        sup.start(&instance).unwrap();
        let sup_ref = Arc::clone(&sup);
        wait_until(move || {
            sup_ref
                .get("qtap_4")
                .and_then(|info| info.last_progress)
                .is_some_and(|p| p["cycle"] == 2)
        })
        .await;

        sup.stop("qtap_4").unwrap();
        assert!(sup.get("qtap_4").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_stop_never_leaves_a_stale_running_record() {
        let (_dir, registry, sup) = supervisor("exec sleep 30");
        let instance = insert_instance(&registry, "qtap_1", HardwareType::Qtap, "COM1");

        for _ in 0..100 {
            let stopper = {
                let sup = Arc::clone(&sup);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if sup.stop("qtap_1").is_ok() {
                            return;
                        }
                        std::thread::yield_now();
                    }
                })
            };
            sup.start(&instance).unwrap();
            stopper.join().unwrap();

            let persisted = registry.get("qtap_1").unwrap().status;
            assert_eq!(
                sup.is_running("qtap_1"),
                persisted == InstanceStatus::Running
            );

            let _ = sup.stop("qtap_1");
            assert_eq!(registry.get("qtap_1").unwrap().status, InstanceStatus::Idle);
        }
    }

    #[tokio::test]
    async fn exit_of_old_run_leaves_restarted_worker_running() {
        let (_dir, registry, sup) = supervisor("exec sleep 30");
        let instance = insert_instance(&registry, "qba_2", HardwareType::Qba, "COM2");
        let mut rx = sup.subscribe();

        let first = sup.start(&instance).unwrap();
        sup.stop("qba_2").unwrap();
        let second = sup.start(&instance).unwrap();
        assert!(second.run > first.run);

        // The killed first run reports its exit after the restart.
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event.kind, WorkerEventKind::Exited { .. }) {
                assert_eq!(event.run, first.run);
                break;
            }
        }
        assert!(sup.is_running("qba_2"));
        assert_eq!(registry.get("qba_2").unwrap().status, InstanceStatus::Running);
        sup.stop_all();
    }

    #[tokio::test]
    async fn spawn_failure_tracks_nothing() {
        let (dir, store) = temp_store();
        let registry = InstanceRegistry::new(store);
        let sup = Arc::new(ProcessSupervisor::new(
            registry.clone(),
            Arc::new(ShellWorker::with_program(dir.path().join("missing-binary"), "")),
        ));
        let instance = insert_instance(&registry, "qtap_9", HardwareType::Qtap, "COM9");

        let err = sup.start(&instance).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Process);
        assert!(!sup.is_running("qtap_9"));
        assert!(!sup.port_in_use("COM9"));
        assert_eq!(registry.get("qtap_9").unwrap().status, InstanceStatus::Idle);
    }
}
