//! Instance lifecycle management (start/stop).

use crate::error::{AppError, Result};
use crate::orchestrator::Orchestrator;
use crate::process::ProcessInfo;

impl Orchestrator {
    /// Start the instance's worker. Returns once it is registered; the run
    /// itself continues in the background.
    pub fn start(&self, id: &str) -> Result<ProcessInfo> {
        let instance = self.instances.get(id)?;

        if let Some(holder) = self.supervisor.port_holder(&instance.port) {
            if holder == id {
                return Err(AppError::already_running(id));
            }
            return Err(AppError::port_conflict(&instance.port, &holder));
        }

        self.supervisor.start(&instance)
    }

    pub fn stop(&self, id: &str) -> Result<()> {
        self.supervisor.stop(id)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.supervisor.is_running(id)
    }

    /// The running worker with its latest progress record, `None` when idle.
    pub fn progress(&self, id: &str) -> Result<Option<ProcessInfo>> {
        self.instances.get(id)?;
        Ok(self.supervisor.get(id))
    }
}
