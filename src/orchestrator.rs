//! Composition root tying the registries to the process supervisor.
//!
//! Instance operations live in `instance::crud` and `instance::lifecycle`;
//! command set operations and startup passes are here.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::allocator::IdAllocator;
use crate::command_set::{
    default_for, CommandSet, CommandSetRegistry, CommandSetUpdate, CreateCommandSet,
};
use crate::error::Result;
use crate::hardware::{HardwareDefaults, HardwareType};
use crate::instance::{reassign_commands, InstanceRegistry};
use crate::process::{ProcessSupervisor, WorkerEvent, WorkerResolver};
use crate::store::Store;

pub struct Orchestrator {
    pub(crate) allocator: IdAllocator,
    pub(crate) instances: InstanceRegistry,
    pub(crate) command_sets: CommandSetRegistry,
    pub(crate) supervisor: Arc<ProcessSupervisor>,
}

impl Orchestrator {
    pub fn new(store: Arc<Store>, resolver: Arc<dyn WorkerResolver>) -> Self {
        let instances = InstanceRegistry::new(Arc::clone(&store));
        let supervisor = Arc::new(ProcessSupervisor::new(instances.clone(), resolver));

        Self {
            allocator: IdAllocator::new(Arc::clone(&store)),
            instances,
            command_sets: CommandSetRegistry::new(store),
            supervisor,
        }
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.supervisor.subscribe()
    }

    pub fn hardware_types(&self) -> Vec<&'static HardwareDefaults> {
        HardwareType::ALL.iter().map(|t| t.defaults()).collect()
    }

    /// Insert or refresh the built-in default set of every hardware type.
    pub fn seed_defaults(&self) -> Result<()> {
        for hardware_type in HardwareType::ALL {
            let defaults = hardware_type.defaults();
            let set = self.command_sets.ensure_default(
                hardware_type,
                defaults.default_set_name,
                &defaults.default_set_commands(),
            )?;
            log::debug!("Default command set for {} is #{}", hardware_type, set.id);
        }
        Ok(())
    }

    /// No worker survives a restart, so any record still marked running is stale.
    pub fn reconcile(&self) -> Result<()> {
        let reset = self.instances.reset_running()?;
        if !reset.is_empty() {
            log::warn!(
                "Reset {} stale running instance(s) to idle: {}",
                reset.len(),
                reset.join(", ")
            );
        }
        Ok(())
    }

    /// Kill every worker; used on shutdown.
    pub fn shutdown(&self) {
        let running = self.supervisor.running_ids();
        if !running.is_empty() {
            log::info!("Stopping {} running instance(s)...", running.len());
        }
        self.supervisor.stop_all();
    }

    pub fn list_command_sets(&self, hardware_type: HardwareType) -> Vec<CommandSet> {
        self.command_sets.list_by_type(hardware_type)
    }

    pub fn get_command_set(&self, id: u64) -> Result<CommandSet> {
        self.command_sets.get(id)
    }

    pub fn create_command_set(&self, request: CreateCommandSet) -> Result<CommandSet> {
        let set = self.command_sets.create(
            &request.name,
            request.hardware_type,
            &request.commands,
        )?;
        log::info!(
            "Created command set #{} '{}' for {}",
            set.id,
            set.name,
            set.hardware_type
        );
        Ok(set)
    }

    pub fn update_command_set(&self, id: u64, update: CommandSetUpdate) -> Result<CommandSet> {
        let set = self.command_sets.update(id, update)?;
        log::info!("Updated command set #{} '{}'", set.id, set.name);
        Ok(set)
    }

    /// Delete a set and move every instance of the same type that runs its
    /// script over to the type's default script. Both happen in one store
    /// transaction; without a default set nothing is deleted.
    pub fn delete_command_set(&self, id: u64) -> Result<CommandSet> {
        let (deleted, (fallback, migrated)) = self.command_sets.delete(id, |state, deleted| {
            let fallback = default_for(state, deleted.hardware_type)?.clone();
            let migrated = reassign_commands(
                state,
                deleted.hardware_type,
                &deleted.commands,
                &fallback.commands,
            );
            Ok((fallback, migrated))
        })?;

        log::info!("Deleted command set #{} '{}'", deleted.id, deleted.name);
        if !migrated.is_empty() {
            log::info!("Moved {} to '{}'", migrated.join(", "), fallback.name);
        }
        Ok(deleted)
    }
}
