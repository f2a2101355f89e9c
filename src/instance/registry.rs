//! Persistence and queries over instance records.

use std::sync::Arc;

use super::types::{Instance, InstanceConfig, InstanceStatus};
use crate::command_set::{find_command_set, CommandSet};
use crate::error::{AppError, Result};
use crate::hardware::HardwareType;
use crate::store::{State, Store};

#[derive(Clone)]
pub struct InstanceRegistry {
    store: Arc<Store>,
}

fn get_mut<'a>(state: &'a mut State, id: &str) -> Result<&'a mut Instance> {
    state
        .instances
        .get_mut(id)
        .ok_or_else(|| AppError::instance_not_found(id))
}

/// Point every instance of `hardware_type` running the `from` script at `to`.
/// Returns the ids that changed.
pub(crate) fn reassign_commands(
    state: &mut State,
    hardware_type: HardwareType,
    from: &[String],
    to: &[String],
) -> Vec<String> {
    let mut changed = Vec::new();
    for instance in state.instances.values_mut() {
        if instance.hardware_type == hardware_type && instance.commands == from {
            instance.commands = to.to_vec();
            changed.push(instance.id.clone());
        }
    }
    changed
}

impl InstanceRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn insert(&self, instance: Instance) -> Result<()> {
        self.store.with_state_mut(move |state| {
            if state.instances.contains_key(&instance.id) {
                return Err(AppError::other(format!(
                    "Instance {} already exists",
                    instance.id
                )));
            }
            if state.instances.values().any(|existing| {
                existing.hardware_type == instance.hardware_type
                    && existing.project_name == instance.project_name
            }) {
                return Err(AppError::duplicate_project(
                    &instance.project_name,
                    instance.hardware_type.as_str(),
                ));
            }
            state.instances.insert(instance.id.clone(), instance);
            Ok(())
        })
    }

    pub fn get(&self, id: &str) -> Result<Instance> {
        self.store
            .load()
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::instance_not_found(id))
    }

    /// All instances in creation order.
    pub fn list(&self) -> Vec<Instance> {
        let state = self.store.load();
        let mut instances: Vec<Instance> = state.instances.values().cloned().collect();
        instances.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        instances
    }

    pub fn exists_by_name_and_type(&self, project_name: &str, hardware_type: HardwareType) -> bool {
        self.store.load().instances.values().any(|instance| {
            instance.hardware_type == hardware_type && instance.project_name == project_name
        })
    }

    /// Replace the editable configuration; refused while the record says running.
    pub fn update_config(&self, id: &str, config: InstanceConfig) -> Result<Instance> {
        self.store.with_state_mut(move |state| {
            let instance = get_mut(state, id)?;
            if instance.is_running() {
                return Err(AppError::instance_busy(id));
            }
            instance.apply_config(config);
            Ok(instance.clone())
        })
    }

    pub fn update_status(&self, id: &str, status: InstanceStatus) -> Result<()> {
        self.store.with_state_mut(move |state| {
            get_mut(state, id)?.status = status;
            Ok(())
        })
    }

    /// Copy the set's commands onto the instance. The set is resolved in the
    /// same transaction as the write, so a deleted set is never copied.
    pub fn update_commands(
        &self,
        id: &str,
        command_set_id: u64,
    ) -> Result<(Instance, CommandSet)> {
        self.store.with_state_mut(move |state| {
            let set = find_command_set(state, command_set_id)?.clone();
            let instance = get_mut(state, id)?;
            instance.commands = set.commands.clone();
            Ok((instance.clone(), set))
        })
    }

    pub fn delete(&self, id: &str) -> Result<Instance> {
        self.store.with_state_mut(move |state| {
            state
                .instances
                .remove(id)
                .ok_or_else(|| AppError::instance_not_found(id))
        })
    }

    /// Mark every record that claims to be running as idle. Returns the ids touched.
    pub fn reset_running(&self) -> Result<Vec<String>> {
        self.store.with_state_mut(|state| {
            let mut reset = Vec::new();
            for instance in state.instances.values_mut() {
                if instance.is_running() {
                    instance.status = InstanceStatus::Idle;
                    reset.push(instance.id.clone());
                }
            }
            Ok(reset)
        })
    }
}
