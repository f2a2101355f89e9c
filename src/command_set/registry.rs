//! Command set persistence and the rules around default sets.
//!
//! The free functions work on a `State` borrowed inside a store transaction,
//! so the orchestrator can combine them with instance updates atomically.

use std::sync::Arc;

use super::types::{CommandSet, CommandSetUpdate};
use crate::error::{AppError, Result};
use crate::hardware::HardwareType;
use crate::store::{State, Store};
use crate::validation::{normalize_commands, normalize_name};

pub struct CommandSetRegistry {
    store: Arc<Store>,
}

fn name_taken(state: &State, name: &str, hardware_type: HardwareType, except: Option<u64>) -> bool {
    state.command_sets.iter().any(|set| {
        set.hardware_type == hardware_type && set.name == name && Some(set.id) != except
    })
}

pub(crate) fn find(state: &State, id: u64) -> Result<&CommandSet> {
    state
        .command_sets
        .iter()
        .find(|set| set.id == id)
        .ok_or_else(|| AppError::command_set_not_found(id))
}

pub(crate) fn default_for(state: &State, hardware_type: HardwareType) -> Result<&CommandSet> {
    state
        .command_sets
        .iter()
        .find(|set| set.hardware_type == hardware_type && set.is_default)
        .ok_or_else(|| AppError::store(format!("No default command set for {}", hardware_type)))
}

/// Remove a non-default set and return it.
fn remove(state: &mut State, id: u64) -> Result<CommandSet> {
    let position = state
        .command_sets
        .iter()
        .position(|set| set.id == id)
        .ok_or_else(|| AppError::command_set_not_found(id))?;
    if state.command_sets[position].is_default {
        return Err(AppError::default_set_immutable(id));
    }
    Ok(state.command_sets.remove(position))
}

/// `base`, or `base (2)`, `base (3)`, ... whichever is free first.
fn free_name(state: &State, base: &str, hardware_type: HardwareType) -> String {
    let mut candidate = base.to_string();
    let mut n = 2;
    while name_taken(state, &candidate, hardware_type, None) {
        candidate = format!("{} ({})", base, n);
        n += 1;
    }
    candidate
}

fn find_mut(state: &mut State, id: u64) -> Result<&mut CommandSet> {
    state
        .command_sets
        .iter_mut()
        .find(|set| set.id == id)
        .ok_or_else(|| AppError::command_set_not_found(id))
}

impl CommandSetRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// All sets for a hardware type, oldest first.
    pub fn list_by_type(&self, hardware_type: HardwareType) -> Vec<CommandSet> {
        let state = self.store.load();
        let mut sets: Vec<CommandSet> = state
            .command_sets
            .iter()
            .filter(|set| set.hardware_type == hardware_type)
            .cloned()
            .collect();
        sets.sort_by_key(|set| set.id);
        sets
    }

    pub fn get(&self, id: u64) -> Result<CommandSet> {
        find(&self.store.load(), id).cloned()
    }

    pub fn create(
        &self,
        name: &str,
        hardware_type: HardwareType,
        commands: &[String],
    ) -> Result<CommandSet> {
        let name = normalize_name(name, "Command set name")?;
        let commands = normalize_commands(commands)?;

        self.store.with_state_mut(move |state| {
            if name_taken(state, &name, hardware_type, None) {
                return Err(AppError::duplicate_name(&name, hardware_type.as_str()));
            }

            state.last_command_set_id += 1;
            let set = CommandSet {
                id: state.last_command_set_id,
                name,
                hardware_type,
                commands,
                is_default: false,
            };
            state.command_sets.push(set.clone());
            Ok(set)
        })
    }

    pub fn update(&self, id: u64, update: CommandSetUpdate) -> Result<CommandSet> {
        let CommandSetUpdate { name, commands } = update;

        self.store.with_state_mut(move |state| {
            let existing = find_mut(state, id)?;
            if existing.is_default {
                return Err(AppError::default_set_immutable(id));
            }
            if name.is_none() && commands.is_none() {
                return Err(AppError::no_change());
            }
            let hardware_type = existing.hardware_type;

            let name = name
                .map(|n| normalize_name(&n, "Command set name"))
                .transpose()?;
            let commands = commands.map(|c| normalize_commands(&c)).transpose()?;

            if let Some(ref name) = name {
                if name_taken(state, name, hardware_type, Some(id)) {
                    return Err(AppError::duplicate_name(name, hardware_type.as_str()));
                }
            }

            let set = find_mut(state, id)?;
            if let Some(name) = name {
                set.name = name;
            }
            if let Some(commands) = commands {
                set.commands = commands;
            }
            Ok(set.clone())
        })
    }

    /// Remove a non-default set and pass it to `then` inside the same
    /// transaction. Nothing is persisted when `then` fails.
    pub fn delete<T, F>(&self, id: u64, then: F) -> Result<(CommandSet, T)>
    where
        F: FnOnce(&mut State, &CommandSet) -> Result<T>,
    {
        self.store.with_state_mut(move |state| {
            let set = remove(state, id)?;
            let outcome = then(state, &set)?;
            Ok((set, outcome))
        })
    }

    /// Insert the type's default set, or refresh the existing one in place.
    /// A user set already holding the default name is renamed out of the way.
    pub fn ensure_default(
        &self,
        hardware_type: HardwareType,
        name: &str,
        commands: &[String],
    ) -> Result<CommandSet> {
        let name = normalize_name(name, "Command set name")?;
        let commands = normalize_commands(commands)?;

        self.store.with_state_mut(move |state| {
            let existing = state
                .command_sets
                .iter()
                .find(|set| set.hardware_type == hardware_type && set.is_default)
                .map(|set| set.id);

            if name_taken(state, &name, hardware_type, existing) {
                let renamed = free_name(state, &format!("{} (custom)", name), hardware_type);
                if let Some(clash) = state.command_sets.iter_mut().find(|set| {
                    set.hardware_type == hardware_type && set.name == name && !set.is_default
                }) {
                    log::warn!(
                        "Command set #{} uses the default name '{}', renaming it to '{}'",
                        clash.id,
                        name,
                        renamed
                    );
                    clash.name = renamed;
                }
            }

            match existing {
                Some(id) => {
                    let set = find_mut(state, id)?;
                    set.name = name;
                    set.commands = commands;
                    Ok(set.clone())
                }
                None => {
                    state.last_command_set_id += 1;
                    let set = CommandSet {
                        id: state.last_command_set_id,
                        name,
                        hardware_type,
                        commands,
                        is_default: true,
                    };
                    state.command_sets.push(set.clone());
                    Ok(set)
                }
            }
        })
    }
}
