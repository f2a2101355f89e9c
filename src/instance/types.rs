//! Instance-related type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hardware::{HardwareDefaults, HardwareType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    Idle,
    Running,
}

/// One configured test rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub project_name: String,
    pub hardware_type: HardwareType,
    pub port: String,
    pub baud_rate: u32,
    pub num_cycles: u32,
    /// Seconds between commands.
    pub command_delay: f64,
    pub commands: Vec<String>,
    #[serde(default)]
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
}

/// The operator-editable part of an instance, replaced wholesale on update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    pub port: String,
    pub baud_rate: u32,
    pub num_cycles: u32,
    pub command_delay: f64,
    pub commands: Vec<String>,
}

/// Fields a create request may override; anything missing comes from the
/// hardware type's defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceOverrides {
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub baud_rate: Option<u32>,
    #[serde(default)]
    pub num_cycles: Option<u32>,
    #[serde(default)]
    pub command_delay: Option<f64>,
    #[serde(default)]
    pub commands: Option<Vec<String>>,
}

/// Request body for a new instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstance {
    pub project_name: String,
    pub hardware_type: String,
    #[serde(flatten)]
    pub overrides: InstanceOverrides,
}

impl Instance {
    pub fn config(&self) -> InstanceConfig {
        InstanceConfig {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            num_cycles: self.num_cycles,
            command_delay: self.command_delay,
            commands: self.commands.clone(),
        }
    }

    pub fn apply_config(&mut self, config: InstanceConfig) {
        self.port = config.port;
        self.baud_rate = config.baud_rate;
        self.num_cycles = config.num_cycles;
        self.command_delay = config.command_delay;
        self.commands = config.commands;
    }

    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }
}

impl InstanceOverrides {
    /// Merge onto the defaults, field by field; overrides win.
    pub fn merge(self, defaults: &HardwareDefaults) -> InstanceConfig {
        InstanceConfig {
            port: self.port.unwrap_or_else(|| defaults.port.to_string()),
            baud_rate: self.baud_rate.unwrap_or(defaults.baud_rate),
            num_cycles: self.num_cycles.unwrap_or(defaults.num_cycles),
            command_delay: self.command_delay.unwrap_or(defaults.command_delay),
            commands: self.commands.unwrap_or_else(|| defaults.commands()),
        }
    }
}
