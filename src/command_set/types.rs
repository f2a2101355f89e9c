use serde::{Deserialize, Serialize};

use crate::hardware::HardwareType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSet {
    pub id: u64,
    pub name: String,
    pub hardware_type: HardwareType,
    pub commands: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// Request body for a new command set.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommandSet {
    pub name: String,
    pub hardware_type: HardwareType,
    pub commands: Vec<String>,
}

/// Partial edit; at least one field must be present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandSetUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub commands: Option<Vec<String>>,
}

