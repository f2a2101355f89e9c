//! Supported rig types and their compiled-in defaults.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareType {
    Qswipe,
    Qtap,
    Qba,
    Qbq,
}

/// Built-in configuration a new instance starts from.
#[derive(Debug, Clone, Serialize)]
pub struct HardwareDefaults {
    pub hardware_type: HardwareType,
    pub port: &'static str,
    pub baud_rate: u32,
    pub num_cycles: u32,
    pub command_delay: f64,
    pub commands: &'static [&'static str],
    pub default_set_name: &'static str,
    pub default_set_commands: &'static [&'static str],
}

const QSWIPE_COMMANDS: &[&str] = &[
    "e:s:c:e:4:",
    "i:",
    "e:s:c:e:3:",
    "i:",
    "e:s:c:e:2:",
    "i:",
    "e:s:c:e:1:",
    "i:",
];
const QTAP_COMMANDS: &[&str] = &["i:", "r:"];
const QBA_COMMANDS: &[&str] = &[
    "p:1:b1:1:200:2:200:",
    "p:1:b2:1:200:2:200:",
    "p:1:b3:1:200:2:200:",
];

static QSWIPE: HardwareDefaults = HardwareDefaults {
    hardware_type: HardwareType::Qswipe,
    port: "COM3",
    baud_rate: 115_200,
    num_cycles: 1,
    command_delay: 3.0,
    commands: QSWIPE_COMMANDS,
    default_set_name: "Default QSwipe Commands",
    default_set_commands: QSWIPE_COMMANDS,
};

static QTAP: HardwareDefaults = HardwareDefaults {
    hardware_type: HardwareType::Qtap,
    port: "/dev/ttyUSB0",
    baud_rate: 115_200,
    num_cycles: 5,
    command_delay: 1.0,
    commands: QTAP_COMMANDS,
    default_set_name: "Default QTap Commands",
    default_set_commands: QTAP_COMMANDS,
};

static QBA: HardwareDefaults = HardwareDefaults {
    hardware_type: HardwareType::Qba,
    port: "COM5",
    baud_rate: 115_200,
    num_cycles: 5,
    command_delay: 3.0,
    commands: QBA_COMMANDS,
    default_set_name: "Default QBA Commands",
    default_set_commands: QBA_COMMANDS,
};

// The scanner's default set runs the barcode read first, unlike its instance default.
static QBQ: HardwareDefaults = HardwareDefaults {
    hardware_type: HardwareType::Qbq,
    port: "COM7",
    baud_rate: 115_200,
    num_cycles: 5,
    command_delay: 1.5,
    commands: &["#:", "QR:abc:", "#:", "BR:123:"],
    default_set_name: "Default QBQ Commands",
    default_set_commands: &["BR:123:", "#:", "QR:abc:", "#:"],
};

impl HardwareType {
    pub const ALL: [Self; 4] = [Self::Qswipe, Self::Qtap, Self::Qba, Self::Qbq];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qswipe => "qswipe",
            Self::Qtap => "qtap",
            Self::Qba => "qba",
            Self::Qbq => "qbq",
        }
    }

    pub fn defaults(&self) -> &'static HardwareDefaults {
        match self {
            Self::Qswipe => &QSWIPE,
            Self::Qtap => &QTAP,
            Self::Qba => &QBA,
            Self::Qbq => &QBQ,
        }
    }

    /// File name of the test-runner script for this rig type.
    pub fn script_name(&self) -> String {
        format!("{}_test.py", self.as_str())
    }

    /// Whether the worker also expects `--project <name>`.
    pub fn worker_takes_project(&self) -> bool {
        matches!(self, Self::Qswipe)
    }
}

impl HardwareDefaults {
    pub fn commands(&self) -> Vec<String> {
        self.commands.iter().map(|c| c.to_string()).collect()
    }

    pub fn default_set_commands(&self) -> Vec<String> {
        self.default_set_commands
            .iter()
            .map(|c| c.to_string())
            .collect()
    }
}

impl fmt::Display for HardwareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HardwareType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::validation(format!("Invalid hardware type: {}", s)))
    }
}
