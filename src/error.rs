//! Application error types.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Application error that carries a machine-readable kind plus a detail payload.
#[derive(Debug)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A project with this name already exists for the hardware type
    DuplicateProject,
    /// A command set with this name already exists for the hardware type
    DuplicateName,
    /// Instance not found
    InstanceNotFound,
    /// Command set not found
    CommandSetNotFound,
    /// Log file not found
    LogNotFound,
    /// Default command sets cannot be edited or deleted
    DefaultSetImmutable,
    /// Instance configuration cannot change while it is running
    InstanceBusy,
    /// Instance already has a worker
    AlreadyRunning,
    /// Instance has no worker
    NotRunning,
    /// Serial port is held by another running instance
    PortConflict,
    /// Identifier allocation failed
    Allocation,
    /// Rejected input
    Validation,
    /// Update request carried nothing to change
    NoChange,
    /// Durable store unreadable or unwritable
    Store,
    /// Configuration error
    Config,
    /// File system error
    Io,
    /// Worker process error
    Process,
    /// General error
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::InstanceNotFound => 1001,
            Self::CommandSetNotFound => 1002,
            Self::LogNotFound => 1003,
            Self::DuplicateProject => 1101,
            Self::DuplicateName => 1102,
            Self::DefaultSetImmutable => 1103,
            Self::Validation => 1104,
            Self::NoChange => 1105,
            Self::InstanceBusy => 1201,
            Self::AlreadyRunning => 1202,
            Self::NotRunning => 1203,
            Self::PortConflict => 1204,
            Self::Allocation => 2001,
            Self::Store => 2002,
            Self::Config => 2003,
            Self::Io => 2004,
            Self::Process => 3001,
            Self::Other => 9999,
        }
    }

    /// Stable snake_case name, the same string used in serialized form.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::DuplicateProject => "duplicate_project",
            Self::DuplicateName => "duplicate_name",
            Self::InstanceNotFound => "instance_not_found",
            Self::CommandSetNotFound => "command_set_not_found",
            Self::LogNotFound => "log_not_found",
            Self::DefaultSetImmutable => "default_set_immutable",
            Self::InstanceBusy => "instance_busy",
            Self::AlreadyRunning => "already_running",
            Self::NotRunning => "not_running",
            Self::PortConflict => "port_conflict",
            Self::Allocation => "allocation",
            Self::Validation => "validation",
            Self::NoChange => "no_change",
            Self::Store => "store",
            Self::Config => "config",
            Self::Io => "io",
            Self::Process => "process",
            Self::Other => "other",
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn duplicate_project(project_name: &str, hardware_type: &str) -> Self {
        Self::new(
            ErrorKind::DuplicateProject,
            HashMap::from([
                ("project_name".to_string(), project_name.to_string()),
                ("hardware_type".to_string(), hardware_type.to_string()),
            ]),
        )
    }

    pub fn duplicate_name(name: &str, hardware_type: &str) -> Self {
        Self::new(
            ErrorKind::DuplicateName,
            HashMap::from([
                ("name".to_string(), name.to_string()),
                ("hardware_type".to_string(), hardware_type.to_string()),
            ]),
        )
    }

    pub fn instance_not_found(id: &str) -> Self {
        Self::new(
            ErrorKind::InstanceNotFound,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn command_set_not_found(id: u64) -> Self {
        Self::new(
            ErrorKind::CommandSetNotFound,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn log_not_found(date: &str, instance_id: &str) -> Self {
        Self::new(
            ErrorKind::LogNotFound,
            HashMap::from([
                ("date".to_string(), date.to_string()),
                ("id".to_string(), instance_id.to_string()),
            ]),
        )
    }

    pub fn default_set_immutable(id: u64) -> Self {
        Self::new(
            ErrorKind::DefaultSetImmutable,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn instance_busy(id: &str) -> Self {
        Self::new(
            ErrorKind::InstanceBusy,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn already_running(id: &str) -> Self {
        Self::new(
            ErrorKind::AlreadyRunning,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn not_running(id: &str) -> Self {
        Self::new(
            ErrorKind::NotRunning,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn port_conflict(port: &str, holder: &str) -> Self {
        Self::new(
            ErrorKind::PortConflict,
            HashMap::from([
                ("port".to_string(), port.to_string()),
                ("holder".to_string(), holder.to_string()),
            ]),
        )
    }

    pub fn allocation(hardware_type: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Allocation,
            HashMap::from([
                ("hardware_type".to_string(), hardware_type.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Validation, message)
    }

    pub fn no_change() -> Self {
        Self::new(ErrorKind::NoChange, HashMap::new())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Store, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Process, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn payload(&self) -> &HashMap<String, String> {
        &self.payload
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 3)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("reason", self.kind.reason())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::other(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
