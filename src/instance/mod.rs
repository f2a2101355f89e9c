//! Hardware test instances.
//!
//! - `types`: the persisted record and request payloads
//! - `registry`: persistence and queries over instance records
//! - `crud` / `lifecycle`: orchestrator operations that enforce the
//!   cross-cutting rules before touching the registry or the supervisor

mod crud;
mod lifecycle;
mod registry;
mod types;

pub use registry::InstanceRegistry;
pub(crate) use registry::reassign_commands;
pub use types::{CreateInstance, Instance, InstanceConfig, InstanceOverrides, InstanceStatus};
