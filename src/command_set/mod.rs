//! Reusable, named command scripts scoped to a hardware type.

mod registry;
mod types;

pub use registry::CommandSetRegistry;
pub(crate) use registry::{default_for, find as find_command_set};
pub use types::{CommandSet, CommandSetUpdate, CreateCommandSet};
