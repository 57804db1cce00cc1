//! Agent supervision
//!
//! This module handles:
//! - Per-kind reconciliation of agent processes (start, reload, stop)
//! - Configuration fragments for each agent kind
//! - The registry of supported agent kinds
//! - Routing install and configure instructions to runners

mod fragments;
mod profile;
mod registry;
mod router;
mod runner;

pub use profile::{AgentProfile, FilebeatProfile, TelegrafProfile};
pub use registry::{agent_base_path, default_registry, AgentRegistry};
pub use router::AgentsRouter;
pub use runner::{SpecificAgentRunner, StandardAgentRunner};

#[cfg(test)]
pub use runner::MockSpecificAgentRunner;

/// Directory under the data root holding one directory per agent kind
pub const AGENTS_SUBPATH: &str = "agents";
/// Fragment directory under an agent's base path
pub const CONFIGS_DIR_SUBPATH: &str = "config.d";
/// Symlink naming the active version directory
pub const CURRENT_VERSION_LINK: &str = "CURRENT";
/// Executable directory inside a version directory
pub const BIN_SUBPATH: &str = "bin";

pub(crate) const DIR_PERMS: u32 = 0o755;
pub(crate) const CONFIG_FILE_PERMS: u32 = 0o600;
