//! Agent kind and process state types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of telemetry agent supervised by the envoy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentType {
    /// Metrics collector
    Telegraf,
    /// Log shipper
    Filebeat,
}

impl AgentType {
    /// Every agent kind known to this build
    pub const ALL: [AgentType; 2] = [AgentType::Telegraf, AgentType::Filebeat];

    /// Name used for directories and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Telegraf => "TELEGRAF",
            AgentType::Filebeat => "FILEBEAT",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a single agent process invocation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Context built, process not launched
    Created,
    /// Launched, waiting for readiness
    Starting,
    /// Ready and being watched
    Running,
    /// Graceful stop in progress
    Stopping,
    /// Exited after an intentional stop
    Stopped,
    /// Exited on its own
    Crashed,
    /// Failed to launch or become ready
    StartFailed,
}

impl ProcessState {
    /// Whether the state is final for this invocation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::Stopped | ProcessState::Crashed | ProcessState::StartFailed
        )
    }
}

impl Default for ProcessState {
    fn default() -> Self {
        Self::Created
    }
}

/// Which output stream a forwarded line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
