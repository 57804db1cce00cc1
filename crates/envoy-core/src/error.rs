//! Error types for Envoy Core

use std::time::Duration;
use thiserror::Error;

/// Main error type for envoy operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Install error: {0}")]
    Install(#[from] InstallError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when a configure instruction had none of its operations applied.
    pub fn is_no_applied_configs(&self) -> bool {
        matches!(self, Error::Agent(AgentError::NoAppliedConfigs))
    }
}

/// Agent runner errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("No configuration was applied")]
    NoAppliedConfigs,

    #[error("Agent runner not loaded: {0}")]
    NotLoaded(String),

    #[error("Failed to load agent runner {agent_type}: {reason}")]
    LoadFailed { agent_type: String, reason: String },

    #[error("Failed to prepare configuration at {path}: {reason}")]
    ConfigSetupFailed { path: String, reason: String },
}

/// Errors from launching, signalling and watching agent processes
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to start command {command}: {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("Command already started")]
    AlreadyStarted,

    #[error("Failed to capture {0}")]
    PipeUnavailable(&'static str),

    #[error("Did not see {marker:?} within {timeout:?}")]
    ReadinessTimeout { marker: String, timeout: Duration },

    #[error("Command exited before seeing {0:?}")]
    ExitedBeforeReady(String),

    #[error("Failed to deliver {signal} to pid {pid}: {reason}")]
    SignalFailed {
        signal: String,
        pid: u32,
        reason: String,
    },
}

/// Agent installation errors
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Failed to download agent from {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unsupported checksum format: {0}")]
    UnsupportedChecksum(String),

    #[error("Failed to extract agent archive: {0}")]
    Extract(String),

    #[error("Failed to find agent executable {0} in archive")]
    ExecutableNotFound(String),

    #[error("Failed to update current version link {path}: {reason}")]
    Symlink { path: String, reason: String },
}

/// Settings errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    Load(String),

    #[error("Invalid bind address {0:?}, expected host:port")]
    InvalidBind(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
