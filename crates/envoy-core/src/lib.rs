//! Telemetry Envoy Core Library
//!
//! This crate provides the agent supervision for Telemetry Envoy, including:
//! - Process lifecycle for telemetry agents (start, readiness, stop, crash restart)
//! - Per-agent reconciliation of configuration fragments
//! - Agent installation from tarball distributions
//! - Routing of install and configure instructions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      envoy-core                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  agent/        - Runners, profiles, registry, router        │
//! │  command/      - Agent processes, output, crash watch       │
//! │  install/      - Agent download and extraction              │
//! │  types/        - Shared type definitions                    │
//! │  config.rs     - Settings                                   │
//! │  error.rs      - Error types                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod command;
pub mod config;
pub mod error;
pub mod install;
pub mod types;

// Re-export commonly used types
pub use config::{AgentsSettings, EnvoySettings, IngestSettings};
pub use error::{Error, Result};
pub use types::*;

// Re-export agent components
pub use agent::{
    default_registry, AgentProfile, AgentRegistry, AgentsRouter, FilebeatProfile,
    SpecificAgentRunner, StandardAgentRunner, TelegrafProfile,
};

// Re-export process supervision
pub use command::{
    AgentRunningContext, CommandHandler, OutputSink, StandardCommandHandler, TracingOutputSink,
};

// Re-export installation
pub use install::{Installer, TarballInstaller};
