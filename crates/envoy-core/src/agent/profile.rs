//! Per-kind launch and configuration profiles
//!
//! A profile describes everything that differs between agent kinds:
//! - executable name and launch arguments
//! - main config file name and its generated content
//! - fragment file extension
//! - readiness marker and reload signal
//!
//! The reconciliation logic itself lives in [`super::StandardAgentRunner`].

use crate::config::split_host_port;
use crate::error::{AgentError, Result};
use crate::types::AgentType;
use nix::sys::signal::Signal;
use std::sync::OnceLock;

/// Static description of one agent kind
pub trait AgentProfile: Send + Sync {
    fn agent_type(&self) -> AgentType;

    /// File name of the executable under `CURRENT/bin`
    fn exe_name(&self) -> &'static str;

    /// Launch arguments, relative to the agent base path
    fn args(&self) -> Vec<String>;

    /// Main config file name under the agent base path
    fn main_config_filename(&self) -> &'static str;

    /// Extension of fragment files in `config.d`, without the dot
    fn config_extension(&self) -> &'static str;

    /// Substring in agent output meaning it is ready. `None` means ready on launch.
    fn readiness_marker(&self) -> Option<&'static str> {
        None
    }

    /// Signal that makes a running agent re-read its fragments
    fn reload_signal(&self) -> Option<Signal> {
        None
    }

    /// Resolve static parameters such as the ingest endpoint
    fn load(&self) -> Result<()>;

    /// Content of the main config file, generated on first configure
    fn render_main_config(&self) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct IngestEndpoint {
    host: String,
    port: u16,
}

fn resolve_endpoint(slot: &OnceLock<IngestEndpoint>, bind: &str) -> Result<()> {
    let (host, port) = split_host_port(bind)?;
    let _ = slot.set(IngestEndpoint { host, port });
    Ok(())
}

fn loaded_endpoint(slot: &OnceLock<IngestEndpoint>, agent_type: AgentType) -> Result<&IngestEndpoint> {
    slot.get()
        .ok_or_else(|| AgentError::NotLoaded(agent_type.to_string()).into())
}

// ============================================================================
// Telegraf
// ============================================================================

/// Metrics collector, reports readiness in its log and reloads on SIGHUP
#[derive(Debug)]
pub struct TelegrafProfile {
    ingest_bind: String,
    endpoint: OnceLock<IngestEndpoint>,
}

impl TelegrafProfile {
    pub const MAIN_CONFIG_FILENAME: &'static str = "telegraf.conf";
    pub const READINESS_MARKER: &'static str = "Agent Config:";

    pub fn new(ingest_bind: impl Into<String>) -> Self {
        Self {
            ingest_bind: ingest_bind.into(),
            endpoint: OnceLock::new(),
        }
    }
}

impl AgentProfile for TelegrafProfile {
    fn agent_type(&self) -> AgentType {
        AgentType::Telegraf
    }

    fn exe_name(&self) -> &'static str {
        "telegraf"
    }

    fn args(&self) -> Vec<String> {
        vec![
            "--config".to_string(),
            Self::MAIN_CONFIG_FILENAME.to_string(),
            "--config-directory".to_string(),
            super::CONFIGS_DIR_SUBPATH.to_string(),
        ]
    }

    fn main_config_filename(&self) -> &'static str {
        Self::MAIN_CONFIG_FILENAME
    }

    fn config_extension(&self) -> &'static str {
        "conf"
    }

    fn readiness_marker(&self) -> Option<&'static str> {
        Some(Self::READINESS_MARKER)
    }

    fn reload_signal(&self) -> Option<Signal> {
        Some(Signal::SIGHUP)
    }

    fn load(&self) -> Result<()> {
        resolve_endpoint(&self.endpoint, &self.ingest_bind)
    }

    fn render_main_config(&self) -> Result<String> {
        let endpoint = loaded_endpoint(&self.endpoint, self.agent_type())?;
        Ok(format!(
            "[agent]\n  interval = \"10s\"\n[[outputs.socket_writer]]\n  address = \"tcp://{}:{}\"\n  data_format = \"json\"\n",
            endpoint.host, endpoint.port
        ))
    }
}

// ============================================================================
// Filebeat
// ============================================================================

/// Log shipper, watches its own fragment directory so needs no reload signal
#[derive(Debug)]
pub struct FilebeatProfile {
    lumberjack_bind: String,
    endpoint: OnceLock<IngestEndpoint>,
}

impl FilebeatProfile {
    pub const MAIN_CONFIG_FILENAME: &'static str = "filebeat.yml";

    pub fn new(lumberjack_bind: impl Into<String>) -> Self {
        Self {
            lumberjack_bind: lumberjack_bind.into(),
            endpoint: OnceLock::new(),
        }
    }
}

impl AgentProfile for FilebeatProfile {
    fn agent_type(&self) -> AgentType {
        AgentType::Filebeat
    }

    fn exe_name(&self) -> &'static str {
        "filebeat"
    }

    fn args(&self) -> Vec<String> {
        ["run", "--path.config", "./", "--path.data", "data", "--path.logs", "logs"]
            .iter()
            .map(|arg| arg.to_string())
            .collect()
    }

    fn main_config_filename(&self) -> &'static str {
        Self::MAIN_CONFIG_FILENAME
    }

    fn config_extension(&self) -> &'static str {
        "yml"
    }

    fn load(&self) -> Result<()> {
        resolve_endpoint(&self.endpoint, &self.lumberjack_bind)
    }

    fn render_main_config(&self) -> Result<String> {
        let endpoint = loaded_endpoint(&self.endpoint, self.agent_type())?;
        Ok(format!(
            "filebeat.config.inputs:\n  enabled: true\n  path: {}/*.yml\n  reload.enabled: true\n  reload.period: 5s\noutput.logstash:\n  hosts: [\"localhost:{}\"]\n",
            super::CONFIGS_DIR_SUBPATH,
            endpoint.port
        ))
    }
}
