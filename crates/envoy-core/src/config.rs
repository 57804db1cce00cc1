//! Envoy settings

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settings file looked up in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "telemetry-envoy.toml";

/// Environment variable naming an alternate settings file
pub const SETTINGS_PATH_ENV: &str = "ENVOY_CONFIG_PATH";

/// Top-level envoy settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvoySettings {
    pub agents: AgentsSettings,
    pub ingest: IngestSettings,
}

/// Agent supervision settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsSettings {
    /// Root under which `agents/<KIND>/...` is laid out
    pub data_path: PathBuf,
    /// Delay before restarting an agent that exited on its own
    pub restart_delay_ms: u64,
    /// How long a terminated agent gets before it is killed
    pub termination_timeout_ms: u64,
    /// How long to wait for a readiness marker in agent output
    pub readiness_timeout_ms: u64,
}

impl AgentsSettings {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn termination_timeout(&self) -> Duration {
        Duration::from_millis(self.termination_timeout_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }
}

impl Default for AgentsSettings {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data-telemetry-envoy"),
            restart_delay_ms: 1_000,
            termination_timeout_ms: 5_000,
            readiness_timeout_ms: 5_000,
        }
    }
}

/// Local endpoints the agents ship their data to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Socket the metrics collector writes JSON metrics to
    pub telegraf_json_bind: String,
    /// Socket the log shipper writes lumberjack frames to
    pub lumberjack_bind: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            telegraf_json_bind: "localhost:8094".to_string(),
            lumberjack_bind: "localhost:5044".to_string(),
        }
    }
}

impl EnvoySettings {
    /// Load settings from defaults, settings file and environment.
    ///
    /// Loads in this order:
    /// 1. Built-in defaults
    /// 2. `telemetry-envoy.toml`, or the file named by `ENVOY_CONFIG_PATH`
    /// 3. `ENVOY_` environment variables, `__` separating sections
    ///    (e.g. `ENVOY_AGENTS__DATA_PATH`)
    pub fn load() -> Result<Self> {
        let path = std::env::var(SETTINGS_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_FILE));
        Self::load_from(&path)
    }

    /// Load settings using a specific settings file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Toml},
            Figment,
        };

        let settings: EnvoySettings = Figment::from(Serialized::defaults(EnvoySettings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ENVOY_").split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        Ok(settings)
    }
}

/// Split a `host:port` bind address.
///
/// IPv6 hosts may be bracketed, e.g. `[::1]:5044`.
pub fn split_host_port(bind: &str) -> Result<(String, u16)> {
    let invalid = || ConfigError::InvalidBind(bind.to_string());

    let (host, port) = bind.rsplit_once(':').ok_or_else(invalid)?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.contains(':') && !bind.starts_with('[') {
        return Err(invalid().into());
    }

    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}
