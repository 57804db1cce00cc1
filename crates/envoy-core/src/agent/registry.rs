//! Registry of supported agent kinds

use super::profile::{FilebeatProfile, TelegrafProfile};
use super::runner::{SpecificAgentRunner, StandardAgentRunner};
use super::AGENTS_SUBPATH;
use crate::command::CommandHandler;
use crate::config::EnvoySettings;
use crate::error::{AgentError, Result};
use crate::types::AgentType;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Base path of one agent kind under the data root
pub fn agent_base_path(data_path: &Path, agent_type: AgentType) -> PathBuf {
    data_path.join(AGENTS_SUBPATH).join(agent_type.as_str())
}

/// Maps agent kinds to their runners
#[derive(Default)]
pub struct AgentRegistry {
    runners: BTreeMap<AgentType, Arc<dyn SpecificAgentRunner>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runner, replacing any previous one for the same kind
    pub fn register(&mut self, agent_type: AgentType, runner: Arc<dyn SpecificAgentRunner>) {
        debug!(agent_type = %agent_type, "registering agent runner");
        self.runners.insert(agent_type, runner);
    }

    pub fn get(&self, agent_type: AgentType) -> Option<Arc<dyn SpecificAgentRunner>> {
        self.runners.get(&agent_type).cloned()
    }

    pub fn supported_agents(&self) -> Vec<AgentType> {
        self.runners.keys().copied().collect()
    }

    pub fn runners(&self) -> impl Iterator<Item = (AgentType, &Arc<dyn SpecificAgentRunner>)> {
        self.runners.iter().map(|(agent_type, runner)| (*agent_type, runner))
    }

    pub fn unregister_all(&mut self) {
        self.runners.clear();
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    /// Load every runner with its base path. Stops at the first failure.
    pub fn load_all(&self, data_path: &Path) -> Result<()> {
        for (agent_type, runner) in self.runners() {
            let base_path = agent_base_path(data_path, agent_type);
            runner
                .load(&base_path)
                .map_err(|e| AgentError::LoadFailed {
                    agent_type: agent_type.to_string(),
                    reason: e.to_string(),
                })?;
            debug!(agent_type = %agent_type, path = %base_path.display(), "loaded agent runner");
        }
        Ok(())
    }
}

/// Registry with a runner for every agent kind this build supports
pub fn default_registry(
    settings: &EnvoySettings,
    command_handler: Arc<dyn CommandHandler>,
) -> AgentRegistry {
    let readiness_timeout = settings.agents.readiness_timeout();
    let mut registry = AgentRegistry::new();

    registry.register(
        AgentType::Telegraf,
        StandardAgentRunner::new(
            TelegrafProfile::new(settings.ingest.telegraf_json_bind.clone()),
            Arc::clone(&command_handler),
            readiness_timeout,
        ),
    );
    registry.register(
        AgentType::Filebeat,
        StandardAgentRunner::new(
            FilebeatProfile::new(settings.ingest.lumberjack_bind.clone()),
            command_handler,
            readiness_timeout,
        ),
    );

    registry
}
