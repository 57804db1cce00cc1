//! Agent runners: per-kind reconciliation of process state

use super::fragments::{
    apply_operations, count_fragments, create_dir, path_exists, write_config_file,
};
use super::profile::AgentProfile;
use super::{BIN_SUBPATH, CONFIGS_DIR_SUBPATH, CURRENT_VERSION_LINK};
use crate::command::{AgentRunningContext, CommandHandler};
use crate::error::{AgentError, Result};
use crate::types::{AgentType, ConfigureInstruction};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Supervises one agent kind
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpecificAgentRunner: Send + Sync {
    fn agent_type(&self) -> AgentType;

    /// One-time initialization, called before anything else
    fn load(&self, agent_base_path: &Path) -> Result<()>;

    /// Start, reload or stop the agent to match what is on disk.
    ///
    /// `apply_configs` asks a running agent to pick up changed fragments.
    async fn ensure_running_state(&self, ctx: CancellationToken, apply_configs: bool);

    /// Apply fragment operations. Fails with `NoAppliedConfigs` when none applied.
    async fn process_config(&self, configure: &ConfigureInstruction) -> Result<()>;

    async fn stop(&self);
}

/// Runner shared by every agent kind, specialised by an [`AgentProfile`]
pub struct StandardAgentRunner {
    profile: Box<dyn AgentProfile>,
    command_handler: Arc<dyn CommandHandler>,
    readiness_timeout: Duration,
    base_path: RwLock<Option<PathBuf>>,
    running: Mutex<Option<Arc<AgentRunningContext>>>,
    me: Weak<StandardAgentRunner>,
}

impl StandardAgentRunner {
    pub fn new(
        profile: impl AgentProfile + 'static,
        command_handler: Arc<dyn CommandHandler>,
        readiness_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            profile: Box::new(profile),
            command_handler,
            readiness_timeout,
            base_path: RwLock::new(None),
            running: Mutex::new(None),
            me: me.clone(),
        })
    }

    pub fn base_path(&self) -> Result<PathBuf> {
        self.base_path
            .read()
            .clone()
            .ok_or_else(|| AgentError::NotLoaded(self.profile.agent_type().to_string()).into())
    }

    pub fn configs_path(&self) -> Result<PathBuf> {
        Ok(self.base_path()?.join(CONFIGS_DIR_SUBPATH))
    }

    pub fn main_config_path(&self) -> Result<PathBuf> {
        Ok(self.base_path()?.join(self.profile.main_config_filename()))
    }

    /// Executable of the current version
    pub fn exe_path(&self) -> Result<PathBuf> {
        Ok(self
            .base_path()?
            .join(CURRENT_VERSION_LINK)
            .join(BIN_SUBPATH)
            .join(self.profile.exe_name()))
    }

    /// The live running context, if any
    pub async fn current(&self) -> Option<Arc<AgentRunningContext>> {
        self.running.lock().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| running.is_running())
    }

    /// Executable, main config and at least one fragment are present
    async fn has_required_paths(&self) -> bool {
        let (Ok(exe), Ok(main_config), Ok(configs_path)) =
            (self.exe_path(), self.main_config_path(), self.configs_path())
        else {
            return false;
        };

        if !path_exists(&exe).await {
            debug!(path = %exe.display(), "missing agent executable");
            return false;
        }
        if !path_exists(&main_config).await {
            debug!(path = %main_config.display(), "missing main config");
            return false;
        }
        if !path_exists(&configs_path).await {
            debug!(path = %configs_path.display(), "missing configs path");
            return false;
        }
        if count_fragments(&configs_path, self.profile.config_extension()) == 0 {
            debug!(path = %configs_path.display(), "missing config files");
            return false;
        }
        true
    }

    async fn start(&self, ctx: &CancellationToken) -> Option<Arc<AgentRunningContext>> {
        let agent_type = self.profile.agent_type();
        let (exe, base_path) = match (self.exe_path(), self.base_path()) {
            (Ok(exe), Ok(base_path)) => (exe, base_path),
            (Err(e), _) | (_, Err(e)) => {
                warn!(agent_type = %agent_type, error = %e, "unable to start agent");
                return None;
            }
        };

        let running = self.command_handler.create_context(
            ctx,
            agent_type,
            &exe,
            &base_path,
            &self.profile.args(),
        );

        let (marker, timeout) = match self.profile.readiness_marker() {
            Some(marker) => (marker, self.readiness_timeout),
            None => ("", Duration::ZERO),
        };

        if let Err(e) = self
            .command_handler
            .start_agent_command(&running, marker, timeout)
            .await
        {
            warn!(agent_type = %agent_type, error = %e, "failed to start agent");
            return None;
        }

        if let Some(me) = self.me.upgrade() {
            let handler = Arc::clone(&self.command_handler);
            let ctx = ctx.clone();
            let watched = Arc::clone(&running);
            tokio::spawn(async move {
                handler.wait_on_agent_command(ctx, me, watched).await;
            });
        }

        info!(agent_type = %agent_type, pid = ?running.pid(), "started agent");
        Some(running)
    }
}

#[async_trait]
impl SpecificAgentRunner for StandardAgentRunner {
    fn agent_type(&self) -> AgentType {
        self.profile.agent_type()
    }

    fn load(&self, agent_base_path: &Path) -> Result<()> {
        self.profile.load()?;
        *self.base_path.write() = Some(agent_base_path.to_path_buf());
        Ok(())
    }

    async fn ensure_running_state(&self, ctx: CancellationToken, apply_configs: bool) {
        let agent_type = self.profile.agent_type();
        let mut running = self.running.lock().await;
        // checked under the lock so nothing starts after shutdown stopped us
        if ctx.is_cancelled() {
            debug!(agent_type = %agent_type, "shutting down, skipping reconciliation");
            return;
        }
        debug!(agent_type = %agent_type, "ensuring agent is in correct running state");

        if !self.has_required_paths().await {
            debug!(agent_type = %agent_type, "agent not runnable due to missing paths and files");
            if let Some(current) = running.take() {
                self.command_handler.stop(&current).await;
            }
            return;
        }

        if let Some(current) = running.as_ref().filter(|current| current.is_running()) {
            if !apply_configs {
                debug!(agent_type = %agent_type, "already running");
                return;
            }
            match self.profile.reload_signal() {
                Some(signal) => {
                    debug!(agent_type = %agent_type, %signal, "signalling agent to reload configs");
                    if let Err(e) = self.command_handler.signal(current, signal) {
                        warn!(agent_type = %agent_type, error = %e, "failed to signal agent");
                    }
                }
                None => debug!(agent_type = %agent_type, "agent picks up config changes itself"),
            }
            return;
        }

        *running = self.start(&ctx).await;
    }

    async fn process_config(&self, configure: &ConfigureInstruction) -> Result<()> {
        let configs_path = self.configs_path()?;
        create_dir(&configs_path)
            .await
            .map_err(|e| AgentError::ConfigSetupFailed {
                path: configs_path.display().to_string(),
                reason: e.to_string(),
            })?;

        let main_config_path = self.main_config_path()?;
        if !path_exists(&main_config_path).await {
            debug!(path = %main_config_path.display(), "creating main config file");
            let content = self.profile.render_main_config()?;
            write_config_file(&main_config_path, &content)
                .await
                .map_err(|e| AgentError::ConfigSetupFailed {
                    path: main_config_path.display().to_string(),
                    reason: e.to_string(),
                })?;
        }

        let applied = apply_operations(
            &configs_path,
            self.profile.config_extension(),
            &configure.operations,
        )
        .await;

        if applied == 0 {
            return Err(AgentError::NoAppliedConfigs.into());
        }
        debug!(agent_type = %self.profile.agent_type(), applied, "applied config operations");
        Ok(())
    }

    async fn stop(&self) {
        let mut running = self.running.lock().await;
        if let Some(current) = running.take() {
            debug!(agent_type = %self.profile.agent_type(), "stopping agent");
            self.command_handler.stop(&current).await;
        }
    }
}
