//! Routes install and configure instructions to agent runners

use super::fragments::{create_dir, is_plain_name, path_exists};
use super::registry::{agent_base_path, AgentRegistry};
use super::CONFIGS_DIR_SUBPATH;
use crate::install::{update_current_link, Installer};
use crate::types::{ConfigureInstruction, InstallInstruction, Instruction};
use futures::future::join_all;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Dispatches instructions to the runner registered for their agent kind.
///
/// Errors are logged, never returned: one bad instruction must not stop the
/// stream.
pub struct AgentsRouter {
    data_path: PathBuf,
    registry: Arc<AgentRegistry>,
    installer: Arc<dyn Installer>,
    ctx: CancellationToken,
}

impl AgentsRouter {
    pub fn new(
        data_path: impl Into<PathBuf>,
        registry: Arc<AgentRegistry>,
        installer: Arc<dyn Installer>,
        ctx: CancellationToken,
    ) -> Self {
        Self {
            data_path: data_path.into(),
            registry,
            installer,
            ctx,
        }
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Wait for shutdown, then stop every runner
    pub async fn start(&self) {
        self.ctx.cancelled().await;

        debug!("stopping specific runners");
        join_all(self.registry.runners().map(|(_, runner)| runner.stop())).await;
        info!("all agents stopped");
    }

    pub async fn process_instruction(&self, instruction: Instruction) {
        match instruction {
            Instruction::Install(install) => self.process_install(&install).await,
            Instruction::Configure(configure) => self.process_configure(&configure).await,
        }
    }

    pub async fn process_install(&self, install: &InstallInstruction) {
        let agent_type = install.agent.agent_type;
        let version = install.agent.version.as_str();
        debug!(agent_type = %agent_type, version, "processing install instruction");

        let Some(runner) = self.registry.get(agent_type) else {
            warn!(agent_type = %agent_type, "no specific runner for agent type");
            return;
        };
        if !is_plain_name(version) {
            warn!(agent_type = %agent_type, version, "ignoring install with invalid version");
            return;
        }

        let agent_base_path = agent_base_path(&self.data_path, agent_type);
        let output_path = agent_base_path.join(version);

        if path_exists(&output_path).await {
            debug!(agent_type = %agent_type, path = %output_path.display(), version, "agent already installed");
        } else {
            if let Err(e) = create_dir(&output_path).await {
                error!(path = %output_path.display(), error = %e, "unable to create agent version directory");
                return;
            }

            if let Err(e) = self
                .installer
                .download_and_extract(&output_path, &install.url, &install.checksum, &install.exe)
                .await
            {
                error!(agent_type = %agent_type, version, error = %e, "failed to download and extract agent");
                remove_partial_install(&output_path).await;
                return;
            }

            if let Err(e) = update_current_link(&agent_base_path, version).await {
                error!(agent_type = %agent_type, version, error = %e, "failed to update current version symlink");
                remove_partial_install(&output_path).await;
                return;
            }

            info!(agent_type = %agent_type, path = %output_path.display(), version, "installed agent");
        }

        runner.ensure_running_state(self.ctx.clone(), false).await;
    }

    pub async fn process_configure(&self, configure: &ConfigureInstruction) {
        let agent_type = configure.agent_type;
        debug!(agent_type = %agent_type, operations = configure.operations.len(), "processing configure instruction");

        let Some(runner) = self.registry.get(agent_type) else {
            warn!(agent_type = %agent_type, "unable to configure unknown agent type");
            return;
        };

        match runner.process_config(configure).await {
            Ok(()) => runner.ensure_running_state(self.ctx.clone(), true).await,
            Err(e) if e.is_no_applied_configs() => {
                warn!(agent_type = %agent_type, "no configuration was applied")
            }
            Err(e) => {
                warn!(agent_type = %agent_type, error = %e, "failed to process agent configuration")
            }
        }
    }

    /// Remove every registered kind's fragment directory
    pub async fn purge_agent_configs(&self) {
        for agent_type in self.registry.supported_agents() {
            let configs_path = agent_base_path(&self.data_path, agent_type).join(CONFIGS_DIR_SUBPATH);
            debug!(path = %configs_path.display(), "purging agent config directory");

            match tokio::fs::remove_dir_all(&configs_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %configs_path.display(), error = %e, "failed to purge configs directory")
                }
            }
        }
    }
}

async fn remove_partial_install(output_path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(output_path).await {
        warn!(path = %output_path.display(), error = %e, "failed to remove partial install");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{MockSpecificAgentRunner, SpecificAgentRunner, CURRENT_VERSION_LINK};
    use crate::error::{AgentError, InstallError};
    use crate::install::MockInstaller;
    use crate::types::{AgentRef, AgentType, ConfigurationOp, ConfigurationOpType};
    use std::time::Duration;

    fn install(agent_type: AgentType, version: &str) -> InstallInstruction {
        InstallInstruction {
            agent: AgentRef {
                agent_type,
                version: version.to_string(),
            },
            url: "https://example.com/agent.tar.gz".to_string(),
            checksum: String::new(),
            exe: "agent/bin/agent".to_string(),
        }
    }

    fn configure(agent_type: AgentType) -> ConfigureInstruction {
        ConfigureInstruction {
            agent_type,
            operations: vec![ConfigurationOp::new(
                "a-b-c",
                ConfigurationOpType::Create,
                "hello",
            )],
        }
    }

    fn router_with(
        data_path: &Path,
        agent_type: AgentType,
        runner: MockSpecificAgentRunner,
        installer: MockInstaller,
    ) -> AgentsRouter {
        let mut registry = AgentRegistry::new();
        registry.register(agent_type, Arc::new(runner));
        AgentsRouter::new(
            data_path,
            Arc::new(registry),
            Arc::new(installer),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_install_new_version() {
        let dir = tempfile::tempdir().unwrap();
        let mut installer = MockInstaller::new();
        installer
            .expect_download_and_extract()
            .times(1)
            .returning(|output_path, _, _, _| {
                std::fs::create_dir_all(output_path.join("bin")).unwrap();
                std::fs::write(output_path.join("bin/telegraf"), "bin").unwrap();
                Ok(())
            });
        let mut runner = MockSpecificAgentRunner::new();
        runner
            .expect_ensure_running_state()
            .withf(|_, apply_configs| !*apply_configs)
            .times(1)
            .return_const(());

        let router = router_with(dir.path(), AgentType::Telegraf, runner, installer);
        router.process_install(&install(AgentType::Telegraf, "1.8.0")).await;

        let base = dir.path().join("agents/TELEGRAF");
        assert_eq!(
            std::fs::read_link(base.join(CURRENT_VERSION_LINK)).unwrap(),
            Path::new("1.8.0")
        );
        assert!(base.join("CURRENT/bin/telegraf").exists());
    }

    #[tokio::test]
    async fn test_install_existing_version_only_reconciles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("agents/FILEBEAT/6.4.1")).unwrap();

        let mut installer = MockInstaller::new();
        installer.expect_download_and_extract().times(0);
        let mut runner = MockSpecificAgentRunner::new();
        runner
            .expect_ensure_running_state()
            .times(1)
            .return_const(());

        let router = router_with(dir.path(), AgentType::Filebeat, runner, installer);
        router.process_install(&install(AgentType::Filebeat, "6.4.1")).await;
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_partial_install() {
        let dir = tempfile::tempdir().unwrap();
        let mut installer = MockInstaller::new();
        installer
            .expect_download_and_extract()
            .times(1)
            .returning(|output_path, url, _, _| {
                std::fs::write(output_path.join("partial"), "x").unwrap();
                Err(InstallError::Download {
                    url: url.to_string(),
                    reason: "connection reset".to_string(),
                }
                .into())
            });
        let mut runner = MockSpecificAgentRunner::new();
        runner.expect_ensure_running_state().times(0);

        let router = router_with(dir.path(), AgentType::Telegraf, runner, installer);
        router.process_install(&install(AgentType::Telegraf, "1.8.0")).await;

        let base = dir.path().join("agents/TELEGRAF");
        assert!(!base.join("1.8.0").exists());
        assert!(std::fs::symlink_metadata(base.join(CURRENT_VERSION_LINK)).is_err());
    }

    #[tokio::test]
    async fn test_failed_download_keeps_previous_version() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("agents/TELEGRAF");
        std::fs::create_dir_all(base.join("1.7.0")).unwrap();
        std::os::unix::fs::symlink("1.7.0", base.join(CURRENT_VERSION_LINK)).unwrap();

        let mut installer = MockInstaller::new();
        installer
            .expect_download_and_extract()
            .returning(|_, _, _, _| Err(InstallError::ExecutableNotFound("telegraf".into()).into()));
        let mut runner = MockSpecificAgentRunner::new();
        runner.expect_ensure_running_state().times(0);

        let router = router_with(dir.path(), AgentType::Telegraf, runner, installer);
        router.process_install(&install(AgentType::Telegraf, "1.8.0")).await;

        assert!(!base.join("1.8.0").exists());
        assert_eq!(
            std::fs::read_link(base.join(CURRENT_VERSION_LINK)).unwrap(),
            Path::new("1.7.0")
        );
    }

    #[tokio::test]
    async fn test_unknown_agent_type_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut installer = MockInstaller::new();
        installer.expect_download_and_extract().times(0);
        let mut runner = MockSpecificAgentRunner::new();
        runner.expect_ensure_running_state().times(0);
        runner.expect_process_config().times(0);

        let router = router_with(dir.path(), AgentType::Telegraf, runner, installer);
        router.process_install(&install(AgentType::Filebeat, "6.4.1")).await;
        router.process_configure(&configure(AgentType::Filebeat)).await;

        assert!(!dir.path().join("agents").exists());
    }

    #[tokio::test]
    async fn test_invalid_version_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut installer = MockInstaller::new();
        installer.expect_download_and_extract().times(0);
        let mut runner = MockSpecificAgentRunner::new();
        runner.expect_ensure_running_state().times(0);

        let router = router_with(dir.path(), AgentType::Telegraf, runner, installer);
        router.process_install(&install(AgentType::Telegraf, "../../etc")).await;
    }

    #[tokio::test]
    async fn test_configure_reconciles_with_changed_configs() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockSpecificAgentRunner::new();
        runner
            .expect_process_config()
            .times(1)
            .returning(|_| Ok(()));
        runner
            .expect_ensure_running_state()
            .withf(|_, apply_configs| *apply_configs)
            .times(1)
            .return_const(());

        let router = router_with(dir.path(), AgentType::Filebeat, runner, MockInstaller::new());
        router
            .process_instruction(Instruction::Configure(configure(AgentType::Filebeat)))
            .await;
    }

    #[tokio::test]
    async fn test_configure_with_nothing_applied_skips_reconcile() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockSpecificAgentRunner::new();
        runner
            .expect_process_config()
            .times(1)
            .returning(|_| Err(AgentError::NoAppliedConfigs.into()));
        runner.expect_ensure_running_state().times(0);

        let router = router_with(dir.path(), AgentType::Telegraf, runner, MockInstaller::new());
        router.process_configure(&configure(AgentType::Telegraf)).await;
    }

    #[tokio::test]
    async fn test_configure_failure_skips_reconcile() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockSpecificAgentRunner::new();
        runner.expect_process_config().returning(|_| {
            Err(AgentError::ConfigSetupFailed {
                path: "config.d".into(),
                reason: "read-only file system".into(),
            }
            .into())
        });
        runner.expect_ensure_running_state().times(0);

        let router = router_with(dir.path(), AgentType::Telegraf, runner, MockInstaller::new());
        router.process_configure(&configure(AgentType::Telegraf)).await;
    }

    #[tokio::test]
    async fn test_purge_agent_configs() {
        let dir = tempfile::tempdir().unwrap();
        let configs = dir.path().join("agents/TELEGRAF/config.d");
        std::fs::create_dir_all(&configs).unwrap();
        std::fs::write(configs.join("stale.conf"), "old").unwrap();
        std::fs::write(dir.path().join("agents/TELEGRAF/telegraf.conf"), "main").unwrap();

        let router = router_with(
            dir.path(),
            AgentType::Telegraf,
            MockSpecificAgentRunner::new(),
            MockInstaller::new(),
        );
        router.purge_agent_configs().await;

        assert!(!configs.exists());
        assert!(dir.path().join("agents/TELEGRAF/telegraf.conf").exists());
        // nothing to purge is fine
        router.purge_agent_configs().await;
    }

    #[tokio::test]
    async fn test_start_stops_all_runners_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = AgentRegistry::new();
        for agent_type in AgentType::ALL {
            let mut runner = MockSpecificAgentRunner::new();
            runner.expect_stop().times(1).return_const(());
            let runner: Arc<dyn SpecificAgentRunner> = Arc::new(runner);
            registry.register(agent_type, runner);
        }

        let ctx = CancellationToken::new();
        let router = Arc::new(AgentsRouter::new(
            dir.path(),
            Arc::new(registry),
            Arc::new(MockInstaller::new()),
            ctx.clone(),
        ));

        let started = {
            let router = router.clone();
            tokio::spawn(async move { router.start().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!started.is_finished());

        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), started)
            .await
            .unwrap()
            .unwrap();
    }
}
