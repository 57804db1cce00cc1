//! Launching, stopping and watching agent processes

use super::context::AgentRunningContext;
use super::output::{forward_output, OutputSink, ReadinessReport};
use crate::agent::SpecificAgentRunner;
use crate::config::AgentsSettings;
use crate::error::{CommandError, Result};
use crate::types::{AgentType, OutputStream, ProcessState};
use async_trait::async_trait;
use chrono::Utc;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Process supervision operations used by the agent runners
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Build a running context bound to `ctx`. Does not launch anything.
    fn create_context(
        &self,
        ctx: &CancellationToken,
        agent_type: AgentType,
        program: &Path,
        working_dir: &Path,
        args: &[String],
    ) -> Arc<AgentRunningContext>;

    /// Launch the process and wait for `wait_for` to appear in its output.
    ///
    /// An empty `wait_for` succeeds as soon as the process is launched.
    async fn start_agent_command(
        &self,
        running: &Arc<AgentRunningContext>,
        wait_for: &str,
        wait_for_duration: Duration,
    ) -> Result<()>;

    /// Wait for the process to exit and schedule a restart if it crashed
    async fn wait_on_agent_command(
        &self,
        ctx: CancellationToken,
        runner: Arc<dyn SpecificAgentRunner>,
        running: Arc<AgentRunningContext>,
    );

    /// Deliver `signal` to the process. No-op when it is not running.
    fn signal(&self, running: &AgentRunningContext, signal: Signal) -> Result<()>;

    /// Terminate the process, killing it if it does not exit in time
    async fn stop(&self, running: &AgentRunningContext);
}

/// Command handler backed by OS processes
pub struct StandardCommandHandler {
    sink: Arc<dyn OutputSink>,
    restart_delay: Duration,
    termination_timeout: Duration,
}

impl StandardCommandHandler {
    pub fn new(sink: Arc<dyn OutputSink>, settings: &AgentsSettings) -> Self {
        Self::with_timings(sink, settings.restart_delay(), settings.termination_timeout())
    }

    pub fn with_timings(
        sink: Arc<dyn OutputSink>,
        restart_delay: Duration,
        termination_timeout: Duration,
    ) -> Self {
        Self {
            sink,
            restart_delay,
            termination_timeout,
        }
    }

    /// Tear down a process that failed to become ready
    async fn abort_start(&self, running: &AgentRunningContext) {
        running.mark_start_failed();
        if let Some(pid) = running.pid() {
            if let Err(e) = send_signal(pid, Signal::SIGKILL) {
                warn!(agent_type = %running.agent_type(), pid, error = %e, "failed to kill agent that did not start");
            }
        }
        if tokio::time::timeout(self.termination_timeout, running.wait_exited())
            .await
            .is_err()
        {
            warn!(agent_type = %running.agent_type(), "agent that did not start has not exited");
        }
        running.cancel();
    }
}

#[async_trait]
impl CommandHandler for StandardCommandHandler {
    fn create_context(
        &self,
        ctx: &CancellationToken,
        agent_type: AgentType,
        program: &Path,
        working_dir: &Path,
        args: &[String],
    ) -> Arc<AgentRunningContext> {
        Arc::new(AgentRunningContext::new(
            ctx,
            agent_type,
            program,
            working_dir,
            args.to_vec(),
        ))
    }

    async fn start_agent_command(
        &self,
        running: &Arc<AgentRunningContext>,
        wait_for: &str,
        wait_for_duration: Duration,
    ) -> Result<()> {
        let agent_type = running.agent_type();
        running.begin_start()?;

        debug!(
            agent_type = %agent_type,
            "Starting agent: {} {:?} (cwd: {:?})",
            running.program().display(),
            running.args(),
            running.working_dir()
        );

        let mut cmd = Command::new(running.program());
        cmd.args(running.args())
            .current_dir(running.working_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                running.mark_start_failed();
                running.cancel();
                return Err(CommandError::SpawnFailed {
                    command: running.program().display().to_string(),
                    reason: e.to_string(),
                }
                .into());
            }
        };

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            (stdout, _) => {
                running.mark_start_failed();
                running.cancel();
                discard_child(child);
                let missing = if stdout.is_none() { "stdout" } else { "stderr" };
                return Err(CommandError::PipeUnavailable(missing).into());
            }
        };

        running.mark_spawned(child.id());

        let marker = (!wait_for.is_empty()).then(|| wait_for.to_string());
        let (result_tx, mut result_rx) = mpsc::channel::<bool>(1);

        tokio::spawn(forward_output(
            stdout,
            OutputStream::Stdout,
            agent_type,
            Arc::clone(&self.sink),
            running.cancellation_token().clone(),
            ReadinessReport {
                marker: marker.clone(),
                result_tx: result_tx.clone(),
            },
        ));
        tokio::spawn(forward_output(
            stderr,
            OutputStream::Stderr,
            agent_type,
            Arc::clone(&self.sink),
            running.cancellation_token().clone(),
            ReadinessReport {
                marker: marker.clone(),
                result_tx,
            },
        ));

        // Reaper: owns the child and fires the completion signal
        {
            let running = Arc::clone(running);
            tokio::spawn(async move {
                let status = child.wait().await;
                let state = running.record_exit(status);
                debug!(agent_type = %running.agent_type(), ?state, "agent process reaped");
            });
        }

        let Some(marker) = marker else {
            running.mark_ready();
            return Ok(());
        };

        match tokio::time::timeout(wait_for_duration, result_rx.recv()).await {
            Ok(Some(true)) => {
                running.mark_ready();
                Ok(())
            }
            Ok(Some(false)) | Ok(None) => {
                self.abort_start(running).await;
                Err(CommandError::ExitedBeforeReady(marker).into())
            }
            Err(_) => {
                self.abort_start(running).await;
                Err(CommandError::ReadinessTimeout {
                    marker,
                    timeout: wait_for_duration,
                }
                .into())
            }
        }
    }

    async fn wait_on_agent_command(
        &self,
        ctx: CancellationToken,
        runner: Arc<dyn SpecificAgentRunner>,
        running: Arc<AgentRunningContext>,
    ) {
        let agent_type = running.agent_type();
        running.wait_exited().await;

        let uptime_secs = running
            .started_at()
            .map(|started| (Utc::now() - started).num_seconds());
        match running.exit_status() {
            Some(status) if status.success() => {
                info!(agent_type = %agent_type, ?uptime_secs, "agent exited successfully")
            }
            Some(status) => {
                warn!(agent_type = %agent_type, %status, ?uptime_secs, "agent exited abnormally")
            }
            None => warn!(agent_type = %agent_type, ?uptime_secs, "agent exited with unknown status"),
        }

        running.cancel();

        if running.state() != ProcessState::Crashed {
            debug!(agent_type = %agent_type, "agent was stopped intentionally, not restarting");
            return;
        }

        info!(
            agent_type = %agent_type,
            delay = ?self.restart_delay,
            "scheduling agent restart"
        );
        tokio::select! {
            _ = ctx.cancelled() => {
                debug!(agent_type = %agent_type, "restart cancelled by shutdown");
            }
            _ = tokio::time::sleep(self.restart_delay) => {
                runner.ensure_running_state(ctx.clone(), false).await;
            }
        }
    }

    fn signal(&self, running: &AgentRunningContext, signal: Signal) -> Result<()> {
        let Some(pid) = running.running_pid() else {
            return Ok(());
        };

        debug!(agent_type = %running.agent_type(), pid, %signal, "signalling agent");
        if !send_signal(pid, signal)? {
            debug!(agent_type = %running.agent_type(), pid, "agent already gone");
        }
        Ok(())
    }

    async fn stop(&self, running: &AgentRunningContext) {
        let agent_type = running.agent_type();
        let Some(pid) = running.begin_stop() else {
            return;
        };

        debug!(agent_type = %agent_type, pid, "stopping agent");
        match send_signal(pid, Signal::SIGTERM) {
            Ok(true) => {}
            Ok(false) => debug!(agent_type = %agent_type, pid, "agent already gone"),
            Err(e) => warn!(agent_type = %agent_type, error = %e, "failed to terminate agent"),
        }

        if tokio::time::timeout(self.termination_timeout, running.wait_exited())
            .await
            .is_err()
        {
            warn!(agent_type = %agent_type, pid, "agent did not stop in time, killing");
            if let Err(e) = send_signal(pid, Signal::SIGKILL) {
                warn!(agent_type = %agent_type, error = %e, "failed to kill agent");
            }
            if tokio::time::timeout(self.termination_timeout, running.wait_exited())
                .await
                .is_err()
            {
                error!(agent_type = %agent_type, pid, "agent still running after kill");
            }
        }

        running.cancel();
        info!(agent_type = %agent_type, "stopped agent");
    }
}

/// Kill a child that will not be handed to a reaper, and reap it in the background
fn discard_child(mut child: Child) {
    tokio::spawn(async move {
        if let Err(e) = child.kill().await {
            debug!(error = %e, "failed to kill discarded agent process");
        }
    });
}

/// Send `signal` to `pid`. Returns `Ok(false)` when the process no longer exists.
fn send_signal(pid: u32, signal: Signal) -> Result<bool> {
    let raw = i32::try_from(pid).map_err(|_| CommandError::SignalFailed {
        signal: signal.to_string(),
        pid,
        reason: "pid out of range".to_string(),
    })?;

    match signal::kill(Pid::from_raw(raw), signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(CommandError::SignalFailed {
            signal: signal.to_string(),
            pid,
            reason: e.to_string(),
        }
        .into()),
    }
}
