//! Running context for a single agent process invocation

use crate::error::{CommandError, Result};
use crate::types::{AgentType, ProcessState};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Default)]
struct RunningState {
    state: ProcessState,
    pid: Option<u32>,
    exit_status: Option<ExitStatus>,
    started_at: Option<DateTime<Utc>>,
}

/// One launch of an agent executable.
///
/// Created fresh for every start attempt and discarded once the process has
/// exited. State transitions and the pid are guarded by a single lock so that
/// an intentional stop and an unexpected exit are never confused. The
/// completion signal fires exactly once, after the process has been reaped.
#[derive(Debug)]
pub struct AgentRunningContext {
    id: Uuid,
    agent_type: AgentType,
    program: PathBuf,
    args: Vec<String>,
    working_dir: PathBuf,
    cancel: CancellationToken,
    inner: Mutex<RunningState>,
    exited_tx: watch::Sender<bool>,
}

impl AgentRunningContext {
    /// Build a context whose scope is a child of `parent`. Nothing is launched.
    pub fn new(
        parent: &CancellationToken,
        agent_type: AgentType,
        program: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
        args: Vec<String>,
    ) -> Self {
        let (exited_tx, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            agent_type,
            program: program.into(),
            args,
            working_dir: working_dir.into(),
            cancel: parent.child_token(),
            inner: Mutex::new(RunningState::default()),
            exited_tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// When the process was launched
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().started_at
    }

    pub fn state(&self) -> ProcessState {
        self.inner.lock().state
    }

    /// Pid of the process while it has not been reaped
    pub fn pid(&self) -> Option<u32> {
        self.inner.lock().pid
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().state == ProcessState::Running
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.inner.lock().exit_status
    }

    /// Scope shared by the output readers of this invocation
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the process has been reaped
    pub fn has_exited(&self) -> bool {
        *self.exited_tx.borrow()
    }

    /// Wait until the process has been reaped
    pub async fn wait_exited(&self) {
        let mut exited_rx = self.exited_tx.subscribe();
        let _ = exited_rx.wait_for(|exited| *exited).await;
    }

    pub(crate) fn begin_start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != ProcessState::Created {
            return Err(CommandError::AlreadyStarted.into());
        }
        inner.state = ProcessState::Starting;
        Ok(())
    }

    pub(crate) fn mark_spawned(&self, pid: Option<u32>) {
        let mut inner = self.inner.lock();
        inner.pid = pid;
        inner.started_at = Some(Utc::now());
    }

    /// Starting -> Running. Leaves the state alone if the process already exited.
    pub(crate) fn mark_ready(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ProcessState::Starting {
            inner.state = ProcessState::Running;
        }
    }

    pub(crate) fn mark_start_failed(&self) {
        self.inner.lock().state = ProcessState::StartFailed;
    }

    /// Running -> Stopping, returning the pid to signal.
    ///
    /// Returns `None` when the process is not running, including when a stop
    /// is already in progress.
    pub(crate) fn begin_stop(&self) -> Option<u32> {
        let mut inner = self.inner.lock();
        if inner.state != ProcessState::Running {
            return None;
        }
        let pid = inner.pid?;
        inner.state = ProcessState::Stopping;
        Some(pid)
    }

    /// Pid to signal, only while running
    pub(crate) fn running_pid(&self) -> Option<u32> {
        let inner = self.inner.lock();
        match inner.state {
            ProcessState::Running => inner.pid,
            _ => None,
        }
    }

    /// Record that the process was reaped and fire the completion signal.
    ///
    /// An exit during a stop is `Stopped`; a failed start keeps `StartFailed`;
    /// any other exit is `Crashed`.
    pub(crate) fn record_exit(&self, status: io::Result<ExitStatus>) -> ProcessState {
        let state = {
            let mut inner = self.inner.lock();
            inner.pid = None;
            match status {
                Ok(status) => inner.exit_status = Some(status),
                Err(e) => {
                    warn!(agent_type = %self.agent_type, error = %e, "failed to wait on agent command");
                }
            }
            inner.state = match inner.state {
                ProcessState::Stopping | ProcessState::Stopped => ProcessState::Stopped,
                ProcessState::StartFailed => ProcessState::StartFailed,
                _ => ProcessState::Crashed,
            };
            inner.state
        };

        self.exited_tx.send_replace(true);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn context() -> AgentRunningContext {
        AgentRunningContext::new(
            &CancellationToken::new(),
            AgentType::Telegraf,
            "/bin/true",
            "/tmp",
            vec![],
        )
    }

    fn exit_ok() -> io::Result<ExitStatus> {
        std::process::Command::new("true").status()
    }

    #[test]
    fn test_start_only_once() {
        let running = context();
        assert_eq!(running.state(), ProcessState::Created);
        running.begin_start().unwrap();
        assert_eq!(running.state(), ProcessState::Starting);
        assert!(running.begin_start().is_err());
    }

    #[test]
    fn test_stop_requires_running() {
        let running = context();
        assert!(running.begin_stop().is_none());
        assert!(running.started_at().is_none());

        running.begin_start().unwrap();
        running.mark_spawned(Some(4242));
        assert!(running.begin_stop().is_none());
        assert!(running.running_pid().is_none());

        assert!(running.started_at().is_some());
        running.mark_ready();
        assert_eq!(running.running_pid(), Some(4242));
        assert_eq!(running.begin_stop(), Some(4242));
        assert_eq!(running.state(), ProcessState::Stopping);
        // second stop is a no-op
        assert!(running.begin_stop().is_none());
    }

    #[test]
    fn test_exit_while_stopping_is_stopped() {
        let running = context();
        running.begin_start().unwrap();
        running.mark_spawned(Some(1));
        running.mark_ready();
        running.begin_stop();

        assert_eq!(running.record_exit(exit_ok()), ProcessState::Stopped);
        assert!(running.pid().is_none());
        assert!(running.has_exited());
        assert!(running.exit_status().unwrap().success());
    }

    #[test]
    fn test_unexpected_exit_is_crash() {
        let running = context();
        running.begin_start().unwrap();
        running.mark_spawned(Some(1));
        running.mark_ready();

        assert_eq!(running.record_exit(exit_ok()), ProcessState::Crashed);
        assert!(running.state().is_terminal());
    }

    #[test]
    fn test_failed_start_stays_failed() {
        let running = context();
        running.begin_start().unwrap();
        running.mark_spawned(Some(1));
        running.mark_start_failed();

        assert_eq!(running.record_exit(exit_ok()), ProcessState::StartFailed);
        // readiness that arrives late does not revive it
        running.mark_ready();
        assert_eq!(running.state(), ProcessState::StartFailed);
    }

    #[test]
    fn test_scope_is_child_of_parent() {
        let parent = CancellationToken::new();
        let running = AgentRunningContext::new(
            &parent,
            AgentType::Filebeat,
            "CURRENT/bin/filebeat",
            "/tmp",
            vec!["run".into()],
        );
        assert_eq!(running.args(), ["run".to_string()]);

        parent.cancel();
        assert!(running.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_exited_fires_after_record() {
        let running = std::sync::Arc::new(context());
        running.begin_start().unwrap();

        let waiter = {
            let running = running.clone();
            tokio::spawn(async move { running.wait_exited().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        running.record_exit(exit_ok());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        // already fired, returns immediately
        running.wait_exited().await;
    }
}
