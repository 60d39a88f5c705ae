// ─── Process Spawning ───
// The seam between the supervisor and real OS processes.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::launch::LaunchPlan;

use super::console::{ConsoleLog, LogStream};

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    Signaled(i32),
}

/// A running child owned by the supervisor task.
#[async_trait]
pub trait ChildProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Wait for the child to end. Must be cancel safe.
    async fn wait(&mut self) -> LauncherResult<ExitOutcome>;

    /// Ask the child to shut down (SIGTERM).
    fn terminate(&mut self) -> LauncherResult<()>;

    /// Kill the child and reap it.
    async fn kill(&mut self) -> LauncherResult<()>;

    /// Write one console line to the child's stdin.
    async fn write_line(&mut self, line: &str) -> LauncherResult<()>;
}

#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(
        &self,
        plan: &LaunchPlan,
        console: ConsoleLog,
    ) -> LauncherResult<Box<dyn ChildProcess>>;
}

/// Spawns the plan as a real OS process through `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

#[async_trait]
impl ProcessSpawner for TokioSpawner {
    async fn spawn(
        &self,
        plan: &LaunchPlan,
        console: ConsoleLog,
    ) -> LauncherResult<Box<dyn ChildProcess>> {
        let mut cmd = Command::new(&plan.program);
        cmd.args(&plan.args)
            .current_dir(&plan.working_dir)
            .envs(&plan.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        configure_identity(&mut cmd, plan);

        debug!("Spawning {:?} in {:?}", plan.program, plan.working_dir);
        let mut child = cmd.spawn().map_err(|e| {
            LauncherError::LaunchFailed(format!("cannot start {:?}: {e}", plan.program))
        })?;
        info!(
            "[mc:{}] Server process started (pid {:?})",
            console.label(),
            child.id()
        );

        if let Some(stdout) = child.stdout.take() {
            let console = console.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    console.push(LogStream::Stdout, &line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let console = console.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    console.push(LogStream::Stderr, &line);
                }
            });
        }

        let stdin = child.stdin.take();
        Ok(Box::new(TokioChild { child, stdin }))
    }
}

#[cfg(unix)]
fn configure_identity(cmd: &mut Command, plan: &LaunchPlan) {
    // SAFETY: geteuid/getegid have no preconditions and cannot fail.
    let (euid, egid) = unsafe { (libc::geteuid(), libc::getegid()) };
    if plan.identity.gid != egid {
        cmd.gid(plan.identity.gid);
    }
    if plan.identity.uid != euid {
        cmd.uid(plan.identity.uid);
    }
}

#[cfg(not(unix))]
fn configure_identity(_cmd: &mut Command, plan: &LaunchPlan) {
    tracing::warn!(
        "Switching to {} is not supported on this platform; the server runs as the launcher user",
        plan.identity.user
    );
}

struct TokioChild {
    child: Child,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl ChildProcess for TokioChild {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> LauncherResult<ExitOutcome> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| LauncherError::Other(format!("failed waiting for server process: {e}")))?;
        if let Some(code) = status.code() {
            return Ok(ExitOutcome::Exited(code));
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Ok(ExitOutcome::Signaled(signal));
            }
        }
        Ok(ExitOutcome::Signaled(0))
    }

    fn terminate(&mut self) -> LauncherResult<()> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        #[cfg(unix)]
        {
            // SAFETY: pid belongs to a child we have not reaped yet.
            let rc = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                return Err(LauncherError::Other(format!(
                    "cannot send SIGTERM to {pid}: {err}"
                )));
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            tracing::warn!("No graceful termination on this platform; killing {}", pid);
            self.child
                .start_kill()
                .map_err(|e| LauncherError::Other(format!("cannot kill {pid}: {e}")))
        }
    }

    async fn kill(&mut self) -> LauncherResult<()> {
        self.child
            .kill()
            .await
            .map_err(|e| LauncherError::Other(format!("cannot kill server process: {e}")))
    }

    async fn write_line(&mut self, line: &str) -> LauncherResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| LauncherError::Other("server stdin is closed".into()))?;
        let mut payload = line.trim_end_matches(['\r', '\n']).to_string();
        payload.push('\n');
        stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| LauncherError::Other(format!("cannot write to server stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| LauncherError::Other(format!("cannot write to server stdin: {e}")))
    }
}
