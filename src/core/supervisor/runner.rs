// ─── Process Supervisor ───
// Runs a launch plan, restarts it on crashes within a bounded policy and
// honours operator stop requests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::launch::LaunchPlan;

use super::console::{ConsoleLog, DEFAULT_LOG_CAPACITY, LogLine, LogStream};
use super::policy::RestartPolicy;
use super::process::{ChildProcess, ExitOutcome, ProcessSpawner};
use super::state::{SupervisorState, Transition};

const COMMAND_QUEUE: usize = 32;

pub struct ProcessSupervisor {
    spawner: Arc<dyn ProcessSpawner>,
    policy: RestartPolicy,
    stop_grace: Duration,
    log_capacity: usize,
}

impl ProcessSupervisor {
    pub fn new(spawner: Arc<dyn ProcessSpawner>, policy: RestartPolicy, stop_grace: Duration) -> Self {
        Self {
            spawner,
            policy,
            stop_grace,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }

    pub fn with_log_capacity(mut self, log_capacity: usize) -> Self {
        self.log_capacity = log_capacity;
        self
    }

    /// Start supervising `plan` on a background task.
    pub fn start(&self, label: &str, plan: LaunchPlan) -> SupervisorHandle {
        let (state_tx, state_rx) = watch::channel(SupervisorState::Starting);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let shared = Arc::new(Shared {
            state_tx,
            stop_tx,
            history: Mutex::new(Vec::new()),
            restarts: AtomicU32::new(0),
            pid: AtomicU32::new(0),
        });
        let console = ConsoleLog::new(label, self.log_capacity);

        let task = SupervisorTask {
            spawner: Arc::clone(&self.spawner),
            policy: self.policy,
            stop_grace: self.stop_grace,
            plan,
            shared: Arc::clone(&shared),
            console: console.clone(),
            commands: commands_rx,
            stop: stop_rx,
        };
        let task = tokio::spawn(task.run());

        SupervisorHandle {
            label: label.to_string(),
            shared,
            state_rx,
            commands: commands_tx,
            console,
            task,
        }
    }
}

struct Shared {
    state_tx: watch::Sender<SupervisorState>,
    stop_tx: watch::Sender<bool>,
    history: Mutex<Vec<Transition>>,
    restarts: AtomicU32,
    pid: AtomicU32,
}

/// Operator side of a supervised server.
pub struct SupervisorHandle {
    label: String,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<SupervisorState>,
    commands: mpsc::Sender<String>,
    console: ConsoleLog,
    task: JoinHandle<LauncherResult<()>>,
}

impl SupervisorHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> SupervisorState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state_rx.clone()
    }

    /// Every transition published so far, oldest first.
    pub fn history(&self) -> Vec<Transition> {
        self.shared
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn restarts(&self) -> u32 {
        self.shared.restarts.load(Ordering::SeqCst)
    }

    pub fn pid(&self) -> Option<u32> {
        match self.shared.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn logs(&self, lines: usize) -> Vec<LogLine> {
        self.console.tail(lines)
    }

    /// Request a graceful stop. Returns immediately; use [`Self::wait`] to
    /// observe the outcome.
    pub fn stop(&self) {
        self.shared.stop_tx.send_replace(true);
    }

    /// Forward one console line to the server's stdin.
    pub async fn send_command(&self, line: &str) -> LauncherResult<()> {
        let state = self.state();
        if state != SupervisorState::Running {
            return Err(LauncherError::Other(format!(
                "server {} is not running (state: {state})",
                self.label
            )));
        }
        self.commands
            .send(line.to_string())
            .await
            .map_err(|_| LauncherError::Other(format!("server {} has shut down", self.label)))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the supervisor to reach a terminal state.
    pub async fn wait(self) -> LauncherResult<()> {
        self.task
            .await
            .map_err(|e| LauncherError::Other(format!("supervisor task failed: {e}")))?
    }

    pub async fn stop_and_wait(self) -> LauncherResult<()> {
        self.stop();
        self.wait().await
    }
}

enum Event {
    Ended(LauncherResult<ExitOutcome>),
    Stop,
    Command(String),
}

struct SupervisorTask {
    spawner: Arc<dyn ProcessSpawner>,
    policy: RestartPolicy,
    stop_grace: Duration,
    plan: LaunchPlan,
    shared: Arc<Shared>,
    console: ConsoleLog,
    commands: mpsc::Receiver<String>,
    stop: watch::Receiver<bool>,
}

impl SupervisorTask {
    async fn run(mut self) -> LauncherResult<()> {
        let label = self.console.label().to_string();
        loop {
            self.publish(SupervisorState::Starting);
            let mut child = match self.spawner.spawn(&self.plan, self.console.clone()).await {
                Ok(child) => child,
                Err(err) => {
                    error!("[mc:{}] Failed to start server: {}", label, err);
                    self.publish(SupervisorState::Failed);
                    return Err(match err {
                        LauncherError::LaunchFailed(_) => err,
                        other => LauncherError::LaunchFailed(other.to_string()),
                    });
                }
            };
            self.shared
                .pid
                .store(child.pid().unwrap_or(0), Ordering::SeqCst);
            self.publish(SupervisorState::Running);

            let ended = loop {
                let event = tokio::select! {
                    result = child.wait() => Event::Ended(result),
                    _ = self.stop.changed() => Event::Stop,
                    Some(line) = self.commands.recv() => Event::Command(line),
                };
                match event {
                    Event::Ended(result) => break result,
                    Event::Stop => {
                        self.shutdown(&mut child).await;
                        self.shared.pid.store(0, Ordering::SeqCst);
                        self.publish(SupervisorState::Stopped);
                        return Ok(());
                    }
                    Event::Command(line) => {
                        self.console.push(LogStream::Launcher, &format!("> {line}"));
                        if let Err(e) = child.write_line(&line).await {
                            warn!("[mc:{}] Could not deliver command: {}", label, e);
                        }
                    }
                }
            };
            self.shared.pid.store(0, Ordering::SeqCst);

            let last = match ended {
                Ok(ExitOutcome::Exited(0)) => {
                    self.publish(SupervisorState::Exited(0));
                    info!("[mc:{}] Server exited cleanly", label);
                    self.publish(SupervisorState::Stopped);
                    return Ok(());
                }
                Ok(ExitOutcome::Exited(code)) => {
                    self.publish(SupervisorState::Exited(code));
                    format!("exited with code {code}")
                }
                Ok(ExitOutcome::Signaled(signal)) => {
                    self.publish(SupervisorState::Crashed(signal));
                    format!("killed by signal {signal}")
                }
                Err(err) => {
                    self.publish(SupervisorState::Crashed(0));
                    err.to_string()
                }
            };

            let restarts = self.shared.restarts.load(Ordering::SeqCst);
            if restarts >= self.policy.max_restarts {
                error!(
                    "[mc:{}] Server {}; giving up after {} restarts",
                    label, last, restarts
                );
                self.publish(SupervisorState::Failed);
                return Err(LauncherError::SupervisorExhausted { restarts, last });
            }

            let restart = restarts + 1;
            let delay = self.policy.delay_for(restart);
            warn!(
                "[mc:{}] Server {}; restart {}/{} in {:?}",
                label, last, restart, self.policy.max_restarts, delay
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.stop.changed() => {
                    info!("[mc:{}] Stop requested during backoff", label);
                    self.publish(SupervisorState::Stopped);
                    return Ok(());
                }
            }
            self.shared.restarts.store(restart, Ordering::SeqCst);
        }
    }

    async fn shutdown(&self, child: &mut Box<dyn ChildProcess>) {
        let label = self.console.label();
        info!("[mc:{}] Stopping server (grace {:?})", label, self.stop_grace);
        if let Err(e) = child.terminate() {
            warn!("[mc:{}] {}", label, e);
        }
        match tokio::time::timeout(self.stop_grace, child.wait()).await {
            Ok(Ok(outcome)) => info!("[mc:{}] Server stopped: {:?}", label, outcome),
            Ok(Err(e)) => warn!("[mc:{}] Error while waiting for stop: {}", label, e),
            Err(_) => {
                warn!(
                    "[mc:{}] Server ignored SIGTERM for {:?}; killing",
                    label, self.stop_grace
                );
                if let Err(e) = child.kill().await {
                    error!("[mc:{}] {}", label, e);
                }
            }
        }
    }

    fn publish(&self, state: SupervisorState) {
        info!("[mc:{}] state -> {}", self.console.label(), state);
        self.shared
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Transition {
                state: state.clone(),
                at: Utc::now(),
            });
        self.shared.state_tx.send_replace(state);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::core::launch::plan::tests::test_image;
    use crate::core::launch::{LaunchDefaults, LaunchOverrides, LaunchPlanner};

    #[derive(Debug, Clone, Copy)]
    pub(crate) enum Script {
        Exit(i32),
        Signal(i32),
        Hang,
        FailSpawn,
    }

    /// Spawner that plays back a script of process outcomes. Once the script
    /// runs out every spawn hangs until stopped.
    pub(crate) struct ScriptedSpawner {
        script: Mutex<VecDeque<Script>>,
        honors_term: bool,
        pub(crate) spawns: AtomicU32,
        pub(crate) killed: Arc<AtomicBool>,
        pub(crate) commands: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedSpawner {
        pub(crate) fn new(script: Vec<Script>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                honors_term: true,
                spawns: AtomicU32::new(0),
                killed: Arc::new(AtomicBool::new(false)),
                commands: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub(crate) fn ignoring_sigterm(mut self) -> Self {
            self.honors_term = false;
            self
        }

        pub(crate) fn spawn_count(&self) -> u32 {
            self.spawns.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProcessSpawner for ScriptedSpawner {
        async fn spawn(
            &self,
            _plan: &LaunchPlan,
            console: ConsoleLog,
        ) -> LauncherResult<Box<dyn ChildProcess>> {
            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Hang);
            if let Script::FailSpawn = step {
                return Err(LauncherError::Other("no such file or directory".into()));
            }
            let n = self.spawns.fetch_add(1, Ordering::SeqCst) + 1;
            console.push(LogStream::Stdout, &format!("\u{1b}[32mboot {n}\u{1b}[0m"));
            Ok(Box::new(FakeChild {
                step,
                honors_term: self.honors_term,
                wake: Arc::new(Notify::new()),
                after_wake: ExitOutcome::Exited(0),
                killed: Arc::clone(&self.killed),
                commands: Arc::clone(&self.commands),
                pid: 40_000 + n,
            }))
        }
    }

    struct FakeChild {
        step: Script,
        honors_term: bool,
        wake: Arc<Notify>,
        after_wake: ExitOutcome,
        killed: Arc<AtomicBool>,
        commands: Arc<Mutex<Vec<String>>>,
        pid: u32,
    }

    #[async_trait]
    impl ChildProcess for FakeChild {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        async fn wait(&mut self) -> LauncherResult<ExitOutcome> {
            match self.step {
                Script::Exit(code) => Ok(ExitOutcome::Exited(code)),
                Script::Signal(signal) => Ok(ExitOutcome::Signaled(signal)),
                Script::Hang | Script::FailSpawn => {
                    self.wake.notified().await;
                    Ok(self.after_wake)
                }
            }
        }

        fn terminate(&mut self) -> LauncherResult<()> {
            if self.honors_term {
                self.after_wake = ExitOutcome::Exited(0);
                self.wake.notify_one();
            }
            Ok(())
        }

        async fn kill(&mut self) -> LauncherResult<()> {
            self.killed.store(true, Ordering::SeqCst);
            self.after_wake = ExitOutcome::Signaled(9);
            self.wake.notify_one();
            Ok(())
        }

        async fn write_line(&mut self, line: &str) -> LauncherResult<()> {
            self.commands.lock().unwrap().push(line.to_string());
            Ok(())
        }
    }

    pub(crate) fn fast_policy(max_restarts: u32) -> RestartPolicy {
        RestartPolicy {
            max_restarts,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    fn test_plan() -> LaunchPlan {
        let image = test_image(std::path::Path::new("/srv/servers/abc"));
        LaunchPlanner::plan(&image, &LaunchOverrides::default(), &LaunchDefaults::default())
            .unwrap()
    }

    fn states(handle: &SupervisorHandle) -> Vec<SupervisorState> {
        handle.history().into_iter().map(|t| t.state).collect()
    }

    #[tokio::test]
    async fn crashes_then_clean_exit_restarts_exactly_three_times() {
        let spawner = Arc::new(ScriptedSpawner::new(vec![
            Script::Exit(1),
            Script::Signal(9),
            Script::Exit(137),
            Script::Exit(0),
        ]));
        let supervisor =
            ProcessSupervisor::new(spawner.clone(), fast_policy(5), Duration::from_millis(50));
        let handle = supervisor.start("abc", test_plan());
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.is_terminal()).await.unwrap();

        assert_eq!(handle.restarts(), 3);
        assert_eq!(handle.state(), SupervisorState::Stopped);
        assert_eq!(spawner.spawn_count(), 4);
        assert_eq!(
            states(&handle),
            vec![
                SupervisorState::Starting,
                SupervisorState::Running,
                SupervisorState::Exited(1),
                SupervisorState::Starting,
                SupervisorState::Running,
                SupervisorState::Crashed(9),
                SupervisorState::Starting,
                SupervisorState::Running,
                SupervisorState::Exited(137),
                SupervisorState::Starting,
                SupervisorState::Running,
                SupervisorState::Exited(0),
                SupervisorState::Stopped,
            ]
        );
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn always_crashing_fails_after_max_restarts() {
        let spawner = Arc::new(ScriptedSpawner::new(vec![Script::Exit(1); 10]));
        let supervisor =
            ProcessSupervisor::new(spawner.clone(), fast_policy(3), Duration::from_millis(50));
        let handle = supervisor.start("abc", test_plan());

        let err = handle.wait().await.unwrap_err();
        match err {
            LauncherError::SupervisorExhausted { restarts, last } => {
                assert_eq!(restarts, 3);
                assert!(last.contains("code 1"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(spawner.spawn_count(), 4);
    }

    #[tokio::test]
    async fn zero_restart_budget_fails_on_first_crash() {
        let spawner = Arc::new(ScriptedSpawner::new(vec![Script::Signal(11)]));
        let supervisor =
            ProcessSupervisor::new(spawner.clone(), fast_policy(0), Duration::from_millis(50));
        let handle = supervisor.start("abc", test_plan());
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.is_terminal()).await.unwrap();
        assert_eq!(handle.state(), SupervisorState::Failed);
        assert!(matches!(
            handle.wait().await,
            Err(LauncherError::SupervisorExhausted { restarts: 0, .. })
        ));
        assert_eq!(spawner.spawn_count(), 1);
    }

    #[tokio::test]
    async fn spawn_failure_is_launch_failed_without_retry() {
        let spawner = Arc::new(ScriptedSpawner::new(vec![Script::FailSpawn]));
        let supervisor =
            ProcessSupervisor::new(spawner.clone(), fast_policy(5), Duration::from_millis(50));
        let handle = supervisor.start("abc", test_plan());
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.is_terminal()).await.unwrap();

        assert_eq!(
            states(&handle),
            vec![SupervisorState::Starting, SupervisorState::Failed]
        );
        assert!(matches!(handle.wait().await, Err(LauncherError::LaunchFailed(_))));
        assert_eq!(spawner.spawn_count(), 0);
    }

    #[tokio::test]
    async fn stop_is_graceful_when_the_server_honours_sigterm() {
        let spawner = Arc::new(ScriptedSpawner::new(vec![Script::Hang]));
        let supervisor =
            ProcessSupervisor::new(spawner.clone(), fast_policy(5), Duration::from_secs(5));
        let handle = supervisor.start("abc", test_plan());
        let mut rx = handle.subscribe();
        rx.wait_for(|s| *s == SupervisorState::Running).await.unwrap();
        assert_eq!(handle.pid(), Some(40_001));

        handle.stop();
        rx.wait_for(|s| s.is_terminal()).await.unwrap();
        assert_eq!(handle.state(), SupervisorState::Stopped);
        assert!(!spawner.killed.load(Ordering::SeqCst));
        assert_eq!(handle.pid(), None);
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn stop_kills_after_grace_period() {
        let spawner = Arc::new(ScriptedSpawner::new(vec![Script::Hang]).ignoring_sigterm());
        let supervisor =
            ProcessSupervisor::new(spawner.clone(), fast_policy(5), Duration::from_millis(20));
        let handle = supervisor.start("abc", test_plan());
        let mut rx = handle.subscribe();
        rx.wait_for(|s| *s == SupervisorState::Running).await.unwrap();

        handle.stop_and_wait().await.unwrap();
        assert!(spawner.killed.load(Ordering::SeqCst));
        assert_eq!(spawner.spawn_count(), 1);
    }

    #[tokio::test]
    async fn stop_during_backoff_prevents_respawn() {
        let spawner = Arc::new(ScriptedSpawner::new(vec![Script::Exit(1)]));
        let policy = RestartPolicy {
            max_restarts: 5,
            initial_backoff_ms: 60_000,
            max_backoff_ms: 60_000,
        };
        let supervisor = ProcessSupervisor::new(spawner.clone(), policy, Duration::from_millis(50));
        let handle = supervisor.start("abc", test_plan());
        let mut rx = handle.subscribe();
        rx.wait_for(|s| *s == SupervisorState::Exited(1)).await.unwrap();

        handle.stop();
        rx.wait_for(|s| s.is_terminal()).await.unwrap();
        assert_eq!(handle.state(), SupervisorState::Stopped);
        assert_eq!(spawner.spawn_count(), 1);
        assert_eq!(handle.restarts(), 0);
    }

    #[tokio::test]
    async fn console_commands_reach_the_running_server() {
        let spawner = Arc::new(ScriptedSpawner::new(vec![Script::Hang]));
        let supervisor =
            ProcessSupervisor::new(spawner.clone(), fast_policy(5), Duration::from_secs(5));
        let handle = supervisor.start("abc", test_plan());
        let mut rx = handle.subscribe();
        rx.wait_for(|s| *s == SupervisorState::Running).await.unwrap();

        handle.send_command("say hello").await.unwrap();
        for _ in 0..100 {
            if !spawner.commands.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*spawner.commands.lock().unwrap(), vec!["say hello".to_string()]);

        let logs: Vec<String> = handle.logs(10).into_iter().map(|l| l.text).collect();
        assert_eq!(logs, vec!["boot 1".to_string(), "> say hello".to_string()]);
        handle.stop_and_wait().await.unwrap();
    }

    #[tokio::test]
    async fn commands_are_refused_once_stopped() {
        let spawner = Arc::new(ScriptedSpawner::new(vec![Script::Exit(0)]));
        let supervisor =
            ProcessSupervisor::new(spawner, fast_policy(5), Duration::from_millis(50));
        let handle = supervisor.start("abc", test_plan());
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.is_terminal()).await.unwrap();
        assert!(handle.send_command("list").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn real_process_output_and_stdin() {
        use crate::core::provision::ServiceIdentity;
        use crate::core::supervisor::TokioSpawner;

        let dir = tempfile::tempdir().unwrap();
        // SAFETY: no preconditions.
        let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };
        let plan = LaunchPlan {
            program: "/bin/sh".into(),
            args: vec![
                "-c".into(),
                "echo ready; read line; echo \"got:$line\"; exit 0".into(),
            ],
            min_heap_mb: 1024,
            max_heap_mb: 2048,
            working_dir: dir.path().to_path_buf(),
            port: 25565,
            env: Default::default(),
            identity: ServiceIdentity {
                user: "self".into(),
                group: "self".into(),
                uid,
                gid,
            },
        };
        let supervisor =
            ProcessSupervisor::new(Arc::new(TokioSpawner), fast_policy(0), Duration::from_secs(5));
        let handle = supervisor.start("sh", plan);
        let mut rx = handle.subscribe();
        rx.wait_for(|s| *s == SupervisorState::Running).await.unwrap();
        handle.send_command("hello").await.unwrap();
        rx.wait_for(|s| s.is_terminal()).await.unwrap();
        assert_eq!(handle.state(), SupervisorState::Stopped);

        let mut seen = Vec::new();
        for _ in 0..200 {
            seen = handle.logs(10).into_iter().map(|l| l.text).collect::<Vec<_>>();
            if seen.iter().any(|l| l == "got:hello") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(seen.iter().any(|l| l == "ready"), "{seen:?}");
        assert!(seen.iter().any(|l| l == "got:hello"), "{seen:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_binary_is_launch_failed() {
        let mut plan = test_plan();
        plan.program = "/nonexistent/bin/java".into();
        plan.working_dir = std::env::temp_dir();
        // SAFETY: no preconditions.
        let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };
        plan.identity.uid = uid;
        plan.identity.gid = gid;
        let supervisor = ProcessSupervisor::new(
            Arc::new(crate::core::supervisor::TokioSpawner),
            fast_policy(3),
            Duration::from_secs(1),
        );
        let handle = supervisor.start("abc", plan);
        assert!(matches!(handle.wait().await, Err(LauncherError::LaunchFailed(_))));
    }
}
