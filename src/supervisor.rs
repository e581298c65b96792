//! # Server Process Supervision
//!
//! Spawns the server under test and decides whether it started. The decision
//! is purely timing based: a process still alive after the grace period is
//! considered running. An early exit is most often caused by the previous
//! run's socket still sitting in the TCP teardown window, so the supervisor
//! waits out that window and tries exactly once more.
//!
//! ```text
//! Spawning -> Grace -> Running
//!               |
//!               v (exited, first attempt)
//!        SuspectStalePort -> Spawning -> Grace -> Running
//!                                          |
//!                                          v (exited again)
//!                                        Failed
//! ```

use crate::error::{describe_status, HarnessError, HarnessResult};
use crate::fin_timeout::{FinTimeoutResolver, TeardownTimeout};
use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Startup states of a supervised server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartupState {
    Spawning,
    Grace,
    SuspectStalePort,
    Running,
    Failed,
}

/// A startup state together with the process it concerns.
enum Phase {
    Spawning,
    Grace(ServerProcessHandle),
    SuspectStalePort(ServerProcessHandle),
    Running(ServerProcessHandle),
    Failed(ServerProcessHandle),
}

impl Phase {
    fn state(&self) -> StartupState {
        match self {
            Phase::Spawning => StartupState::Spawning,
            Phase::Grace(_) => StartupState::Grace,
            Phase::SuspectStalePort(_) => StartupState::SuspectStalePort,
            Phase::Running(_) => StartupState::Running,
            Phase::Failed(_) => StartupState::Failed,
        }
    }
}

/// Handle to one spawned server instance.
///
/// Liveness is re-queried from the OS on every call. The child is killed if
/// the handle is dropped without an explicit shutdown.
///
/// Only stderr is captured, for startup diagnostics. Stdout goes to the null
/// device: nothing reads it while the server runs, and an unread pipe would
/// stall a server that logs to stdout once the pipe buffer fills.
#[derive(Debug)]
pub struct ServerProcessHandle {
    program: String,
    pid: Option<u32>,
    child: Child,
    exit_status: Option<ExitStatus>,
}

impl ServerProcessHandle {
    fn new(program: String, child: Child) -> Self {
        Self {
            program,
            pid: child.id(),
            child,
            exit_status: None,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Query the OS for whether the process is still running.
    pub fn is_alive(&mut self) -> HarnessResult<bool> {
        if self.exit_status.is_some() {
            return Ok(false);
        }
        match self.child.try_wait()? {
            Some(status) => {
                debug!("Server {} (pid {:?}) exited: {}", self.program, self.pid, status);
                self.exit_status = Some(status);
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Exit status, if the process has been observed to exit.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Send a termination request without waiting for the process to exit.
    ///
    /// Calling this on a process that already exited is a no-op.
    pub fn terminate(&mut self) -> HarnessResult<()> {
        if !self.is_alive()? {
            return Ok(());
        }
        let Some(pid) = self.pid else {
            return Ok(());
        };
        debug!("Sending SIGTERM to {} (pid {})", self.program, pid);
        send_terminate(pid, &mut self.child)
    }

    /// Terminate, wait up to `grace` for the exit, then kill and reap.
    pub async fn shutdown(&mut self, grace: Duration) -> HarnessResult<()> {
        self.terminate()?;
        if self.exit_status.is_some() {
            return Ok(());
        }
        match timeout(grace, self.child.wait()).await {
            Ok(status) => {
                self.exit_status = Some(status?);
            }
            Err(_) => {
                warn!(
                    "Server {} (pid {:?}) ignored SIGTERM for {:?}; killing",
                    self.program, self.pid, grace
                );
                self.child.kill().await?;
                self.exit_status = self.child.try_wait()?;
            }
        }
        debug!(
            "Server {} stopped: {}",
            self.program,
            describe_status(self.exit_status)
        );
        Ok(())
    }

    /// Drain whatever the process wrote to stderr. Only meaningful once it exited.
    pub async fn take_stderr(&mut self) -> String {
        let Some(mut stderr) = self.child.stderr.take() else {
            return String::new();
        };
        let mut buf = Vec::new();
        // An exited process has closed its end; bound the read anyway in case
        // a grandchild inherited the pipe.
        let _ = timeout(Duration::from_millis(500), stderr.read_to_end(&mut buf)).await;
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[cfg(unix)]
fn send_terminate(pid: u32, _child: &mut Child) -> HarnessResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        // Exited between the liveness check and the signal.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(HarnessError::Io(std::io::Error::from(e))),
    }
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32, child: &mut Child) -> HarnessResult<()> {
    child.start_kill().map_err(HarnessError::Io)
}

/// Timing parameters for [`ProcessSupervisor`].
#[derive(Clone)]
pub struct SupervisorConfig {
    pub grace_period: Duration,
    pub teardown: Arc<dyn TeardownTimeout>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period: crate::defaults::GRACE_PERIOD,
            teardown: Arc::new(FinTimeoutResolver::new()),
        }
    }
}

impl std::fmt::Debug for SupervisorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorConfig")
            .field("grace_period", &self.grace_period)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    config: SupervisorConfig,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    /// Spawn `program` and drive it through the startup state machine.
    ///
    /// Returns a running handle, or [`HarnessError::StartupFailure`] when the
    /// process exited during both grace periods. A teardown timeout that
    /// cannot be resolved is returned as-is.
    pub async fn start<I, S>(&self, program: &str, args: I) -> HarnessResult<ServerProcessHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let mut phase = Phase::Spawning;
        let mut retried = false;

        loop {
            debug!("Supervisor state for {}: {:?}", program, phase.state());
            phase = match phase {
                Phase::Spawning => Phase::Grace(self.spawn(program, &args)?),
                Phase::Grace(mut handle) => {
                    sleep(self.config.grace_period).await;
                    if handle.is_alive()? {
                        Phase::Running(handle)
                    } else if retried {
                        Phase::Failed(handle)
                    } else {
                        Phase::SuspectStalePort(handle)
                    }
                }
                Phase::SuspectStalePort(mut exited) => {
                    let stderr = exited.take_stderr().await;
                    log_early_exit(&exited, &stderr);

                    let wait = self.config.teardown.teardown_timeout()?;
                    info!(
                        "Waiting {:?} for the TCP teardown window before restarting {}",
                        wait, program
                    );
                    sleep(wait).await;
                    retried = true;
                    Phase::Spawning
                }
                Phase::Running(handle) => {
                    info!("Server {} running (pid {:?})", program, handle.pid());
                    return Ok(handle);
                }
                Phase::Failed(mut handle) => {
                    let stderr = handle.take_stderr().await;
                    log_early_exit(&handle, &stderr);
                    return Err(HarnessError::StartupFailure {
                        program: program.to_string(),
                        status: describe_status(handle.exit_status()),
                        stderr,
                    });
                }
            };
        }
    }

    fn spawn(&self, program: &str, args: &[OsString]) -> HarnessResult<ServerProcessHandle> {
        debug!("Spawning server: {} {:?}", program, args);
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| HarnessError::Spawn {
            program: program.to_string(),
            source,
        })?;
        Ok(ServerProcessHandle::new(program.to_string(), child))
    }
}

/// Words a bind failure usually contains in a server's stderr.
const STALE_PORT_HINTS: [&str; 3] = ["address already in use", "eaddrinuse", "bind"];

fn looks_like_stale_port(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    STALE_PORT_HINTS.iter().any(|hint| lower.contains(hint))
}

fn log_early_exit(handle: &ServerProcessHandle, stderr: &str) {
    let status = describe_status(handle.exit_status());
    if looks_like_stale_port(stderr) {
        warn!(
            "Server {} exited during grace period ({}); stderr points at a busy port: {}",
            handle.program(),
            status,
            stderr.trim()
        );
    } else {
        warn!(
            "Server {} exited during grace period ({}): {}",
            handle.program(),
            status,
            stderr.trim()
        );
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn quick_supervisor() -> ProcessSupervisor {
        ProcessSupervisor::new(SupervisorConfig {
            grace_period: Duration::from_millis(300),
            teardown: Arc::new(Duration::from_millis(50)),
        })
    }

    struct Unavailable;

    impl TeardownTimeout for Unavailable {
        fn teardown_timeout(&self) -> HarnessResult<Duration> {
            Err(HarnessError::ConfigUnavailable {
                path: "/nonexistent".into(),
                reason: "test".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_long_running_process_reaches_running() {
        let supervisor = quick_supervisor();
        let mut handle = supervisor.start("sh", ["-c", "sleep 30"]).await.unwrap();

        assert!(handle.pid().is_some());
        assert!(handle.is_alive().unwrap());

        handle.shutdown(Duration::from_secs(2)).await.unwrap();
        assert!(!handle.is_alive().unwrap());
    }

    #[tokio::test]
    async fn test_always_exiting_process_fails_after_one_retry() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("spawns");
        let script = format!(
            "echo x >> {}; echo 'bind: Address already in use' >&2; exit 3",
            counter.display()
        );

        let err = quick_supervisor()
            .start("sh", ["-c", script.as_str()])
            .await
            .unwrap_err();

        match err {
            HarnessError::StartupFailure { status, stderr, .. } => {
                assert!(status.contains('3'), "status was {}", status);
                assert!(stderr.contains("Address already in use"));
            }
            other => panic!("expected StartupFailure, got {:?}", other),
        }
        let spawns = std::fs::read_to_string(&counter).unwrap();
        assert_eq!(spawns.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_retry_after_stale_port_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("first-run");
        let script = format!(
            "if [ -f {m} ]; then exec sleep 30; else touch {m}; exit 1; fi",
            m = marker.display()
        );

        let mut handle = quick_supervisor()
            .start("sh", ["-c", script.as_str()])
            .await
            .unwrap();
        assert!(handle.is_alive().unwrap());
        assert!(marker.exists());
        handle.shutdown(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unavailable_teardown_timeout_propagates() {
        let supervisor = ProcessSupervisor::new(SupervisorConfig {
            grace_period: Duration::from_millis(100),
            teardown: Arc::new(Unavailable),
        });

        let err = supervisor.start("sh", ["-c", "exit 1"]).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_server_flooding_stdout_keeps_running() {
        // Well past a pipe buffer; the write must not block the server.
        let script = "head -c 1048576 /dev/zero; exec sleep 30";
        let mut handle = quick_supervisor().start("sh", ["-c", script]).await.unwrap();

        assert!(handle.is_alive().unwrap());
        handle.shutdown(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let err = quick_supervisor()
            .start("/nonexistent/server-binary", Vec::<String>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let mut handle = quick_supervisor().start("sh", ["-c", "sleep 30"]).await.unwrap();

        handle.terminate().unwrap();
        handle.shutdown(Duration::from_secs(2)).await.unwrap();
        handle.terminate().unwrap();
        handle.terminate().unwrap();
        assert!(!handle.is_alive().unwrap());
        assert!(handle.exit_status().is_some());
    }

    #[test]
    fn test_stale_port_hints() {
        assert!(looks_like_stale_port(
            "Failed to bind the socket: Address already in use"
        ));
        assert!(looks_like_stale_port("EADDRINUSE"));
        assert!(!looks_like_stale_port("segmentation fault"));
        assert!(!looks_like_stale_port(""));
    }
}
