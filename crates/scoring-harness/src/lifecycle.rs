//! Server-under-test process lifecycle.
//!
//! The server is spawned as the leader of a fresh process group so that a
//! single signal reaches every worker it forks. Teardown resolves the group
//! from the tracked pid and sends `SIGKILL` to all of it.
//!
//! ```text
//! NotStarted --start--> Running --stop--> Stopped
//! ```
//!
//! A stopped handle never runs again; starting anew produces a new handle.

use crate::config::{HarnessConfig, LaunchConfig, ReadinessProbe};
use crate::endpoint::ServerEndpoint;
use crate::error::{HarnessError, Result};
use crate::obs;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::debug;

/// Lifecycle state of a server-under-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Running,
    Stopped,
}

/// Exclusive owner of one running server process group.
///
/// Not `Clone`. Dropping a handle that is still running kills the group
/// without waiting for the drain delay; call [`ServerHandle::stop`] to get
/// the full teardown.
#[derive(Debug)]
pub struct ServerHandle {
    child: Child,
    pid: u32,
    endpoint: ServerEndpoint,
    state: ServerState,
    drain: Duration,
}

impl ServerHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ServerState::Running
    }

    /// Exit status of the direct child, if it has already exited.
    pub fn try_exit_status(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Kill the whole process group, reap the child and wait for the drain
    /// delay. Calling it again after the first time is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state == ServerState::Stopped {
            return Ok(());
        }

        let pgid = match self.kill_group() {
            Ok(pgid) => pgid,
            Err(e) => {
                self.kill_child_only(&e);
                None
            }
        };

        if let Err(e) = self.child.wait().await {
            obs::emit_teardown_error(self.pid, &e);
        }
        self.state = ServerState::Stopped;

        if !self.drain.is_zero() {
            tokio::time::sleep(self.drain).await;
        }
        obs::emit_server_stopped(self.pid, pgid, self.drain.as_millis() as u64);
        Ok(())
    }

    /// Fallback when the group could not be signalled: kill the direct child
    /// so the following reap cannot block.
    fn kill_child_only(&mut self, group_error: &std::io::Error) {
        obs::emit_teardown_error(self.pid, group_error);
        if let Err(e) = self.child.start_kill() {
            obs::emit_teardown_error(self.pid, &e);
        }
    }

    /// Send `SIGKILL` to the server's process group.
    ///
    /// Returns the group id that was signalled, or `None` when the group had
    /// already vanished.
    #[cfg(unix)]
    fn kill_group(&mut self) -> std::io::Result<Option<i32>> {
        let pid = self.pid as libc::pid_t;

        // Once the direct child is reaped its pid no longer resolves, but the
        // group it led keeps its id while any member is alive.
        let pgid = if self.child.id().is_some() {
            // SAFETY: getpgid only reads kernel process state.
            match unsafe { libc::getpgid(pid) } {
                -1 => pid,
                pgid => pgid,
            }
        } else {
            pid
        };

        // SAFETY: getpgrp only reads kernel process state.
        if pgid == unsafe { libc::getpgrp() } {
            debug!(pid = pid, "server shares our process group; killing child only");
            self.child.start_kill()?;
            return Ok(None);
        }

        // SAFETY: killpg only delivers a signal.
        if unsafe { libc::killpg(pgid, libc::SIGKILL) } == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(None);
            }
            return Err(err);
        }
        Ok(Some(pgid))
    }

    #[cfg(not(unix))]
    fn kill_group(&mut self) -> std::io::Result<Option<i32>> {
        match self.child.start_kill() {
            Ok(()) => Ok(Some(self.pid as i32)),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.state == ServerState::Running {
            if let Err(e) = self.kill_group() {
                obs::emit_teardown_error(self.pid, &e);
            }
            self.state = ServerState::Stopped;
        }
    }
}

/// Spawns servers-under-test and waits for them to become ready.
#[derive(Debug, Clone)]
pub struct ServerLauncher {
    launch: LaunchConfig,
    readiness: ReadinessProbe,
    drain: Duration,
}

impl ServerLauncher {
    pub fn new(launch: LaunchConfig, readiness: ReadinessProbe, drain: Duration) -> Self {
        Self {
            launch,
            readiness,
            drain,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.launch.clone(), config.readiness, config.drain())
    }

    /// Spawn the server and block until the readiness probe passes.
    ///
    /// If readiness fails the process group is torn down before the error
    /// is returned.
    pub async fn start(
        &self,
        model: Option<&Path>,
        endpoint: &ServerEndpoint,
    ) -> Result<ServerHandle> {
        let mut handle = self.spawn(model, endpoint)?;
        if let Err(e) = wait_ready(&mut handle, self.readiness).await {
            handle.stop().await?;
            return Err(e);
        }
        Ok(handle)
    }

    /// Spawn the server into its own process group without waiting.
    pub fn spawn(&self, model: Option<&Path>, endpoint: &ServerEndpoint) -> Result<ServerHandle> {
        let program = self.launch.resolved_program();
        let args = self.launch.command_args(model, endpoint);

        let mut command = Command::new(&program);
        command.args(&args).stdin(Stdio::null()).kill_on_drop(true);
        if let Some(dir) = &self.launch.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        debug!(program = %program.display(), args = ?args, "spawning server");

        let child = command.spawn().map_err(|source| HarnessError::Launch {
            program: program.display().to_string(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| HarnessError::Launch {
            program: program.display().to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::Other,
                "child exited before its pid was read",
            ),
        })?;

        obs::emit_server_launched(pid, &program.display().to_string(), &endpoint.to_string());

        Ok(ServerHandle {
            child,
            pid,
            endpoint: endpoint.clone(),
            state: ServerState::Running,
            drain: self.drain,
        })
    }
}

/// Block until `handle`'s endpoint accepts connections, per `probe`.
pub async fn wait_ready(handle: &mut ServerHandle, probe: ReadinessProbe) -> Result<()> {
    let start = Instant::now();

    match probe {
        ReadinessProbe::FixedDelay { delay_ms } => {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            check_not_failed(handle)?;
        }
        ReadinessProbe::TcpConnect {
            timeout_ms,
            interval_ms,
        } => {
            let timeout = Duration::from_millis(timeout_ms);
            let interval = Duration::from_millis(interval_ms.max(1));
            let addr = (handle.endpoint.host().to_string(), handle.endpoint.port());

            loop {
                check_not_failed(handle)?;

                match tokio::time::timeout(interval, TcpStream::connect(addr.clone())).await {
                    Ok(Ok(_)) => break,
                    Ok(Err(e)) => debug!(endpoint = %handle.endpoint, error = %e, "not ready yet"),
                    Err(_) => debug!(endpoint = %handle.endpoint, "connect attempt timed out"),
                }

                if start.elapsed() >= timeout {
                    return Err(HarnessError::NotReady {
                        endpoint: handle.endpoint.clone(),
                        waited_ms: start.elapsed().as_millis() as u64,
                    });
                }
                tokio::time::sleep(interval).await;
            }
        }
    }

    obs::emit_server_ready(
        &handle.endpoint.to_string(),
        start.elapsed().as_millis() as u64,
    );
    Ok(())
}

/// A launcher script may exit 0 after backgrounding the real server inside
/// the same group, so only a failed exit counts.
fn check_not_failed(handle: &mut ServerHandle) -> Result<()> {
    match handle.try_exit_status()? {
        Some(status) if !status.success() => Err(HarnessError::ServerExited {
            status: status.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Holds at most one live [`ServerHandle`].
#[derive(Debug, Default)]
pub struct ServerSlot {
    handle: Option<ServerHandle>,
}

impl ServerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ServerState {
        self.handle
            .as_ref()
            .map(ServerHandle::state)
            .unwrap_or(ServerState::NotStarted)
    }

    pub fn handle(&self) -> Option<&ServerHandle> {
        self.handle.as_ref()
    }

    /// Start a server, refusing while a previous one is still running.
    pub async fn start(
        &mut self,
        launcher: &ServerLauncher,
        model: Option<&Path>,
        endpoint: &ServerEndpoint,
    ) -> Result<&mut ServerHandle> {
        if let Some(existing) = &self.handle {
            if existing.is_running() {
                return Err(HarnessError::AlreadyRunning(existing.endpoint.clone()));
            }
        }
        let handle = launcher.start(model, endpoint).await?;
        Ok(self.handle.insert(handle))
    }

    /// Stop the held server, if any. Idempotent.
    pub async fn stop(&mut self) -> Result<()> {
        match self.handle.as_mut() {
            Some(handle) => handle.stop().await,
            None => Ok(()),
        }
    }
}
