//! Supervision of the dependent processes started during provisioning.
//!
//! A `ProcessHandle` moves through
//! `Starting → Ready → Stopping → Stopped`, or `Starting → Failed` when the
//! readiness window runs out. Only a successful `wait_ready` makes the process
//! usable; a spawned child may still be initializing.
//!
//! Children are placed in their own process group, so a signal aimed at the
//! orchestrator does not reach them, and stop/terminate signals reach the
//! whole group (e.g. a wrapper script and the daemon it launched).

use std::path::PathBuf;
use std::process::{Child, Stdio};
use std::str::FromStr;
use std::thread::sleep;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::os::unix::process::CommandExt;
use tracing::{debug, info, warn};

use crate::config::CommandLine;
use crate::error::{ProvisionError, Result};
use crate::runner::{self, describe_status};

/// How long a terminated child gets to exit before SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(10);
const TERMINATE_POLL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

/// Bounded polling window: `attempts` probes, `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_attempts() -> u32 {
    10
}

fn default_interval_ms() -> u64 {
    500
}

impl Readiness {
    pub const fn new(attempts: u32, interval_ms: u64) -> Self {
        Self {
            attempts,
            interval_ms,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Probes
// ---------------------------------------------------------------------------

/// A side-effect-free check that a dependent process is serving.
pub trait ReadinessProbe {
    fn check(&self) -> bool;
}

impl<F> ReadinessProbe for F
where
    F: Fn() -> bool,
{
    fn check(&self) -> bool {
        self()
    }
}

/// Ready when a command exits zero (e.g. `mysqladmin ping`).
#[derive(Debug, Clone)]
pub struct CommandProbe {
    command: CommandLine,
    args: Vec<String>,
}

impl CommandProbe {
    pub fn new(command: CommandLine) -> Self {
        Self {
            command,
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl ReadinessProbe for CommandProbe {
    fn check(&self) -> bool {
        match self.command.to_command() {
            Ok(mut cmd) => {
                cmd.args(&self.args);
                runner::succeeds(&mut cmd)
            }
            Err(e) => {
                debug!(probe = %self.command, error = %e, "probe unavailable");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessSpec
// ---------------------------------------------------------------------------

/// How a ready process is asked to shut down.
#[derive(Debug, Clone)]
pub enum StopMethod {
    /// Send this signal to the process group.
    Signal(Signal),
    /// Run an administrative command (e.g. `mysqladmin shutdown`).
    Command(CommandLine),
}

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub name: String,
    pub command: CommandLine,
    /// Appended after the command line's own arguments.
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub stop: StopMethod,
}

/// Accepts `SIGINT` or `INT`.
pub fn parse_signal(name: &str) -> Result<Signal> {
    let full = if name.starts_with("SIG") {
        name.to_string()
    } else {
        format!("SIG{name}")
    };
    Signal::from_str(&full).map_err(|_| ProvisionError::InvalidSignal(name.to_string()))
}

// ---------------------------------------------------------------------------
// ProcessHandle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Starting,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

pub struct ProcessHandle {
    name: String,
    child: Child,
    stop: StopMethod,
    state: ProcState,
}

impl ProcessHandle {
    /// Launch `spec` in a new process group. Does not wait for readiness.
    pub fn start(spec: &ProcessSpec) -> Result<Self> {
        let mut cmd = spec.command.to_command()?;
        cmd.args(&spec.args).stdin(Stdio::null()).process_group(0);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProvisionError::ToolNotFound(spec.command.program().to_string())
            } else {
                ProvisionError::Io(e)
            }
        })?;
        info!(name = %spec.name, pid = child.id(), "started");
        Ok(Self {
            name: spec.name.clone(),
            child,
            stop: spec.stop.clone(),
            state: ProcState::Starting,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn state(&self) -> ProcState {
        self.state
    }

    /// Poll `probe` until it passes or the window is exhausted.
    ///
    /// On exhaustion the process is terminated (and reaped) before
    /// `ReadinessTimeout` is returned. A child that exits while being polled
    /// fails immediately with `ProcessExited`; whatever it left behind in its
    /// process group is terminated first.
    pub fn wait_ready(&mut self, probe: &dyn ReadinessProbe, readiness: &Readiness) -> Result<()> {
        for attempt in 1..=readiness.attempts {
            if let Some(status) = self.child.try_wait()? {
                let status = describe_status(status);
                warn!(name = %self.name, %status, "exited before becoming ready");
                self.terminate();
                self.state = ProcState::Failed;
                return Err(ProvisionError::ProcessExited {
                    name: self.name.clone(),
                    status,
                });
            }
            if probe.check() {
                self.state = ProcState::Ready;
                info!(name = %self.name, attempt, "ready");
                return Ok(());
            }
            debug!(name = %self.name, attempt, "not ready yet");
            if attempt < readiness.attempts {
                sleep(readiness.interval());
            }
        }

        warn!(
            name = %self.name,
            attempts = readiness.attempts,
            "did not become ready; terminating"
        );
        self.terminate();
        self.state = ProcState::Failed;
        Err(ProvisionError::ReadinessTimeout {
            name: self.name.clone(),
            attempts: readiness.attempts,
        })
    }

    /// Ask the process to shut down gracefully and wait for it to exit.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if matches!(self.state, ProcState::Stopped | ProcState::Failed) {
            return Ok(());
        }
        self.state = ProcState::Stopping;
        info!(name = %self.name, "stopping");
        match &self.stop {
            StopMethod::Signal(sig) => self.signal_group(*sig)?,
            StopMethod::Command(line) => {
                let mut cmd = line.to_command()?;
                runner::run_checked(&mut cmd, &line.display_name())?;
            }
        }
        let status = self.child.wait()?;
        self.state = ProcState::Stopped;
        info!(name = %self.name, status = %describe_status(status), "stopped");
        Ok(())
    }

    /// SIGTERM the group, escalate to SIGKILL after the grace period, reap.
    ///
    /// Works on the group rather than the direct child: a wrapper that has
    /// already exited may have left its daemon behind, and the group id stays
    /// valid while any member remains.
    fn terminate(&mut self) {
        if let Err(e) = self.signal_group(Signal::SIGTERM) {
            warn!(name = %self.name, error = %e, "SIGTERM failed");
        }
        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            // Reap the leader first; a zombie still counts as a group member.
            let _ = self.child.try_wait();
            if !self.group_alive() {
                return;
            }
            sleep(TERMINATE_POLL);
        }
        warn!(name = %self.name, "still running after SIGTERM; killing");
        let _ = self.signal_group(Signal::SIGKILL);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn pgid(&self) -> Pid {
        #[allow(clippy::cast_possible_wrap)]
        Pid::from_raw(self.child.id() as i32)
    }

    fn group_alive(&self) -> bool {
        killpg(self.pgid(), None).is_ok()
    }

    fn signal_group(&self, sig: Signal) -> Result<()> {
        match killpg(self.pgid(), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(ProvisionError::Io(e.into())),
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        match self.state {
            ProcState::Starting | ProcState::Ready => {
                warn!(name = %self.name, "handle dropped while running; stopping");
                if let Err(e) = self.shutdown() {
                    warn!(name = %self.name, error = %e, "graceful stop failed; terminating");
                    self.terminate();
                }
            }
            ProcState::Stopping => self.terminate(),
            ProcState::Stopped | ProcState::Failed => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Scoped acquisition
// ---------------------------------------------------------------------------

/// Start `spec`, wait until ready, run `f`, then stop the process whatever
/// `f` returned. An error from `f` wins over an error from stopping.
pub fn supervised<T, F>(
    spec: &ProcessSpec,
    probe: &dyn ReadinessProbe,
    readiness: &Readiness,
    f: F,
) -> Result<T>
where
    F: FnOnce(&ProcessHandle) -> Result<T>,
{
    let mut handle = ProcessHandle::start(spec)?;
    handle.wait_ready(probe, readiness)?;
    let result = f(&handle);
    let stopped = handle.stop();
    match (result, stopped) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(stop_err)) => {
            warn!(name = %spec.name, error = %stop_err, "stop failed after earlier error");
            Err(e)
        }
    }
}
