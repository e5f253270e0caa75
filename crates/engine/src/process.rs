//! Host process plumbing: interpreter selection, spawning with a merged
//! output stream, liveness checks, and terminate-then-kill escalation.
//!
//! On POSIX hosts every child leads its own process group so that signals
//! reach whatever the command line started (pipelines, subshells), not just
//! the interpreter.

use std::io::PipeReader;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{EngineError, EngineResult};

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

/// The host command interpreter a command line is handed to.
///
/// The command line is appended as the final argument, e.g. `sh -c <line>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    program: String,
    args: Vec<String>,
}

impl Interpreter {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// PowerShell on Windows hosts, `sh -c` everywhere else.
    pub fn host() -> Self {
        if cfg!(windows) {
            Self::powershell()
        } else {
            Self::posix_shell()
        }
    }

    pub fn posix_shell() -> Self {
        Self::new("sh", ["-c"])
    }

    pub fn powershell() -> Self {
        Self::new(
            "powershell.exe",
            ["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command"],
        )
    }

    pub fn cmd() -> Self {
        Self::new("cmd.exe", ["/c"])
    }

    /// Parse a whitespace-separated override such as `"bash -c"`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn command_for(&self, line: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(line);
        cmd
    }
}

// ---------------------------------------------------------------------------
// ChildProcess
// ---------------------------------------------------------------------------

/// How a termination request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had already exited when the request arrived.
    AlreadyExited,
    /// The process exited within the grace period after the terminate request.
    Graceful,
    /// The grace period elapsed and the process was killed.
    Forced,
}

/// A spawned child shared between the sequencer (waiting for exit) and a
/// concurrent `stop()` (terminating it).
///
/// The `Child` sits behind a mutex that is only held for non-blocking calls,
/// so waiting never locks out a termination request.
#[derive(Debug)]
pub struct ChildProcess {
    child: Mutex<Child>,
    pid: u32,
}

impl ChildProcess {
    /// Spawn `line` through `interpreter` in `working_dir`.
    ///
    /// stdout and stderr share the write end of one pipe, so the returned
    /// reader yields both in the order the child wrote them.
    pub fn spawn(
        interpreter: &Interpreter,
        line: &str,
        working_dir: &Path,
    ) -> EngineResult<(Self, PipeReader)> {
        if !working_dir.is_dir() {
            return Err(EngineError::WorkingDirectory(working_dir.to_path_buf()));
        }

        let (reader, writer) = std::io::pipe()?;
        let error_writer = writer.try_clone()?;

        // `cmd` owns the parent's copies of the write end; it is dropped when
        // this function returns so the reader sees EOF once the child exits.
        let mut cmd = interpreter.command_for(line);
        cmd.current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(error_writer));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|source| EngineError::Spawn {
            program: interpreter.program.clone(),
            source,
        })?;
        let pid = child.id();

        Ok((
            Self {
                child: Mutex::new(child),
                pid,
            },
            reader,
        ))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit status if the process has exited, without blocking.
    pub fn try_wait(&self) -> std::io::Result<Option<ExitStatus>> {
        self.lock().try_wait()
    }

    pub fn is_alive(&self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Ask the process to exit, wait up to `grace`, then kill it.
    pub fn terminate(&self, grace: Duration, poll: Duration) -> Termination {
        if !self.is_alive() {
            return Termination::AlreadyExited;
        }

        self.request_exit();
        if self.wait_until_exit(grace, poll) {
            return Termination::Graceful;
        }

        tracing::warn!(
            pid = self.pid,
            grace_ms = grace.as_millis() as u64,
            "Process ignored terminate request, killing",
        );
        self.kill();
        if !self.wait_until_exit(grace, poll) {
            tracing::warn!(pid = self.pid, "Process still present after kill");
        }
        Termination::Forced
    }

    /// Send the graceful termination request.
    fn request_exit(&self) {
        // Hold the lock so the child cannot be reaped (and its pid reused)
        // between the liveness check and the signal.
        let mut child = self.lock();
        if !matches!(child.try_wait(), Ok(None)) {
            return;
        }

        #[cfg(unix)]
        {
            // SAFETY: plain syscall on a process group id we own; no memory is shared.
            let rc = unsafe { libc::kill(-(self.pid as libc::pid_t), libc::SIGTERM) };
            if rc != 0 {
                tracing::debug!(pid = self.pid, error = %std::io::Error::last_os_error(), "SIGTERM to process group failed");
            }
        }

        #[cfg(windows)]
        {
            let status = Command::new("taskkill")
                .args(["/PID", &self.pid.to_string(), "/T"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if let Err(e) = status {
                tracing::debug!(pid = self.pid, error = %e, "taskkill /T failed");
            }
        }

        #[cfg(not(any(unix, windows)))]
        {
            let _ = child.kill();
        }
    }

    fn kill(&self) {
        let mut child = self.lock();
        if !matches!(child.try_wait(), Ok(None)) {
            return;
        }

        #[cfg(unix)]
        {
            // SAFETY: see `request_exit`.
            unsafe {
                libc::kill(-(self.pid as libc::pid_t), libc::SIGKILL);
            }
        }

        #[cfg(windows)]
        {
            let status = Command::new("taskkill")
                .args(["/PID", &self.pid.to_string(), "/T", "/F"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if let Err(e) = status {
                tracing::debug!(pid = self.pid, error = %e, "taskkill /F failed");
            }
        }

        if let Err(e) = child.kill() {
            tracing::debug!(pid = self.pid, error = %e, "Kill after group signal failed");
        }
    }

    /// Poll until the process exits or `limit` elapses. Returns `true` on exit.
    fn wait_until_exit(&self, limit: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(poll);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exit code reported for a finished child; `-1` when ended by a signal.
pub fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
