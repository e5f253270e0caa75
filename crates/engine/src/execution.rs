//! The per-script state machine.
//!
//! A [`ScriptExecution`] runs the commands of one [`ScriptEntry`] in order on
//! the calling thread, writing trace lines and command output into its
//! [`StreamBuffer`]. [`ScriptExecution::stop`] may be called from any thread:
//! it prevents further commands from starting and terminates the running one.
//!
//! Commands run as a best-effort batch. A non-zero exit code is reported and
//! the next command starts anyway; only faults such as a missing working
//! directory or interpreter abort the sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use eashell_core::execution::{CommandResult, ExecutionState};
use eashell_core::script::ScriptEntry;
use eashell_events::bus::{EventBus, StatusEvent};
use uuid::Uuid;

use crate::buffer::StreamBuffer;
use crate::command::CommandExecution;
use crate::config::ExecutionSettings;
use crate::error::EngineResult;
use crate::process::ChildProcess;

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// One run of a script.
pub struct ScriptExecution {
    id: Uuid,
    entry: ScriptEntry,
    buffer: Arc<StreamBuffer>,
    settings: ExecutionSettings,
    events: Arc<EventBus>,
    /// Cleared by `stop()`; read by the sequencer and the output reader.
    active: Arc<AtomicBool>,
    stop_requested: AtomicBool,
    current: Mutex<Option<Arc<ChildProcess>>>,
    state: Mutex<ExecutionState>,
    state_changed: Condvar,
    results: Mutex<Vec<CommandResult>>,
    /// Runs once, just before the terminal state is published.
    on_release: Mutex<Option<ReleaseHook>>,
}

impl ScriptExecution {
    pub fn new(
        entry: ScriptEntry,
        buffer: Arc<StreamBuffer>,
        settings: ExecutionSettings,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            entry,
            buffer,
            settings,
            events,
            active: Arc::new(AtomicBool::new(true)),
            stop_requested: AtomicBool::new(false),
            current: Mutex::new(None),
            state: Mutex::new(ExecutionState::Idle),
            state_changed: Condvar::new(),
            results: Mutex::new(Vec::new()),
            on_release: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        self.entry.name()
    }

    pub fn entry(&self) -> &ScriptEntry {
        &self.entry
    }

    pub fn state(&self) -> ExecutionState {
        *lock(&self.state)
    }

    /// `true` until the execution reaches a terminal state or is asked to stop.
    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.state().is_terminal()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Results of the commands that have finished so far.
    pub fn results(&self) -> Vec<CommandResult> {
        lock(&self.results).clone()
    }

    /// Block until a terminal state is reached or `timeout` elapses.
    pub fn wait_for_terminal(&self, timeout: Duration) -> Option<ExecutionState> {
        let guard = lock(&self.state);
        let (guard, _) = self
            .state_changed
            .wait_timeout_while(guard, timeout, |state| !state.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        guard.is_terminal().then_some(*guard)
    }

    /// Register the callback that frees this execution's registry slot.
    pub(crate) fn set_release_hook(&self, hook: ReleaseHook) {
        *lock(&self.on_release) = Some(hook);
    }

    /// Run every command in order on the calling thread.
    ///
    /// Returns the terminal state. Calling `run` on an execution that already
    /// ran is a no-op returning its current state.
    pub fn run(&self) -> ExecutionState {
        {
            let mut state = lock(&self.state);
            if *state != ExecutionState::Idle {
                tracing::warn!(script = %self.name(), state = %*state, "Execution already started");
                return *state;
            }
            *state = ExecutionState::Running;
        }
        self.publish(ExecutionState::Running);

        let span = tracing::info_span!("script", name = %self.name(), execution_id = %self.id);
        let _enter = span.enter();
        tracing::info!(commands = self.entry.commands().len(), "Script started");

        let outcome = self.run_commands();
        let terminal = match outcome {
            Ok(()) if self.stop_requested() => {
                self.buffer.append("\n>>> Process terminated by user.\n");
                tracing::info!("Script terminated by user");
                ExecutionState::Terminated
            }
            Ok(()) => {
                self.buffer.append(">>> All commands completed.\n");
                tracing::info!("Script completed");
                ExecutionState::Succeeded
            }
            Err(e) if self.stop_requested() => {
                tracing::debug!(error = %e, "Fault after stop request, reporting termination");
                self.buffer.append("\n>>> Process terminated by user.\n");
                ExecutionState::Terminated
            }
            Err(e) => {
                self.buffer.append(&format!("\n>>> ERROR: {e}\n"));
                tracing::error!(error = %e, "Script failed");
                ExecutionState::Failed
            }
        };
        self.buffer.flush();
        self.finish(terminal);
        terminal
    }

    fn run_commands(&self) -> EngineResult<()> {
        for command in self.entry.commands() {
            let running = {
                let mut current = lock(&self.current);
                // Checked under the slot lock: a concurrent stop either sees the
                // child stored below or its flag is seen here.
                if self.stop_requested() {
                    break;
                }
                self.buffer.append(&format!(">>> Executing: {command}\n"));
                tracing::info!(command = %command, "Executing command");

                let running = CommandExecution::new(command, self.entry.working_dir(), &self.settings)
                    .spawn(Arc::clone(&self.buffer), Arc::clone(&self.active))?;
                *current = Some(running.process());
                running
            };

            let result = running.wait(&self.settings);
            *lock(&self.current) = None;
            let result = result?;

            self.buffer
                .append(&format!("\n>>> Exit code: {}\n\n", result.exit_code));
            if !result.success() {
                tracing::warn!(command = %command, exit_code = result.exit_code, "Command exited non-zero, continuing");
            }
            lock(&self.results).push(result);

            if self.stop_requested() {
                break;
            }
        }
        Ok(())
    }

    /// Ask the execution to end.
    ///
    /// No further command starts. A live child gets a terminate request and,
    /// if still alive after the stop timeout, is killed; this call returns
    /// once it is gone. Repeated calls are no-ops.
    pub fn stop(&self) {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        self.active.store(false, Ordering::SeqCst);
        tracing::info!(script = %self.name(), execution_id = %self.id, "Stop requested");

        let child = lock(&self.current).clone();
        if let Some(child) = child {
            let outcome = child.terminate(self.settings.stop_timeout, self.settings.exit_poll_interval);
            tracing::info!(script = %self.name(), pid = child.pid(), ?outcome, "Process stopped");
            self.buffer.flush();
        }
    }

    fn finish(&self, terminal: ExecutionState) {
        self.active.store(false, Ordering::SeqCst);
        let release = lock(&self.on_release).take();
        if let Some(release) = release {
            release();
        }
        *lock(&self.state) = terminal;
        self.state_changed.notify_all();
        self.publish(terminal);
    }

    fn publish(&self, state: ExecutionState) {
        self.events
            .publish(StatusEvent::new(self.name(), self.id, state));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
