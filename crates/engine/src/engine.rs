//! The engine facade: admits scripts, runs them on the worker pool, and
//! shuts everything down.

use std::sync::Arc;

use eashell_core::execution::ExecutionState;
use eashell_core::script::ScriptEntry;
use eashell_events::bus::{EventBus, StatusEvent};
use tokio::sync::broadcast;

use crate::buffer::StreamBuffer;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::execution::ScriptExecution;
use crate::pool::WorkerPool;
use crate::registry::{ExecutionRegistry, StartOutcome};
use crate::sink::SharedSink;

/// Runs scripts in the background, one live execution per script name.
///
/// # Usage
///
/// ```rust,no_run
/// use eashell_core::script::ScriptEntry;
/// use eashell_engine::config::EngineConfig;
/// use eashell_engine::engine::Engine;
/// use eashell_engine::registry::StartOutcome;
/// use eashell_engine::sink::OutputWindow;
///
/// let engine = Engine::new(EngineConfig::from_env())?;
/// let window = OutputWindow::shared();
/// let entry = ScriptEntry::new("build", "/srv/app", ["cargo build", "cargo test"]);
///
/// match engine.start(entry, window.clone())? {
///     StartOutcome::Started(execution) => println!("started run {}", execution.id()),
///     StartOutcome::AlreadyRunning => println!("build is already running"),
/// }
///
/// engine.shutdown();
/// # Ok::<(), eashell_engine::error::EngineError>(())
/// ```
pub struct Engine {
    config: EngineConfig,
    registry: ExecutionRegistry,
    pool: WorkerPool,
    events: Arc<EventBus>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let pool = WorkerPool::new(config.max_workers)?;
        tracing::info!(
            interpreter = %config.execution.interpreter.program(),
            max_workers = ?config.max_workers,
            "Engine started",
        );
        Ok(Self {
            config,
            registry: ExecutionRegistry::new(),
            pool,
            events: Arc::new(EventBus::default()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start `entry` in the background, streaming its output into `sink`.
    ///
    /// Returns [`StartOutcome::AlreadyRunning`] without side effects if the
    /// script has a live execution. Fails if the entry is invalid or the
    /// engine is shutting down.
    pub fn start(&self, entry: ScriptEntry, sink: SharedSink) -> EngineResult<StartOutcome> {
        entry.check()?;

        let buffer = Arc::new(StreamBuffer::new(sink, self.config.flush.clone()));
        let execution = Arc::new(ScriptExecution::new(
            entry,
            buffer,
            self.config.execution.clone(),
            Arc::clone(&self.events),
        ));

        let outcome = self.registry.try_start(Arc::clone(&execution));
        if let StartOutcome::Started(_) = outcome {
            let job = Arc::clone(&execution);
            let submitted = self.pool.submit(move |cancel| {
                if cancel.is_cancelled() {
                    job.stop();
                }
                job.run();
            });
            if let Err(e) = submitted {
                self.registry.release(&execution);
                return Err(e);
            }
            tracing::info!(script = %execution.name(), execution_id = %execution.id(), "Script queued");
        }
        Ok(outcome)
    }

    /// Stop the live execution of `name`, if any.
    ///
    /// Frees the name at once, so the script can be started again while the
    /// stopped run is still writing its final trace line. A restart must be
    /// given its own sink; sharing the old one interleaves both runs' output.
    pub fn stop(&self, name: &str) -> bool {
        let Some(execution) = self.registry.get(name) else {
            return false;
        };
        execution.stop();
        self.registry.release(&execution);
        true
    }

    pub fn stop_all(&self) -> usize {
        self.registry.stop_all()
    }

    pub fn running_count(&self) -> usize {
        self.registry.count()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.registry.is_running(name)
    }

    /// State of the live execution of `name`; `None` when nothing is live.
    pub fn status(&self, name: &str) -> Option<ExecutionState> {
        self.registry.get(name).map(|execution| execution.state())
    }

    pub fn execution(&self, name: &str) -> Option<Arc<ScriptExecution>> {
        self.registry.get(name)
    }

    pub fn running_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Receive every status transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// Stop every script, refuse new ones, and wait up to the configured
    /// shutdown timeout for the workers.
    ///
    /// Returns `true` if all workers finished in time. Blocking; do not call
    /// from inside an async context.
    pub fn shutdown(&self) -> bool {
        let stopped = self.registry.stop_all();
        self.pool.close();
        // Anything admitted between the first sweep and the close.
        let late = self.registry.stop_all();
        let drained = self.pool.drain(self.config.shutdown_timeout);
        tracing::info!(stopped = stopped + late, drained, "Engine shut down");
        drained
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
