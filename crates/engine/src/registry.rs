//! Index of live executions, at most one per script name.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use uuid::Uuid;

use crate::execution::ScriptExecution;

type Index = RwLock<HashMap<String, Arc<ScriptExecution>>>;

/// Result of asking the registry to admit an execution.
#[must_use]
#[derive(Clone)]
pub enum StartOutcome {
    /// The execution now owns the name's slot.
    Started(Arc<ScriptExecution>),
    /// Another execution of the same script is still live; nothing changed.
    AlreadyRunning,
}

impl std::fmt::Debug for StartOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started(execution) => f
                .debug_tuple("Started")
                .field(&execution.name())
                .finish(),
            Self::AlreadyRunning => f.write_str("AlreadyRunning"),
        }
    }
}

/// Concurrent map from script name to its live [`ScriptExecution`].
///
/// Thread-safe via interior `RwLock`; shared through `Arc` between the
/// engine and the executions, which release their own slot on completion.
pub struct ExecutionRegistry {
    executions: Arc<Index>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self {
            executions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Reserve the script's name for `execution`.
    ///
    /// The check and the insert happen under one write lock, so of two racing
    /// starts exactly one wins.
    pub fn try_start(&self, execution: Arc<ScriptExecution>) -> StartOutcome {
        let name = execution.name().to_string();
        let mut executions = self.write();
        if executions.contains_key(&name) {
            tracing::warn!(script = %name, "Script is already running");
            return StartOutcome::AlreadyRunning;
        }

        let index = Arc::downgrade(&self.executions);
        let id = execution.id();
        let slot = name.clone();
        execution.set_release_hook(Box::new(move || {
            release_slot(&index, &slot, id);
        }));

        executions.insert(name, Arc::clone(&execution));
        tracing::debug!(script = %execution.name(), execution_id = %id, live = executions.len(), "Execution registered");
        StartOutcome::Started(execution)
    }

    /// Remove whatever is registered under `name`. Idempotent.
    pub fn remove(&self, name: &str) -> Option<Arc<ScriptExecution>> {
        self.write().remove(name)
    }

    /// Remove `execution` only if it still owns its name's slot.
    pub fn release(&self, execution: &ScriptExecution) -> bool {
        release_slot(&Arc::downgrade(&self.executions), execution.name(), execution.id())
    }

    /// Empty the index and stop every execution that was in it.
    ///
    /// Stops run concurrently; this returns once every child has been
    /// terminated, without waiting for the executions' terminal states.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<Arc<ScriptExecution>> = {
            let mut executions = self.write();
            executions.drain().map(|(_, execution)| execution).collect()
        };
        let count = drained.len();
        if count == 0 {
            return 0;
        }

        std::thread::scope(|scope| {
            for execution in &drained {
                scope.spawn(move || execution.stop());
            }
        });
        tracing::info!(count, "Stopped all running scripts");
        count
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ScriptExecution>> {
        self.read().get(name).cloned()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Names of all live executions, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ScriptExecution>>> {
        self.executions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ScriptExecution>>> {
        self.executions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ExecutionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn release_slot(index: &Weak<Index>, name: &str, id: Uuid) -> bool {
    let Some(index) = index.upgrade() else {
        return false;
    };
    let mut executions = index.write().unwrap_or_else(PoisonError::into_inner);
    if executions.get(name).is_some_and(|live| live.id() == id) {
        executions.remove(name);
        tracing::debug!(script = %name, execution_id = %id, "Execution released");
        true
    } else {
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
