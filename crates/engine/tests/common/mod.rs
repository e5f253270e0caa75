#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use eashell_core::script::ScriptEntry;
use eashell_engine::config::{EngineConfig, ExecutionSettings};
use eashell_engine::engine::Engine;
use eashell_engine::sink::OutputWindow;
use tempfile::TempDir;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(10);

/// Build a test `EngineConfig` with short timeouts.
///
/// Keeps the default flush policy so trace output matches production, but
/// shortens the stop grace period and exit polling to keep tests fast.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        execution: ExecutionSettings {
            stop_timeout: Duration::from_millis(500),
            exit_poll_interval: Duration::from_millis(5),
            ..ExecutionSettings::default()
        },
        shutdown_timeout: Duration::from_secs(3),
        ..EngineConfig::default()
    }
}

pub fn test_engine() -> Engine {
    Engine::new(test_config()).expect("engine should start")
}

/// A script whose working directory is a fresh temp dir.
pub fn script(name: &str, commands: &[&str]) -> (ScriptEntry, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let entry = ScriptEntry::new(name, dir.path().to_string_lossy(), commands);
    (entry, dir)
}

pub fn contents(window: &Arc<Mutex<OutputWindow>>) -> String {
    window.lock().expect("window lock").snapshot()
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
