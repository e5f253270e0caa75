//! Engine configuration loaded from environment variables.
//!
//! All fields have defaults matching the desktop viewer's needs; override
//! them through `EASHELL_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::process::Interpreter;

/// Minimum time between two deliveries to the sink while output keeps coming.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Pending size (bytes) that forces a delivery regardless of the interval.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 4096;

/// Characters retained by a sink; older output is discarded first.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 10_000;

/// Size of each read from a child's output pipe.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8192;

/// How long to wait for the reader to drain after the child exited.
pub const DEFAULT_READER_JOIN_TIMEOUT: Duration = Duration::from_millis(1000);

/// Grace period between the terminate request and the forced kill.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// How often the sequencer checks whether the running child has exited.
pub const DEFAULT_EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long shutdown waits for in-flight executions to wind down.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// When buffered output is handed to the sink, and how much the sink keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushPolicy {
    pub interval: Duration,
    pub threshold: usize,
    pub max_sink_chars: usize,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_FLUSH_INTERVAL,
            threshold: DEFAULT_FLUSH_THRESHOLD,
            max_sink_chars: DEFAULT_MAX_OUTPUT_CHARS,
        }
    }
}

/// Per-execution process handling settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSettings {
    pub interpreter: Interpreter,
    pub read_chunk_size: usize,
    pub reader_join_timeout: Duration,
    pub stop_timeout: Duration,
    pub exit_poll_interval: Duration,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            interpreter: Interpreter::host(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            reader_join_timeout: DEFAULT_READER_JOIN_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            exit_poll_interval: DEFAULT_EXIT_POLL_INTERVAL,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub flush: FlushPolicy,
    pub execution: ExecutionSettings,
    pub shutdown_timeout: Duration,
    /// Upper bound on concurrently running executions; `None` is unbounded.
    pub max_workers: Option<usize>,
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default            |
    /// |----------------------------------|--------------------|
    /// | `EASHELL_FLUSH_INTERVAL_MS`      | `100`              |
    /// | `EASHELL_FLUSH_THRESHOLD`        | `4096`             |
    /// | `EASHELL_MAX_OUTPUT_CHARS`       | `10000`            |
    /// | `EASHELL_READ_CHUNK_SIZE`        | `8192`             |
    /// | `EASHELL_READER_JOIN_TIMEOUT_MS` | `1000`             |
    /// | `EASHELL_STOP_TIMEOUT_MS`        | `2000`             |
    /// | `EASHELL_EXIT_POLL_MS`           | `10`               |
    /// | `EASHELL_SHUTDOWN_TIMEOUT_MS`    | `5000`             |
    /// | `EASHELL_MAX_WORKERS`            | unbounded          |
    /// | `EASHELL_INTERPRETER`            | `sh -c` / PowerShell |
    ///
    /// Unparsable values fall back to the default with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |key: &str, default: Duration| {
            parse_or(&lookup, key, default.as_millis() as u64).map_or(default, Duration::from_millis)
        };
        let count = |key: &str, default: usize| parse_or(&lookup, key, default).unwrap_or(default);

        let flush = FlushPolicy {
            interval: millis("EASHELL_FLUSH_INTERVAL_MS", DEFAULT_FLUSH_INTERVAL),
            threshold: count("EASHELL_FLUSH_THRESHOLD", DEFAULT_FLUSH_THRESHOLD),
            max_sink_chars: count("EASHELL_MAX_OUTPUT_CHARS", DEFAULT_MAX_OUTPUT_CHARS),
        };

        let interpreter = lookup("EASHELL_INTERPRETER")
            .and_then(|raw| Interpreter::parse(&raw))
            .unwrap_or_else(Interpreter::host);

        let execution = ExecutionSettings {
            interpreter,
            read_chunk_size: count("EASHELL_READ_CHUNK_SIZE", DEFAULT_READ_CHUNK_SIZE).max(1),
            reader_join_timeout: millis("EASHELL_READER_JOIN_TIMEOUT_MS", DEFAULT_READER_JOIN_TIMEOUT),
            stop_timeout: millis("EASHELL_STOP_TIMEOUT_MS", DEFAULT_STOP_TIMEOUT),
            exit_poll_interval: millis("EASHELL_EXIT_POLL_MS", DEFAULT_EXIT_POLL_INTERVAL),
        };

        let max_workers = lookup("EASHELL_MAX_WORKERS").and_then(|raw| match raw.trim().parse() {
            Ok(0) | Err(_) => {
                tracing::warn!(value = %raw, "EASHELL_MAX_WORKERS must be a positive integer, using unbounded pool");
                None
            }
            Ok(n) => Some(n),
        });

        Self {
            flush,
            execution,
            shutdown_timeout: millis("EASHELL_SHUTDOWN_TIMEOUT_MS", DEFAULT_SHUTDOWN_TIMEOUT),
            max_workers,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush: FlushPolicy::default(),
            execution: ExecutionSettings::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            max_workers: None,
        }
    }
}

/// Parse `key` if set; `None` when unset or unparsable (the latter is logged).
fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Option<T>
where
    T: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, default = %default, "Invalid configuration value, using default");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
