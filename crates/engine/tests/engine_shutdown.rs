//! Integration tests for engine shutdown and output capping.

#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use eashell_core::execution::ExecutionState;
use eashell_engine::engine::Engine;
use eashell_engine::error::EngineError;
use eashell_engine::registry::StartOutcome;
use eashell_engine::sink::OutputWindow;

use common::{contents, script, test_config, test_engine, WAIT};

/// Shutdown stops every running script and drains the workers in time.
#[test]
fn shutdown_stops_all_running_scripts() {
    let engine = test_engine();
    let mut dirs = Vec::new();
    let mut executions = Vec::new();
    for name in ["alpha", "beta", "gamma"] {
        let (entry, dir) = script(name, &["sleep 30", "echo never"]);
        dirs.push(dir);
        let StartOutcome::Started(execution) =
            engine.start(entry, OutputWindow::shared()).expect("start")
        else {
            panic!("expected {name} to start");
        };
        executions.push(execution);
    }
    assert_eq!(engine.running_count(), 3);
    std::thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    assert!(engine.shutdown(), "workers should drain within the timeout");
    assert!(started.elapsed() < Duration::from_secs(3));

    assert_eq!(engine.running_count(), 0);
    for execution in executions {
        assert_eq!(execution.wait_for_terminal(WAIT), Some(ExecutionState::Terminated));
    }
}

#[test]
fn shutdown_with_nothing_running_drains_immediately() {
    let engine = test_engine();
    assert!(engine.shutdown());

    let (entry, _dir) = script("late", &["echo hi"]);
    assert_matches!(
        engine.start(entry, OutputWindow::shared()),
        Err(EngineError::PoolClosed)
    );
}

/// Scripts beyond the worker bound queue until a worker frees up.
#[test]
fn bounded_engine_queues_excess_scripts() {
    let mut config = test_config();
    config.max_workers = Some(1);
    let engine = Engine::new(config).expect("engine");

    let (first, _first_dir) = script("first", &["sleep 0.2"]);
    let (second, _second_dir) = script("second", &["echo queued"]);
    let window = OutputWindow::shared();

    let StartOutcome::Started(a) = engine.start(first, OutputWindow::shared()).expect("start") else {
        panic!("expected first to start");
    };
    let StartOutcome::Started(b) = engine.start(second, window.clone()).expect("start") else {
        panic!("expected second to be admitted");
    };
    assert_eq!(b.state(), ExecutionState::Idle);

    assert_eq!(a.wait_for_terminal(WAIT), Some(ExecutionState::Succeeded));
    assert_eq!(b.wait_for_terminal(WAIT), Some(ExecutionState::Succeeded));
    assert!(contents(&window).contains("queued\n"));
    assert!(engine.shutdown());
}

/// A chatty script never grows the sink beyond the configured maximum, and
/// what remains is the tail of the output.
#[test]
fn sink_keeps_only_the_most_recent_output() {
    let mut config = test_config();
    config.flush.max_sink_chars = 500;
    let engine = Engine::new(config).expect("engine");
    let window = OutputWindow::shared();
    let (entry, _dir) = script("chatty", &["i=0; while [ $i -lt 2000 ]; do echo line-$i; i=$((i+1)); done"]);

    let StartOutcome::Started(execution) = engine.start(entry, window.clone()).expect("start") else {
        panic!("expected the script to start");
    };
    assert_eq!(execution.wait_for_terminal(WAIT), Some(ExecutionState::Succeeded));

    let text = contents(&window);
    assert_eq!(text.chars().count(), 500);
    assert!(text.ends_with(">>> All commands completed.\n"));
    assert!(text.contains("line-1999\n"));
    assert!(engine.shutdown());
}
