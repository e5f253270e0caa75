//! Background execution of shell scripts with live output streaming.
//!
//! A script's commands run one after another through the host interpreter.
//! Their merged stdout/stderr flows through a rate-limited [`buffer::StreamBuffer`]
//! into a caller-supplied [`sink::OutputSink`], while state changes are
//! published on the [`eashell_events::bus::EventBus`]. The [`engine::Engine`]
//! facade allows one live execution per script name and can stop any of them
//! (terminate, then kill after a grace period).

pub mod buffer;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod pool;
pub mod process;
pub mod registry;
pub mod sink;
