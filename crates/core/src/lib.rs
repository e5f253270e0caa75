//! Domain types shared by the EA Shell execution engine.
//!
//! Holds the script definition handed over by the script store, the
//! execution state machine's states, and per-command results. No I/O.

pub mod error;
pub mod execution;
pub mod script;
