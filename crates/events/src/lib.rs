//! Status events published by the execution engine.
//!
//! The presentation layer subscribes to the [`bus::EventBus`] and receives one
//! [`bus::StatusEvent`] per execution state change.

pub mod bus;
