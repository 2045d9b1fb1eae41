//! Application-level orchestration utilities.
//!
//! This module owns the query lifecycle (submit/cancel/reset) around the
//! engine. UI/CLI layers send commands in and receive events back, keeping
//! presentation separate from the request lifecycle.

mod controller;

pub(crate) use controller::{run_controller, UiCommand};
