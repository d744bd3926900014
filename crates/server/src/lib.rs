//! HTTP front for the burrow pipeline.
//!
//! The binary in `main.rs` wires the core components together; the router
//! and state live here so integration tests can drive them in-process.

pub mod api;
pub mod metrics;
pub mod state;
