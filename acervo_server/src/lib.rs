//! HTTP API for the Acervo authentication core.
//!
//! The binary in `main.rs` wires these modules together; they are exposed as a
//! library so the router can be exercised in integration tests.

pub mod api;
pub mod cleanup;
pub mod config;
pub mod logging;
