//! Library surface for the gateway binary: the HTTP API, the orchestration
//! runtime, and shared application state. Split out from `main.rs` so the
//! turn runtime and its tests can be exercised without booting a server.

pub mod api;
pub mod runtime;
pub mod state;
