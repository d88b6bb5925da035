//! Infrastructure layer for zwave-gateway.
//!
//! # Responsibilities
//!
//! - Binding the TCP listener and performing the WebSocket upgrade
//! - Sending the version greeting and enforcing the handshake
//! - Draining each session's outbound channel into the socket
//! - Handling the graceful shutdown signal
//!
//! # What does NOT belong here?
//!
//! - Command semantics (application layer)
//! - Result shaping per schema version (`zwave_core::compat`)
//! - Configuration parsing (done in `main.rs`)

pub mod ws_server;

pub use ws_server::{run_server, serve};
