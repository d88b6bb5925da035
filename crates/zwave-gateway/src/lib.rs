//! zwave-gateway library crate.
//!
//! Exposes a Z-Wave controller driver to any number of WebSocket clients.
//! Clients send JSON commands, receive JSON results, and can subscribe to
//! driver, controller, node and log events rendered for the schema version
//! they negotiated.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Clients (JSON over WebSocket)
//!         ↕
//! [zwave-gateway]
//!   ├── domain/           Pure types: GatewayConfig, ClientInfo, GatewayError
//!   ├── application/
//!   │     ├── gateway     Shared services + handshake
//!   │     ├── session     Per-connection command handling
//!   │     ├── router/     domain.tag → driver call → versioned result
//!   │     ├── forwarder   Driver/controller/node events → listening clients
//!   │     ├── inclusion   Driver inclusion callbacks ↔ client answers
//!   │     └── registry    Connected clients, fan-out, log forwarding
//!   └── infrastructure/
//!         └── ws_server   WebSocket accept loop (tokio-tungstenite)
//!         ↕
//! Driver (zwave-core::Driver)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `zwave-core` only; it talks to
//!   clients through channels, never sockets.
//! - `infrastructure` owns the sockets and the WebSocket framing.

/// Domain layer: configuration, client records and errors.
pub mod domain;

/// Application layer: sessions, routing, event and inclusion plumbing.
pub mod application;

/// Infrastructure layer: WebSocket server.
pub mod infrastructure;
