//! Domain layer for zwave-gateway.
//!
//! Pure types with no I/O: runtime configuration, the per-client session
//! record and the typed errors a command can fail with.
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, socket or WebSocket types
//! - Driver calls
//! - Anything that could block or fail due to external state (file loading
//!   lives next to the config types but is only called from `main`)

pub mod client;
pub mod config;
pub mod error;

pub use client::{ClientId, ClientInfo, Subscriptions};
pub use config::{load_config, ConfigError, FileConfig, GatewayConfig};
pub use error::{GatewayError, InclusionPhase};
