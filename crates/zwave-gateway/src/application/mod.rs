//! Application layer for zwave-gateway.
//!
//! Everything between a decoded client frame and a driver call lives here.
//! Clients are reached only through [`registry::ClientSink`] and outbound
//! channels, so every service can be tested without a socket.

pub mod forwarder;
pub mod gateway;
pub mod inclusion;
pub mod log_forwarder;
pub mod registry;
pub mod router;
pub mod session;

pub use forwarder::EventForwarder;
pub use gateway::Gateway;
pub use inclusion::InclusionBridge;
pub use registry::{ClientRegistry, OutboundFrame, OutboundSender};
pub use router::CommandRouter;
pub use session::Session;
