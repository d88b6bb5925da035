//! # zwave-core
//!
//! Shared library for the Z-Wave gateway containing the client-facing wire
//! protocol, the device/value model, the driver interface the gateway is built
//! against, and the schema compatibility rules.
//!
//! This crate is used by the gateway binary and by its tests.  It has no
//! dependency on sockets or the WebSocket transport.
//!
//! # Architecture overview
//!
//! The gateway sits between a stateful controller driver (which owns the radio
//! and every device's state) and any number of remote clients.  Clients speak
//! JSON and declare a *schema version*; the same driver result is rendered
//! differently for a client on schema 25 than for one on schema 30.
//!
//! - **`protocol`** – The JSON envelopes that travel over the wire (commands
//!   in; results, events and the version greeting out) and the codec that
//!   parses and renders them.
//!
//! - **`domain`** – Plain data types describing nodes, values, metadata,
//!   controller state, firmware updates and log configuration.
//!
//! - **`driver`** – The traits the external driver implements (`Driver`,
//!   `Controller`, `Node`, `VirtualNode`, `VirtualEndpoint`) and the callback
//!   trait the driver invokes while an inclusion waits for a user decision.
//!
//! - **`compat`** – Pure functions keyed by schema version that turn a typed
//!   result or event into the JSON shape a given client expects.
//!
//! - **`testing`** – An in-memory simulated driver used by tests and by the
//!   gateway binary when no hardware driver is linked in.

pub mod compat;
pub mod domain;
pub mod driver;
pub mod protocol;
pub mod testing;

// Re-export the most-used types at the crate root so callers can write
// `zwave_core::NodeId` instead of `zwave_core::domain::node::NodeId`.
pub use domain::node::{NodeId, NodeSnapshot, NodeStatus};
pub use domain::value::{SetValueResult, SetValueStatus, ValueId, ValueMetadata, ValueType};
pub use driver::{Driver, DriverError, DriverResult};
pub use protocol::codec::{decode_incoming, encode_outgoing, ProtocolError};
pub use protocol::messages::{IncomingMessage, MessageId, OutgoingEvent, OutgoingMessage};
pub use protocol::{MAX_SCHEMA_VERSION, MIN_SCHEMA_VERSION};
