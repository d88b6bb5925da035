//! Client-facing wire protocol: envelope types and the JSON codec.
//!
//! Every frame is a single JSON object.  Clients send command envelopes; the
//! gateway sends result envelopes (one per command, correlated by
//! `messageId`), event envelopes (uncorrelated) and a version greeting on
//! connect.

pub mod codec;
pub mod messages;

pub use codec::{
    base64_decode, decode_incoming, encode_outgoing, recover_message_id, ProtocolError,
};
pub use messages::{
    EventSource, IncomingMessage, MessageId, OutgoingEvent, OutgoingMessage, ValueEventKind,
};

/// Oldest schema version a client may negotiate.
pub const MIN_SCHEMA_VERSION: u32 = 0;

/// Newest schema version this gateway speaks.
pub const MAX_SCHEMA_VERSION: u32 = 40;

/// Version string reported in the greeting.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
