//! Per-client session record.
//!
//! A client exists in the registry only after a successful handshake, so
//! every [`ClientInfo`] carries a negotiated schema version.  The version is
//! fixed for the lifetime of the connection; the subscription flags change as
//! the client issues `start_listening` / `start_listening_logs` commands.

use uuid::Uuid;
use zwave_core::domain::LogFilter;

/// Identifies one connected client.  Generated on connect, never reused.
pub type ClientId = Uuid;

/// What a client has asked to receive besides command results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subscriptions {
    /// Set by `start_listening`; gates forwarded driver events.
    pub receive_events: bool,
    /// Set by `driver.start_listening_logs`.
    pub receive_logs: bool,
    /// Context filter applied to forwarded log lines.
    pub log_filter: Option<LogFilter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    pub id: ClientId,
    /// Remote address, used in log messages.
    pub peer: String,
    pub schema_version: u32,
    pub subscriptions: Subscriptions,
}

impl ClientInfo {
    pub fn new(peer: impl Into<String>, schema_version: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer: peer.into(),
            schema_version,
            subscriptions: Subscriptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_client_has_no_subscriptions() {
        let client = ClientInfo::new("127.0.0.1:5000", 35);
        assert_eq!(client.schema_version, 35);
        assert!(!client.subscriptions.receive_events);
        assert!(!client.subscriptions.receive_logs);
        assert!(client.subscriptions.log_filter.is_none());
    }

    #[test]
    fn test_client_ids_are_unique() {
        let a = ClientInfo::new("a", 1);
        let b = ClientInfo::new("b", 1);
        assert_ne!(a.id, b.id);
    }
}
