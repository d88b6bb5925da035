//! Envelope types for the JSON wire protocol.
//!
//! # Message flow
//!
//! ```text
//! Client  → Gateway:  {"messageId":1,"command":"node.set_value",...}   IncomingMessage
//! Gateway → Client:   {"type":"result","messageId":1,"success":true,"result":{...}}
//! Gateway → Client:   {"type":"event","event":{"source":"node","event":"value updated",...}}
//! Gateway → Client:   {"type":"version","driverVersion":"...",...}     (once, on connect)
//! ```
//!
//! Events are produced once as a typed [`OutgoingEvent`] and rendered to JSON
//! separately for every recipient by [`crate::compat::shape_event`], because
//! two clients on different schema versions see different shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::controller::{InclusionGrant, RebuildRoutesStatus};
use crate::domain::firmware::{FirmwareUpdateProgress, FirmwareUpdateResult};
use crate::domain::log::{LogConfig, LogEntry};
use crate::domain::node::{NodeId, NodeSnapshot, NodeStatus};
use crate::domain::value::{MetadataUpdatedArgs, ValueChangeArgs, ValueMetadata, ValueSnapshot};

// ── Client → Gateway ──────────────────────────────────────────────────────────

/// Request correlation id; echoed back unchanged in the result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Number(u64),
    Text(String),
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{n}"),
            MessageId::Text(s) => f.write_str(s),
        }
    }
}

/// A command envelope as received from a client.
///
/// Command-specific fields stay in `args` until the router parses them into
/// the typed argument struct of the addressed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub message_id: MessageId,
    pub command: String,
    #[serde(flatten)]
    pub args: Map<String, Value>,
}

impl IncomingMessage {
    pub fn new(message_id: MessageId, command: &str, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            message_id,
            command: command.to_string(),
            args,
        }
    }
}

// ── Gateway → Client ──────────────────────────────────────────────────────────

/// Every frame the gateway sends.
///
/// ```json
/// {"type":"result","messageId":7,"success":false,"errorCode":"unknownCommand","message":"...","command":"node.fly"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutgoingMessage {
    #[serde(rename_all = "camelCase")]
    Version {
        driver_version: String,
        server_version: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        home_id: Option<u32>,
        min_schema_version: u32,
        max_schema_version: u32,
    },
    #[serde(rename_all = "camelCase")]
    Result {
        message_id: MessageId,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Event { event: Value },
}

impl OutgoingMessage {
    pub fn success(message_id: MessageId, result: Value) -> Self {
        OutgoingMessage::Result {
            message_id,
            success: true,
            result: Some(result),
            error_code: None,
            message: None,
            extra: Map::new(),
        }
    }

    pub fn failure(
        message_id: MessageId,
        error_code: &str,
        message: String,
        extra: Map<String, Value>,
    ) -> Self {
        OutgoingMessage::Result {
            message_id,
            success: false,
            result: None,
            error_code: Some(error_code.to_string()),
            message: Some(message),
            extra,
        }
    }
}

/// The `source` field of an event envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Driver,
    Controller,
    Node,
}

/// Which of the three value-change events a [`OutgoingEvent::ValueChanged`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueEventKind {
    Added,
    Updated,
    Removed,
}

impl ValueEventKind {
    pub fn event_name(self) -> &'static str {
        match self {
            ValueEventKind::Added => "value added",
            ValueEventKind::Updated => "value updated",
            ValueEventKind::Removed => "value removed",
        }
    }
}

/// An event before per-client shaping.
///
/// Produced once per driver event (or gateway action) and rendered for each
/// recipient's schema version.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingEvent {
    // driver
    AllNodesReady,
    LogConfigUpdated {
        config: LogConfig,
    },
    Logging {
        entry: LogEntry,
    },

    // controller
    NodeAdded {
        node: NodeSnapshot,
    },
    NodeRemoved {
        node: NodeSnapshot,
    },
    InclusionStarted {
        secure: bool,
    },
    InclusionFailed,
    InclusionStopped,
    ExclusionStarted,
    ExclusionFailed,
    ExclusionStopped,
    RebuildRoutesProgress {
        progress: BTreeMap<NodeId, RebuildRoutesStatus>,
    },
    RebuildRoutesDone {
        result: BTreeMap<NodeId, RebuildRoutesStatus>,
    },
    GrantSecurityClasses {
        requested: InclusionGrant,
    },
    ValidateDskAndEnterPin {
        dsk: String,
    },
    InclusionAborted,

    // node
    NodeReady {
        node_id: NodeId,
        node_state: NodeSnapshot,
    },
    InterviewCompleted {
        node_id: NodeId,
        node_state: NodeSnapshot,
    },
    InterviewStarted {
        node_id: NodeId,
    },
    InterviewStageCompleted {
        node_id: NodeId,
        stage_name: String,
    },
    InterviewFailed {
        node_id: NodeId,
        args: Value,
    },
    StatusChanged {
        node_id: NodeId,
        status: NodeStatus,
        old_status: NodeStatus,
    },
    ValueChanged {
        node_id: NodeId,
        kind: ValueEventKind,
        args: ValueChangeArgs,
        metadata: ValueMetadata,
    },
    ValueNotification {
        node_id: NodeId,
        value_state: ValueSnapshot,
    },
    MetadataUpdated {
        node_id: NodeId,
        args: MetadataUpdatedArgs,
    },
    Notification {
        node_id: NodeId,
        cc_id: u8,
        args: Value,
    },
    FirmwareUpdateProgress {
        node_id: NodeId,
        progress: FirmwareUpdateProgress,
    },
    FirmwareUpdateFinished {
        node_id: NodeId,
        result: FirmwareUpdateResult,
    },
}

impl OutgoingEvent {
    pub fn source(&self) -> EventSource {
        match self {
            OutgoingEvent::AllNodesReady
            | OutgoingEvent::LogConfigUpdated { .. }
            | OutgoingEvent::Logging { .. } => EventSource::Driver,

            OutgoingEvent::NodeAdded { .. }
            | OutgoingEvent::NodeRemoved { .. }
            | OutgoingEvent::InclusionStarted { .. }
            | OutgoingEvent::InclusionFailed
            | OutgoingEvent::InclusionStopped
            | OutgoingEvent::ExclusionStarted
            | OutgoingEvent::ExclusionFailed
            | OutgoingEvent::ExclusionStopped
            | OutgoingEvent::RebuildRoutesProgress { .. }
            | OutgoingEvent::RebuildRoutesDone { .. }
            | OutgoingEvent::GrantSecurityClasses { .. }
            | OutgoingEvent::ValidateDskAndEnterPin { .. }
            | OutgoingEvent::InclusionAborted => EventSource::Controller,

            _ => EventSource::Node,
        }
    }

    /// The node an event concerns, for node-sourced events.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            OutgoingEvent::NodeReady { node_id, .. }
            | OutgoingEvent::InterviewCompleted { node_id, .. }
            | OutgoingEvent::InterviewStarted { node_id }
            | OutgoingEvent::InterviewStageCompleted { node_id, .. }
            | OutgoingEvent::InterviewFailed { node_id, .. }
            | OutgoingEvent::StatusChanged { node_id, .. }
            | OutgoingEvent::ValueChanged { node_id, .. }
            | OutgoingEvent::ValueNotification { node_id, .. }
            | OutgoingEvent::MetadataUpdated { node_id, .. }
            | OutgoingEvent::Notification { node_id, .. }
            | OutgoingEvent::FirmwareUpdateProgress { node_id, .. }
            | OutgoingEvent::FirmwareUpdateFinished { node_id, .. } => Some(*node_id),
            _ => None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_incoming_message_keeps_command_fields_in_args() {
        let msg: IncomingMessage = serde_json::from_value(json!({
            "messageId": 12,
            "command": "node.ping",
            "nodeId": 4
        }))
        .unwrap();
        assert_eq!(msg.message_id, MessageId::Number(12));
        assert_eq!(msg.command, "node.ping");
        assert_eq!(msg.args.get("nodeId"), Some(&json!(4)));
        assert!(msg.args.get("command").is_none());
    }

    #[test]
    fn test_incoming_message_accepts_string_message_id() {
        let msg: IncomingMessage =
            serde_json::from_value(json!({"messageId": "abc", "command": "start_listening"}))
                .unwrap();
        assert_eq!(msg.message_id, MessageId::Text("abc".into()));
    }

    #[test]
    fn test_success_result_serializes_expected_shape() {
        let msg = OutgoingMessage::success(MessageId::Number(3), json!({"count": 2}));
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "result", "messageId": 3, "success": true, "result": {"count": 2}})
        );
    }

    #[test]
    fn test_failure_result_flattens_extra_fields() {
        let mut extra = Map::new();
        extra.insert("command".to_string(), json!("node.fly"));
        let msg = OutgoingMessage::failure(
            MessageId::Number(9),
            "unknownCommand",
            "Unknown command: node.fly".to_string(),
            extra,
        );
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "result",
                "messageId": 9,
                "success": false,
                "errorCode": "unknownCommand",
                "message": "Unknown command: node.fly",
                "command": "node.fly"
            })
        );
    }

    #[test]
    fn test_version_greeting_shape() {
        let msg = OutgoingMessage::Version {
            driver_version: "12.0.0".to_string(),
            server_version: "0.1.0".to_string(),
            home_id: Some(0xC0FFEE),
            min_schema_version: 0,
            max_schema_version: 40,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "version");
        assert_eq!(json["driverVersion"], "12.0.0");
        assert_eq!(json["maxSchemaVersion"], 40);
    }

    #[test]
    fn test_event_sources() {
        assert_eq!(OutgoingEvent::AllNodesReady.source(), EventSource::Driver);
        assert_eq!(OutgoingEvent::InclusionAborted.source(), EventSource::Controller);
        assert_eq!(
            OutgoingEvent::InterviewStarted { node_id: 3 }.source(),
            EventSource::Node
        );
        assert_eq!(OutgoingEvent::InterviewStarted { node_id: 3 }.node_id(), Some(3));
        assert_eq!(OutgoingEvent::InclusionStopped.node_id(), None);
    }
}
