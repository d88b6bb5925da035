//! Errors a command can fail with, and their wire representation.
//!
//! Each variant maps to a stable camelCase `errorCode` plus variant-specific
//! extra fields that are merged into the error result:
//!
//! ```json
//! {"type":"result","messageId":4,"success":false,
//!  "errorCode":"nodeNotFound","message":"Node 12 not found","nodeId":12}
//! ```
//!
//! Validation errors (`unknownCommand`, `virtualEndpointNotFound`,
//! `nodeNotFound`, `invalidCommand`) are raised before the driver is called.
//! `zwaveError` carries the driver's own code and message unchanged so a
//! client can tell "attempted and failed" from "rejected up front".

use serde_json::{json, Map, Value};
use thiserror::Error;
use zwave_core::{DriverError, MessageId, NodeId, OutgoingMessage};

/// The two user decisions an inclusion can be waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InclusionPhase {
    GrantSecurityClasses,
    ValidateDskAndEnterPin,
}

impl InclusionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            InclusionPhase::GrantSecurityClasses => "grant_security_classes",
            InclusionPhase::ValidateDskAndEnterPin => "validate_dsk_and_enter_pin",
        }
    }
}

impl std::fmt::Display for InclusionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// The command tag is not known to the addressed domain.
    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    /// A broadcast / multicast command addressed an endpoint index that does
    /// not exist on the virtual node.
    #[error("Virtual endpoint {index} does not exist")]
    VirtualEndpointNotFound {
        index: u16,
        node_ids: Option<Vec<NodeId>>,
        broadcast: bool,
    },

    #[error("Node {node_id} not found")]
    NodeNotFound { node_id: NodeId },

    /// The driver attempted the operation and reported a failure.
    #[error(transparent)]
    DriverOperation(#[from] DriverError),

    /// The handshake asked for a version outside the supported range, or the
    /// first message was not a handshake at all (`requested` is `None`).
    #[error(
        "Schema version {} is not supported (supported: {}..={})",
        requested_label(.requested), .min, .max
    )]
    SchemaVersionUnsupported {
        requested: Option<i64>,
        min: u32,
        max: u32,
    },

    /// A required field is missing or has the wrong type.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// A resolving command arrived with nothing pending.
    #[error("Inclusion is not waiting for {phase}")]
    InclusionPhaseNotInProgress { phase: InclusionPhase },
}

fn requested_label(requested: &Option<i64>) -> String {
    requested.map_or_else(|| "(none)".to_string(), |v| v.to_string())
}

impl GatewayError {
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::UnknownCommand { .. } => "unknownCommand",
            GatewayError::VirtualEndpointNotFound { .. } => "virtualEndpointNotFound",
            GatewayError::NodeNotFound { .. } => "nodeNotFound",
            GatewayError::DriverOperation(_) => "zwaveError",
            GatewayError::SchemaVersionUnsupported { .. } => "schemaIncompatible",
            GatewayError::InvalidCommand(_) => "invalidCommand",
            GatewayError::InclusionPhaseNotInProgress { .. } => "inclusionPhaseNotInProgress",
        }
    }

    /// Variant-specific fields merged into the error result.
    pub fn extra(&self) -> Map<String, Value> {
        let extra = match self {
            GatewayError::UnknownCommand { command } => json!({ "command": command }),
            GatewayError::VirtualEndpointNotFound {
                index,
                node_ids,
                broadcast,
            } => {
                let mut extra = json!({ "index": index });
                if let Some(ids) = node_ids {
                    extra["nodeIDs"] = json!(ids);
                }
                if *broadcast {
                    extra["broadcast"] = Value::Bool(true);
                }
                extra
            }
            GatewayError::NodeNotFound { node_id } => json!({ "nodeId": node_id }),
            GatewayError::DriverOperation(err) => json!({
                "zwaveErrorCode": err.code,
                "zwaveErrorMessage": err.message,
            }),
            GatewayError::InclusionPhaseNotInProgress { phase } => {
                json!({ "phase": phase.as_str() })
            }
            GatewayError::SchemaVersionUnsupported { .. } | GatewayError::InvalidCommand(_) => {
                json!({})
            }
        };
        match extra {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Renders this error as the result envelope for `message_id`.
    pub fn to_result(&self, message_id: MessageId) -> OutgoingMessage {
        OutgoingMessage::failure(message_id, self.error_code(), self.to_string(), self.extra())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
