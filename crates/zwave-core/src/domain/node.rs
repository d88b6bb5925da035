//! Node identity, lifecycle status and the read-only node snapshot.

use serde::{Deserialize, Serialize};

use crate::domain::controller::SecurityClass;
use crate::domain::value::ValueSnapshot;

/// Network-wide node identifier assigned by the controller.
pub type NodeId = u16;

/// Reachability status of a node as tracked by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Unknown,
    Asleep,
    Awake,
    Dead,
    Alive,
}

impl NodeStatus {
    /// The node event name emitted when a node enters this status.
    ///
    /// `Unknown` is never the target of a transition.
    pub fn event_name(self) -> Option<&'static str> {
        match self {
            NodeStatus::Asleep => Some("sleep"),
            NodeStatus::Awake => Some("wake up"),
            NodeStatus::Dead => Some("dead"),
            NodeStatus::Alive => Some("alive"),
            NodeStatus::Unknown => None,
        }
    }
}

/// Read-only projection of a node's live state.
///
/// Snapshots are recomputed from the driver on every request and never
/// cached by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub status: NodeStatus,
    pub ready: bool,
    pub interview_stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highest_security_class: Option<SecurityClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_type: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    pub endpoint_count: u16,
    pub keep_awake: bool,
    pub values: Vec<ValueSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_event_names() {
        assert_eq!(NodeStatus::Asleep.event_name(), Some("sleep"));
        assert_eq!(NodeStatus::Awake.event_name(), Some("wake up"));
        assert_eq!(NodeStatus::Dead.event_name(), Some("dead"));
        assert_eq!(NodeStatus::Alive.event_name(), Some("alive"));
        assert_eq!(NodeStatus::Unknown.event_name(), None);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(NodeStatus::Asleep).unwrap(),
            serde_json::json!("asleep")
        );
    }
}
