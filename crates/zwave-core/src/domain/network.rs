//! Network topology types: associations, SmartStart provisioning and the
//! routes the controller knows for each node's lifeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::controller::SecurityClass;
use crate::domain::node::NodeId;

/// A node, or one endpoint of it, at either end of an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationAddress {
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<u16>,
}

impl AssociationAddress {
    pub fn node(node_id: NodeId) -> Self {
        Self {
            node_id,
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: u16) -> Self {
        self.endpoint = Some(endpoint);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationGroup {
    pub max_nodes: u16,
    /// The group reports to the controller (group 1 on most devices).
    pub is_lifeline: bool,
    pub multi_channel: bool,
    pub label: String,
}

/// Group id → group, as reported for one source node or endpoint.
pub type AssociationGroups = BTreeMap<u8, AssociationGroup>;

/// Group id → destinations currently associated in that group.
pub type Associations = BTreeMap<u8, Vec<AssociationAddress>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningEntryStatus {
    #[default]
    Active,
    Inactive,
}

/// A SmartStart provisioning list entry.
///
/// Fields the gateway does not model are kept in `additional` and returned
/// unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningEntry {
    pub dsk: String,
    pub security_classes: Vec<SecurityClass>,
    #[serde(default)]
    pub status: ProvisioningEntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_security_classes: Option<Vec<SecurityClass>>,
    /// Set once the node has joined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

/// How a provisioning entry is addressed: by DSK, or by the id of the node
/// it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DskOrNodeId {
    NodeId(NodeId),
    Dsk(String),
}

impl DskOrNodeId {
    pub fn matches(&self, entry: &ProvisioningEntry) -> bool {
        match self {
            DskOrNodeId::Dsk(dsk) => &entry.dsk == dsk,
            DskOrNodeId::NodeId(node_id) => entry.node_id == Some(*node_id),
        }
    }
}

/// One route a frame took, as the controller last saw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatistics {
    pub protocol_data_rate: u8,
    pub repeaters: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i8>,
}

/// Last working route (`lwr`) and next-to-last working route (`nlwr`)
/// between a node and the controller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LifelineRoutes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lwr: Option<RouteStatistics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nlwr: Option<RouteStatistics>,
}
