//! Controller-level types: network state, inclusion options and grants,
//! route rebuilding progress and RF settings.

use serde::{Deserialize, Serialize};

use crate::domain::node::NodeId;

/// Security classes a joining node can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityClass {
    S2Unauthenticated,
    S2Authenticated,
    S2AccessControl,
    S0Legacy,
}

/// The security classes requested by a joining node, or granted by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionGrant {
    pub security_classes: Vec<SecurityClass>,
    pub client_side_auth: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InclusionStrategy {
    #[default]
    Default,
    SmartStart,
    Insecure,
    SecurityS0,
    SecurityS2,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionOptions {
    #[serde(default)]
    pub strategy: InclusionStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_security: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionStrategy {
    #[default]
    ExcludeOnly,
    DisableProvisioningEntry,
    Unprovision,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusionOptions {
    #[serde(default)]
    pub strategy: ExclusionStrategy,
}

/// What the controller is currently doing with respect to network membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InclusionState {
    #[default]
    Idle,
    Including,
    Excluding,
    Busy,
    SmartStart,
}

/// Snapshot of the controller as returned by `controller.get_state`.
///
/// The route-rebuilding flag is renamed for old clients by
/// [`crate::compat::controller_state`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub own_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rf_region: Option<u8>,
    pub inclusion_state: InclusionState,
    pub is_rebuilding_routes: bool,
}

/// Per-node progress while rebuilding routes across the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildRoutesStatus {
    Pending,
    Done,
    Failed,
    Skipped,
}

/// Controller transmit power setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Powerlevel {
    pub powerlevel: u8,
    #[serde(rename = "measured0dBm")]
    pub measured_0_dbm: i8,
}

/// Result of a single test frame transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmitStatus {
    Ok,
    NoAck,
    Fail,
    NotIdle,
    NoRoute,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inclusion_grant_round_trips_camel_case() {
        let grant: InclusionGrant = serde_json::from_value(json!({
            "securityClasses": ["s2_authenticated", "s0_legacy"],
            "clientSideAuth": false
        }))
        .unwrap();
        assert_eq!(
            grant.security_classes,
            vec![SecurityClass::S2Authenticated, SecurityClass::S0Legacy]
        );
        assert!(!grant.client_side_auth);
    }

    #[test]
    fn test_inclusion_options_default_when_fields_missing() {
        let options: InclusionOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(options, InclusionOptions::default());
    }

    #[test]
    fn test_powerlevel_uses_measured_0dbm_wire_name() {
        let level = Powerlevel {
            powerlevel: 2,
            measured_0_dbm: -3,
        };
        assert_eq!(
            serde_json::to_value(level).unwrap(),
            json!({"powerlevel": 2, "measured0dBm": -3})
        );
    }
}
