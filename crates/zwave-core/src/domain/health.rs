//! Link health checks, node configuration writes and powerlevel tests.

use serde::{Deserialize, Serialize};

use crate::domain::node::NodeId;

/// Ratings run from 0 (unusable) to 10 (perfect).
pub const MAX_HEALTH_RATING: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifelineHealthCheckResult {
    /// Round trip time in milliseconds.
    pub latency: u32,
    pub num_neighbors: u8,
    pub failed_pings_node: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_changes: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_powerlevel: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_pings_controller: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snr_margin: Option<i8>,
    pub rating: u8,
}

/// Per-round results plus the overall (worst) rating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifelineHealthCheckSummary {
    pub results: Vec<LifelineHealthCheckResult>,
    pub rating: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteHealthCheckResult {
    pub num_neighbors: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_pings_to_target: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_pings_to_source: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_powerlevel_source: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_powerlevel_target: Option<u8>,
    pub rating: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHealthCheckSummary {
    pub results: Vec<RouteHealthCheckResult>,
    pub rating: u8,
}

/// A raw write to a configuration parameter, bypassing the device's
/// parameter definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConfigParameter {
    pub parameter: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_mask: Option<u32>,
    pub value: i64,
    /// Size in bytes: 1, 2 or 4.  Required unless `bit_mask` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_size: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_format: Option<u8>,
}

impl RawConfigParameter {
    /// Checks the combination of fields; `None` when it is acceptable.
    pub fn problem(&self) -> Option<&'static str> {
        match (self.bit_mask, self.value_size) {
            (Some(_), Some(_)) => Some("`bitMask` and `valueSize` are mutually exclusive"),
            (None, None) => Some("`valueSize` is required without `bitMask`"),
            (None, Some(size)) if ![1, 2, 4].contains(&size) => {
                Some("`valueSize` must be 1, 2 or 4")
            }
            _ => None,
        }
    }
}

/// Parameters of a powerlevel test between a node and a neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerlevelTest {
    pub test_node_id: NodeId,
    pub powerlevel: u8,
    pub frame_count: u16,
}
