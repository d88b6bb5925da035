//! The driver interface the gateway is built against.
//!
//! The driver owns the controller session and every node's state.  The
//! gateway never reaches inside it: it calls the operations below and listens
//! on the broadcast channels the driver exposes.  The driver serializes
//! conflicting radio operations itself, so the gateway adds no locking around
//! these calls.
//!
//! # Shape of the interface
//!
//! ```text
//! Driver ── controller() ──► Controller ── node(id) ──────────► Node
//!                                       ├─ broadcast_node() ──► VirtualNode ── endpoint(i) ──► VirtualEndpoint
//!                                       └─ multicast_group() ─► VirtualNode
//! ```
//!
//! During inclusion the driver calls back into the gateway through
//! [`InclusionUserCallbacks`] and suspends until the user has decided.

pub mod events;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::controller::{
    ControllerState, ExclusionOptions, InclusionGrant, InclusionOptions, Powerlevel,
    SecurityClass, TransmitStatus,
};
use crate::domain::firmware::{FirmwareFile, FirmwareUpdateCapabilities, FirmwareUpdateResult};
use crate::domain::health::{
    LifelineHealthCheckSummary, PowerlevelTest, RawConfigParameter, RouteHealthCheckSummary,
};
use crate::domain::log::{LogConfig, LogConfigUpdate, LogEntry};
use crate::domain::network::{
    AssociationAddress, AssociationGroups, Associations, DskOrNodeId, LifelineRoutes,
    ProvisioningEntry,
};
use crate::domain::node::{NodeId, NodeSnapshot};
use crate::domain::value::{SetValueResult, ValueId, ValueMetadata};

pub use events::{ControllerEvent, DriverEvent, NodeEvent};

// ── Error type ────────────────────────────────────────────────────────────────

/// A failure reported by the driver itself.
///
/// The gateway forwards `code` and `message` to the client unchanged so the
/// client can tell "attempted and failed" apart from the gateway's own
/// validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (ZW{code:04})")]
pub struct DriverError {
    pub code: u16,
    pub message: String,
}

impl DriverError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

// ── Driver ────────────────────────────────────────────────────────────────────

/// Driver-global operations and event sources.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Version string of the driver library.
    fn version(&self) -> String;

    /// The controller this driver manages.
    fn controller(&self) -> &dyn Controller;

    /// Driver-level events (`all nodes ready`).
    fn subscribe(&self) -> broadcast::Receiver<DriverEvent>;

    /// Stream of driver log lines; only consumed while a client listens.
    fn subscribe_logs(&self) -> broadcast::Receiver<LogEntry>;

    /// The driver's options object, reported opaquely.
    fn options(&self) -> Value;
    fn update_options(&self, options: Value) -> DriverResult<()>;

    fn log_config(&self) -> LogConfig;
    fn update_log_config(&self, update: LogConfigUpdate) -> DriverResult<()>;

    fn statistics_enabled(&self) -> bool;
    fn enable_statistics(&self, application_name: &str, application_version: &str);
    fn disable_statistics(&self);

    /// Version of the installed device configuration database.
    fn config_version(&self) -> String;
    /// Returns the newer configuration version, if one is available.
    async fn check_for_config_updates(&self) -> DriverResult<Option<String>>;
    async fn install_config_update(&self) -> DriverResult<bool>;

    fn set_preferred_scales(&self, scales: Value) -> DriverResult<()>;

    async fn soft_reset(&self) -> DriverResult<()>;
    async fn try_soft_reset(&self) -> DriverResult<()>;
    /// Factory-resets the controller.  Every node is forgotten.
    async fn hard_reset(&self) -> DriverResult<()>;
    async fn shutdown(&self) -> bool;

    async fn send_test_frame(&self, node_id: NodeId, powerlevel: u8)
        -> DriverResult<TransmitStatus>;
}

// ── Controller ────────────────────────────────────────────────────────────────

/// Controller operations: network membership, routing and RF settings.
#[async_trait]
pub trait Controller: Send + Sync {
    fn state(&self) -> ControllerState;
    fn home_id(&self) -> Option<u32>;

    /// Ids of every node currently known to the controller.
    fn node_ids(&self) -> Vec<NodeId>;
    fn node(&self, node_id: NodeId) -> Option<Arc<dyn Node>>;

    /// Controller-level events (membership, inclusion lifecycle, routing).
    fn subscribe(&self) -> broadcast::Receiver<ControllerEvent>;

    /// Starts inclusion.  The driver keeps `callbacks` and calls them if the
    /// joining node needs a user decision.
    async fn begin_inclusion(
        &self,
        options: InclusionOptions,
        callbacks: Arc<dyn InclusionUserCallbacks>,
    ) -> DriverResult<bool>;
    async fn stop_inclusion(&self) -> DriverResult<bool>;
    async fn begin_exclusion(&self, options: ExclusionOptions) -> DriverResult<bool>;
    async fn stop_exclusion(&self) -> DriverResult<bool>;

    async fn remove_failed_node(&self, node_id: NodeId) -> DriverResult<()>;
    async fn replace_failed_node(
        &self,
        node_id: NodeId,
        options: InclusionOptions,
        callbacks: Arc<dyn InclusionUserCallbacks>,
    ) -> DriverResult<bool>;
    async fn is_failed_node(&self, node_id: NodeId) -> DriverResult<bool>;
    async fn node_neighbors(&self, node_id: NodeId) -> DriverResult<Vec<NodeId>>;

    async fn rebuild_node_routes(&self, node_id: NodeId) -> DriverResult<bool>;
    fn begin_rebuilding_routes(&self) -> bool;
    fn stop_rebuilding_routes(&self) -> bool;
    /// Routes between each node and the controller, as last observed.
    fn known_lifeline_routes(&self) -> BTreeMap<NodeId, LifelineRoutes>;

    // Associations.  `source` fails with a driver error if the node or
    // endpoint is unknown.
    fn association_groups(&self, source: AssociationAddress) -> DriverResult<AssociationGroups>;
    fn associations(&self, source: AssociationAddress) -> DriverResult<Associations>;
    fn is_association_allowed(
        &self,
        source: AssociationAddress,
        group: u8,
        destination: AssociationAddress,
    ) -> DriverResult<bool>;
    async fn add_associations(
        &self,
        source: AssociationAddress,
        group: u8,
        destinations: Vec<AssociationAddress>,
    ) -> DriverResult<()>;
    async fn remove_associations(
        &self,
        source: AssociationAddress,
        group: u8,
        destinations: Vec<AssociationAddress>,
    ) -> DriverResult<()>;
    /// Removes `node_id` as a destination from every other node's groups.
    async fn remove_node_from_all_associations(&self, node_id: NodeId) -> DriverResult<()>;

    // SmartStart provisioning list.
    /// Adds an entry, replacing one with the same DSK.
    fn provision_smart_start_node(&self, entry: ProvisioningEntry) -> DriverResult<()>;
    fn unprovision_smart_start_node(&self, target: &DskOrNodeId) -> DriverResult<()>;
    fn provisioning_entry(&self, target: &DskOrNodeId) -> Option<ProvisioningEntry>;
    fn provisioning_entries(&self) -> Vec<ProvisioningEntry>;

    /// `None` when the controller cannot tell.
    fn supports_feature(&self, feature: u8) -> Option<bool>;

    async fn rf_region(&self) -> DriverResult<u8>;
    async fn set_rf_region(&self, region: u8) -> DriverResult<bool>;
    async fn powerlevel(&self) -> DriverResult<Powerlevel>;
    async fn set_powerlevel(&self, powerlevel: Powerlevel) -> DriverResult<bool>;

    fn is_any_ota_firmware_update_in_progress(&self) -> bool;
    /// `true` while the controller's own firmware is being replaced.
    fn is_firmware_update_in_progress(&self) -> bool;
    async fn firmware_update_ota(
        &self,
        node_id: NodeId,
        updates: Vec<FirmwareFile>,
    ) -> DriverResult<FirmwareUpdateResult>;

    /// Virtual node addressing every node at once.
    fn broadcast_node(&self) -> Arc<dyn VirtualNode>;
    /// Virtual node addressing the given nodes at once.
    fn multicast_group(&self, node_ids: &[NodeId]) -> DriverResult<Arc<dyn VirtualNode>>;
}

// ── Node ──────────────────────────────────────────────────────────────────────

/// One physical node.
#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> NodeId;

    /// `true` once the initial interview has completed.
    fn is_ready(&self) -> bool;

    /// Builds a fresh snapshot from live state.
    ///
    /// Fails when the node's state is only partially known.
    fn snapshot(&self) -> DriverResult<NodeSnapshot>;

    fn subscribe(&self) -> broadcast::Receiver<NodeEvent>;

    /// Metadata of a value; defaults when the driver knows nothing about it.
    fn value_metadata(&self, value_id: &ValueId) -> ValueMetadata;
    fn cc_version(&self, command_class: u8) -> u8;
    fn value(&self, value_id: &ValueId) -> Option<Value>;
    /// Milliseconds since the Unix epoch of the last update.
    fn value_timestamp(&self, value_id: &ValueId) -> Option<u64>;
    fn defined_value_ids(&self) -> Vec<ValueId>;
    fn endpoint_count(&self) -> u16;

    async fn set_value(
        &self,
        value_id: &ValueId,
        value: Value,
        options: Option<Value>,
    ) -> DriverResult<SetValueResult>;
    async fn poll_value(&self, value_id: &ValueId) -> DriverResult<Option<Value>>;

    async fn refresh_info(&self) -> DriverResult<()>;
    async fn refresh_values(&self) -> DriverResult<()>;
    async fn refresh_cc_values(&self, command_class: u8) -> DriverResult<()>;
    async fn interview(&self) -> DriverResult<()>;
    async fn interview_cc(&self, command_class: u8) -> DriverResult<()>;
    async fn wait_for_wakeup(&self) -> DriverResult<()>;
    async fn ping(&self) -> DriverResult<bool>;

    /// Pings the controller for `rounds` rounds (driver default if `None`).
    async fn check_lifeline_health(
        &self,
        rounds: Option<u8>,
    ) -> DriverResult<LifelineHealthCheckSummary>;
    async fn check_route_health(
        &self,
        target_node_id: NodeId,
        rounds: Option<u8>,
    ) -> DriverResult<RouteHealthCheckSummary>;
    /// Returns the number of test frames the test node acknowledged.
    async fn test_powerlevel(&self, test: PowerlevelTest) -> DriverResult<u16>;

    async fn set_raw_config_parameter_value(&self, parameter: RawConfigParameter)
        -> DriverResult<()>;
    /// Sets the node's clock; `None` means the controller's current time.
    async fn set_date_and_time(&self, date: Option<DateTime<Utc>>) -> DriverResult<bool>;

    fn has_security_class(&self, security_class: SecurityClass) -> Option<bool>;
    fn highest_security_class(&self) -> Option<SecurityClass>;

    fn set_name(&self, name: String);
    fn set_location(&self, location: String);
    fn set_keep_awake(&self, keep_awake: bool);

    async fn update_firmware(&self, updates: Vec<FirmwareFile>)
        -> DriverResult<FirmwareUpdateResult>;
    async fn abort_firmware_update(&self) -> DriverResult<()>;
    fn is_firmware_update_in_progress(&self) -> bool;
    async fn firmware_update_capabilities(&self) -> DriverResult<FirmwareUpdateCapabilities>;
    /// Capabilities learned during the interview, without asking the node.
    fn firmware_update_capabilities_cached(&self) -> FirmwareUpdateCapabilities;
}

// ── Virtual nodes ─────────────────────────────────────────────────────────────

/// A broadcast or multicast addressing target.
#[async_trait]
pub trait VirtualNode: Send + Sync {
    /// The physical nodes this target addresses.
    fn node_ids(&self) -> Vec<NodeId>;

    async fn set_value(
        &self,
        value_id: &ValueId,
        value: Value,
        options: Option<Value>,
    ) -> DriverResult<SetValueResult>;

    fn endpoint_count(&self) -> u16;

    /// Endpoint `0` is the virtual node itself and always exists.
    fn endpoint(&self, index: u16) -> Option<Arc<dyn VirtualEndpoint>>;

    fn defined_value_ids(&self) -> Vec<ValueId>;
}

/// One endpoint index across every node of a virtual node.
#[async_trait]
pub trait VirtualEndpoint: Send + Sync {
    fn index(&self) -> u16;
    fn supports_cc(&self, command_class: u8) -> bool;
    fn cc_version(&self, command_class: u8) -> u8;
    fn supports_cc_api(&self, command_class: u8) -> bool;
    async fn invoke_cc_api(
        &self,
        command_class: u8,
        method_name: &str,
        args: Vec<Value>,
    ) -> DriverResult<Value>;
}

// ── Inclusion callbacks ───────────────────────────────────────────────────────

/// Decisions the driver needs from a user while a node joins.
///
/// Each call suspends the inclusion until the user answers.  `None` means
/// the request was abandoned and the driver should treat it as cancelled.
#[async_trait]
pub trait InclusionUserCallbacks: Send + Sync {
    /// Asks which of the requested security classes to grant.
    async fn grant_security_classes(&self, requested: InclusionGrant) -> Option<InclusionGrant>;

    /// Shows the node's DSK and asks for the PIN printed on the device.
    async fn validate_dsk_and_enter_pin(&self, dsk: String) -> Option<String>;

    /// The driver gave up on the inclusion; outstanding requests are void.
    fn abort(&self);
}
