//! Plain data types shared by the driver interface, the wire protocol and the
//! compatibility layer.
//!
//! Everything here is a passive value: no I/O, no async, no locking.  The
//! driver produces these types, the gateway moves them around, and the
//! compatibility layer renders them to JSON for a particular schema version.

pub mod controller;
pub mod firmware;
pub mod health;
pub mod log;
pub mod network;
pub mod node;
pub mod value;

pub use controller::{
    ControllerState, ExclusionOptions, InclusionGrant, InclusionOptions, InclusionState,
    Powerlevel, RebuildRoutesStatus, SecurityClass, TransmitStatus,
};
pub use firmware::{
    FirmwareFile, FirmwareUpdateCapabilities, FirmwareUpdateProgress, FirmwareUpdateResult,
    FirmwareUpdateStatus,
};
pub use health::{
    LifelineHealthCheckResult, LifelineHealthCheckSummary, PowerlevelTest, RawConfigParameter,
    RouteHealthCheckResult, RouteHealthCheckSummary, MAX_HEALTH_RATING,
};
pub use log::{LogConfig, LogConfigUpdate, LogEntry, LogFilter, LogLevel};
pub use network::{
    AssociationAddress, AssociationGroup, AssociationGroups, Associations, DskOrNodeId,
    LifelineRoutes, ProvisioningEntry, ProvisioningEntryStatus, RouteStatistics,
};
pub use node::{NodeId, NodeSnapshot, NodeStatus};
pub use value::{
    MetadataUpdatedArgs, PropertyKey, SetValueResult, SetValueStatus, ValueChangeArgs, ValueId,
    ValueMetadata, ValueNotificationArgs, ValueSnapshot, ValueType,
};
