//! Native events published by the driver on its broadcast channels.
//!
//! These are the driver's own vocabulary.  The gateway's event forwarder
//! translates them into [`crate::protocol::messages::OutgoingEvent`] values,
//! enriching them with live snapshots and metadata on the way.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::domain::controller::RebuildRoutesStatus;
use crate::domain::firmware::{FirmwareUpdateProgress, FirmwareUpdateResult};
use crate::domain::node::{NodeId, NodeSnapshot, NodeStatus};
use crate::domain::value::{MetadataUpdatedArgs, ValueChangeArgs, ValueNotificationArgs};

/// Driver-level events.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// Every node known at startup has finished its interview.
    AllNodesReady,
}

/// Controller-level events.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// A node joined the network.  Its snapshot is read from the driver
    /// when the event is forwarded.
    NodeAdded { node_id: NodeId },
    /// A node left the network.  The driver no longer knows it, so the
    /// event carries the last snapshot.
    NodeRemoved { node: NodeSnapshot },
    InclusionStarted { secure: bool },
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
}

/// Per-node events.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// The node completed its initial interview and is fully known.
    Ready,
    InterviewStarted,
    InterviewStageCompleted { stage_name: String },
    InterviewCompleted,
    InterviewFailed { args: Value },
    StatusChanged {
        status: NodeStatus,
        old_status: NodeStatus,
    },
    ValueAdded(ValueChangeArgs),
    ValueUpdated(ValueChangeArgs),
    ValueRemoved(ValueChangeArgs),
    ValueNotification(ValueNotificationArgs),
    MetadataUpdated(MetadataUpdatedArgs),
    Notification { command_class: u8, args: Value },
    FirmwareUpdateProgress(FirmwareUpdateProgress),
    FirmwareUpdateFinished(FirmwareUpdateResult),
}

impl NodeEvent {
    /// Value events are withheld from clients until the node is ready.
    pub fn is_value_event(&self) -> bool {
        matches!(
            self,
            NodeEvent::ValueAdded(_)
                | NodeEvent::ValueUpdated(_)
                | NodeEvent::ValueRemoved(_)
                | NodeEvent::ValueNotification(_)
        )
    }
}
