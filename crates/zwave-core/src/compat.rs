//! Schema compatibility layer.
//!
//! Clients pin a schema version during the handshake and keep it for the
//! lifetime of the connection.  Several payloads changed shape over the
//! protocol's history; every function here takes a typed payload plus the
//! recipient's version and returns the JSON that client expects.
//!
//! The functions are pure: same `(payload, version)` in, same JSON out.  They
//! never touch the driver.
//!
//! # Thresholds
//!
//! | Version | Change |
//! |---------|--------|
//! | 2  | metadata type `buffer` introduced (older clients see `string`) |
//! | 3  | log level reported as a name instead of an npm number |
//! | 29 | set-value and firmware results wrapped in `result` instead of a bare `success` flag |
//! | 32 | "heal network" renamed to "rebuild routes" in state and events |

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::domain::controller::ControllerState;
use crate::domain::firmware::FirmwareUpdateResult;
use crate::domain::log::LogConfig;
use crate::domain::node::NodeSnapshot;
use crate::domain::value::{SetValueResult, ValueMetadata, ValueType};
use crate::protocol::messages::{OutgoingEvent, OutgoingMessage};

/// First version that understands the `buffer` metadata type.
pub const BUFFER_METADATA_VERSION: u32 = 2;

/// First version that receives log levels by name.
pub const NAMED_LOG_LEVEL_VERSION: u32 = 3;

/// First version that receives `{result}` from value writes and firmware
/// updates, and the detailed firmware progress object.
pub const RESULT_OBJECT_VERSION: u32 = 29;

/// First version that uses the "rebuild routes" vocabulary.
pub const REBUILD_ROUTES_VERSION: u32 = 32;

/// The two route-rebuilding events whose names depend on the version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildRoutesEvent {
    Progress,
    Done,
}

// ── Results ───────────────────────────────────────────────────────────────────

/// Shapes the outcome of `set_value` on a node, broadcast node or multicast group.
pub fn set_value_result(result: &SetValueResult, version: u32) -> Value {
    if version < RESULT_OBJECT_VERSION {
        json!({ "success": result.status.is_success() })
    } else {
        json!({ "result": to_json(result) })
    }
}

/// Shapes the outcome of a firmware update command.
pub fn firmware_update_result(result: &FirmwareUpdateResult, version: u32) -> Value {
    if version < RESULT_OBJECT_VERSION {
        json!({ "success": result.success })
    } else {
        json!({ "result": to_json(result) })
    }
}

pub fn value_metadata(metadata: &ValueMetadata, version: u32) -> Value {
    let mut json = to_json(metadata);
    if version < BUFFER_METADATA_VERSION && metadata.value_type == ValueType::Buffer {
        json["type"] = Value::from("string");
    }
    json
}

/// Shapes a node snapshot, rewriting the metadata of every contained value.
pub fn node_snapshot(node: &NodeSnapshot, version: u32) -> Value {
    let mut json = to_json(node);
    if let Some(Value::Array(values)) = json.get_mut("values") {
        for (value_json, value) in values.iter_mut().zip(&node.values) {
            value_json["metadata"] = value_metadata(&value.metadata, version);
        }
    }
    json
}

pub fn controller_state(state: &ControllerState, version: u32) -> Value {
    let mut json = to_json(state);
    if version < REBUILD_ROUTES_VERSION {
        if let Value::Object(map) = &mut json {
            if let Some(flag) = map.remove("isRebuildingRoutes") {
                map.insert("isHealNetworkActive".to_string(), flag);
            }
        }
    }
    json
}

pub fn log_config(config: &LogConfig, version: u32) -> Value {
    let mut json = to_json(config);
    if version < NAMED_LOG_LEVEL_VERSION {
        json["level"] = Value::from(config.level.numeric());
    }
    json
}

pub fn rebuild_routes_event_name(event: RebuildRoutesEvent, version: u32) -> &'static str {
    match (event, version < REBUILD_ROUTES_VERSION) {
        (RebuildRoutesEvent::Progress, true) => "heal network progress",
        (RebuildRoutesEvent::Done, true) => "heal network done",
        (RebuildRoutesEvent::Progress, false) => "rebuild routes progress",
        (RebuildRoutesEvent::Done, false) => "rebuild routes done",
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Renders an event body (`{source, event, ...fields}`) for one recipient.
pub fn shape_event(event: &OutgoingEvent, version: u32) -> Value {
    let (name, fields): (&str, Value) = match event {
        OutgoingEvent::AllNodesReady => ("all nodes ready", json!({})),
        OutgoingEvent::LogConfigUpdated { config } => (
            "log config updated",
            json!({ "config": log_config(config, version) }),
        ),
        OutgoingEvent::Logging { entry } => ("logging", to_json(entry)),

        OutgoingEvent::NodeAdded { node } => {
            ("node added", json!({ "node": node_snapshot(node, version) }))
        }
        OutgoingEvent::NodeRemoved { node } => (
            "node removed",
            json!({ "node": node_snapshot(node, version) }),
        ),
        OutgoingEvent::InclusionStarted { secure } => {
            ("inclusion started", json!({ "secure": secure }))
        }
        OutgoingEvent::InclusionFailed => ("inclusion failed", json!({})),
        OutgoingEvent::InclusionStopped => ("inclusion stopped", json!({})),
        OutgoingEvent::ExclusionStarted => ("exclusion started", json!({})),
        OutgoingEvent::ExclusionFailed => ("exclusion failed", json!({})),
        OutgoingEvent::ExclusionStopped => ("exclusion stopped", json!({})),
        OutgoingEvent::RebuildRoutesProgress { progress } => (
            rebuild_routes_event_name(RebuildRoutesEvent::Progress, version),
            json!({ "progress": to_json(progress) }),
        ),
        OutgoingEvent::RebuildRoutesDone { result } => (
            rebuild_routes_event_name(RebuildRoutesEvent::Done, version),
            json!({ "result": to_json(result) }),
        ),
        OutgoingEvent::GrantSecurityClasses { requested } => (
            "grant security classes",
            json!({ "requested": to_json(requested) }),
        ),
        OutgoingEvent::ValidateDskAndEnterPin { dsk } => {
            ("validate dsk and enter pin", json!({ "dsk": dsk }))
        }
        OutgoingEvent::InclusionAborted => ("inclusion aborted", json!({})),

        OutgoingEvent::NodeReady {
            node_id,
            node_state,
        } => (
            "ready",
            json!({ "nodeId": node_id, "nodeState": node_snapshot(node_state, version) }),
        ),
        OutgoingEvent::InterviewCompleted {
            node_id,
            node_state,
        } => (
            "interview completed",
            json!({ "nodeId": node_id, "nodeState": node_snapshot(node_state, version) }),
        ),
        OutgoingEvent::InterviewStarted { node_id } => {
            ("interview started", json!({ "nodeId": node_id }))
        }
        OutgoingEvent::InterviewStageCompleted {
            node_id,
            stage_name,
        } => (
            "interview stage completed",
            json!({ "nodeId": node_id, "stageName": stage_name }),
        ),
        OutgoingEvent::InterviewFailed { node_id, args } => (
            "interview failed",
            json!({ "nodeId": node_id, "args": args }),
        ),
        OutgoingEvent::StatusChanged {
            node_id,
            status,
            old_status,
        } => (
            status.event_name().unwrap_or("status changed"),
            json!({ "nodeId": node_id, "oldStatus": to_json(old_status) }),
        ),
        OutgoingEvent::ValueChanged {
            node_id,
            kind,
            args,
            metadata,
        } => (
            kind.event_name(),
            json!({
                "nodeId": node_id,
                "args": to_json(args),
                "metadata": value_metadata(metadata, version),
            }),
        ),
        OutgoingEvent::ValueNotification {
            node_id,
            value_state,
        } => {
            let mut state = to_json(value_state);
            state["metadata"] = value_metadata(&value_state.metadata, version);
            (
                "value notification",
                json!({ "nodeId": node_id, "valueState": state }),
            )
        }
        OutgoingEvent::MetadataUpdated { node_id, args } => {
            let mut args_json = to_json(args);
            if let Some(metadata) = &args.metadata {
                args_json["metadata"] = value_metadata(metadata, version);
            }
            (
                "metadata updated",
                json!({ "nodeId": node_id, "args": args_json }),
            )
        }
        OutgoingEvent::Notification {
            node_id,
            cc_id,
            args,
        } => (
            "notification",
            json!({ "nodeId": node_id, "ccId": cc_id, "args": args }),
        ),
        OutgoingEvent::FirmwareUpdateProgress { node_id, progress } => {
            let fields = if version < RESULT_OBJECT_VERSION {
                json!({
                    "nodeId": node_id,
                    "sentFragments": progress.sent_fragments,
                    "totalFragments": progress.total_fragments,
                })
            } else {
                json!({ "nodeId": node_id, "progress": to_json(progress) })
            };
            ("firmware update progress", fields)
        }
        OutgoingEvent::FirmwareUpdateFinished { node_id, result } => {
            let fields = if version < RESULT_OBJECT_VERSION {
                json!({
                    "nodeId": node_id,
                    "status": to_json(&result.status),
                    "waitTime": result.wait_time,
                })
            } else {
                json!({ "nodeId": node_id, "result": to_json(result) })
            };
            ("firmware update finished", fields)
        }
    };

    let mut body = Map::new();
    body.insert("source".to_string(), to_json(&event.source()));
    body.insert("event".to_string(), Value::from(name));
    if let Value::Object(extra) = fields {
        body.extend(extra);
    }
    Value::Object(body)
}

/// Wraps a shaped event in its `{"type":"event"}` envelope.
pub fn event_message(event: &OutgoingEvent, version: u32) -> OutgoingMessage {
    OutgoingMessage::Event {
        event: shape_event(event, version),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!("failed to serialize payload: {e}");
        Value::Null
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::domain::controller::{InclusionGrant, RebuildRoutesStatus, SecurityClass};
    use crate::domain::firmware::{FirmwareUpdateProgress, FirmwareUpdateStatus};
    use crate::domain::log::LogLevel;
    use crate::domain::node::NodeStatus;
    use crate::domain::value::{SetValueStatus, ValueChangeArgs, ValueId, ValueSnapshot};
    use crate::protocol::messages::ValueEventKind;

    fn node_with_buffer_value() -> NodeSnapshot {
        NodeSnapshot {
            node_id: 5,
            name: Some("Lamp".to_string()),
            location: None,
            status: NodeStatus::Alive,
            ready: true,
            interview_stage: "Complete".to_string(),
            highest_security_class: Some(SecurityClass::S2Authenticated),
            manufacturer_id: Some(0x0086),
            product_id: Some(0x0060),
            product_type: Some(0x0003),
            firmware_version: Some("1.2".to_string()),
            endpoint_count: 0,
            keep_awake: false,
            values: vec![ValueSnapshot {
                value_id: ValueId::new(99, "userCode"),
                cc_version: 1,
                metadata: ValueMetadata::new(ValueType::Buffer),
                value: None,
            }],
        }
    }

    // ── set_value_result ──────────────────────────────────────────────────────

    #[test]
    fn test_set_value_result_before_29_is_bare_success_flag() {
        // Arrange
        let result = SetValueResult::new(SetValueStatus::SuccessUnsupervised);

        // Act
        let shaped = set_value_result(&result, 28);

        // Assert
        assert_eq!(shaped, json!({ "success": true }));
    }

    #[test]
    fn test_set_value_result_failure_before_29_is_false() {
        let result = SetValueResult::new(SetValueStatus::Fail);
        assert_eq!(set_value_result(&result, 0), json!({ "success": false }));
    }

    #[test]
    fn test_set_value_result_from_29_wraps_result_object() {
        let result = SetValueResult::new(SetValueStatus::Success);
        assert_eq!(
            set_value_result(&result, 29),
            json!({ "result": { "status": "success" } })
        );
    }

    #[test]
    fn test_same_result_gives_different_shapes_on_each_side_of_threshold() {
        let result = SetValueResult::new(SetValueStatus::Working);
        let old = set_value_result(&result, 28);
        let new = set_value_result(&result, 40);
        assert!(old.get("success").is_some() && old.get("result").is_none());
        assert!(new.get("result").is_some() && new.get("success").is_none());
    }

    // ── firmware_update_result ────────────────────────────────────────────────

    #[test]
    fn test_firmware_result_threshold() {
        let result = FirmwareUpdateResult::from_status(FirmwareUpdateStatus::ErrorChecksum);
        assert_eq!(firmware_update_result(&result, 28), json!({ "success": false }));
        let shaped = firmware_update_result(&result, 29);
        assert_eq!(shaped["result"]["status"], "error_checksum");
        assert_eq!(shaped["result"]["success"], false);
    }

    // ── metadata and snapshots ────────────────────────────────────────────────

    #[test]
    fn test_buffer_metadata_reported_as_string_before_2() {
        let meta = ValueMetadata::new(ValueType::Buffer);
        assert_eq!(value_metadata(&meta, 0)["type"], "string");
        assert_eq!(value_metadata(&meta, 1)["type"], "string");
        assert_eq!(value_metadata(&meta, 2)["type"], "buffer");
    }

    #[test]
    fn test_non_buffer_metadata_unchanged_before_2() {
        let meta = ValueMetadata::new(ValueType::NumberArray);
        assert_eq!(value_metadata(&meta, 0)["type"], "number[]");
    }

    #[test]
    fn test_node_snapshot_rewrites_nested_metadata() {
        // Arrange
        let node = node_with_buffer_value();

        // Act
        let old = node_snapshot(&node, 1);
        let new = node_snapshot(&node, 2);

        // Assert
        assert_eq!(old["values"][0]["metadata"]["type"], "string");
        assert_eq!(new["values"][0]["metadata"]["type"], "buffer");
        assert_eq!(old["nodeId"], 5);
        assert_eq!(old["values"][0]["commandClass"], 99);
    }

    // ── controller state and events: routing rename ──────────────────────────

    #[test]
    fn test_controller_state_routing_flag_renamed_before_32() {
        let state = ControllerState {
            is_rebuilding_routes: true,
            ..Default::default()
        };
        let old = controller_state(&state, 31);
        assert_eq!(old["isHealNetworkActive"], true);
        assert!(old.get("isRebuildingRoutes").is_none());

        let new = controller_state(&state, 32);
        assert_eq!(new["isRebuildingRoutes"], true);
        assert!(new.get("isHealNetworkActive").is_none());
    }

    #[test]
    fn test_rebuild_routes_event_names() {
        assert_eq!(
            rebuild_routes_event_name(RebuildRoutesEvent::Progress, 31),
            "heal network progress"
        );
        assert_eq!(
            rebuild_routes_event_name(RebuildRoutesEvent::Done, 31),
            "heal network done"
        );
        assert_eq!(
            rebuild_routes_event_name(RebuildRoutesEvent::Progress, 32),
            "rebuild routes progress"
        );
        assert_eq!(
            rebuild_routes_event_name(RebuildRoutesEvent::Done, 40),
            "rebuild routes done"
        );
    }

    #[test]
    fn test_shape_rebuild_routes_done_event_per_version() {
        let mut result = BTreeMap::new();
        result.insert(3u16, RebuildRoutesStatus::Done);
        result.insert(7u16, RebuildRoutesStatus::Failed);
        let event = OutgoingEvent::RebuildRoutesDone { result };

        let old = shape_event(&event, 20);
        let new = shape_event(&event, 35);

        assert_eq!(old["source"], "controller");
        assert_eq!(old["event"], "heal network done");
        assert_eq!(new["event"], "rebuild routes done");
        assert_eq!(new["result"]["3"], "done");
        assert_eq!(new["result"]["7"], "failed");
    }

    // ── log config ────────────────────────────────────────────────────────────

    #[test]
    fn test_log_level_numeric_before_3() {
        let config = LogConfig {
            level: LogLevel::Debug,
            ..Default::default()
        };
        assert_eq!(log_config(&config, 2)["level"], 5);
        assert_eq!(log_config(&config, 3)["level"], "debug");
    }

    // ── shape_event ───────────────────────────────────────────────────────────

    #[test]
    fn test_shape_ready_event_carries_full_node_state() {
        let event = OutgoingEvent::NodeReady {
            node_id: 5,
            node_state: node_with_buffer_value(),
        };
        let shaped = shape_event(&event, 1);
        assert_eq!(shaped["source"], "node");
        assert_eq!(shaped["event"], "ready");
        assert_eq!(shaped["nodeId"], 5);
        assert_eq!(shaped["nodeState"]["name"], "Lamp");
        assert_eq!(shaped["nodeState"]["values"][0]["metadata"]["type"], "string");
    }

    #[test]
    fn test_shape_value_updated_includes_metadata() {
        let event = OutgoingEvent::ValueChanged {
            node_id: 2,
            kind: ValueEventKind::Updated,
            args: ValueChangeArgs {
                value_id: ValueId::new(37, "currentValue"),
                prev_value: Some(json!(false)),
                new_value: Some(json!(true)),
            },
            metadata: ValueMetadata::new(ValueType::Boolean).with_label("Current value"),
        };
        let shaped = shape_event(&event, 40);
        assert_eq!(
            shaped,
            json!({
                "source": "node",
                "event": "value updated",
                "nodeId": 2,
                "args": {
                    "commandClass": 37,
                    "property": "currentValue",
                    "prevValue": false,
                    "newValue": true
                },
                "metadata": {
                    "type": "boolean",
                    "readable": true,
                    "writeable": true,
                    "label": "Current value"
                }
            })
        );
    }

    #[test]
    fn test_shape_status_events_use_status_name() {
        let event = OutgoingEvent::StatusChanged {
            node_id: 9,
            status: NodeStatus::Awake,
            old_status: NodeStatus::Asleep,
        };
        let shaped = shape_event(&event, 10);
        assert_eq!(shaped["event"], "wake up");
        assert_eq!(shaped["oldStatus"], "asleep");
    }

    #[test]
    fn test_shape_firmware_progress_per_version() {
        let event = OutgoingEvent::FirmwareUpdateProgress {
            node_id: 4,
            progress: FirmwareUpdateProgress {
                current_file: 1,
                total_files: 1,
                sent_fragments: 10,
                total_fragments: 40,
                progress: 25.0,
            },
        };
        let old = shape_event(&event, 28);
        assert_eq!(old["sentFragments"], 10);
        assert_eq!(old["totalFragments"], 40);
        assert!(old.get("progress").is_none());

        let new = shape_event(&event, 29);
        assert_eq!(new["progress"]["progress"], 25.0);
        assert!(new.get("sentFragments").is_none());
    }

    #[test]
    fn test_shape_firmware_finished_per_version() {
        let mut result = FirmwareUpdateResult::from_status(FirmwareUpdateStatus::OkWaitingForActivation);
        result.wait_time = Some(30);
        let event = OutgoingEvent::FirmwareUpdateFinished { node_id: 4, result };

        let old = shape_event(&event, 5);
        assert_eq!(old["status"], "ok_waiting_for_activation");
        assert_eq!(old["waitTime"], 30);

        let new = shape_event(&event, 40);
        assert_eq!(new["result"]["success"], true);
        assert_eq!(new["result"]["waitTime"], 30);
    }

    #[test]
    fn test_shape_grant_security_classes_request() {
        let event = OutgoingEvent::GrantSecurityClasses {
            requested: InclusionGrant {
                security_classes: vec![SecurityClass::S2Authenticated],
                client_side_auth: false,
            },
        };
        let shaped = shape_event(&event, 40);
        assert_eq!(shaped["source"], "controller");
        assert_eq!(shaped["event"], "grant security classes");
        assert_eq!(
            shaped["requested"],
            json!({ "securityClasses": ["s2_authenticated"], "clientSideAuth": false })
        );
    }

    #[test]
    fn test_event_message_wraps_shaped_body() {
        let msg = event_message(&OutgoingEvent::AllNodesReady, 40);
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "event", "event": { "source": "driver", "event": "all nodes ready" } })
        );
    }
}
