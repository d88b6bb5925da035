//! Integration tests for zwave-core.
//!
//! These tests take live state out of the simulated driver through the
//! public driver traits and render it with the compatibility layer, the same
//! path the gateway uses for `node.get_state` and forwarded events.

use serde_json::json;
use zwave_core::compat::{controller_state, node_snapshot, set_value_result, shape_event};
use zwave_core::domain::{SetValueResult, SetValueStatus, ValueId, ValueMetadata, ValueType};
use zwave_core::driver::{Controller, Driver, Node};
use zwave_core::protocol::{decode_incoming, encode_outgoing, MessageId, OutgoingMessage};
use zwave_core::testing::SimulatedDriver;
use zwave_core::OutgoingEvent;

#[tokio::test]
async fn test_node_state_from_driver_is_shaped_per_version() {
    // Arrange
    let driver = SimulatedDriver::new();
    let node = driver.add_node(7);
    node.add_value(
        ValueId::new(99, "userCode").with_endpoint(0),
        ValueMetadata::new(ValueType::Buffer).with_label("User code"),
        Some(json!("abc")),
    );
    node.set_ready(true);

    // Act
    let live = driver
        .controller()
        .node(7)
        .expect("node must exist")
        .snapshot()
        .expect("snapshot must succeed");
    let v1 = node_snapshot(&live, 1);
    let v40 = node_snapshot(&live, 40);

    // Assert
    assert_eq!(v1["values"][0]["metadata"]["type"], "string");
    assert_eq!(v40["values"][0]["metadata"]["type"], "buffer");
    assert_eq!(v40["values"][0]["metadata"]["label"], "User code");
    assert_eq!(v40["ready"], true);
}

#[tokio::test]
async fn test_set_value_result_from_driver_is_shaped_per_version() {
    let driver = SimulatedDriver::new();
    let node = driver.add_node(3);
    node.set_next_set_value_result(SetValueResult::new(SetValueStatus::Fail));

    let result = driver
        .controller()
        .node(3)
        .unwrap()
        .set_value(&ValueId::new(37, "targetValue"), json!(true), None)
        .await
        .unwrap();

    assert_eq!(set_value_result(&result, 28), json!({ "success": false }));
    assert_eq!(
        set_value_result(&result, 29),
        json!({ "result": { "status": "fail" } })
    );
}

#[tokio::test]
async fn test_controller_state_reflects_route_rebuilding() {
    let driver = SimulatedDriver::new();
    driver.add_node(2);

    assert!(driver.controller().begin_rebuilding_routes());
    let state = driver.controller().state();

    assert_eq!(controller_state(&state, 31)["isHealNetworkActive"], true);
    assert_eq!(controller_state(&state, 32)["isRebuildingRoutes"], true);
}

#[test]
fn test_command_frame_to_result_frame() {
    // A client frame decodes, and the answer encodes with the same id.
    let incoming =
        decode_incoming(r#"{"messageId":"req-1","command":"node.ping","nodeId":2}"#).unwrap();
    let reply = OutgoingMessage::success(incoming.message_id.clone(), json!({ "responded": true }));

    let text = encode_outgoing(&reply).unwrap();

    assert_eq!(incoming.message_id, MessageId::Text("req-1".to_string()));
    assert_eq!(
        text,
        r#"{"type":"result","messageId":"req-1","success":true,"result":{"responded":true}}"#
    );
}

#[test]
fn test_shape_event_is_pure() {
    let event = OutgoingEvent::InclusionStarted { secure: false };
    assert_eq!(shape_event(&event, 12), shape_event(&event, 12));
    assert_eq!(
        shape_event(&event, 12),
        json!({ "source": "controller", "event": "inclusion started", "secure": false })
    );
}
