//! Per-connection command handling.
//!
//! A [`Session`] exists from the end of the handshake until the socket
//! closes.  The transport hands it every text frame; each frame is handled
//! on its own task, so a slow driver call never blocks later commands and
//! responses may complete out of order.
//!
//! Session-level commands are answered here:
//!
//! | Command                         | Effect                                         |
//! |---------------------------------|------------------------------------------------|
//! | `start_listening`               | starts the forwarder, returns the full state, enables events |
//! | `initialize` / `set_api_schema` | accepted again only with the negotiated version |
//!
//! Everything else goes to the [`CommandRouter`](crate::application::router::CommandRouter).

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};
use zwave_core::compat;
use zwave_core::protocol::{decode_incoming, recover_message_id};
use zwave_core::{IncomingMessage, OutgoingMessage};

use crate::application::gateway::{Gateway, HANDSHAKE_COMMANDS};
use crate::application::registry::{OutboundFrame, OutboundSender};
use crate::application::router::{CommandContext, RouterOutcome, RouterResult};
use crate::domain::{ClientId, GatewayError};

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    gateway: Arc<Gateway>,
    client: ClientId,
    schema_version: u32,
    outbound: OutboundSender,
}

impl Session {
    pub(crate) fn new(
        gateway: Arc<Gateway>,
        client: ClientId,
        schema_version: u32,
        outbound: OutboundSender,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                gateway,
                client,
                schema_version,
                outbound,
            }),
        }
    }

    pub fn client(&self) -> ClientId {
        self.inner.client
    }

    pub fn schema_version(&self) -> u32 {
        self.inner.schema_version
    }

    /// Answers the handshake frame that created this session.
    pub fn complete_handshake(&self, message: &IncomingMessage) {
        if let Some(agent) = message.args.get("additionalUserAgent") {
            info!("session {}: user agent {agent}", self.inner.client);
        }
        self.send(OutgoingMessage::success(message.message_id.clone(), json!({})));
    }

    /// Decodes and handles one text frame.
    ///
    /// A frame that is not a valid command is logged and skipped; if its
    /// `messageId` can still be recovered the client gets `invalidCommand`.
    pub async fn handle_text(&self, text: &str) {
        match decode_incoming(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                warn!("session {}: malformed frame: {e}", self.inner.client);
                if let Some(id) = recover_message_id(text) {
                    self.send(GatewayError::InvalidCommand(e.to_string()).to_result(id));
                }
            }
        }
    }

    /// Runs one command to completion, including any deferred effect.
    pub async fn handle_message(&self, message: IncomingMessage) {
        let id = message.message_id.clone();
        debug!(
            "session {}: command {} ({id})",
            self.inner.client, message.command
        );

        match self.execute(&message).await {
            Ok(RouterOutcome {
                result,
                deferred: None,
            }) => self.send(OutgoingMessage::success(id, result)),
            Ok(RouterOutcome {
                result,
                deferred: Some(deferred),
            }) => {
                let (frame, written) = OutboundFrame::acknowledged(OutgoingMessage::success(id, result));
                if self.inner.outbound.send(frame).is_err() || written.await.is_err() {
                    debug!(
                        "session {}: response to {} was not written",
                        self.inner.client, message.command
                    );
                }
                self.inner.gateway.router.run_deferred(deferred).await;
            }
            Err(err) => {
                debug!(
                    "session {}: command {} failed: {err}",
                    self.inner.client, message.command
                );
                self.send(err.to_result(id));
            }
        }
    }

    /// Releases everything the client held.
    pub fn disconnect(&self) {
        self.inner.gateway.registry.remove(self.inner.client);
    }

    async fn execute(&self, message: &IncomingMessage) -> RouterResult {
        let command = message.command.as_str();
        if command == "start_listening" {
            return Ok(RouterOutcome::result(self.start_listening()));
        }
        if HANDSHAKE_COMMANDS.contains(&command) {
            return self.repeat_handshake(message);
        }
        let ctx = CommandContext {
            client: self.inner.client,
            schema_version: self.inner.schema_version,
        };
        self.inner.gateway.router.dispatch(ctx, message).await
    }

    fn start_listening(&self) -> Value {
        let gateway = &self.inner.gateway;
        // First listener activates the forwarder; see `forwarder` module docs.
        gateway.forwarder.start();
        let state = self.full_state();
        gateway.registry.set_receive_events(self.inner.client, true);
        info!("session {}: listening for events", self.inner.client);
        json!({ "state": state })
    }

    /// Driver, controller and every node, shaped for this client.
    fn full_state(&self) -> Value {
        let v = self.inner.schema_version;
        let driver = self.inner.gateway.driver.as_ref();
        let controller = driver.controller();

        let nodes: Vec<Value> = controller
            .node_ids()
            .into_iter()
            .filter_map(|node_id| {
                let node = controller.node(node_id)?;
                match node.snapshot() {
                    Ok(snapshot) => Some(compat::node_snapshot(&snapshot, v)),
                    Err(e) => {
                        warn!("state of node {node_id} left out: {e}");
                        None
                    }
                }
            })
            .collect();

        json!({
            "driver": {
                "logConfig": compat::log_config(&driver.log_config(), v),
                "statisticsEnabled": driver.statistics_enabled(),
            },
            "controller": compat::controller_state(&controller.state(), v),
            "nodes": nodes,
        })
    }

    fn repeat_handshake(&self, message: &IncomingMessage) -> RouterResult {
        let requested = Gateway::negotiate(message)?;
        if requested != self.inner.schema_version {
            return Err(GatewayError::InvalidCommand(format!(
                "schema version is fixed at {} for this connection",
                self.inner.schema_version
            )));
        }
        Ok(RouterOutcome::empty())
    }

    fn send(&self, message: OutgoingMessage) {
        if self.inner.outbound.send(message.into()).is_err() {
            debug!("session {}: writer gone, frame dropped", self.inner.client);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use zwave_core::testing::SimulatedDriver;
    use zwave_core::MessageId;

    fn connect(version: u32) -> (
        Arc<SimulatedDriver>,
        Arc<Gateway>,
        Session,
        mpsc::UnboundedReceiver<OutboundFrame>,
    ) {
        let driver = Arc::new(SimulatedDriver::new());
        let gateway = Gateway::new(driver.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let session = gateway.connect("test", version, tx);
        (driver, gateway, session, rx)
    }

    fn result_json(frame: OutboundFrame) -> Value {
        serde_json::to_value(frame.message).unwrap()
    }

    #[tokio::test]
    async fn test_start_listening_returns_state_and_enables_events() {
        // Arrange
        let (driver, gateway, session, mut rx) = connect(35);
        driver.add_node(2).set_ready(true);

        // Act
        session
            .handle_text(r#"{"messageId":1,"command":"start_listening"}"#)
            .await;

        // Assert
        let json = result_json(rx.try_recv().unwrap());
        assert_eq!(json["success"], true);
        assert_eq!(json["result"]["state"]["nodes"][0]["nodeId"], 2);
        assert!(json["result"]["state"]["controller"]
            .get("isRebuildingRoutes")
            .is_some());
        assert!(gateway.forwarder().is_active());
        let info = gateway.registry().client_info(session.client()).unwrap();
        assert!(info.subscriptions.receive_events);
    }

    #[tokio::test]
    async fn test_start_listening_skips_incomplete_nodes() {
        let (driver, _gateway, session, mut rx) = connect(35);
        driver.add_node(2);
        driver.add_node(3).set_snapshot_incomplete(true);

        session
            .handle_text(r#"{"messageId":1,"command":"start_listening"}"#)
            .await;

        let json = result_json(rx.try_recv().unwrap());
        assert_eq!(json["result"]["state"]["nodes"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_with_id_gets_invalid_command() {
        let (_driver, _gateway, session, mut rx) = connect(35);

        session.handle_text(r#"{"messageId":"abc","command":5}"#).await;

        let json = result_json(rx.try_recv().unwrap());
        assert_eq!(json["messageId"], "abc");
        assert_eq!(json["errorCode"], "invalidCommand");
    }

    #[tokio::test]
    async fn test_unparseable_frame_is_skipped() {
        let (_driver, _gateway, session, mut rx) = connect(35);
        session.handle_text("not json").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_hard_reset_runs_after_response_is_written() {
        // Arrange
        let (driver, _gateway, session, mut rx) = connect(35);
        let task = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .handle_text(r#"{"messageId":9,"command":"driver.hard_reset"}"#)
                    .await
            }
        });

        // Act: the writer has the frame but has not written it yet
        let frame = rx.recv().await.unwrap();
        tokio::task::yield_now().await;
        assert!(!driver.calls().contains(&"driver.hard_reset".to_string()));
        assert_eq!(result_json_ref(&frame)["messageId"], 9);
        frame.written.unwrap().send(()).unwrap();
        task.await.unwrap();

        // Assert
        assert!(driver.calls().contains(&"driver.hard_reset".to_string()));
    }

    fn result_json_ref(frame: &OutboundFrame) -> Value {
        serde_json::to_value(&frame.message).unwrap()
    }

    #[tokio::test]
    async fn test_repeat_handshake_must_keep_version() {
        let (_driver, _gateway, session, mut rx) = connect(30);

        session
            .handle_message(IncomingMessage::new(
                MessageId::Number(1),
                "set_api_schema",
                json!({"schemaVersion": 30}),
            ))
            .await;
        session
            .handle_message(IncomingMessage::new(
                MessageId::Number(2),
                "set_api_schema",
                json!({"schemaVersion": 31}),
            ))
            .await;

        assert_eq!(result_json(rx.try_recv().unwrap())["success"], true);
        assert_eq!(
            result_json(rx.try_recv().unwrap())["errorCode"],
            "invalidCommand"
        );
    }

    #[tokio::test]
    async fn test_complete_handshake_sends_empty_result() {
        let (_driver, _gateway, session, mut rx) = connect(35);
        session.complete_handshake(&IncomingMessage::new(
            MessageId::Number(1),
            "initialize",
            json!({"schemaVersion": 35, "additionalUserAgent": {"app": "1.0"}}),
        ));
        let json = result_json(rx.try_recv().unwrap());
        assert_eq!(json["result"], json!({}));
    }

    #[tokio::test]
    async fn test_disconnect_releases_log_subscription() {
        let (_driver, gateway, session, _rx) = connect(35);
        session
            .handle_text(r#"{"messageId":1,"command":"driver.start_listening_logs"}"#)
            .await;
        assert!(gateway.registry().is_log_forwarder_active());

        session.disconnect();

        assert!(!gateway.registry().is_log_forwarder_active());
        assert_eq!(gateway.registry().client_count(), 0);
    }
}
