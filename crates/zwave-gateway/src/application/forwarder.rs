//! Forwards driver, controller and node events to listening clients.
//!
//! The forwarder starts with the first `start_listening`, not when the
//! driver becomes ready.  Events raised before that are not replayed; the
//! listener's `start_listening` result carries the full state instead.
//! Once started it runs for the lifetime of the process:
//!
//! ```text
//!  Driver::subscribe()      ──► driver task     ──┐
//!  Controller::subscribe()  ──► controller task ──┼──► ClientRegistry::broadcast_event
//!  Node(2)::subscribe()     ──► node 2 task     ──┤      (shaped per client version)
//!  Node(3)::subscribe()     ──► node 3 task     ──┘
//! ```
//!
//! One task per node keeps each node's events in order.  Nodes that join
//! later are picked up from `node added`; every node is watched at most once.
//! An inclusion that stops or fails releases the inclusion bridge's client
//! before the event goes out.
//!
//! The `translate_*` functions are synchronous and hold the filtering and
//! enrichment rules, so they can be tested without spawning anything.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zwave_core::domain::ValueSnapshot;
use zwave_core::driver::{Controller, ControllerEvent, DriverEvent, Node, NodeEvent};
use zwave_core::protocol::ValueEventKind;
use zwave_core::{Driver, NodeId, NodeStatus, OutgoingEvent};

use crate::application::inclusion::InclusionBridge;
use crate::application::registry::ClientRegistry;

#[derive(Default)]
struct ForwarderState {
    active: bool,
    source_tasks: Vec<JoinHandle<()>>,
    node_tasks: HashMap<NodeId, JoinHandle<()>>,
}

pub struct EventForwarder {
    driver: Arc<dyn Driver>,
    registry: Arc<ClientRegistry>,
    inclusion: Arc<InclusionBridge>,
    state: Mutex<ForwarderState>,
}

impl EventForwarder {
    pub fn new(
        driver: Arc<dyn Driver>,
        registry: Arc<ClientRegistry>,
        inclusion: Arc<InclusionBridge>,
    ) -> Arc<Self> {
        Arc::new(Self {
            driver,
            registry,
            inclusion,
            state: Mutex::new(ForwarderState::default()),
        })
    }

    pub fn is_active(&self) -> bool {
        self.lock_state().active
    }

    /// Number of nodes currently watched.
    pub fn watched_nodes(&self) -> usize {
        self.lock_state().node_tasks.len()
    }

    /// Subscribes to every event source.  Later calls do nothing.
    ///
    /// Returns `true` if this call activated the forwarder.
    pub fn start(self: &Arc<Self>) -> bool {
        {
            let mut state = self.lock_state();
            if state.active {
                return false;
            }
            state.active = true;
        }
        info!("event forwarder starting");

        // Subscribe to the controller before enumerating nodes so a node that
        // joins in between is not missed; watch_node deduplicates.
        let driver_task = self.spawn_driver_task(self.driver.subscribe());
        let controller_task = self.spawn_controller_task(self.driver.controller().subscribe());
        self.lock_state()
            .source_tasks
            .extend([driver_task, controller_task]);

        let controller = self.driver.controller();
        for node_id in controller.node_ids() {
            if let Some(node) = controller.node(node_id) {
                self.watch_node(node);
            }
        }
        true
    }

    /// Aborts every forwarding task and returns to the inactive state.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        for task in state.source_tasks.drain(..) {
            task.abort();
        }
        for (_, task) in state.node_tasks.drain() {
            task.abort();
        }
        state.active = false;
    }

    /// Starts forwarding one node's events.  Returns `false` if it is
    /// already watched.
    pub fn watch_node(self: &Arc<Self>, node: Arc<dyn Node>) -> bool {
        let mut state = self.lock_state();
        let node_id = node.id();
        if state.node_tasks.contains_key(&node_id) {
            return false;
        }
        let events = node.subscribe();
        let registry = Arc::clone(&self.registry);
        let task = tokio::spawn(async move {
            let source = format!("node {node_id}");
            forward_loop(events, &source, |event| {
                if let Some(out) = translate_node_event(node.as_ref(), event) {
                    registry.broadcast_event(&out);
                }
            })
            .await;
        });
        state.node_tasks.insert(node_id, task);
        debug!("watching node {node_id}");
        true
    }

    fn unwatch_node(&self, node_id: NodeId) {
        if let Some(task) = self.lock_state().node_tasks.remove(&node_id) {
            task.abort();
            debug!("stopped watching node {node_id}");
        }
    }

    fn spawn_driver_task(&self, events: broadcast::Receiver<DriverEvent>) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            forward_loop(events, "driver", |event| {
                registry.broadcast_event(&translate_driver_event(event));
            })
            .await;
        })
    }

    fn spawn_controller_task(
        self: &Arc<Self>,
        events: broadcast::Receiver<ControllerEvent>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            forward_loop(events, "controller", |event| {
                let controller = this.driver.controller();
                let added = match &event {
                    ControllerEvent::NodeAdded { node_id } => Some(*node_id),
                    _ => None,
                };
                match &event {
                    ControllerEvent::NodeRemoved { node } => this.unwatch_node(node.node_id),
                    ControllerEvent::InclusionStopped | ControllerEvent::InclusionFailed => {
                        this.inclusion.release()
                    }
                    _ => {}
                }
                if let Some(out) = translate_controller_event(controller, event) {
                    this.registry.broadcast_event(&out);
                }
                if let Some(node) = added.and_then(|id| controller.node(id)) {
                    this.watch_node(node);
                }
            })
            .await;
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, ForwarderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Drains `events` until the channel closes, logging and skipping gaps.
async fn forward_loop<E: Clone>(
    mut events: broadcast::Receiver<E>,
    source: &str,
    mut handle: impl FnMut(E),
) {
    loop {
        match events.recv().await {
            Ok(event) => handle(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!("{source} event stream lagged; {skipped} events dropped");
            }
            Err(RecvError::Closed) => {
                debug!("{source} event stream closed");
                break;
            }
        }
    }
}

// ── Translation ───────────────────────────────────────────────────────────────

pub fn translate_driver_event(event: DriverEvent) -> OutgoingEvent {
    match event {
        DriverEvent::AllNodesReady => OutgoingEvent::AllNodesReady,
    }
}

/// `None` when the event cannot be forwarded (e.g. the added node vanished).
pub fn translate_controller_event(
    controller: &dyn Controller,
    event: ControllerEvent,
) -> Option<OutgoingEvent> {
    let out = match event {
        ControllerEvent::NodeAdded { node_id } => {
            let Some(node) = controller.node(node_id) else {
                warn!("node {node_id} added but unknown to the controller; event dropped");
                return None;
            };
            match node.snapshot() {
                Ok(snapshot) => OutgoingEvent::NodeAdded { node: snapshot },
                Err(e) => {
                    warn!("snapshot of added node {node_id} failed: {e}; event dropped");
                    return None;
                }
            }
        }
        ControllerEvent::NodeRemoved { node } => OutgoingEvent::NodeRemoved { node },
        ControllerEvent::InclusionStarted { secure } => OutgoingEvent::InclusionStarted { secure },
        ControllerEvent::InclusionFailed => OutgoingEvent::InclusionFailed,
        ControllerEvent::InclusionStopped => OutgoingEvent::InclusionStopped,
        ControllerEvent::ExclusionStarted => OutgoingEvent::ExclusionStarted,
        ControllerEvent::ExclusionFailed => OutgoingEvent::ExclusionFailed,
        ControllerEvent::ExclusionStopped => OutgoingEvent::ExclusionStopped,
        ControllerEvent::RebuildRoutesProgress { progress } => {
            OutgoingEvent::RebuildRoutesProgress { progress }
        }
        ControllerEvent::RebuildRoutesDone { result } => OutgoingEvent::RebuildRoutesDone { result },
    };
    Some(out)
}

/// Enriches one node event with live state.
///
/// Value events of a node that is not ready yet are dropped, as is any event
/// whose snapshot cannot be built.
pub fn translate_node_event(node: &dyn Node, event: NodeEvent) -> Option<OutgoingEvent> {
    let node_id = node.id();
    if event.is_value_event() && !node.is_ready() {
        debug!("node {node_id} not ready; value event dropped");
        return None;
    }

    let snapshot = || match node.snapshot() {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!("snapshot of node {node_id} failed: {e}; event dropped");
            None
        }
    };

    let out = match event {
        NodeEvent::Ready => OutgoingEvent::NodeReady {
            node_id,
            node_state: snapshot()?,
        },
        NodeEvent::InterviewCompleted => OutgoingEvent::InterviewCompleted {
            node_id,
            node_state: snapshot()?,
        },
        NodeEvent::InterviewStarted => OutgoingEvent::InterviewStarted { node_id },
        NodeEvent::InterviewStageCompleted { stage_name } => {
            OutgoingEvent::InterviewStageCompleted {
                node_id,
                stage_name,
            }
        }
        NodeEvent::InterviewFailed { args } => OutgoingEvent::InterviewFailed { node_id, args },
        NodeEvent::StatusChanged { status, old_status } => {
            if status == NodeStatus::Unknown {
                return None;
            }
            OutgoingEvent::StatusChanged {
                node_id,
                status,
                old_status,
            }
        }
        NodeEvent::ValueAdded(args) => value_changed(node, ValueEventKind::Added, args),
        NodeEvent::ValueUpdated(args) => value_changed(node, ValueEventKind::Updated, args),
        NodeEvent::ValueRemoved(args) => value_changed(node, ValueEventKind::Removed, args),
        NodeEvent::ValueNotification(args) => OutgoingEvent::ValueNotification {
            node_id,
            value_state: ValueSnapshot {
                cc_version: node.cc_version(args.value_id.command_class),
                metadata: node.value_metadata(&args.value_id),
                value_id: args.value_id,
                value: Some(args.value),
            },
        },
        NodeEvent::MetadataUpdated(args) => OutgoingEvent::MetadataUpdated { node_id, args },
        NodeEvent::Notification {
            command_class,
            args,
        } => OutgoingEvent::Notification {
            node_id,
            cc_id: command_class,
            args,
        },
        NodeEvent::FirmwareUpdateProgress(progress) => {
            OutgoingEvent::FirmwareUpdateProgress { node_id, progress }
        }
        NodeEvent::FirmwareUpdateFinished(result) => {
            OutgoingEvent::FirmwareUpdateFinished { node_id, result }
        }
    };
    Some(out)
}

fn value_changed(
    node: &dyn Node,
    kind: ValueEventKind,
    args: zwave_core::domain::ValueChangeArgs,
) -> OutgoingEvent {
    OutgoingEvent::ValueChanged {
        node_id: node.id(),
        kind,
        metadata: node.value_metadata(&args.value_id),
        args,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;
    use zwave_core::domain::{ValueChangeArgs, ValueNotificationArgs};
    use zwave_core::testing::SimulatedDriver;
    use zwave_core::{ValueId, ValueMetadata, ValueType};

    use crate::domain::ClientInfo;

    fn driver_with_node(id: NodeId, ready: bool) -> Arc<SimulatedDriver> {
        let driver = Arc::new(SimulatedDriver::new());
        let node = driver.add_node(id);
        node.add_value(
            ValueId::new(37, "currentValue"),
            ValueMetadata::new(ValueType::Boolean).with_label("Current value"),
            Some(json!(false)),
        );
        node.set_ready(ready);
        driver
    }

    fn forwarder_for(driver: &Arc<SimulatedDriver>) -> Arc<EventForwarder> {
        let registry = ClientRegistry::new(driver.clone());
        let inclusion = InclusionBridge::new(registry.clone());
        EventForwarder::new(driver.clone(), registry, inclusion)
    }

    fn update(property: &str) -> NodeEvent {
        NodeEvent::ValueUpdated(ValueChangeArgs {
            value_id: ValueId::new(37, property),
            prev_value: Some(json!(false)),
            new_value: Some(json!(true)),
        })
    }

    #[test]
    fn test_value_event_dropped_until_node_ready() {
        // Arrange
        let driver = driver_with_node(4, false);
        let node = driver.controller().node(4).unwrap();

        // Act / Assert
        assert!(translate_node_event(node.as_ref(), update("currentValue")).is_none());

        driver.node_handle(4).unwrap().set_ready(true);
        assert!(translate_node_event(node.as_ref(), update("currentValue")).is_some());
    }

    #[test]
    fn test_value_event_carries_live_metadata() {
        let driver = driver_with_node(4, true);
        let node = driver.controller().node(4).unwrap();

        let out = translate_node_event(node.as_ref(), update("currentValue")).unwrap();

        match out {
            OutgoingEvent::ValueChanged { kind, metadata, .. } => {
                assert_eq!(kind, ValueEventKind::Updated);
                assert_eq!(metadata.value_type, ValueType::Boolean);
                assert_eq!(metadata.label.as_deref(), Some("Current value"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_value_gets_default_metadata() {
        let driver = driver_with_node(4, true);
        let node = driver.controller().node(4).unwrap();
        match translate_node_event(node.as_ref(), update("nope")).unwrap() {
            OutgoingEvent::ValueChanged { metadata, .. } => {
                assert_eq!(metadata, ValueMetadata::default())
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_value_notification_builds_value_state() {
        let driver = driver_with_node(4, true);
        let node = driver.controller().node(4).unwrap();
        let event = NodeEvent::ValueNotification(ValueNotificationArgs {
            value_id: ValueId::new(37, "currentValue"),
            value: json!(true),
        });

        match translate_node_event(node.as_ref(), event).unwrap() {
            OutgoingEvent::ValueNotification { value_state, .. } => {
                assert_eq!(value_state.value, Some(json!(true)));
                assert_eq!(value_state.metadata.value_type, ValueType::Boolean);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ready_with_incomplete_snapshot_is_dropped() {
        let driver = driver_with_node(4, true);
        driver.node_handle(4).unwrap().set_snapshot_incomplete(true);
        let node = driver.controller().node(4).unwrap();
        assert!(translate_node_event(node.as_ref(), NodeEvent::Ready).is_none());
    }

    #[test]
    fn test_ready_carries_node_state() {
        let driver = driver_with_node(4, true);
        let node = driver.controller().node(4).unwrap();
        match translate_node_event(node.as_ref(), NodeEvent::Ready).unwrap() {
            OutgoingEvent::NodeReady { node_state, .. } => assert_eq!(node_state.node_id, 4),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_status_is_not_forwarded() {
        let driver = driver_with_node(4, true);
        let node = driver.controller().node(4).unwrap();
        let event = NodeEvent::StatusChanged {
            status: NodeStatus::Unknown,
            old_status: NodeStatus::Alive,
        };
        assert!(translate_node_event(node.as_ref(), event).is_none());
    }

    #[test]
    fn test_added_node_without_driver_entry_is_dropped() {
        let driver = SimulatedDriver::new();
        let out =
            translate_controller_event(driver.controller(), ControllerEvent::NodeAdded { node_id: 9 });
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        // Arrange
        let driver = driver_with_node(2, true);
        driver.add_node(3);
        let forwarder = forwarder_for(&driver);

        // Act
        let first = forwarder.start();
        let second = forwarder.start();

        // Assert
        assert!(first);
        assert!(!second);
        assert!(forwarder.is_active());
        assert_eq!(forwarder.watched_nodes(), 2);
        assert_eq!(driver.node_handle(2).unwrap().subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_watch_node_twice_subscribes_once() {
        let driver = driver_with_node(2, true);
        let forwarder = forwarder_for(&driver);
        let node = driver.controller().node(2).unwrap();

        assert!(forwarder.watch_node(node.clone()));
        assert!(!forwarder.watch_node(node));
        assert_eq!(forwarder.watched_nodes(), 1);
    }

    #[tokio::test]
    async fn test_stop_returns_to_inactive() {
        let driver = driver_with_node(2, true);
        let forwarder = forwarder_for(&driver);
        forwarder.start();

        forwarder.stop();

        assert!(!forwarder.is_active());
        assert_eq!(forwarder.watched_nodes(), 0);
    }

    #[tokio::test]
    async fn test_inclusion_failed_releases_bound_client() {
        // Arrange
        let driver = Arc::new(SimulatedDriver::new());
        let registry = ClientRegistry::new(driver.clone());
        let inclusion = InclusionBridge::new(registry.clone());
        let forwarder = EventForwarder::new(driver.clone(), registry, inclusion.clone());
        forwarder.start();
        let client = ClientInfo::new("test", 35).id;
        inclusion.bind(client, inclusion.request_mark());

        // Act
        driver.controller_handle().emit(ControllerEvent::InclusionFailed);

        // Assert
        timeout(Duration::from_secs(2), async {
            while inclusion.bound_client().is_some() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("bound client was never released");
    }
}
