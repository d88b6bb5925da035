//! In-memory simulated driver.
//!
//! [`SimulatedDriver`] implements the whole [`Driver`] trait family without
//! hardware.  The gateway's tests drive it directly (add nodes, emit events,
//! inject failures, inspect the call log) and the gateway binary runs against
//! it when no hardware driver is linked in.
//!
//! Nothing here models radio timing or the controller protocol: operations
//! succeed immediately and update in-memory state.
//!
//! # Example
//!
//! ```rust
//! use zwave_core::testing::SimulatedDriver;
//! use zwave_core::driver::Driver;
//!
//! let driver = SimulatedDriver::new();
//! let node = driver.add_node(2);
//! node.set_ready(true);
//! assert_eq!(driver.controller().node_ids(), vec![2]);
//! ```

mod controller;
mod node;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::domain::controller::TransmitStatus;
use crate::domain::log::{LogConfig, LogConfigUpdate, LogEntry};
use crate::domain::node::{NodeId, NodeStatus};
use crate::driver::{Controller, Driver, DriverError, DriverEvent, DriverResult};

pub use controller::{SimulatedController, SimulatedVirtualEndpoint, SimulatedVirtualNode};
pub use node::SimulatedNode;

/// Driver version reported by the simulation.
pub const SIMULATED_DRIVER_VERSION: &str = "12.0.0-sim";

/// Error code for operations addressed to a node the controller doesn't know.
pub const ZW_NODE_NOT_FOUND: u16 = 203;
/// Error code for a snapshot requested while the node is still half-known.
pub const ZW_NODE_STATE_INCOMPLETE: u16 = 210;
/// Error code for an association the source group cannot take.
pub const ZW_ASSOCIATION_NOT_ALLOWED: u16 = 1400;
/// Error code for an endpoint index the node does not have.
pub const ZW_ENDPOINT_NOT_FOUND: u16 = 1401;
/// Error code returned by operations that the test asked to fail.
pub const ZW_INJECTED_FAILURE: u16 = 999;

pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── Call recorder ─────────────────────────────────────────────────────────────

/// Shared call log and failure table.
///
/// Cloned into the controller and every node so all driver operations land
/// in one ordered log.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
    failures: Arc<Mutex<HashMap<String, DriverError>>>,
}

impl Recorder {
    /// Logs `operation` and returns the injected failure for it, if any.
    pub(crate) fn record(&self, operation: &str) -> DriverResult<()> {
        lock(&self.calls).push(operation.to_string());
        match lock(&self.failures).get(operation_key(operation)) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn fail(&self, operation: &str, err: DriverError) {
        lock(&self.failures).insert(operation.to_string(), err);
    }

    fn clear_failure(&self, operation: &str) {
        lock(&self.failures).remove(operation);
    }
}

/// Recorded calls may carry arguments after a space; failures are keyed by
/// the bare operation name.
fn operation_key(operation: &str) -> &str {
    operation.split(' ').next().unwrap_or(operation)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ── SimulatedDriver ───────────────────────────────────────────────────────────

struct DriverState {
    options: Value,
    log_config: LogConfig,
    statistics: Option<(String, String)>,
    config_version: String,
    available_config_update: Option<String>,
    preferred_scales: Value,
}

pub struct SimulatedDriver {
    recorder: Recorder,
    controller: Arc<SimulatedController>,
    events: broadcast::Sender<DriverEvent>,
    logs: broadcast::Sender<LogEntry>,
    state: Mutex<DriverState>,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDriver {
    pub fn new() -> Self {
        let recorder = Recorder::default();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (logs, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            controller: Arc::new(SimulatedController::new(recorder.clone())),
            recorder,
            events,
            logs,
            state: Mutex::new(DriverState {
                options: serde_json::json!({ "timeouts": { "ack": 1000, "response": 10000 } }),
                log_config: LogConfig::default(),
                statistics: None,
                config_version: "0.1.0".to_string(),
                available_config_update: None,
                preferred_scales: Value::Null,
            }),
        }
    }

    // ── Simulation controls ───────────────────────────────────────────────────

    /// The concrete controller, for simulation controls the trait lacks.
    pub fn controller_handle(&self) -> &Arc<SimulatedController> {
        &self.controller
    }

    /// Adds a node silently (as if it was known at startup).
    pub fn add_node(&self, node_id: NodeId) -> Arc<SimulatedNode> {
        self.controller.add_node(node_id)
    }

    pub fn node_handle(&self, node_id: NodeId) -> Option<Arc<SimulatedNode>> {
        self.controller.node_handle(node_id)
    }

    pub fn emit(&self, event: DriverEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_log(&self, entry: LogEntry) {
        let _ = self.logs.send(entry);
    }

    /// Number of live log subscriptions.
    pub fn log_subscriber_count(&self) -> usize {
        self.logs.receiver_count()
    }

    /// Makes a newer configuration database available.
    pub fn offer_config_update(&self, version: &str) {
        lock(&self.state).available_config_update = Some(version.to_string());
    }

    pub fn preferred_scales(&self) -> Value {
        lock(&self.state).preferred_scales.clone()
    }

    pub fn statistics_application(&self) -> Option<(String, String)> {
        lock(&self.state).statistics.clone()
    }

    /// Every operation called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.recorder.calls()
    }

    /// Makes every later call of `operation` fail with `err`.
    ///
    /// `operation` is the name used in the call log, e.g.
    /// `"driver.soft_reset"` or `"node.4.ping"`.
    pub fn fail_operation(&self, operation: &str, err: DriverError) {
        self.recorder.fail(operation, err);
    }

    pub fn clear_failure(&self, operation: &str) {
        self.recorder.clear_failure(operation);
    }
}

#[async_trait]
impl Driver for SimulatedDriver {
    fn version(&self) -> String {
        SIMULATED_DRIVER_VERSION.to_string()
    }

    fn controller(&self) -> &dyn Controller {
        self.controller.as_ref()
    }

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }

    fn subscribe_logs(&self) -> broadcast::Receiver<LogEntry> {
        self.logs.subscribe()
    }

    fn options(&self) -> Value {
        lock(&self.state).options.clone()
    }

    fn update_options(&self, options: Value) -> DriverResult<()> {
        self.recorder.record("driver.update_options")?;
        let mut state = lock(&self.state);
        match (&mut state.options, options) {
            (Value::Object(current), Value::Object(update)) => current.extend(update),
            (current, update) => *current = update,
        }
        Ok(())
    }

    fn log_config(&self) -> LogConfig {
        lock(&self.state).log_config.clone()
    }

    fn update_log_config(&self, update: LogConfigUpdate) -> DriverResult<()> {
        self.recorder.record("driver.update_log_config")?;
        lock(&self.state).log_config.apply(&update);
        Ok(())
    }

    fn statistics_enabled(&self) -> bool {
        lock(&self.state).statistics.is_some()
    }

    fn enable_statistics(&self, application_name: &str, application_version: &str) {
        lock(&self.state).statistics =
            Some((application_name.to_string(), application_version.to_string()));
    }

    fn disable_statistics(&self) {
        lock(&self.state).statistics = None;
    }

    fn config_version(&self) -> String {
        lock(&self.state).config_version.clone()
    }

    async fn check_for_config_updates(&self) -> DriverResult<Option<String>> {
        self.recorder.record("driver.check_for_config_updates")?;
        Ok(lock(&self.state).available_config_update.clone())
    }

    async fn install_config_update(&self) -> DriverResult<bool> {
        self.recorder.record("driver.install_config_update")?;
        let mut state = lock(&self.state);
        match state.available_config_update.take() {
            Some(version) => {
                state.config_version = version;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn set_preferred_scales(&self, scales: Value) -> DriverResult<()> {
        self.recorder.record("driver.set_preferred_scales")?;
        lock(&self.state).preferred_scales = scales;
        Ok(())
    }

    async fn soft_reset(&self) -> DriverResult<()> {
        self.recorder.record("driver.soft_reset")
    }

    async fn try_soft_reset(&self) -> DriverResult<()> {
        self.recorder.record("driver.try_soft_reset")
    }

    async fn hard_reset(&self) -> DriverResult<()> {
        self.recorder.record("driver.hard_reset")?;
        self.controller.forget_all_nodes();
        Ok(())
    }

    async fn shutdown(&self) -> bool {
        self.recorder.record("driver.shutdown").is_ok()
    }

    async fn send_test_frame(
        &self,
        node_id: NodeId,
        powerlevel: u8,
    ) -> DriverResult<TransmitStatus> {
        self.recorder
            .record(&format!("driver.send_test_frame {node_id} {powerlevel}"))?;
        let node = self.controller.node_handle(node_id).ok_or_else(|| {
            DriverError::new(ZW_NODE_NOT_FOUND, format!("Node {node_id} was not found"))
        })?;
        Ok(if node.status() == NodeStatus::Dead {
            TransmitStatus::NoAck
        } else {
            TransmitStatus::Ok
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
