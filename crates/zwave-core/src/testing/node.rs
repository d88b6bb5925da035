//! Simulated physical node.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::domain::controller::SecurityClass;
use crate::domain::firmware::{
    FirmwareFile, FirmwareUpdateCapabilities, FirmwareUpdateProgress, FirmwareUpdateResult,
    FirmwareUpdateStatus,
};
use crate::domain::health::{
    LifelineHealthCheckResult, LifelineHealthCheckSummary, PowerlevelTest, RawConfigParameter,
    RouteHealthCheckResult, RouteHealthCheckSummary, MAX_HEALTH_RATING,
};
use crate::domain::node::{NodeId, NodeSnapshot, NodeStatus};
use crate::domain::value::{
    SetValueResult, SetValueStatus, ValueChangeArgs, ValueId, ValueMetadata, ValueSnapshot,
};
use crate::driver::{DriverError, DriverResult, Node, NodeEvent};
use crate::testing::{Recorder, EVENT_CHANNEL_CAPACITY, ZW_NODE_STATE_INCOMPLETE};

struct SimulatedValue {
    value_id: ValueId,
    cc_version: u8,
    metadata: ValueMetadata,
    value: Option<Value>,
    timestamp: Option<u64>,
}

struct NodeState {
    name: Option<String>,
    location: Option<String>,
    status: NodeStatus,
    ready: bool,
    interview_stage: String,
    keep_awake: bool,
    endpoint_count: u16,
    security_classes: Vec<SecurityClass>,
    values: Vec<SimulatedValue>,
    next_set_value_result: SetValueResult,
    next_firmware_status: FirmwareUpdateStatus,
    firmware_update_in_progress: bool,
    snapshot_incomplete: bool,
    raw_config: BTreeMap<u16, i64>,
    clock: Option<DateTime<Utc>>,
}

/// Health check rounds when the caller does not ask for a number.
const DEFAULT_HEALTH_ROUNDS: u8 = 5;

/// An in-memory node with settable values and an event channel.
///
/// Every driver-facing operation is recorded in the owning driver's call log
/// as `node.<id>.<operation>`.
pub struct SimulatedNode {
    id: NodeId,
    recorder: Recorder,
    events: broadcast::Sender<NodeEvent>,
    state: Mutex<NodeState>,
}

impl SimulatedNode {
    pub(crate) fn new(id: NodeId, recorder: Recorder) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id,
            recorder,
            events,
            state: Mutex::new(NodeState {
                name: None,
                location: None,
                status: NodeStatus::Alive,
                ready: false,
                interview_stage: "None".to_string(),
                keep_awake: false,
                endpoint_count: 0,
                security_classes: Vec::new(),
                values: Vec::new(),
                next_set_value_result: SetValueResult::new(SetValueStatus::Success),
                next_firmware_status: FirmwareUpdateStatus::OkNoRestart,
                firmware_update_in_progress: false,
                snapshot_incomplete: false,
                raw_config: BTreeMap::new(),
                clock: None,
            }),
        }
    }

    // ── Simulation controls ───────────────────────────────────────────────────

    /// Defines a value on this node.  Replaces an existing value with the same id.
    pub fn add_value(&self, value_id: ValueId, metadata: ValueMetadata, value: Option<Value>) {
        let mut state = self.lock();
        state.values.retain(|v| v.value_id != value_id);
        let timestamp = value.as_ref().map(|_| now_millis());
        state.values.push(SimulatedValue {
            value_id,
            cc_version: 1,
            metadata,
            value,
            timestamp,
        });
    }

    /// Marks the node ready (or not) without emitting an event.
    pub fn set_ready(&self, ready: bool) {
        let mut state = self.lock();
        state.ready = ready;
        if ready {
            state.interview_stage = "Complete".to_string();
        }
    }

    /// Completes the interview: marks the node ready and emits `Ready`.
    pub fn finish_interview(&self) {
        self.set_ready(true);
        self.emit(NodeEvent::InterviewCompleted);
        self.emit(NodeEvent::Ready);
    }

    /// Changes the status and emits the matching transition event.
    pub fn change_status(&self, status: NodeStatus) {
        let old_status = {
            let mut state = self.lock();
            std::mem::replace(&mut state.status, status)
        };
        self.emit(NodeEvent::StatusChanged { status, old_status });
    }

    pub fn set_endpoint_count(&self, count: u16) {
        self.lock().endpoint_count = count;
    }

    pub fn grant_security_class(&self, class: SecurityClass) {
        self.lock().security_classes.push(class);
    }

    /// The result returned by the next `set_value` calls.
    pub fn set_next_set_value_result(&self, result: SetValueResult) {
        self.lock().next_set_value_result = result;
    }

    /// The status reported by the next firmware update.
    pub fn set_next_firmware_status(&self, status: FirmwareUpdateStatus) {
        self.lock().next_firmware_status = status;
    }

    /// Makes `snapshot()` fail, as a driver does while a node is half-known.
    pub fn set_snapshot_incomplete(&self, incomplete: bool) {
        self.lock().snapshot_incomplete = incomplete;
    }

    /// Publishes an event on this node's channel.
    pub fn emit(&self, event: NodeEvent) {
        // No receivers is fine: nobody is forwarding yet.
        let _ = self.events.send(event);
    }

    /// Number of live event subscriptions on this node.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn name(&self) -> Option<String> {
        self.lock().name.clone()
    }

    pub fn status(&self) -> NodeStatus {
        self.lock().status
    }

    /// Last value written to a configuration parameter.
    pub fn raw_config_value(&self, parameter: u16) -> Option<i64> {
        self.lock().raw_config.get(&parameter).copied()
    }

    /// Time last written by `set_date_and_time`.
    pub fn clock(&self) -> Option<DateTime<Utc>> {
        self.lock().clock
    }

    /// Perfect while the node is reachable, unusable when it is dead.
    fn link_rating(&self) -> u8 {
        if self.lock().status == NodeStatus::Dead {
            0
        } else {
            MAX_HEALTH_RATING
        }
    }

    pub(crate) fn apply_value(&self, value_id: &ValueId, value: Value) {
        let prev_value = {
            let mut state = self.lock();
            match state.values.iter_mut().find(|v| &v.value_id == value_id) {
                Some(entry) => {
                    entry.timestamp = Some(now_millis());
                    entry.value.replace(value.clone())
                }
                None => {
                    state.values.push(SimulatedValue {
                        value_id: value_id.clone(),
                        cc_version: 1,
                        metadata: ValueMetadata::default(),
                        value: Some(value.clone()),
                        timestamp: Some(now_millis()),
                    });
                    None
                }
            }
        };
        self.emit(NodeEvent::ValueUpdated(ValueChangeArgs {
            value_id: value_id.clone(),
            prev_value,
            new_value: Some(value),
        }));
    }

    pub(crate) fn supports_cc_on_endpoint(&self, command_class: u8, endpoint: u16) -> bool {
        self.lock().values.iter().any(|v| {
            v.value_id.command_class == command_class
                && v.value_id.endpoint.unwrap_or(0) == endpoint
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NodeState> {
        // A poisoned lock only means a test panicked mid-update; the data is
        // still usable for the remaining assertions.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, operation: &str) -> DriverResult<()> {
        self.recorder
            .record(&format!("node.{}.{}", self.id, operation))
    }
}

#[async_trait]
impl Node for SimulatedNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn is_ready(&self) -> bool {
        self.lock().ready
    }

    fn snapshot(&self) -> DriverResult<NodeSnapshot> {
        let state = self.lock();
        if state.snapshot_incomplete {
            return Err(DriverError::new(
                ZW_NODE_STATE_INCOMPLETE,
                format!("Node {} is not fully known yet", self.id),
            ));
        }
        Ok(NodeSnapshot {
            node_id: self.id,
            name: state.name.clone(),
            location: state.location.clone(),
            status: state.status,
            ready: state.ready,
            interview_stage: state.interview_stage.clone(),
            highest_security_class: highest(&state.security_classes),
            manufacturer_id: Some(0x0086),
            product_id: Some(0x0060),
            product_type: Some(0x0003),
            firmware_version: Some("1.0".to_string()),
            endpoint_count: state.endpoint_count,
            keep_awake: state.keep_awake,
            values: state
                .values
                .iter()
                .map(|v| ValueSnapshot {
                    value_id: v.value_id.clone(),
                    cc_version: v.cc_version,
                    metadata: v.metadata.clone(),
                    value: v.value.clone(),
                })
                .collect(),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    fn value_metadata(&self, value_id: &ValueId) -> ValueMetadata {
        self.lock()
            .values
            .iter()
            .find(|v| &v.value_id == value_id)
            .map(|v| v.metadata.clone())
            .unwrap_or_default()
    }

    fn cc_version(&self, command_class: u8) -> u8 {
        self.lock()
            .values
            .iter()
            .filter(|v| v.value_id.command_class == command_class)
            .map(|v| v.cc_version)
            .max()
            .unwrap_or(0)
    }

    fn value(&self, value_id: &ValueId) -> Option<Value> {
        self.lock()
            .values
            .iter()
            .find(|v| &v.value_id == value_id)
            .and_then(|v| v.value.clone())
    }

    fn value_timestamp(&self, value_id: &ValueId) -> Option<u64> {
        self.lock()
            .values
            .iter()
            .find(|v| &v.value_id == value_id)
            .and_then(|v| v.timestamp)
    }

    fn defined_value_ids(&self) -> Vec<ValueId> {
        self.lock().values.iter().map(|v| v.value_id.clone()).collect()
    }

    fn endpoint_count(&self) -> u16 {
        self.lock().endpoint_count
    }

    async fn set_value(
        &self,
        value_id: &ValueId,
        value: Value,
        _options: Option<Value>,
    ) -> DriverResult<SetValueResult> {
        self.record("set_value")?;
        let result = self.lock().next_set_value_result.clone();
        if result.status.is_success() {
            self.apply_value(value_id, value);
        }
        Ok(result)
    }

    async fn poll_value(&self, value_id: &ValueId) -> DriverResult<Option<Value>> {
        self.record("poll_value")?;
        Ok(self.value(value_id))
    }

    async fn refresh_info(&self) -> DriverResult<()> {
        self.record("refresh_info")
    }

    async fn refresh_values(&self) -> DriverResult<()> {
        self.record("refresh_values")
    }

    async fn refresh_cc_values(&self, command_class: u8) -> DriverResult<()> {
        self.record(&format!("refresh_cc_values {command_class}"))
    }

    async fn interview(&self) -> DriverResult<()> {
        self.record("interview")?;
        self.emit(NodeEvent::InterviewStarted);
        Ok(())
    }

    async fn interview_cc(&self, command_class: u8) -> DriverResult<()> {
        self.record(&format!("interview_cc {command_class}"))
    }

    async fn wait_for_wakeup(&self) -> DriverResult<()> {
        self.record("wait_for_wakeup")
    }

    async fn ping(&self) -> DriverResult<bool> {
        self.record("ping")?;
        Ok(self.lock().status != NodeStatus::Dead)
    }

    async fn check_lifeline_health(
        &self,
        rounds: Option<u8>,
    ) -> DriverResult<LifelineHealthCheckSummary> {
        let rounds = rounds.unwrap_or(DEFAULT_HEALTH_ROUNDS);
        self.record(&format!("check_lifeline_health {rounds}"))?;
        let rating = self.link_rating();
        let failed = if rating == 0 { 10 } else { 0 };
        let results = (0..rounds)
            .map(|_| LifelineHealthCheckResult {
                latency: 10,
                num_neighbors: 0,
                failed_pings_node: failed,
                route_changes: Some(0),
                min_powerlevel: None,
                failed_pings_controller: None,
                snr_margin: None,
                rating,
            })
            .collect();
        Ok(LifelineHealthCheckSummary { results, rating })
    }

    async fn check_route_health(
        &self,
        target_node_id: NodeId,
        rounds: Option<u8>,
    ) -> DriverResult<RouteHealthCheckSummary> {
        let rounds = rounds.unwrap_or(DEFAULT_HEALTH_ROUNDS);
        self.record(&format!("check_route_health {target_node_id} {rounds}"))?;
        let rating = self.link_rating();
        let results = (0..rounds)
            .map(|_| RouteHealthCheckResult {
                num_neighbors: 0,
                failed_pings_to_target: Some(0),
                failed_pings_to_source: Some(0),
                min_powerlevel_source: None,
                min_powerlevel_target: None,
                rating,
            })
            .collect();
        Ok(RouteHealthCheckSummary { results, rating })
    }

    async fn test_powerlevel(&self, test: PowerlevelTest) -> DriverResult<u16> {
        self.record(&format!(
            "test_powerlevel {} {}",
            test.test_node_id, test.powerlevel
        ))?;
        Ok(if self.link_rating() == 0 {
            0
        } else {
            test.frame_count
        })
    }

    async fn set_raw_config_parameter_value(
        &self,
        parameter: RawConfigParameter,
    ) -> DriverResult<()> {
        self.record(&format!(
            "set_raw_config_parameter_value {}",
            parameter.parameter
        ))?;
        self.lock()
            .raw_config
            .insert(parameter.parameter, parameter.value);
        Ok(())
    }

    async fn set_date_and_time(&self, date: Option<DateTime<Utc>>) -> DriverResult<bool> {
        self.record("set_date_and_time")?;
        self.lock().clock = Some(date.unwrap_or_else(Utc::now));
        Ok(true)
    }

    fn has_security_class(&self, security_class: SecurityClass) -> Option<bool> {
        let state = self.lock();
        if !state.ready {
            return None;
        }
        Some(state.security_classes.contains(&security_class))
    }

    fn highest_security_class(&self) -> Option<SecurityClass> {
        highest(&self.lock().security_classes)
    }

    fn set_name(&self, name: String) {
        self.lock().name = Some(name);
    }

    fn set_location(&self, location: String) {
        self.lock().location = Some(location);
    }

    fn set_keep_awake(&self, keep_awake: bool) {
        self.lock().keep_awake = keep_awake;
    }

    async fn update_firmware(
        &self,
        updates: Vec<FirmwareFile>,
    ) -> DriverResult<FirmwareUpdateResult> {
        self.record(&format!("update_firmware {}", updates.len()))?;
        let status = {
            let mut state = self.lock();
            state.firmware_update_in_progress = true;
            state.next_firmware_status
        };

        let total_files = updates.len() as u32;
        for (index, file) in updates.iter().enumerate() {
            let total_fragments = (file.data.len() as u32).div_ceil(32).max(1);
            self.emit(NodeEvent::FirmwareUpdateProgress(FirmwareUpdateProgress {
                current_file: index as u32 + 1,
                total_files,
                sent_fragments: total_fragments,
                total_fragments,
                progress: 100.0 * (index as f64 + 1.0) / total_files as f64,
            }));
        }

        let result = FirmwareUpdateResult::from_status(status);
        self.lock().firmware_update_in_progress = false;
        self.emit(NodeEvent::FirmwareUpdateFinished(result.clone()));
        Ok(result)
    }

    async fn abort_firmware_update(&self) -> DriverResult<()> {
        self.record("abort_firmware_update")?;
        self.lock().firmware_update_in_progress = false;
        Ok(())
    }

    fn is_firmware_update_in_progress(&self) -> bool {
        self.lock().firmware_update_in_progress
    }

    async fn firmware_update_capabilities(&self) -> DriverResult<FirmwareUpdateCapabilities> {
        self.record("firmware_update_capabilities")?;
        Ok(self.firmware_update_capabilities_cached())
    }

    fn firmware_update_capabilities_cached(&self) -> FirmwareUpdateCapabilities {
        FirmwareUpdateCapabilities {
            firmware_upgradable: true,
            firmware_targets: vec![0],
            continues_to_function: Some(true),
            supports_activation: Some(false),
        }
    }
}

/// Strongest class first: access control, authenticated, unauthenticated, S0.
fn highest(classes: &[SecurityClass]) -> Option<SecurityClass> {
    const ORDER: [SecurityClass; 4] = [
        SecurityClass::S2AccessControl,
        SecurityClass::S2Authenticated,
        SecurityClass::S2Unauthenticated,
        SecurityClass::S0Legacy,
    ];
    ORDER.into_iter().find(|c| classes.contains(c))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
