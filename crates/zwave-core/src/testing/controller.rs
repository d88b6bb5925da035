//! Simulated controller plus the broadcast / multicast virtual nodes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::domain::controller::{
    ControllerState, ExclusionOptions, InclusionOptions, InclusionState, InclusionStrategy,
    Powerlevel, RebuildRoutesStatus,
};
use crate::domain::firmware::{FirmwareFile, FirmwareUpdateResult};
use crate::domain::network::{
    AssociationAddress, AssociationGroup, AssociationGroups, Associations, DskOrNodeId,
    LifelineRoutes, ProvisioningEntry,
};
use crate::domain::node::{NodeId, NodeStatus};
use crate::domain::value::{SetValueResult, SetValueStatus, ValueId};
use crate::driver::{
    Controller, ControllerEvent, DriverError, DriverResult, InclusionUserCallbacks, Node,
    VirtualEndpoint, VirtualNode,
};
use crate::testing::node::SimulatedNode;
use crate::testing::{
    lock, Recorder, EVENT_CHANNEL_CAPACITY, ZW_ASSOCIATION_NOT_ALLOWED, ZW_ENDPOINT_NOT_FOUND,
    ZW_NODE_NOT_FOUND,
};

struct RadioState {
    inclusion_state: InclusionState,
    rebuilding_routes: bool,
    rf_region: u8,
    powerlevel: Powerlevel,
    supported_features: HashSet<u8>,
    lifeline_routes: BTreeMap<NodeId, LifelineRoutes>,
    firmware_update_in_progress: bool,
}

/// Association groups and their members, keyed by source node/endpoint.
#[derive(Default)]
struct AssociationTable {
    groups: HashMap<AssociationAddress, AssociationGroups>,
    members: HashMap<AssociationAddress, Associations>,
}

/// In-memory controller owning the simulated nodes.
///
/// Holds on to the inclusion callbacks the gateway registers so tests can
/// play the driver's side of an inclusion handshake.
pub struct SimulatedController {
    recorder: Recorder,
    home_id: u32,
    nodes: RwLock<BTreeMap<NodeId, Arc<SimulatedNode>>>,
    events: broadcast::Sender<ControllerEvent>,
    radio: Mutex<RadioState>,
    inclusion_callbacks: Mutex<Option<Arc<dyn InclusionUserCallbacks>>>,
    associations: Mutex<AssociationTable>,
    provisioning: Mutex<Vec<ProvisioningEntry>>,
}

impl SimulatedController {
    pub(crate) fn new(recorder: Recorder) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            recorder,
            home_id: 0xE1C0_FFEE,
            nodes: RwLock::new(BTreeMap::new()),
            events,
            radio: Mutex::new(RadioState {
                inclusion_state: InclusionState::Idle,
                rebuilding_routes: false,
                rf_region: 0x01,
                powerlevel: Powerlevel {
                    powerlevel: 0,
                    measured_0_dbm: 0,
                },
                supported_features: HashSet::new(),
                lifeline_routes: BTreeMap::new(),
                firmware_update_in_progress: false,
            }),
            inclusion_callbacks: Mutex::new(None),
            associations: Mutex::new(AssociationTable::default()),
            provisioning: Mutex::new(Vec::new()),
        }
    }

    // ── Simulation controls ───────────────────────────────────────────────────

    pub fn add_node(&self, node_id: NodeId) -> Arc<SimulatedNode> {
        let node = Arc::new(SimulatedNode::new(node_id, self.recorder.clone()));
        self.write_nodes().insert(node_id, Arc::clone(&node));
        node
    }

    /// Adds a node and announces it with `NodeAdded`, as a finished
    /// inclusion does.
    pub fn include_node(&self, node_id: NodeId) -> Arc<SimulatedNode> {
        let node = self.add_node(node_id);
        lock(&self.radio).inclusion_state = InclusionState::Idle;
        self.emit(ControllerEvent::NodeAdded { node_id });
        node
    }

    pub fn node_handle(&self, node_id: NodeId) -> Option<Arc<SimulatedNode>> {
        self.read_nodes().get(&node_id).cloned()
    }

    pub fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }

    /// The callbacks registered by the last `begin_inclusion` or
    /// `replace_failed_node`.
    pub fn inclusion_callbacks(&self) -> Option<Arc<dyn InclusionUserCallbacks>> {
        lock(&self.inclusion_callbacks).clone()
    }

    pub fn inclusion_state(&self) -> InclusionState {
        lock(&self.radio).inclusion_state
    }

    pub fn support_feature(&self, feature: u8) {
        lock(&self.radio).supported_features.insert(feature);
    }

    /// Replaces the association groups a source exposes.  Sources without
    /// an explicit definition expose a single lifeline group 1.
    pub fn define_association_groups(&self, source: AssociationAddress, groups: AssociationGroups) {
        lock(&self.associations).groups.insert(source, groups);
    }

    pub fn set_lifeline_routes(&self, node_id: NodeId, routes: LifelineRoutes) {
        lock(&self.radio).lifeline_routes.insert(node_id, routes);
    }

    /// Flags a controller firmware update as running (or finished).
    pub fn set_firmware_update_in_progress(&self, in_progress: bool) {
        lock(&self.radio).firmware_update_in_progress = in_progress;
    }

    pub(crate) fn forget_all_nodes(&self) {
        self.write_nodes().clear();
    }

    fn read_nodes(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<NodeId, Arc<SimulatedNode>>> {
        self.nodes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_nodes(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, BTreeMap<NodeId, Arc<SimulatedNode>>> {
        self.nodes.write().unwrap_or_else(|e| e.into_inner())
    }

    fn require_node(&self, node_id: NodeId) -> DriverResult<Arc<SimulatedNode>> {
        self.node_handle(node_id).ok_or_else(|| {
            DriverError::new(ZW_NODE_NOT_FOUND, format!("Node {node_id} was not found"))
        })
    }

    fn record(&self, operation: &str) -> DriverResult<()> {
        self.recorder.record(&format!("controller.{operation}"))
    }

    /// Checks that the node, and the endpoint if one is named, exist.
    fn require_address(&self, address: AssociationAddress) -> DriverResult<()> {
        let node = self.require_node(address.node_id)?;
        match address.endpoint {
            Some(endpoint) if endpoint > node.endpoint_count() => Err(DriverError::new(
                ZW_ENDPOINT_NOT_FOUND,
                format!(
                    "Endpoint {endpoint} of node {} was not found",
                    address.node_id
                ),
            )),
            _ => Ok(()),
        }
    }

    fn groups_of(&self, source: AssociationAddress) -> AssociationGroups {
        lock(&self.associations)
            .groups
            .get(&source)
            .cloned()
            .unwrap_or_else(lifeline_only)
    }

    fn check_association(
        &self,
        source: AssociationAddress,
        group: u8,
        destination: AssociationAddress,
    ) -> DriverResult<bool> {
        self.require_address(source)?;
        self.require_address(destination)?;
        let Some(definition) = self.groups_of(source).remove(&group) else {
            return Ok(false);
        };
        if destination.node_id == source.node_id {
            return Ok(false);
        }
        let table = lock(&self.associations);
        let members = table
            .members
            .get(&source)
            .and_then(|groups| groups.get(&group));
        let present = members.is_some_and(|m| m.contains(&destination));
        let count = members.map_or(0, Vec::len);
        Ok(present || count < usize::from(definition.max_nodes))
    }
}

fn lifeline_only() -> AssociationGroups {
    BTreeMap::from([(
        1,
        AssociationGroup {
            max_nodes: 1,
            is_lifeline: true,
            multi_channel: false,
            label: "Lifeline".to_string(),
        },
    )])
}

#[async_trait]
impl Controller for SimulatedController {
    fn state(&self) -> ControllerState {
        let radio = lock(&self.radio);
        ControllerState {
            home_id: Some(self.home_id),
            own_node_id: Some(1),
            sdk_version: Some("7.19.0".to_string()),
            rf_region: Some(radio.rf_region),
            inclusion_state: radio.inclusion_state,
            is_rebuilding_routes: radio.rebuilding_routes,
        }
    }

    fn home_id(&self) -> Option<u32> {
        Some(self.home_id)
    }

    fn node_ids(&self) -> Vec<NodeId> {
        self.read_nodes().keys().copied().collect()
    }

    fn node(&self, node_id: NodeId) -> Option<Arc<dyn Node>> {
        self.node_handle(node_id).map(|n| n as Arc<dyn Node>)
    }

    fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    async fn begin_inclusion(
        &self,
        options: InclusionOptions,
        callbacks: Arc<dyn InclusionUserCallbacks>,
    ) -> DriverResult<bool> {
        self.record("begin_inclusion")?;
        {
            let mut radio = lock(&self.radio);
            if radio.inclusion_state != InclusionState::Idle {
                return Ok(false);
            }
            radio.inclusion_state = InclusionState::Including;
        }
        *lock(&self.inclusion_callbacks) = Some(callbacks);
        self.emit(ControllerEvent::InclusionStarted {
            secure: options.strategy != InclusionStrategy::Insecure,
        });
        Ok(true)
    }

    async fn stop_inclusion(&self) -> DriverResult<bool> {
        self.record("stop_inclusion")?;
        {
            let mut radio = lock(&self.radio);
            if radio.inclusion_state != InclusionState::Including {
                return Ok(false);
            }
            radio.inclusion_state = InclusionState::Idle;
        }
        self.emit(ControllerEvent::InclusionStopped);
        Ok(true)
    }

    async fn begin_exclusion(&self, _options: ExclusionOptions) -> DriverResult<bool> {
        self.record("begin_exclusion")?;
        {
            let mut radio = lock(&self.radio);
            if radio.inclusion_state != InclusionState::Idle {
                return Ok(false);
            }
            radio.inclusion_state = InclusionState::Excluding;
        }
        self.emit(ControllerEvent::ExclusionStarted);
        Ok(true)
    }

    async fn stop_exclusion(&self) -> DriverResult<bool> {
        self.record("stop_exclusion")?;
        {
            let mut radio = lock(&self.radio);
            if radio.inclusion_state != InclusionState::Excluding {
                return Ok(false);
            }
            radio.inclusion_state = InclusionState::Idle;
        }
        self.emit(ControllerEvent::ExclusionStopped);
        Ok(true)
    }

    async fn remove_failed_node(&self, node_id: NodeId) -> DriverResult<()> {
        self.record(&format!("remove_failed_node {node_id}"))?;
        let node = self.require_node(node_id)?;
        let snapshot = node.snapshot()?;
        self.write_nodes().remove(&node_id);
        self.emit(ControllerEvent::NodeRemoved { node: snapshot });
        Ok(())
    }

    async fn replace_failed_node(
        &self,
        node_id: NodeId,
        _options: InclusionOptions,
        callbacks: Arc<dyn InclusionUserCallbacks>,
    ) -> DriverResult<bool> {
        self.record(&format!("replace_failed_node {node_id}"))?;
        self.require_node(node_id)?;
        {
            let mut radio = lock(&self.radio);
            if radio.inclusion_state != InclusionState::Idle {
                return Ok(false);
            }
            radio.inclusion_state = InclusionState::Including;
        }
        *lock(&self.inclusion_callbacks) = Some(callbacks);
        Ok(true)
    }

    async fn is_failed_node(&self, node_id: NodeId) -> DriverResult<bool> {
        self.record(&format!("is_failed_node {node_id}"))?;
        Ok(self.require_node(node_id)?.status() == NodeStatus::Dead)
    }

    async fn node_neighbors(&self, node_id: NodeId) -> DriverResult<Vec<NodeId>> {
        self.record(&format!("node_neighbors {node_id}"))?;
        self.require_node(node_id)?;
        Ok(self
            .node_ids()
            .into_iter()
            .filter(|&id| id != node_id)
            .collect())
    }

    async fn rebuild_node_routes(&self, node_id: NodeId) -> DriverResult<bool> {
        self.record(&format!("rebuild_node_routes {node_id}"))?;
        self.require_node(node_id)?;
        Ok(true)
    }

    fn begin_rebuilding_routes(&self) -> bool {
        if self.record("begin_rebuilding_routes").is_err() {
            return false;
        }
        {
            let mut radio = lock(&self.radio);
            if radio.rebuilding_routes {
                return false;
            }
            radio.rebuilding_routes = true;
        }
        let progress = self
            .node_ids()
            .into_iter()
            .map(|id| (id, RebuildRoutesStatus::Pending))
            .collect();
        self.emit(ControllerEvent::RebuildRoutesProgress { progress });
        true
    }

    fn stop_rebuilding_routes(&self) -> bool {
        if self.record("stop_rebuilding_routes").is_err() {
            return false;
        }
        let mut radio = lock(&self.radio);
        std::mem::replace(&mut radio.rebuilding_routes, false)
    }

    fn known_lifeline_routes(&self) -> BTreeMap<NodeId, LifelineRoutes> {
        lock(&self.radio).lifeline_routes.clone()
    }

    fn association_groups(&self, source: AssociationAddress) -> DriverResult<AssociationGroups> {
        self.require_address(source)?;
        Ok(self.groups_of(source))
    }

    fn associations(&self, source: AssociationAddress) -> DriverResult<Associations> {
        self.require_address(source)?;
        Ok(lock(&self.associations)
            .members
            .get(&source)
            .cloned()
            .unwrap_or_default())
    }

    fn is_association_allowed(
        &self,
        source: AssociationAddress,
        group: u8,
        destination: AssociationAddress,
    ) -> DriverResult<bool> {
        self.check_association(source, group, destination)
    }

    async fn add_associations(
        &self,
        source: AssociationAddress,
        group: u8,
        destinations: Vec<AssociationAddress>,
    ) -> DriverResult<()> {
        self.record(&format!("add_associations {} {group}", source.node_id))?;
        for destination in destinations {
            if !self.check_association(source, group, destination)? {
                return Err(DriverError::new(
                    ZW_ASSOCIATION_NOT_ALLOWED,
                    format!(
                        "Node {} cannot be added to group {group} of node {}",
                        destination.node_id, source.node_id
                    ),
                ));
            }
            let mut table = lock(&self.associations);
            let members = table
                .members
                .entry(source)
                .or_default()
                .entry(group)
                .or_default();
            if !members.contains(&destination) {
                members.push(destination);
            }
        }
        Ok(())
    }

    async fn remove_associations(
        &self,
        source: AssociationAddress,
        group: u8,
        destinations: Vec<AssociationAddress>,
    ) -> DriverResult<()> {
        self.record(&format!("remove_associations {} {group}", source.node_id))?;
        self.require_address(source)?;
        let mut table = lock(&self.associations);
        if let Some(members) = table
            .members
            .get_mut(&source)
            .and_then(|groups| groups.get_mut(&group))
        {
            members.retain(|m| !destinations.contains(m));
        }
        Ok(())
    }

    async fn remove_node_from_all_associations(&self, node_id: NodeId) -> DriverResult<()> {
        self.record(&format!("remove_node_from_all_associations {node_id}"))?;
        let mut table = lock(&self.associations);
        for groups in table.members.values_mut() {
            for members in groups.values_mut() {
                members.retain(|m| m.node_id != node_id);
            }
        }
        Ok(())
    }

    fn provision_smart_start_node(&self, entry: ProvisioningEntry) -> DriverResult<()> {
        self.record("provision_smart_start_node")?;
        let mut entries = lock(&self.provisioning);
        entries.retain(|e| e.dsk != entry.dsk);
        entries.push(entry);
        Ok(())
    }

    fn unprovision_smart_start_node(&self, target: &DskOrNodeId) -> DriverResult<()> {
        self.record("unprovision_smart_start_node")?;
        lock(&self.provisioning).retain(|e| !target.matches(e));
        Ok(())
    }

    fn provisioning_entry(&self, target: &DskOrNodeId) -> Option<ProvisioningEntry> {
        lock(&self.provisioning)
            .iter()
            .find(|e| target.matches(e))
            .cloned()
    }

    fn provisioning_entries(&self) -> Vec<ProvisioningEntry> {
        lock(&self.provisioning).clone()
    }

    fn supports_feature(&self, feature: u8) -> Option<bool> {
        Some(lock(&self.radio).supported_features.contains(&feature))
    }

    async fn rf_region(&self) -> DriverResult<u8> {
        self.record("rf_region")?;
        Ok(lock(&self.radio).rf_region)
    }

    async fn set_rf_region(&self, region: u8) -> DriverResult<bool> {
        self.record(&format!("set_rf_region {region}"))?;
        lock(&self.radio).rf_region = region;
        Ok(true)
    }

    async fn powerlevel(&self) -> DriverResult<Powerlevel> {
        self.record("powerlevel")?;
        Ok(lock(&self.radio).powerlevel)
    }

    async fn set_powerlevel(&self, powerlevel: Powerlevel) -> DriverResult<bool> {
        self.record("set_powerlevel")?;
        lock(&self.radio).powerlevel = powerlevel;
        Ok(true)
    }

    fn is_any_ota_firmware_update_in_progress(&self) -> bool {
        self.read_nodes()
            .values()
            .any(|n| n.is_firmware_update_in_progress())
    }

    fn is_firmware_update_in_progress(&self) -> bool {
        lock(&self.radio).firmware_update_in_progress
    }

    async fn firmware_update_ota(
        &self,
        node_id: NodeId,
        updates: Vec<FirmwareFile>,
    ) -> DriverResult<FirmwareUpdateResult> {
        self.record(&format!("firmware_update_ota {node_id}"))?;
        self.require_node(node_id)?.update_firmware(updates).await
    }

    fn broadcast_node(&self) -> Arc<dyn VirtualNode> {
        let nodes = self.read_nodes().values().cloned().collect();
        Arc::new(SimulatedVirtualNode::new(
            "broadcast_node",
            nodes,
            self.recorder.clone(),
        ))
    }

    fn multicast_group(&self, node_ids: &[NodeId]) -> DriverResult<Arc<dyn VirtualNode>> {
        let nodes = node_ids
            .iter()
            .map(|&id| self.require_node(id))
            .collect::<DriverResult<Vec<_>>>()?;
        Ok(Arc::new(SimulatedVirtualNode::new(
            "multicast_group",
            nodes,
            self.recorder.clone(),
        )))
    }
}

// ── Virtual nodes ─────────────────────────────────────────────────────────────

/// A broadcast or multicast target over a fixed set of simulated nodes.
///
/// Calls are recorded as `broadcast_node.<op>` or `multicast_group.<op>`.
pub struct SimulatedVirtualNode {
    kind: &'static str,
    nodes: Vec<Arc<SimulatedNode>>,
    recorder: Recorder,
}

impl SimulatedVirtualNode {
    fn new(kind: &'static str, nodes: Vec<Arc<SimulatedNode>>, recorder: Recorder) -> Self {
        Self {
            kind,
            nodes,
            recorder,
        }
    }
}

#[async_trait]
impl VirtualNode for SimulatedVirtualNode {
    fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id()).collect()
    }

    async fn set_value(
        &self,
        value_id: &ValueId,
        value: Value,
        _options: Option<Value>,
    ) -> DriverResult<SetValueResult> {
        self.recorder.record(&format!("{}.set_value", self.kind))?;
        for node in &self.nodes {
            node.apply_value(value_id, value.clone());
        }
        Ok(SetValueResult::new(SetValueStatus::SuccessUnsupervised))
    }

    /// Endpoints that exist on every addressed node.
    fn endpoint_count(&self) -> u16 {
        self.nodes
            .iter()
            .map(|n| n.endpoint_count())
            .min()
            .unwrap_or(0)
    }

    fn endpoint(&self, index: u16) -> Option<Arc<dyn VirtualEndpoint>> {
        if index > self.endpoint_count() {
            return None;
        }
        Some(Arc::new(SimulatedVirtualEndpoint {
            kind: self.kind,
            index,
            nodes: self.nodes.clone(),
            recorder: self.recorder.clone(),
        }))
    }

    fn defined_value_ids(&self) -> Vec<ValueId> {
        let mut ids: Vec<ValueId> = Vec::new();
        for node in &self.nodes {
            for id in node.defined_value_ids() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }
}

/// One endpoint index across the nodes of a [`SimulatedVirtualNode`].
pub struct SimulatedVirtualEndpoint {
    kind: &'static str,
    index: u16,
    nodes: Vec<Arc<SimulatedNode>>,
    recorder: Recorder,
}

#[async_trait]
impl VirtualEndpoint for SimulatedVirtualEndpoint {
    fn index(&self) -> u16 {
        self.index
    }

    fn supports_cc(&self, command_class: u8) -> bool {
        self.nodes
            .iter()
            .any(|n| n.supports_cc_on_endpoint(command_class, self.index))
    }

    fn cc_version(&self, command_class: u8) -> u8 {
        self.nodes
            .iter()
            .map(|n| n.cc_version(command_class))
            .max()
            .unwrap_or(0)
    }

    fn supports_cc_api(&self, command_class: u8) -> bool {
        self.supports_cc(command_class)
    }

    async fn invoke_cc_api(
        &self,
        command_class: u8,
        method_name: &str,
        args: Vec<Value>,
    ) -> DriverResult<Value> {
        self.recorder.record(&format!(
            "{}.invoke_cc_api {} {} {}",
            self.kind,
            self.index,
            command_class,
            method_name
        ))?;
        Ok(json!({ "method": method_name, "args": args }))
    }
}
