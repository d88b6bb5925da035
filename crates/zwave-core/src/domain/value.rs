//! Value identifiers, value metadata and the results of writing a value.
//!
//! A *value* is one addressable data point on a node: a switch state, a
//! temperature reading, a configuration parameter.  It is addressed by a
//! [`ValueId`] (command class + endpoint + property + optional property key)
//! and described by [`ValueMetadata`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `property` / `propertyKey` part of a value address.
///
/// Drivers use either a numeric key (e.g. a configuration parameter number)
/// or a name (e.g. `"currentValue"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyKey {
    Number(u32),
    Name(String),
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        PropertyKey::Name(name.to_string())
    }
}

impl From<u32> for PropertyKey {
    fn from(number: u32) -> Self {
        PropertyKey::Number(number)
    }
}

/// Address of a single value on a node.
///
/// ```json
/// {"commandClass":37,"endpoint":0,"property":"targetValue"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueId {
    pub command_class: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<u16>,
    pub property: PropertyKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_key: Option<PropertyKey>,
}

impl ValueId {
    /// Builds a value id on the root endpoint without a property key.
    pub fn new(command_class: u8, property: impl Into<PropertyKey>) -> Self {
        Self {
            command_class,
            endpoint: None,
            property: property.into(),
            property_key: None,
        }
    }

    /// Returns a copy of this id addressed to `endpoint`.
    pub fn with_endpoint(mut self, endpoint: u16) -> Self {
        self.endpoint = Some(endpoint);
        self
    }
}

/// The type tag carried by [`ValueMetadata`].
///
/// `buffer` was introduced in schema version 2; older clients receive
/// `string` instead (see [`crate::compat::value_metadata`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ValueType {
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "number[]")]
    NumberArray,
    #[serde(rename = "string[]")]
    StringArray,
    #[serde(rename = "buffer")]
    Buffer,
    #[serde(rename = "duration")]
    Duration,
    #[serde(rename = "color")]
    Color,
    #[default]
    #[serde(rename = "any")]
    Any,
}

/// Describes the type and semantics of a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueMetadata {
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub readable: bool,
    pub writeable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub states: BTreeMap<String, String>,
}

impl ValueMetadata {
    /// Readable and writeable metadata of the given type with no labels.
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            readable: true,
            writeable: true,
            label: None,
            description: None,
            unit: None,
            min: None,
            max: None,
            states: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writeable = false;
        self
    }
}

impl Default for ValueMetadata {
    /// The metadata a driver reports for a value it knows nothing about.
    fn default() -> Self {
        Self::new(ValueType::Any)
    }
}

/// A value as it appears inside a node snapshot or a `value notification`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSnapshot {
    #[serde(flatten)]
    pub value_id: ValueId,
    pub cc_version: u8,
    pub metadata: ValueMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Arguments of `value added`, `value updated` and `value removed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueChangeArgs {
    #[serde(flatten)]
    pub value_id: ValueId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

/// Arguments of a stateless `value notification` (e.g. a scene activation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueNotificationArgs {
    #[serde(flatten)]
    pub value_id: ValueId,
    pub value: Value,
}

/// Arguments of `metadata updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUpdatedArgs {
    #[serde(flatten)]
    pub value_id: ValueId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ValueMetadata>,
}

/// Outcome of a value write as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetValueStatus {
    /// The device does not support the command class.
    NoDeviceSupport,
    /// The device accepted the command and is transitioning.
    Working,
    /// The device rejected the command.
    Fail,
    /// The addressed endpoint does not exist.
    EndpointNotFound,
    /// The driver cannot write this value.
    NotImplemented,
    /// The value was rejected before sending.
    InvalidValue,
    /// The command was sent without supervision; delivery only.
    SuccessUnsupervised,
    /// The device confirmed the new value.
    Success,
}

impl SetValueStatus {
    /// Whether pre-29 clients see this outcome as `success: true`.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            SetValueStatus::Working | SetValueStatus::Success | SetValueStatus::SuccessUnsupervised
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetValueResult {
    pub status: SetValueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SetValueResult {
    pub fn new(status: SetValueStatus) -> Self {
        Self {
            status,
            message: None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
