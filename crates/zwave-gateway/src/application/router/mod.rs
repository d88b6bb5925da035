//! Command router: maps `domain.tag` commands onto driver operations.
//!
//! A command string such as `"node.set_value"` is split at the first `.`
//! into a *domain* (`node`) and a *tag* (`set_value`).  Each domain lives in
//! its own module with one `handle` function; every handler validates its
//! input before calling the driver and renders its result through
//! [`zwave_core::compat`] for the caller's schema version.
//!
//! | Domain            | Module           |
//! |-------------------|------------------|
//! | `driver`          | [`driver`]       |
//! | `controller`      | [`controller`]   |
//! | `node`            | [`node`]         |
//! | `broadcast_node`  | [`virtual_node`] |
//! | `multicast_group` | [`virtual_node`] |
//!
//! Session-level commands (`initialize`, `set_api_schema`,
//! `start_listening`) never reach the router; the session handles them.

pub mod controller;
pub mod driver;
pub mod node;
pub mod virtual_node;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use zwave_core::domain::FirmwareFile;
use zwave_core::protocol::base64_decode;
use zwave_core::{Driver, IncomingMessage, NodeId};

use crate::application::inclusion::InclusionBridge;
use crate::application::registry::ClientRegistry;
use crate::domain::{ClientId, GatewayError};

/// Who is asking, and which result shapes they understand.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext {
    pub client: ClientId,
    pub schema_version: u32,
}

/// Work that must run only after the command's response was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferred {
    /// Factory-reset the controller.  The client gets its `{}` first because
    /// the reset tears the network down.
    HardReset,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouterOutcome {
    pub result: Value,
    pub deferred: Option<Deferred>,
}

impl RouterOutcome {
    pub fn result(result: Value) -> Self {
        Self {
            result,
            deferred: None,
        }
    }

    pub fn empty() -> Self {
        Self::result(Value::Object(Map::new()))
    }
}

pub type RouterResult = Result<RouterOutcome, GatewayError>;

pub struct CommandRouter {
    driver: Arc<dyn Driver>,
    registry: Arc<ClientRegistry>,
    inclusion: Arc<InclusionBridge>,
}

impl CommandRouter {
    pub fn new(
        driver: Arc<dyn Driver>,
        registry: Arc<ClientRegistry>,
        inclusion: Arc<InclusionBridge>,
    ) -> Self {
        Self {
            driver,
            registry,
            inclusion,
        }
    }

    pub async fn dispatch(&self, ctx: CommandContext, message: &IncomingMessage) -> RouterResult {
        let unknown = || GatewayError::UnknownCommand {
            command: message.command.clone(),
        };
        let (domain, tag) = message.command.split_once('.').ok_or_else(unknown)?;
        let args = Args::new(&message.args);

        let result = match domain {
            "driver" => driver::handle(self, ctx, tag, &args).await,
            "controller" => controller::handle(self, ctx, tag, &args).await,
            "node" => node::handle(self, ctx, tag, &args).await,
            "broadcast_node" => virtual_node::handle_broadcast(self, ctx, tag, &args).await,
            "multicast_group" => virtual_node::handle_multicast(self, ctx, tag, &args).await,
            _ => Err(unknown()),
        };
        result.map_err(|err| match err {
            // Handlers only know the tag; report the full command.
            GatewayError::UnknownCommand { .. } => unknown(),
            other => other,
        })
    }

    /// Runs an effect that was held back until after the response.
    pub async fn run_deferred(&self, deferred: Deferred) {
        match deferred {
            Deferred::HardReset => {
                info!("running deferred hard reset");
                if let Err(e) = self.driver.hard_reset().await {
                    warn!("deferred hard reset failed: {e}");
                }
            }
        }
    }
}

fn unknown_tag(tag: &str) -> GatewayError {
    GatewayError::UnknownCommand {
        command: tag.to_string(),
    }
}

// ── Argument access ───────────────────────────────────────────────────────────

/// Typed access to a command's fields.
pub struct Args<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> Args<'a> {
    pub fn new(fields: &'a Map<String, Value>) -> Self {
        Self { fields }
    }

    /// A field that must be present and well-typed.
    pub fn required<T: DeserializeOwned>(&self, key: &str) -> Result<T, GatewayError> {
        self.optional(key)?
            .ok_or_else(|| GatewayError::InvalidCommand(format!("missing field `{key}`")))
    }

    /// A field that may be absent or `null`, but is well-typed if present.
    pub fn optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, GatewayError> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|e| GatewayError::InvalidCommand(format!("invalid field `{key}`: {e}"))),
        }
    }

    pub fn node_id(&self) -> Result<NodeId, GatewayError> {
        self.required("nodeId")
    }

    /// The `updates` list of a firmware command, with base64 payloads decoded.
    pub fn firmware_updates(&self) -> Result<Vec<FirmwareFile>, GatewayError> {
        let updates: Vec<FirmwareUpdateArg> = self.required("updates")?;
        updates.into_iter().map(FirmwareUpdateArg::decode).collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirmwareUpdateArg {
    file: String,
    #[serde(default)]
    file_format: Option<String>,
    #[serde(default)]
    target: Option<u8>,
}

impl FirmwareUpdateArg {
    fn decode(self) -> Result<FirmwareFile, GatewayError> {
        let data = base64_decode(&self.file)
            .map_err(|e| GatewayError::InvalidCommand(format!("invalid firmware file: {e}")))?;
        Ok(FirmwareFile {
            data,
            file_format: self.file_format,
            target: self.target,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
