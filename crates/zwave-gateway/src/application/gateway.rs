//! The gateway's shared services and the connection handshake.
//!
//! One [`Gateway`] exists per process.  It owns the driver handle and the
//! services every session shares: the client registry, the event forwarder,
//! the inclusion bridge and the command router.  The transport layer calls
//! [`Gateway::version_message`] on connect, [`Gateway::negotiate`] on the
//! first client frame, and [`Gateway::connect`] once the handshake passed.

use std::sync::Arc;

use zwave_core::protocol::SERVER_VERSION;
use zwave_core::{Driver, IncomingMessage, OutgoingMessage, MAX_SCHEMA_VERSION, MIN_SCHEMA_VERSION};

use crate::application::forwarder::EventForwarder;
use crate::application::inclusion::InclusionBridge;
use crate::application::registry::{ChannelSink, ClientRegistry, OutboundSender};
use crate::application::router::CommandRouter;
use crate::application::session::Session;
use crate::domain::{ClientInfo, GatewayError};

/// Commands allowed as the first frame of a connection.
pub const HANDSHAKE_COMMANDS: [&str; 2] = ["initialize", "set_api_schema"];

pub struct Gateway {
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) registry: Arc<ClientRegistry>,
    pub(crate) forwarder: Arc<EventForwarder>,
    pub(crate) inclusion: Arc<InclusionBridge>,
    pub(crate) router: CommandRouter,
}

impl Gateway {
    pub fn new(driver: Arc<dyn Driver>) -> Arc<Self> {
        let registry = ClientRegistry::new(Arc::clone(&driver));
        let inclusion = InclusionBridge::new(Arc::clone(&registry));
        let forwarder = EventForwarder::new(
            Arc::clone(&driver),
            Arc::clone(&registry),
            Arc::clone(&inclusion),
        );
        let router = CommandRouter::new(
            Arc::clone(&driver),
            Arc::clone(&registry),
            Arc::clone(&inclusion),
        );
        Arc::new(Self {
            driver,
            registry,
            forwarder,
            inclusion,
            router,
        })
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn forwarder(&self) -> &Arc<EventForwarder> {
        &self.forwarder
    }

    pub fn inclusion(&self) -> &Arc<InclusionBridge> {
        &self.inclusion
    }

    /// The greeting sent before the client says anything.
    pub fn version_message(&self) -> OutgoingMessage {
        OutgoingMessage::Version {
            driver_version: self.driver.version(),
            server_version: SERVER_VERSION.to_string(),
            home_id: self.driver.controller().home_id(),
            min_schema_version: MIN_SCHEMA_VERSION,
            max_schema_version: MAX_SCHEMA_VERSION,
        }
    }

    /// Validates the first frame of a connection and returns the negotiated
    /// schema version.
    ///
    /// # Errors
    ///
    /// [`GatewayError::SchemaVersionUnsupported`] if the frame is not a
    /// handshake command or asks for a version outside the supported range.
    pub fn negotiate(message: &IncomingMessage) -> Result<u32, GatewayError> {
        let requested = message.args.get("schemaVersion").and_then(|v| v.as_i64());
        let unsupported = || GatewayError::SchemaVersionUnsupported {
            requested,
            min: MIN_SCHEMA_VERSION,
            max: MAX_SCHEMA_VERSION,
        };
        if !HANDSHAKE_COMMANDS.contains(&message.command.as_str()) {
            return Err(unsupported());
        }
        let version = requested.ok_or_else(unsupported)?;
        u32::try_from(version)
            .ok()
            .filter(|v| (MIN_SCHEMA_VERSION..=MAX_SCHEMA_VERSION).contains(v))
            .ok_or_else(unsupported)
    }

    /// Registers a client that completed the handshake.
    pub fn connect(
        self: &Arc<Self>,
        peer: impl Into<String>,
        schema_version: u32,
        outbound: OutboundSender,
    ) -> Session {
        let info = ClientInfo::new(peer, schema_version);
        let client = info.id;
        self.registry
            .register(info, Arc::new(ChannelSink::new(outbound.clone())));
        Session::new(Arc::clone(self), client, schema_version, outbound)
    }
}
