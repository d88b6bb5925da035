//! Registry of connected clients and per-recipient event fan-out.
//!
//! Every client that completed the handshake is registered here with its
//! negotiated schema version, its subscriptions and a [`ClientSink`] that
//! queues frames to its WebSocket writer.  Events are shaped once per
//! distinct schema version and cloned to every recipient on that version.
//!
//! # Thread safety
//!
//! The client map sits behind an `RwLock`: fan-out takes a read lock, while
//! register / remove / subscription changes take a write lock.  The log
//! forwarder state has its own mutex, always acquired *before* the client
//! map so the `receive_logs` flag and the reference count change together.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use zwave_core::compat;
use zwave_core::domain::{LogEntry, LogFilter};
use zwave_core::{Driver, OutgoingEvent, OutgoingMessage};

use crate::application::log_forwarder::{
    spawn_log_forwarder, ForwarderTransition, LogForwarderState,
};
use crate::domain::{ClientId, ClientInfo};

// ── Sink ──────────────────────────────────────────────────────────────────────

/// Outbound queue of one client.
#[cfg_attr(test, mockall::automock)]
pub trait ClientSink: Send + Sync {
    /// Queues `message`.  Returns `false` once the connection is gone.
    fn send(&self, message: OutgoingMessage) -> bool;
}

/// One frame queued for a session's writer task.
#[derive(Debug)]
pub struct OutboundFrame {
    pub message: OutgoingMessage,
    /// Fired by the writer once the frame has been written to the socket.
    pub written: Option<oneshot::Sender<()>>,
}

impl OutboundFrame {
    /// A frame whose delivery the sender wants to wait for.
    pub fn acknowledged(message: OutgoingMessage) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                message,
                written: Some(tx),
            },
            rx,
        )
    }
}

impl From<OutgoingMessage> for OutboundFrame {
    fn from(message: OutgoingMessage) -> Self {
        Self {
            message,
            written: None,
        }
    }
}

pub type OutboundSender = mpsc::UnboundedSender<OutboundFrame>;

/// [`ClientSink`] backed by the unbounded channel drained by the session's
/// writer task.
pub struct ChannelSink(OutboundSender);

impl ChannelSink {
    pub fn new(sender: OutboundSender) -> Self {
        Self(sender)
    }
}

impl ClientSink for ChannelSink {
    fn send(&self, message: OutgoingMessage) -> bool {
        self.0.send(message.into()).is_ok()
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

struct ClientEntry {
    info: ClientInfo,
    sink: Arc<dyn ClientSink>,
}

pub struct ClientRegistry {
    driver: Arc<dyn Driver>,
    clients: RwLock<HashMap<ClientId, ClientEntry>>,
    logs: Mutex<LogForwarderState>,
}

impl ClientRegistry {
    pub fn new(driver: Arc<dyn Driver>) -> Arc<Self> {
        Arc::new(Self {
            driver,
            clients: RwLock::new(HashMap::new()),
            logs: Mutex::new(LogForwarderState::default()),
        })
    }

    pub fn register(&self, info: ClientInfo, sink: Arc<dyn ClientSink>) {
        info!(
            "client {} registered from {} (schema {})",
            info.id, info.peer, info.schema_version
        );
        self.write_clients()
            .insert(info.id, ClientEntry { info, sink });
    }

    /// Removes a client and releases its log subscription.
    pub fn remove(&self, client: ClientId) {
        self.stop_listening_logs(client);
        if let Some(entry) = self.write_clients().remove(&client) {
            info!("client {} removed ({})", client, entry.info.peer);
        }
    }

    pub fn client_info(&self, client: ClientId) -> Option<ClientInfo> {
        self.read_clients().get(&client).map(|e| e.info.clone())
    }

    pub fn schema_version(&self, client: ClientId) -> Option<u32> {
        self.read_clients()
            .get(&client)
            .map(|e| e.info.schema_version)
    }

    pub fn client_count(&self) -> usize {
        self.read_clients().len()
    }

    /// Turns event forwarding on or off for one client.
    pub fn set_receive_events(&self, client: ClientId, enabled: bool) {
        if let Some(entry) = self.write_clients().get_mut(&client) {
            entry.info.subscriptions.receive_events = enabled;
        }
    }

    // ── Delivery ──────────────────────────────────────────────────────────────

    /// Queues a frame for one client.  Returns `false` if it is not connected.
    pub fn send_to(&self, client: ClientId, message: OutgoingMessage) -> bool {
        let sink = self.read_clients().get(&client).map(|e| Arc::clone(&e.sink));
        match sink {
            Some(sink) => sink.send(message),
            None => false,
        }
    }

    /// Shapes `event` for one client's schema version and queues it.
    pub fn unicast_event(&self, client: ClientId, event: &OutgoingEvent) -> bool {
        let target = self
            .read_clients()
            .get(&client)
            .map(|e| (e.info.schema_version, Arc::clone(&e.sink)));
        match target {
            Some((version, sink)) => sink.send(compat::event_message(event, version)),
            None => false,
        }
    }

    /// Sends `event` to every client that called `start_listening`.
    pub fn broadcast_event(&self, event: &OutgoingEvent) {
        self.fan_out(event, |info| info.subscriptions.receive_events);
    }

    /// Sends `event` to every registered client regardless of subscriptions.
    pub fn broadcast_to_all(&self, event: &OutgoingEvent) {
        self.fan_out(event, |_| true);
    }

    /// Sends one driver log line to every matching log subscriber.
    pub fn forward_log(&self, entry: &LogEntry) {
        let event = OutgoingEvent::Logging {
            entry: entry.clone(),
        };
        self.fan_out(&event, |info| {
            info.subscriptions.receive_logs
                && info
                    .subscriptions
                    .log_filter
                    .as_ref()
                    .map_or(true, |filter| entry.matches(filter))
        });
    }

    fn fan_out(&self, event: &OutgoingEvent, wants: impl Fn(&ClientInfo) -> bool) {
        // Collect targets first so no sink is called under the lock.
        let targets: Vec<(u32, Arc<dyn ClientSink>)> = self
            .read_clients()
            .values()
            .filter(|e| wants(&e.info))
            .map(|e| (e.info.schema_version, Arc::clone(&e.sink)))
            .collect();

        let mut shaped: HashMap<u32, OutgoingMessage> = HashMap::new();
        for (version, sink) in targets {
            let message = shaped
                .entry(version)
                .or_insert_with(|| compat::event_message(event, version))
                .clone();
            sink.send(message);
        }
    }

    // ── Log forwarding ────────────────────────────────────────────────────────

    /// Subscribes `client` to driver logs.  The forwarder starts with the
    /// first subscriber.  Returns `false` if the client is unknown.
    pub fn start_listening_logs(self: &Arc<Self>, client: ClientId, filter: Option<LogFilter>) -> bool {
        let mut logs = self.lock_logs();
        {
            let mut clients = self.write_clients();
            let Some(entry) = clients.get_mut(&client) else {
                return false;
            };
            entry.info.subscriptions.receive_logs = true;
            entry.info.subscriptions.log_filter = filter;
        }
        if logs.add(client) == ForwarderTransition::Start {
            debug!("first log subscriber {client}; starting log forwarder");
            logs.set_task(spawn_log_forwarder(
                self.driver.subscribe_logs(),
                Arc::downgrade(self),
            ));
        }
        true
    }

    /// Unsubscribes `client`.  The forwarder stops with the last subscriber.
    pub fn stop_listening_logs(&self, client: ClientId) {
        let mut logs = self.lock_logs();
        if let Some(entry) = self.write_clients().get_mut(&client) {
            entry.info.subscriptions.receive_logs = false;
            entry.info.subscriptions.log_filter = None;
        }
        if logs.remove(client) == ForwarderTransition::Stop {
            debug!("last log subscriber {client} left; stopping log forwarder");
            logs.stop_task();
        }
    }

    /// Re-subscribes the running forwarder, e.g. after the driver's log
    /// configuration changed.  Does nothing if no one is listening.
    pub fn restart_log_forwarder_if_active(self: &Arc<Self>) {
        let mut logs = self.lock_logs();
        if logs.is_active() {
            debug!("restarting log forwarder");
            logs.set_task(spawn_log_forwarder(
                self.driver.subscribe_logs(),
                Arc::downgrade(self),
            ));
        }
    }

    pub fn is_log_forwarder_active(&self) -> bool {
        self.lock_logs().is_active()
    }

    // ── Lock helpers ──────────────────────────────────────────────────────────

    // A poisoned lock only means another task panicked mid-update; the map
    // itself is still consistent.
    fn read_clients(&self) -> RwLockReadGuard<'_, HashMap<ClientId, ClientEntry>> {
        self.clients.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_clients(&self) -> RwLockWriteGuard<'_, HashMap<ClientId, ClientEntry>> {
        self.clients.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_logs(&self) -> MutexGuard<'_, LogForwarderState> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
