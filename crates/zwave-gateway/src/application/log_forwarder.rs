//! Reference-counted driver log forwarder.
//!
//! Driver log lines are only consumed while at least one client listens.  The
//! first `start_listening_logs` subscribes to the driver's log channel and
//! spawns one forwarding task; the last `stop_listening_logs` (or the last
//! listener disconnecting) aborts it.
//!
//! ```text
//!   subscribers: {}      task: None
//!        │ add(A)  → first subscriber, start task
//!   subscribers: {A}     task: Some
//!        │ add(B)  → already running
//!   subscribers: {A, B}  task: Some
//!        │ remove(A)
//!   subscribers: {B}     task: Some
//!        │ remove(B) → last subscriber, stop task
//!   subscribers: {}      task: None
//! ```
//!
//! The state is explicit and guarded by a single mutex owned by the client
//! registry, which flips the client's `receive_logs` flag inside the same
//! critical section.

use std::collections::HashSet;
use std::sync::Weak;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zwave_core::domain::LogEntry;

use crate::application::registry::ClientRegistry;
use crate::domain::ClientId;

/// What the registry must do after a subscription change.
#[derive(Debug, PartialEq, Eq)]
pub enum ForwarderTransition {
    /// Nothing to start or stop.
    Unchanged,
    /// The first subscriber arrived; a task must be started.
    Start,
    /// The last subscriber left; the running task must be stopped.
    Stop,
}

#[derive(Default)]
pub struct LogForwarderState {
    subscribers: HashSet<ClientId>,
    task: Option<JoinHandle<()>>,
}

impl LogForwarderState {
    /// Adds `client`.  Subscribing twice is a no-op.
    pub fn add(&mut self, client: ClientId) -> ForwarderTransition {
        let was_empty = self.subscribers.is_empty();
        if self.subscribers.insert(client) && was_empty && self.task.is_none() {
            ForwarderTransition::Start
        } else {
            ForwarderTransition::Unchanged
        }
    }

    /// Removes `client`.  Removing a non-subscriber is a no-op.
    pub fn remove(&mut self, client: ClientId) -> ForwarderTransition {
        if self.subscribers.remove(&client) && self.subscribers.is_empty() {
            ForwarderTransition::Stop
        } else {
            ForwarderTransition::Unchanged
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn set_task(&mut self, task: JoinHandle<()>) {
        if let Some(old) = self.task.replace(task) {
            old.abort();
        }
    }

    pub fn stop_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Spawns the task that relays driver log lines to listening clients.
///
/// The task holds only a weak reference to the registry so a dropped
/// registry ends it.
pub fn spawn_log_forwarder(
    mut logs: broadcast::Receiver<LogEntry>,
    registry: Weak<ClientRegistry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("log forwarder started");
        loop {
            let entry = match logs.recv().await {
                Ok(entry) => entry,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("log forwarder lagged; {skipped} log lines dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let Some(registry) = registry.upgrade() else {
                break;
            };
            registry.forward_log(&entry);
        }
        debug!("log forwarder stopped");
    })
}
