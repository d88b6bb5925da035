//! Bridge between the driver's inclusion callbacks and client commands.
//!
//! While a secure node joins, the driver stops and asks for two decisions:
//! which security classes to grant, and the PIN matching the node's DSK.
//! The bridge turns each question into an event for the client that started
//! the inclusion, parks the driver on a oneshot channel and completes it when
//! a client answers with `controller.grant_security_classes` or
//! `controller.validate_dsk_and_enter_pin`.
//!
//! ```text
//!  driver                      bridge                        client
//!    │ grant_security_classes()  │                              │
//!    │──────────────────────────►│ store oneshot                │
//!    │                           │── "grant security classes" ─►│
//!    │        (suspended)        │                              │
//!    │                           │◄─ controller.grant_… ────────│
//!    │◄──────── Some(grant) ─────│ take + send                  │
//! ```
//!
//! At most one handle of each kind is pending.  A newer request replaces an
//! older one; the older waiter's sender is dropped so it observes `None`
//! (abandoned), never an error.  There is no timeout.
//!
//! The bridge is bound to a client only after the driver accepted that
//! client's inclusion; a rejected attempt leaves the running inclusion and
//! its parked requests alone.  The binding ends when the driver aborts or
//! the controller reports the inclusion stopped or failed.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info};
use zwave_core::domain::InclusionGrant;
use zwave_core::driver::InclusionUserCallbacks;
use zwave_core::OutgoingEvent;

use crate::application::registry::ClientRegistry;
use crate::domain::{ClientId, GatewayError, InclusionPhase};

/// A parked driver request, tagged with the order it was issued in.
struct Parked<T> {
    seq: u64,
    sender: oneshot::Sender<Option<T>>,
}

#[derive(Default)]
struct PendingInteractions {
    /// Requests issued so far; the next request gets `issued + 1`.
    issued: u64,
    grant: Option<Parked<InclusionGrant>>,
    dsk: Option<Parked<String>>,
}

impl PendingInteractions {
    fn next_seq(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }
}

pub struct InclusionBridge {
    registry: Arc<ClientRegistry>,
    pending: Mutex<PendingInteractions>,
    /// Client that started the current inclusion; receives the requests.
    bound_client: Mutex<Option<ClientId>>,
}

impl InclusionBridge {
    pub fn new(registry: Arc<ClientRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            pending: Mutex::new(PendingInteractions::default()),
            bound_client: Mutex::new(None),
        })
    }

    /// Sequence number of the most recent driver request.
    ///
    /// Taken before asking the driver to start an inclusion and passed to
    /// [`bind`](Self::bind) once the driver accepted.
    pub fn request_mark(&self) -> u64 {
        lock(&self.pending).issued
    }

    /// Hands the running inclusion to `client`.
    ///
    /// Only called after the driver accepted a new inclusion.  Requests
    /// issued up to `mark` belong to the previous inclusion and are dropped;
    /// requests the driver made since are kept.
    pub fn bind(&self, client: ClientId, mark: u64) {
        *lock(&self.bound_client) = Some(client);
        let mut pending = lock(&self.pending);
        if pending.grant.as_ref().is_some_and(|p| p.seq <= mark) {
            pending.grant = None;
        }
        if pending.dsk.as_ref().is_some_and(|p| p.seq <= mark) {
            pending.dsk = None;
        }
    }

    /// Forgets the bound client; later requests go to every listener.
    pub fn release(&self) {
        if lock(&self.bound_client).take().is_some() {
            debug!("inclusion client released");
        }
    }

    /// Client the requests are currently addressed to.
    pub fn bound_client(&self) -> Option<ClientId> {
        *lock(&self.bound_client)
    }

    /// Drops every pending handle without notifying anyone.
    pub fn clear(&self) {
        let mut pending = lock(&self.pending);
        pending.grant = None;
        pending.dsk = None;
    }

    pub fn resolve_grant(&self, grant: InclusionGrant) -> Result<(), GatewayError> {
        let parked = lock(&self.pending).grant.take().ok_or(
            GatewayError::InclusionPhaseNotInProgress {
                phase: InclusionPhase::GrantSecurityClasses,
            },
        )?;
        if parked.sender.send(Some(grant)).is_err() {
            debug!("grant arrived after the driver stopped waiting");
        }
        Ok(())
    }

    pub fn resolve_pin(&self, pin: String) -> Result<(), GatewayError> {
        let parked = lock(&self.pending).dsk.take().ok_or(
            GatewayError::InclusionPhaseNotInProgress {
                phase: InclusionPhase::ValidateDskAndEnterPin,
            },
        )?;
        if parked.sender.send(Some(pin)).is_err() {
            debug!("PIN arrived after the driver stopped waiting");
        }
        Ok(())
    }

    pub fn is_pending(&self, phase: InclusionPhase) -> bool {
        let pending = lock(&self.pending);
        match phase {
            InclusionPhase::GrantSecurityClasses => pending.grant.is_some(),
            InclusionPhase::ValidateDskAndEnterPin => pending.dsk.is_some(),
        }
    }

    /// Sends to the bound client, or to every listener if it is gone.
    fn emit(&self, event: &OutgoingEvent) {
        let bound = *lock(&self.bound_client);
        let delivered = bound.is_some_and(|client| self.registry.unicast_event(client, event));
        if !delivered {
            self.registry.broadcast_event(event);
        }
    }
}

#[async_trait]
impl InclusionUserCallbacks for InclusionBridge {
    async fn grant_security_classes(&self, requested: InclusionGrant) -> Option<InclusionGrant> {
        let (sender, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            let seq = pending.next_seq();
            if pending.grant.replace(Parked { seq, sender }).is_some() {
                debug!("replacing stale grant request");
            }
        }
        info!("inclusion waiting for security class grant");
        self.emit(&OutgoingEvent::GrantSecurityClasses { requested });
        rx.await.ok().flatten()
    }

    async fn validate_dsk_and_enter_pin(&self, dsk: String) -> Option<String> {
        let (sender, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            let seq = pending.next_seq();
            if pending.dsk.replace(Parked { seq, sender }).is_some() {
                debug!("replacing stale DSK request");
            }
        }
        info!("inclusion waiting for DSK validation");
        self.emit(&OutgoingEvent::ValidateDskAndEnterPin { dsk });
        rx.await.ok().flatten()
    }

    fn abort(&self) {
        info!("inclusion aborted by driver");
        self.clear();
        self.emit(&OutgoingEvent::InclusionAborted);
        self.release();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
