//! In-memory transport hub
//!
//! Connects any number of in-process endpoints the way a radio would: links
//! are established explicitly, bytes only flow over established links, and
//! every delivery shows up as a [`TransportEvent`] on the receiver's inbox.
//! Used by the simulator and by tests to run several nodes side by side.

use super::abstraction::{Channel, LinkRole, PeerHandle, Transport, TransportEvent};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

pub type Inbox = mpsc::UnboundedReceiver<TransportEvent>;

struct HubState {
    inboxes: HashMap<PeerHandle, mpsc::UnboundedSender<TransportEvent>>,
    /// (local, remote) -> local role on that link
    links: HashMap<(PeerHandle, PeerHandle), LinkRole>,
    /// Endpoints whose sends currently fail
    muted: HashSet<PeerHandle>,
    max_payload: usize,
    delivered: u64,
}

/// Shared switchboard for [`MemoryTransport`] endpoints
#[derive(Clone)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new(max_payload: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                inboxes: HashMap::new(),
                links: HashMap::new(),
                muted: HashSet::new(),
                max_payload,
                delivered: 0,
            })),
        }
    }

    /// Attach a new endpoint. Re-registering a handle replaces its inbox.
    pub fn register(&self, handle: PeerHandle) -> (MemoryTransport, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().inboxes.insert(handle.clone(), tx);
        (
            MemoryTransport {
                local: handle,
                hub: self.clone(),
            },
            rx,
        )
    }

    /// Establish a link; both ends get `LinkEstablished` with their own role.
    ///
    /// Returns false if either endpoint is unknown or the link already exists.
    pub fn connect(&self, central: &PeerHandle, peripheral: &PeerHandle) -> bool {
        let mut state = self.state.lock();
        if central == peripheral
            || !state.inboxes.contains_key(central)
            || !state.inboxes.contains_key(peripheral)
            || state
                .links
                .contains_key(&(central.clone(), peripheral.clone()))
        {
            return false;
        }

        state.links.insert(
            (central.clone(), peripheral.clone()),
            LinkRole::Central,
        );
        state.links.insert(
            (peripheral.clone(), central.clone()),
            LinkRole::Peripheral,
        );
        debug!("Memory link up: {} -> {}", central, peripheral);

        Self::deliver(
            &state,
            central,
            TransportEvent::LinkEstablished {
                peer: peripheral.clone(),
                role: LinkRole::Central,
            },
        );
        Self::deliver(
            &state,
            peripheral,
            TransportEvent::LinkEstablished {
                peer: central.clone(),
                role: LinkRole::Peripheral,
            },
        );
        true
    }

    /// Drop a link as if the radio lost it; both ends get `LinkLost`
    pub fn sever(&self, a: &PeerHandle, b: &PeerHandle) -> bool {
        let mut state = self.state.lock();
        let existed = state.links.remove(&(a.clone(), b.clone())).is_some();
        state.links.remove(&(b.clone(), a.clone()));
        if existed {
            debug!("Memory link lost: {} <-> {}", a, b);
            Self::deliver(&state, a, TransportEvent::LinkLost { peer: b.clone() });
            Self::deliver(&state, b, TransportEvent::LinkLost { peer: a.clone() });
        }
        existed
    }

    /// Make every send from `handle` fail (or succeed again)
    pub fn set_muted(&self, handle: &PeerHandle, muted: bool) {
        let mut state = self.state.lock();
        if muted {
            state.muted.insert(handle.clone());
        } else {
            state.muted.remove(handle);
        }
    }

    pub fn is_linked(&self, a: &PeerHandle, b: &PeerHandle) -> bool {
        self.state
            .lock()
            .links
            .contains_key(&(a.clone(), b.clone()))
    }

    /// Total number of payloads delivered so far
    pub fn delivered(&self) -> u64 {
        self.state.lock().delivered
    }

    fn deliver(state: &HubState, to: &PeerHandle, event: TransportEvent) -> bool {
        match state.inboxes.get(to) {
            Some(inbox) => inbox.send(event).is_ok(),
            None => false,
        }
    }
}

/// One endpoint attached to a [`MemoryHub`]
#[derive(Clone)]
pub struct MemoryTransport {
    local: PeerHandle,
    hub: MemoryHub,
}

impl MemoryTransport {
    pub fn local_handle(&self) -> &PeerHandle {
        &self.local
    }
}

impl Transport for MemoryTransport {
    fn send(&self, peer: &PeerHandle, channel: Channel, data: &[u8]) -> bool {
        let mut state = self.hub.state.lock();

        if state.muted.contains(&self.local) {
            trace!("Send from muted endpoint {} dropped", self.local);
            return false;
        }
        if data.len() > state.max_payload {
            debug!(
                "Payload of {} bytes exceeds transport limit {}",
                data.len(),
                state.max_payload
            );
            return false;
        }
        let Some(local_role) = state.links.get(&(self.local.clone(), peer.clone())).copied()
        else {
            return false;
        };

        let remote_role = match local_role {
            LinkRole::Central => LinkRole::Peripheral,
            LinkRole::Peripheral => LinkRole::Central,
        };
        let event = TransportEvent::DataReceived {
            peer: self.local.clone(),
            role: remote_role,
            channel,
            data: data.to_vec(),
        };
        let ok = MemoryHub::deliver(&state, peer, event);
        if ok {
            state.delivered += 1;
        }
        ok
    }

    fn disconnect(&self, peer: &PeerHandle) {
        let mut state = self.hub.state.lock();
        let existed = state
            .links
            .remove(&(self.local.clone(), peer.clone()))
            .is_some();
        state.links.remove(&(peer.clone(), self.local.clone()));
        if existed {
            debug!("Memory link closed by {}: {}", self.local, peer);
            MemoryHub::deliver(
                &state,
                peer,
                TransportEvent::LinkLost {
                    peer: self.local.clone(),
                },
            );
        }
    }

    fn max_payload_size(&self) -> usize {
        self.hub.state.lock().max_payload
    }
}
