//! MeshNode: the sequential protocol state machine and message dispatcher.
//!
//! A `MeshNode` owns the topology store and every piece of per-peer protocol
//! state. It performs no I/O of its own besides calling [`Transport::send`]
//! and never reads the clock: every entry point takes `now` in milliseconds.
//! Callers must serialize access; `service` does so with a tokio actor.

use crate::config::MeshConfig;
use crate::events::MeshEvent;
use crate::message::{
    decode_record, encode_record, ChatMessage, RoutedMessage, MAX_CHAT_TEXT,
};
use crate::protocol::exchange::ExchangeTracker;
use crate::protocol::liveness::PingTimers;
use crate::protocol::TimerRequest;
use crate::routing::Router;
use crate::topology::{Identity, LinkRef, TopologyChange, TopologyStore, VertexId};
use crate::transport::{Channel, LinkRole, PeerHandle, Transport, TransportEvent};
use crate::MeshError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct MeshNode {
    identity: Identity,
    self_id: VertexId,
    config: MeshConfig,
    transport: Arc<dyn Transport>,
    pub(crate) store: TopologyStore,
    /// Transport link -> vertex learned through its handshake
    pub(crate) links: HashMap<PeerHandle, VertexId>,
    pub(crate) exchanges: ExchangeTracker,
    pub(crate) ping_timers: PingTimers,
    pub(crate) events: Vec<MeshEvent>,
}

impl MeshNode {
    pub fn new(
        identity: Identity,
        config: MeshConfig,
        transport: Arc<dyn Transport>,
        now: u64,
    ) -> Result<Self, MeshError> {
        config.validate()?;
        if config.max_transport_payload > transport.max_payload_size() {
            return Err(MeshError::InvalidConfig(format!(
                "max_transport_payload {} exceeds transport limit {}",
                config.max_transport_payload,
                transport.max_payload_size()
            )));
        }

        let self_id = identity.vertex_id();
        info!("Mesh node {} ready", self_id);

        Ok(Self {
            store: TopologyStore::new(self_id.clone(), now),
            identity,
            self_id,
            config,
            transport,
            links: HashMap::new(),
            exchanges: ExchangeTracker::default(),
            ping_timers: PingTimers::default(),
            events: Vec::new(),
        })
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn self_id(&self) -> &VertexId {
        &self.self_id
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn store(&self) -> &TopologyStore {
        &self.store
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Vertex bound to a transport link, once its handshake arrived
    pub fn vertex_for_link(&self, link: &PeerHandle) -> Option<&VertexId> {
        self.links.get(link)
    }

    pub fn neighbors(&self) -> Vec<VertexId> {
        self.store.neighbors()
    }

    /// Every vertex in the graph except ourselves
    pub fn known_vertices(&self) -> Vec<VertexId> {
        self.store
            .vertices()
            .map(|vertex| vertex.id().clone())
            .filter(|id| id != &self.self_id)
            .collect()
    }

    /// Hops from us to `target`, excluding ourselves
    pub fn route_to(&self, target: &VertexId) -> Option<Vec<VertexId>> {
        Router::new(&self.store).route(target)
    }

    pub fn drain_events(&mut self) -> Vec<MeshEvent> {
        std::mem::take(&mut self.events)
    }

    /// Timeouts armed since the last call; schedule each and feed the token
    /// back through `on_timer`.
    pub fn drain_timer_requests(&mut self) -> Vec<TimerRequest> {
        self.ping_timers.drain_requests()
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Feed one transport event through the protocols.
    ///
    /// Errors mean the event was dropped; local state is unaffected by them.
    pub fn handle_transport_event(
        &mut self,
        event: TransportEvent,
        now: u64,
    ) -> Result<(), MeshError> {
        self.track_changes(|node| match event {
            TransportEvent::LinkEstablished { peer, role } => {
                node.on_link_established(&peer, role);
                Ok(())
            }
            TransportEvent::DataReceived {
                peer,
                role,
                channel,
                data,
            } => node.on_data(&peer, role, channel, &data, now),
            TransportEvent::LinkLost { peer } => {
                node.on_link_lost(&peer, now);
                Ok(())
            }
        })
    }

    fn on_data(
        &mut self,
        peer: &PeerHandle,
        role: LinkRole,
        channel: Channel,
        data: &[u8],
        now: u64,
    ) -> Result<(), MeshError> {
        match channel {
            Channel::Handshake => self.on_handshake(peer, role, data, now),
            Channel::Exchange => self.on_exchange_data(peer, data, now),
            Channel::Chat => {
                let from = self.touch_link(peer, now)?;
                self.on_chat(&from, data)
            }
            Channel::Routing => {
                self.touch_link(peer, now)?;
                self.on_routing(data)
            }
            Channel::Ping => {
                let from = self.touch_link(peer, now)?;
                self.on_ping(&from, data, now)
            }
        }
    }

    /// Any traffic on a handshaken link counts as a sign of life
    fn touch_link(&mut self, peer: &PeerHandle, now: u64) -> Result<VertexId, MeshError> {
        let Some(from) = self.links.get(peer).cloned() else {
            debug!("Data from {} before handshake dropped", peer);
            return Err(MeshError::UnknownVertex(peer.to_string()));
        };
        self.refresh_liveness(&from, now);
        Ok(from)
    }

    fn on_chat(&mut self, from: &VertexId, data: &[u8]) -> Result<(), MeshError> {
        let message: ChatMessage =
            decode_record(data).map_err(|e| MeshError::Decode(format!("chat: {}", e)))?;
        if message.receiver != self.self_id.as_str() {
            warn!(
                "Chat from {} addressed to {} dropped",
                from, message.receiver
            );
            return Err(MeshError::UnknownVertex(message.receiver));
        }

        debug!("Chat from {}", message.sender);
        self.events.push(MeshEvent::MessageReceived(message));
        Ok(())
    }

    fn on_routing(&mut self, data: &[u8]) -> Result<(), MeshError> {
        let routed: RoutedMessage =
            decode_record(data).map_err(|e| MeshError::Decode(format!("routed message: {}", e)))?;
        self.forward(routed)
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Send a chat message: directly to a neighbor, otherwise routed.
    pub fn send_chat(&mut self, message: &str, target: &VertexId) -> Result<(), MeshError> {
        if message.len() > MAX_CHAT_TEXT {
            return Err(MeshError::Encode(format!(
                "message of {} bytes exceeds {}",
                message.len(),
                MAX_CHAT_TEXT
            )));
        }

        let chat = ChatMessage {
            sender: self.self_id.to_string(),
            message: message.to_string(),
            receiver: target.to_string(),
        };

        if self.store.is_neighbor(target) {
            let bytes = encode_record(&chat).map_err(|e| MeshError::Encode(e.to_string()))?;
            self.check_payload_size(&bytes)?;
            self.send_to_vertex(target, Channel::Chat, &bytes)
        } else {
            self.forward(RoutedMessage {
                target_user: target.to_string(),
                message: chat,
            })
        }
    }

    /// Deliver a routed message locally or pass it, unchanged, one hop closer.
    pub fn forward(&mut self, routed: RoutedMessage) -> Result<(), MeshError> {
        let target = VertexId::from_full_name(routed.target_user.clone());
        if target == self.self_id {
            debug!("Routed message from {} delivered", routed.message.sender);
            self.events.push(MeshEvent::MessageReceived(routed.message));
            return Ok(());
        }

        let Some(next_hop) = Router::new(&self.store).next_hop(&target) else {
            warn!("No route to {}", target);
            return Err(MeshError::NoRoute(target.to_string()));
        };

        let bytes = encode_record(&routed).map_err(|e| MeshError::Encode(e.to_string()))?;
        self.check_payload_size(&bytes)?;
        debug!("Forwarding message for {} via {}", target, next_hop);
        self.send_to_vertex(&next_hop, Channel::Routing, &bytes)
    }

    /// Records are never fragmented, so each must fit one transport write
    fn check_payload_size(&self, bytes: &[u8]) -> Result<(), MeshError> {
        if bytes.len() > self.config.max_transport_payload {
            return Err(MeshError::Encode(format!(
                "record of {} bytes exceeds transport payload of {}",
                bytes.len(),
                self.config.max_transport_payload
            )));
        }
        Ok(())
    }

    /// Send bytes over whichever link reaches `id`
    pub(crate) fn send_to_vertex(
        &self,
        id: &VertexId,
        channel: Channel,
        data: &[u8],
    ) -> Result<(), MeshError> {
        let vertex = self
            .store
            .vertex(id)
            .ok_or_else(|| MeshError::UnknownVertex(id.to_string()))?;
        let handle = match &vertex.link {
            LinkRef::None => return Err(MeshError::NotConnected(id.to_string())),
            LinkRef::Central(handle) => handle,
            LinkRef::Peripheral(handle) => handle,
        };

        if self.transport.send(handle, channel, data) {
            Ok(())
        } else {
            Err(MeshError::SendFailure(id.to_string()))
        }
    }

    // ------------------------------------------------------------------------
    // Change tracking
    // ------------------------------------------------------------------------

    /// Run `step` and turn whatever it did to the graph into observer events
    pub(crate) fn track_changes<T>(&mut self, step: impl FnOnce(&mut Self) -> T) -> T {
        let neighbors_before = self.store.neighbors();
        let version_before = self.store.graph_version();

        let result = step(self);

        let changes = self.store.take_changes();
        let structural = !changes.is_empty();
        for change in changes {
            self.events.push(match change {
                TopologyChange::VertexAdded(id) => MeshEvent::VertexAdded(id),
                TopologyChange::VertexRemoved(id) => MeshEvent::VertexRemoved(id),
            });
        }

        let neighbors_after = self.store.neighbors();
        let neighbors_changed = neighbors_after != neighbors_before;
        if neighbors_changed {
            self.events.push(MeshEvent::NeighborsChanged(neighbors_after));
        }

        if structural || neighbors_changed || self.store.graph_version() != version_before {
            self.events.push(MeshEvent::TopologyUpdated {
                origin: self.store.last_update_origin().cloned(),
            });
        }

        result
    }
}
