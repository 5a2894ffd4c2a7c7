// Handshake: bind a transport link to a mesh identity

use crate::message::{decode_record, encode_record, Handshake};
use crate::node::MeshNode;
use crate::topology::{LinkRef, VertexId, FULL_NAME_SEPARATOR};
use crate::transport::{Channel, LinkRole, PeerHandle};
use crate::MeshError;
use tracing::{debug, info, warn};

impl MeshNode {
    /// Announce ourselves on a freshly established link
    pub(crate) fn on_link_established(&mut self, peer: &PeerHandle, role: LinkRole) {
        debug!("Link established with {} as {}", peer, role);

        let hello = Handshake {
            name: self.identity().full_name(),
        };
        let bytes = match encode_record(&hello) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode handshake: {}", e);
                return;
            }
        };
        if !self.transport().send(peer, Channel::Handshake, &bytes) {
            warn!("Handshake send to {} failed", peer);
        }
    }

    /// Remote identity arrived: bind the link, add the edge, ask for its graph
    pub(crate) fn on_handshake(
        &mut self,
        peer: &PeerHandle,
        role: LinkRole,
        data: &[u8],
        now: u64,
    ) -> Result<(), MeshError> {
        let hello: Handshake =
            decode_record(data).map_err(|e| MeshError::Decode(format!("handshake: {}", e)))?;

        if !hello.name.contains(FULL_NAME_SEPARATOR) {
            return Err(MeshError::Decode(format!(
                "handshake name without id: {}",
                hello.name
            )));
        }
        let id = VertexId::from_full_name(hello.name);
        if &id == self.self_id() {
            warn!("Ignoring handshake carrying our own identity from {}", peer);
            return Ok(());
        }

        let link = match role {
            LinkRole::Central => LinkRef::Central(peer.clone()),
            LinkRole::Peripheral => LinkRef::Peripheral(peer.clone()),
        };

        // A handle re-used by a different identity no longer reaches the old one
        if let Some(previous) = self.links.insert(peer.clone(), id.clone()) {
            if previous != id {
                if let Some(vertex) = self.store.vertex_mut(&previous) {
                    if vertex.link.handle() == Some(peer) {
                        vertex.link = LinkRef::None;
                    }
                }
            }
        }

        self.store.create_vertex(id.clone(), LinkRef::None);
        if let Some(vertex) = self.store.vertex_mut(&id) {
            if let Some(stale) = vertex.link.handle().filter(|h| *h != peer).cloned() {
                self.links.remove(&stale);
            }
            vertex.link = link;
            vertex.last_known_ping = now;
        }
        self.ping_timers.cancel(&id);

        let self_id = self.self_id().clone();
        if self.store.add_edge(&self_id, &id) {
            self.store.mark_local_update(now);
            info!("New neighbor: {}", id);
        }

        // A failed request is retried by the periodic exchange sweep
        if let Err(e) = self.request_exchange(&id) {
            debug!("Exchange request to {} not sent: {}", id, e);
        }
        Ok(())
    }
}
