// Observer events: what the UI layer learns about the mesh

use crate::message::ChatMessage;
use crate::topology::VertexId;
use std::fmt;

/// Which side of a topology exchange finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeDirection {
    /// We finished receiving the peer's graph
    Inbound,
    /// The peer acknowledged the last segment of our graph
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    /// A vertex entered the known graph
    VertexAdded(VertexId),
    /// A vertex left the known graph (unreachable or evicted)
    VertexRemoved(VertexId),
    /// The set of direct neighbors changed; carries the new set
    NeighborsChanged(Vec<VertexId>),
    /// The graph changed; `origin` is the reporter, `None` for local changes
    TopologyUpdated { origin: Option<VertexId> },
    /// A chat message addressed to us arrived
    MessageReceived(ChatMessage),
    ExchangeCompleted {
        peer: VertexId,
        direction: ExchangeDirection,
    },
}

impl fmt::Display for MeshEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshEvent::VertexAdded(id) => write!(f, "vertex added: {}", id),
            MeshEvent::VertexRemoved(id) => write!(f, "vertex removed: {}", id),
            MeshEvent::NeighborsChanged(neighbors) => {
                write!(f, "neighbors changed ({})", neighbors.len())
            }
            MeshEvent::TopologyUpdated { origin: Some(origin) } => {
                write!(f, "topology updated by {}", origin)
            }
            MeshEvent::TopologyUpdated { origin: None } => write!(f, "topology updated locally"),
            MeshEvent::MessageReceived(msg) => write!(f, "message from {}", msg.sender),
            MeshEvent::ExchangeCompleted { peer, direction } => {
                write!(f, "exchange {:?} with {} complete", direction, peer)
            }
        }
    }
}
