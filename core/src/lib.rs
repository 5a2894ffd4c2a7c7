// HopMesh Core: proximity mesh routing
//
// Devices that can only talk to whoever is in radio range still reach
// everyone: each node keeps a graph of who can reach whom, swaps it with
// its neighbors in MTU-sized pieces, and forwards chat hop by hop along
// the shortest known path.
//
// Everything protocol-related runs on one sequential state machine
// (`MeshNode`); `service` wraps it in a tokio actor.

pub mod config;
pub mod events;
pub mod message;
pub mod node;
pub mod protocol;
pub mod routing;
pub mod service;
pub mod topology;
pub mod transport;

use thiserror::Error;

pub use config::MeshConfig;
pub use events::{ExchangeDirection, MeshEvent};
pub use message::{ChatMessage, RoutedMessage};
pub use node::MeshNode;
pub use protocol::{ExchangeProgress, TimerRequest, TimerToken};
pub use routing::{Edge, Router};
pub use service::{start_mesh_service, MeshCommand, MeshHandle};
pub use topology::{Identity, LinkRef, TopologySnapshot, TopologyStore, Vertex, VertexId};
pub use transport::{Channel, LinkRole, MemoryHub, MemoryTransport, PeerHandle, Transport, TransportEvent};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Nothing here is fatal: every variant means "this operation had no effect".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// Malformed envelope or payload
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Encode error: {0}")]
    Encode(String),
    /// Message references an identity or link not in the store
    #[error("Unknown vertex: {0}")]
    UnknownVertex(String),
    #[error("No route to {0}")]
    NoRoute(String),
    /// Vertex is known but no transport link is held to it
    #[error("Not connected to {0}")]
    NotConnected(String),
    #[error("Transport send to {0} failed")]
    SendFailure(String),
    /// Request ignored while an outbound exchange is pending
    #[error("Exchange with {0} already in progress")]
    DuplicateExchange(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Mesh service not running")]
    ServiceStopped,
}

impl From<topology::SnapshotError> for MeshError {
    fn from(err: topology::SnapshotError) -> Self {
        MeshError::Decode(err.to_string())
    }
}

// ============================================================================
// TIME
// ============================================================================

/// Milliseconds since the Unix epoch; the clock every protocol timestamp uses
pub fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
