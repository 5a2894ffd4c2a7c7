//! Vertex records for the knowledge graph.
//!
//! Vertices live in a flat table keyed by [`VertexId`]. Edges are plain id
//! lists owned by their source vertex, so traversal always resolves through
//! the table and never through embedded references.

use crate::transport::PeerHandle;
use crate::MeshError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between display name and device id inside a full name
pub const FULL_NAME_SEPARATOR: char = '#';

/// Longest display name accepted for the local identity (bytes)
pub const MAX_DISPLAY_NAME_LEN: usize = 64;

/// Identity of a vertex: the device's full name (`display_name#id`).
///
/// This is the string that travels on the wire in every protocol record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexId(String);

impl VertexId {
    /// Wrap a full name received from the wire or built from an [`Identity`]
    pub fn from_full_name(full_name: impl Into<String>) -> Self {
        Self(full_name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable part of the full name
    pub fn display_name(&self) -> &str {
        match self.0.rsplit_once(FULL_NAME_SEPARATOR) {
            Some((name, _)) => name,
            None => &self.0,
        }
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VertexId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The local device identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Globally unique device id (UUID v4)
    pub id: String,
    /// Human-readable name chosen by the user
    pub display_name: String,
}

impl Identity {
    /// Create a fresh identity with a random device id
    pub fn generate(display_name: &str) -> Result<Self, MeshError> {
        Self::with_id(display_name, uuid::Uuid::new_v4().to_string())
    }

    /// Create an identity with a known device id
    pub fn with_id(display_name: &str, id: impl Into<String>) -> Result<Self, MeshError> {
        let id = id.into();
        if display_name.is_empty() || display_name.len() > MAX_DISPLAY_NAME_LEN {
            return Err(MeshError::InvalidConfig(format!(
                "display name must be 1..={} bytes",
                MAX_DISPLAY_NAME_LEN
            )));
        }
        if id.is_empty() || id.contains(FULL_NAME_SEPARATOR) {
            return Err(MeshError::InvalidConfig(format!(
                "device id must be non-empty and must not contain '{}'",
                FULL_NAME_SEPARATOR
            )));
        }
        Ok(Self {
            id,
            display_name: display_name.to_string(),
        })
    }

    /// `display_name#id`
    pub fn full_name(&self) -> String {
        format!("{}{}{}", self.display_name, FULL_NAME_SEPARATOR, self.id)
    }

    pub fn vertex_id(&self) -> VertexId {
        VertexId(self.full_name())
    }
}

/// Which side of the transport link holds the live connection to a vertex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum LinkRef {
    /// No direct link (vertex known only through reported topology)
    #[default]
    None,
    /// We initiated the link (we are the central)
    Central(PeerHandle),
    /// The remote initiated the link (we are the peripheral)
    Peripheral(PeerHandle),
}

impl LinkRef {
    /// Transport handle, if a link is held
    pub fn handle(&self) -> Option<&PeerHandle> {
        match self {
            LinkRef::None => None,
            LinkRef::Central(handle) | LinkRef::Peripheral(handle) => Some(handle),
        }
    }
}

/// A device node in the topology graph
#[derive(Debug, Clone)]
pub struct Vertex {
    id: VertexId,
    pub link: LinkRef,
    /// Most recent confirmed liveness (ms since epoch, 0 = never)
    pub last_known_ping: u64,
    /// Most recent completed inbound topology exchange with this vertex
    pub last_exchange_date: Option<u64>,
    /// Timestamp of this vertex's own edge list as last reported
    pub edges_last_updated: u64,
    pub(crate) outgoing_edges: Vec<VertexId>,
}

impl Vertex {
    pub(crate) fn new(id: VertexId, link: LinkRef) -> Self {
        Self {
            id,
            link,
            last_known_ping: 0,
            last_exchange_date: None,
            edges_last_updated: 0,
            outgoing_edges: Vec::new(),
        }
    }

    pub fn id(&self) -> &VertexId {
        &self.id
    }

    /// Destinations this vertex is known to reach, in insertion order
    pub fn outgoing_edges(&self) -> &[VertexId] {
        &self.outgoing_edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name_roundtrip_through_vertex_id() {
        let identity = Identity::with_id("alice", "1234").unwrap();
        let id = identity.vertex_id();

        assert_eq!(id.as_str(), "alice#1234");
        assert_eq!(id.display_name(), "alice");
    }

    #[test]
    fn test_display_name_may_contain_separator() {
        let identity = Identity::with_id("team#blue", "abcd").unwrap();
        let id = identity.vertex_id();

        assert_eq!(id.display_name(), "team#blue");
        assert_eq!(id.as_str(), "team#blue#abcd");
    }

    #[test]
    fn test_generated_identities_are_unique() {
        let a = Identity::generate("bob").unwrap();
        let b = Identity::generate("bob").unwrap();
        assert_ne!(a.vertex_id(), b.vertex_id());
    }

    #[test]
    fn test_rejects_bad_identity() {
        assert!(Identity::with_id("", "id").is_err());
        assert!(Identity::with_id(&"x".repeat(MAX_DISPLAY_NAME_LEN + 1), "id").is_err());
        assert!(Identity::with_id("carol", "a#b").is_err());
    }

    #[test]
    fn test_link_ref_handle() {
        let handle = PeerHandle::new("dev-1");
        assert_eq!(LinkRef::Central(handle.clone()).handle(), Some(&handle));
        assert_eq!(LinkRef::Peripheral(handle.clone()).handle(), Some(&handle));
        assert!(LinkRef::None.handle().is_none());
    }
}
