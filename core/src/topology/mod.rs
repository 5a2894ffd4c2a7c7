//! Topology: the knowledge graph of reachable devices
//!
//! - **vertex**: identities, link references and vertex records
//! - **store**: the graph itself, with mutation primitives and snapshot merge
//! - **snapshot**: compact, index-compressed graph copies for topology exchange

pub mod snapshot;
pub mod store;
pub mod vertex;

pub use snapshot::{SnapshotError, SnapshotVertex, TopologySnapshot, MAX_SNAPSHOT_SIZE};
pub use store::{MergeOutcome, TopologyChange, TopologyStore};
pub use vertex::{Identity, LinkRef, Vertex, VertexId, FULL_NAME_SEPARATOR, MAX_DISPLAY_NAME_LEN};
