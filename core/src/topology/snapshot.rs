/// Topology snapshots: the payload of a topology exchange
///
/// Wire form is a `CompressedSnapshot`: every vertex is listed once by name and
/// edges refer to vertices by their index in that list, then the bincode bytes
/// are LZ4-compressed with the uncompressed size prepended.

use super::store::TopologyStore;
use super::vertex::VertexId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Largest uncompressed snapshot accepted from a peer (1 MiB)
pub const MAX_SNAPSHOT_SIZE: usize = 1024 * 1024;

/// Errors decoding a snapshot received from a peer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("Serialization failed: {0}")]
    Serialization(String),
    #[error("Decompression failed: {0}")]
    Decompression(String),
    #[error("Snapshot too large: {0} bytes (max {MAX})", MAX = MAX_SNAPSHOT_SIZE)]
    TooLarge(usize),
    #[error("Edge index {index} out of range ({count} vertices)")]
    IndexOutOfRange { index: u32, count: usize },
}

/// One vertex of a snapshot, with names expanded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotVertex {
    pub id: VertexId,
    /// Reporter's `edges_last_updated` for this vertex
    pub last_updated: u64,
    pub edges: Vec<VertexId>,
}

/// A full copy of one device's graph view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySnapshot {
    pub sender: VertexId,
    pub vertices: Vec<SnapshotVertex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CompressedVertex {
    name: String,
    last_updated: u64,
    edges: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CompressedSnapshot {
    sender: String,
    vertices: Vec<CompressedVertex>,
}

impl TopologySnapshot {
    pub(crate) fn from_store(store: &TopologyStore) -> Self {
        let vertices = store
            .vertices()
            .map(|v| SnapshotVertex {
                id: v.id().clone(),
                last_updated: v.edges_last_updated,
                edges: v.outgoing_edges().to_vec(),
            })
            .collect();

        Self {
            sender: store.self_id().clone(),
            vertices,
        }
    }

    pub fn get(&self, id: &VertexId) -> Option<&SnapshotVertex> {
        self.vertices.iter().find(|v| &v.id == id)
    }

    /// Entries in merge order: breadth-first over the reported edges starting
    /// at `root`, followed by any entry the walk did not reach.
    pub fn merge_order(&self, root: &VertexId) -> Vec<&SnapshotVertex> {
        let by_id: HashMap<&VertexId, &SnapshotVertex> =
            self.vertices.iter().map(|v| (&v.id, v)).collect();

        let mut ordered = Vec::with_capacity(self.vertices.len());
        let mut seen: HashSet<&VertexId> = HashSet::new();
        let mut queue: VecDeque<&VertexId> = VecDeque::new();
        seen.insert(root);
        queue.push_back(root);

        while let Some(current) = queue.pop_front() {
            if let Some(entry) = by_id.get(current) {
                ordered.push(*entry);
                for next in &entry.edges {
                    if seen.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }

        for entry in &self.vertices {
            if !seen.contains(&entry.id) {
                seen.insert(&entry.id);
                ordered.push(entry);
            }
        }

        ordered
    }

    /// Encode into the compact wire form
    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        let mut index: HashMap<&VertexId, u32> = HashMap::new();
        let mut compressed: Vec<CompressedVertex> = Vec::with_capacity(self.vertices.len());

        // Listed vertices take the first indices; edges to vertices that are
        // not listed get appended as edge-less entries.
        for vertex in &self.vertices {
            if !index.contains_key(&vertex.id) {
                index.insert(&vertex.id, compressed.len() as u32);
                compressed.push(CompressedVertex {
                    name: vertex.id.as_str().to_string(),
                    last_updated: vertex.last_updated,
                    edges: Vec::new(),
                });
            }
        }

        for vertex in &self.vertices {
            let mut edges = Vec::with_capacity(vertex.edges.len());
            for destination in &vertex.edges {
                let j = match index.get(destination) {
                    Some(j) => *j,
                    None => {
                        let j = compressed.len() as u32;
                        index.insert(destination, j);
                        compressed.push(CompressedVertex {
                            name: destination.as_str().to_string(),
                            last_updated: 0,
                            edges: Vec::new(),
                        });
                        j
                    }
                };
                edges.push(j);
            }
            let i = index[&vertex.id] as usize;
            compressed[i].last_updated = vertex.last_updated;
            compressed[i].edges = edges;
        }

        let wire = CompressedSnapshot {
            sender: self.sender.as_str().to_string(),
            vertices: compressed,
        };
        let bytes =
            bincode::serialize(&wire).map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        Ok(lz4_flex::compress_prepend_size(&bytes))
    }

    /// Decode the compact wire form, validating every edge index
    pub fn decode(data: &[u8]) -> Result<Self, SnapshotError> {
        if let Some(prefix) = data.get(..4) {
            let declared = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
            if declared > MAX_SNAPSHOT_SIZE {
                return Err(SnapshotError::TooLarge(declared));
            }
        }
        let bytes = lz4_flex::decompress_size_prepended(data)
            .map_err(|e| SnapshotError::Decompression(e.to_string()))?;
        let wire: CompressedSnapshot = bincode::deserialize(&bytes)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        let names: Vec<VertexId> = wire
            .vertices
            .iter()
            .map(|v| VertexId::from_full_name(v.name.clone()))
            .collect();
        let count = names.len();

        let mut vertices = Vec::with_capacity(count);
        for (i, vertex) in wire.vertices.into_iter().enumerate() {
            let mut edges = Vec::with_capacity(vertex.edges.len());
            for index in vertex.edges {
                let destination = names
                    .get(index as usize)
                    .ok_or(SnapshotError::IndexOutOfRange { index, count })?;
                edges.push(destination.clone());
            }
            vertices.push(SnapshotVertex {
                id: names[i].clone(),
                last_updated: vertex.last_updated,
                edges,
            });
        }

        Ok(Self {
            sender: VertexId::from_full_name(wire.sender),
            vertices,
        })
    }
}
