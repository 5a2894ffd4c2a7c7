//! Topology Store: the best-known reachability graph.
//!
//! The store owns every vertex and every directed edge known to this device.
//! Edge knowledge is per-source: each vertex owns the list of vertices *it* is
//! known to reach. Our own (self) edge list is authoritative; every other list
//! comes from topology snapshots reported by neighbors and is merged with a
//! last-writer-wins rule per vertex.
//!
//! Invariants maintained here:
//! - the self vertex is always present and its id never changes
//! - a vertex never lists itself as an outgoing edge
//! - every edge destination is a vertex present in the table

use super::snapshot::TopologySnapshot;
use super::vertex::{LinkRef, Vertex, VertexId};
use crate::routing::Router;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Structural change recorded by the store, drained by the node to build
/// observer events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyChange {
    VertexAdded(VertexId),
    VertexRemoved(VertexId),
}

/// Result of merging a reported snapshot into the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Vertices whose edge list was rebuilt from the snapshot
    pub rebuilt: Vec<VertexId>,
    /// Vertices created because the snapshot mentioned them
    pub created: Vec<VertexId>,
    /// Vertices pruned because they became unreachable
    pub removed: Vec<VertexId>,
}

impl MergeOutcome {
    /// Did the merge change anything at all?
    pub fn changed(&self) -> bool {
        !self.rebuilt.is_empty() || !self.created.is_empty() || !self.removed.is_empty()
    }
}

/// Most recent change attributed to one origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UpdateMark {
    version: u64,
    at: u64,
}

pub struct TopologyStore {
    self_id: VertexId,
    vertices: BTreeMap<VertexId, Vertex>,
    /// Last time the local graph changed (ms)
    time_of_last_update: u64,
    /// Reporter whose snapshot caused the last change (None = local change)
    last_update_origin: Option<VertexId>,
    /// Bumped on every change; never goes backwards, unlike the clock
    graph_version: u64,
    /// Latest change per origin (None = local change)
    update_marks: HashMap<Option<VertexId>, UpdateMark>,
    changes: Vec<TopologyChange>,
}

impl TopologyStore {
    /// Create a store containing only the self vertex
    pub fn new(self_id: VertexId, now: u64) -> Self {
        let mut vertices = BTreeMap::new();
        let mut me = Vertex::new(self_id.clone(), LinkRef::None);
        me.edges_last_updated = now;
        me.last_known_ping = now;
        vertices.insert(self_id.clone(), me);

        Self {
            self_id,
            vertices,
            time_of_last_update: now,
            last_update_origin: None,
            graph_version: 0,
            update_marks: HashMap::new(),
            changes: Vec::new(),
        }
    }

    pub fn self_id(&self) -> &VertexId {
        &self.self_id
    }

    pub fn time_of_last_update(&self) -> u64 {
        self.time_of_last_update
    }

    pub fn last_update_origin(&self) -> Option<&VertexId> {
        self.last_update_origin.as_ref()
    }

    pub fn graph_version(&self) -> u64 {
        self.graph_version
    }

    /// Did anyone other than `peer` change the graph after `version`?
    pub fn changed_since_version(&self, version: u64, peer: &VertexId) -> bool {
        self.update_marks
            .iter()
            .any(|(origin, mark)| origin.as_ref() != Some(peer) && mark.version > version)
    }

    /// Did anyone other than `peer` change the graph after time `at`?
    pub fn changed_since(&self, at: u64, peer: &VertexId) -> bool {
        self.update_marks
            .iter()
            .any(|(origin, mark)| origin.as_ref() != Some(peer) && mark.at > at)
    }

    fn record_update(&mut self, origin: Option<VertexId>, now: u64) {
        self.graph_version += 1;
        self.time_of_last_update = now;
        self.update_marks.insert(
            origin.clone(),
            UpdateMark {
                version: self.graph_version,
                at: now,
            },
        );
        self.last_update_origin = origin;
    }

    /// Insert a vertex. Idempotent: an existing vertex is left untouched.
    pub fn create_vertex(&mut self, id: VertexId, link: LinkRef) -> VertexId {
        if !self.vertices.contains_key(&id) {
            debug!("Vertex created: {}", id);
            self.changes.push(TopologyChange::VertexAdded(id.clone()));
            self.vertices.insert(id.clone(), Vertex::new(id.clone(), link));
        }
        id
    }

    pub fn vertex(&self, id: &VertexId) -> Option<&Vertex> {
        self.vertices.get(id)
    }

    pub fn vertex_mut(&mut self, id: &VertexId) -> Option<&mut Vertex> {
        self.vertices.get_mut(id)
    }

    pub fn contains(&self, id: &VertexId) -> bool {
        self.vertices.contains_key(id)
    }

    /// All vertices in id order
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.values()
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Outgoing edges of a vertex, in insertion order
    pub fn edges(&self, id: &VertexId) -> &[VertexId] {
        self.vertices
            .get(id)
            .map(|v| v.outgoing_edges.as_slice())
            .unwrap_or(&[])
    }

    /// Append `source -> destination` if absent. Returns true if added.
    pub fn add_edge(&mut self, source: &VertexId, destination: &VertexId) -> bool {
        if source == destination || !self.vertices.contains_key(destination) {
            return false;
        }
        match self.vertices.get_mut(source) {
            Some(vertex) if !vertex.outgoing_edges.contains(destination) => {
                vertex.outgoing_edges.push(destination.clone());
                true
            }
            _ => false,
        }
    }

    /// Remove `source -> destination`. Returns true if it existed.
    pub fn remove_edge(&mut self, source: &VertexId, destination: &VertexId) -> bool {
        match self.vertices.get_mut(source) {
            Some(vertex) => {
                let before = vertex.outgoing_edges.len();
                vertex.outgoing_edges.retain(|d| d != destination);
                vertex.outgoing_edges.len() != before
            }
            None => false,
        }
    }

    /// Remove a vertex if it is no longer reachable from self, then walk its
    /// previously known outgoing edges and remove everything that became
    /// unreachable as a consequence.
    ///
    /// Returns every vertex removed, in removal order. A reachable vertex (or
    /// self) is never removed.
    pub fn remove_vertex(&mut self, id: &VertexId) -> Vec<VertexId> {
        let mut removed = Vec::new();
        let mut worklist = vec![id.clone()];

        while let Some(candidate) = worklist.pop() {
            if candidate == self.self_id || self.is_reachable(&candidate) {
                continue;
            }
            let Some(vertex) = self.vertices.remove(&candidate) else {
                continue;
            };
            for other in self.vertices.values_mut() {
                other.outgoing_edges.retain(|d| d != &candidate);
            }
            debug!("Vertex pruned: {}", candidate);
            self.changes
                .push(TopologyChange::VertexRemoved(candidate.clone()));
            worklist.extend(vertex.outgoing_edges.into_iter().rev());
            removed.push(candidate);
        }

        removed
    }

    /// Destinations of self's own outgoing edges
    pub fn neighbors(&self) -> Vec<VertexId> {
        self.edges(&self.self_id).to_vec()
    }

    pub fn is_neighbor(&self, id: &VertexId) -> bool {
        self.edges(&self.self_id).contains(id)
    }

    /// True iff `id` is self or a path from self exists
    pub fn is_reachable(&self, id: &VertexId) -> bool {
        Router::new(self).shortest_path(&self.self_id, id).is_some()
    }

    /// Record that our own edge list changed locally (handshake, eviction)
    pub fn mark_local_update(&mut self, now: u64) {
        let self_id = self.self_id.clone();
        if let Some(me) = self.vertices.get_mut(&self_id) {
            me.edges_last_updated = now;
        }
        self.record_update(None, now);
    }

    /// Copy of the whole graph for a topology exchange
    pub fn snapshot(&self) -> TopologySnapshot {
        TopologySnapshot::from_store(self)
    }

    /// Merge a snapshot reported by `reporter` (last-writer-wins per vertex).
    ///
    /// 1. `self -> reporter` is added if absent: the exchange itself proves a
    ///    direct link.
    /// 2. Every reported vertex known locally (or created along the way as an
    ///    edge destination) whose reported timestamp is `>=` our
    ///    `edges_last_updated` gets its edge list rebuilt to exactly match
    ///    the report. Older reports are ignored for that vertex.
    /// 3. Destinations that lost their last incoming path are pruned.
    ///
    /// Our own edge list is never taken from a remote report. Vertices are
    /// visited breadth-first from the reporter so that a destination created
    /// by one entry has its own entry applied in the same pass.
    pub fn apply_exchanged_snapshot(
        &mut self,
        reporter: &VertexId,
        snapshot: &TopologySnapshot,
        now: u64,
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        if reporter == &self.self_id {
            return outcome;
        }

        if !self.vertices.contains_key(reporter) {
            self.create_vertex(reporter.clone(), LinkRef::None);
            outcome.created.push(reporter.clone());
        }
        let self_id = self.self_id.clone();
        if self.add_edge(&self_id, reporter) {
            self.mark_local_update(now);
            outcome.rebuilt.push(self_id.clone());
        }

        let mut orphans: Vec<VertexId> = Vec::new();
        for entry in snapshot.merge_order(reporter) {
            if entry.id == self.self_id {
                continue;
            }
            let Some(local) = self.vertices.get(&entry.id) else {
                continue;
            };
            if entry.last_updated < local.edges_last_updated {
                debug!(
                    "Ignoring stale edges for {} ({} < {})",
                    entry.id, entry.last_updated, local.edges_last_updated
                );
                continue;
            }

            let mut wanted: Vec<VertexId> = Vec::with_capacity(entry.edges.len());
            for destination in &entry.edges {
                if destination != &entry.id && !wanted.contains(destination) {
                    wanted.push(destination.clone());
                }
            }

            let current = local.outgoing_edges.clone();
            let timestamp_changed = local.edges_last_updated != entry.last_updated;

            for gone in current.iter().filter(|d| !wanted.contains(*d)) {
                self.remove_edge(&entry.id, gone);
                orphans.push(gone.clone());
            }
            for destination in &wanted {
                if !self.vertices.contains_key(destination) {
                    self.create_vertex(destination.clone(), LinkRef::None);
                    outcome.created.push(destination.clone());
                }
            }
            if let Some(vertex) = self.vertices.get_mut(&entry.id) {
                vertex.outgoing_edges = wanted.clone();
                vertex.edges_last_updated = entry.last_updated;
            }

            if current != wanted || timestamp_changed {
                outcome.rebuilt.push(entry.id.clone());
            }
        }

        for orphan in orphans {
            outcome.removed.extend(self.remove_vertex(&orphan));
        }

        if outcome.changed() {
            self.record_update(Some(reporter.clone()), now);
        }

        outcome
    }

    /// Drain the structural change journal
    pub fn take_changes(&mut self) -> Vec<TopologyChange> {
        std::mem::take(&mut self.changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::snapshot::SnapshotVertex;

    fn id(name: &str) -> VertexId {
        VertexId::from_full_name(format!("{}#{}", name, name.len()))
    }

    fn store_with_chain() -> TopologyStore {
        // self -> a -> b -> c
        let mut store = TopologyStore::new(id("self"), 100);
        for name in ["a", "b", "c"] {
            store.create_vertex(id(name), LinkRef::None);
        }
        store.add_edge(&id("self"), &id("a"));
        store.add_edge(&id("a"), &id("b"));
        store.add_edge(&id("b"), &id("c"));
        store
    }

    fn entry(name: &str, last_updated: u64, edges: &[&str]) -> SnapshotVertex {
        SnapshotVertex {
            id: id(name),
            last_updated,
            edges: edges.iter().map(|e| id(e)).collect(),
        }
    }

    #[test]
    fn test_self_vertex_present_on_creation() {
        let store = TopologyStore::new(id("self"), 5);
        assert!(store.contains(&id("self")));
        assert_eq!(store.self_id(), &id("self"));
        assert_eq!(store.len(), 1);
        assert!(store.is_reachable(&id("self")));
    }

    #[test]
    fn test_create_vertex_is_idempotent() {
        let mut store = TopologyStore::new(id("self"), 0);
        store.create_vertex(id("a"), LinkRef::None);
        store.add_edge(&id("self"), &id("a"));
        let again = store.create_vertex(id("a"), LinkRef::None);

        assert_eq!(again, id("a"));
        assert_eq!(store.len(), 2);
        assert_eq!(store.neighbors(), vec![id("a")]);
        assert_eq!(
            store.take_changes(),
            vec![TopologyChange::VertexAdded(id("a"))]
        );
    }

    #[test]
    fn test_add_edge_rules() {
        let mut store = TopologyStore::new(id("self"), 0);
        store.create_vertex(id("a"), LinkRef::None);

        assert!(store.add_edge(&id("self"), &id("a")));
        assert!(!store.add_edge(&id("self"), &id("a")), "duplicate edge");
        assert!(!store.add_edge(&id("a"), &id("a")), "self loop");
        assert!(!store.add_edge(&id("a"), &id("ghost")), "unknown destination");
        assert_eq!(store.edges(&id("self")), &[id("a")]);
    }

    #[test]
    fn test_neighbors_and_reachability() {
        let store = store_with_chain();
        assert_eq!(store.neighbors(), vec![id("a")]);
        assert!(store.is_neighbor(&id("a")));
        assert!(!store.is_neighbor(&id("c")));
        assert!(store.is_reachable(&id("c")));
    }

    #[test]
    fn test_remove_vertex_refuses_reachable() {
        let mut store = store_with_chain();
        assert!(store.remove_vertex(&id("b")).is_empty());
        assert!(store.remove_vertex(&id("self")).is_empty());
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_remove_vertex_prunes_transitively() {
        let mut store = store_with_chain();
        store.remove_edge(&id("self"), &id("a"));

        let removed = store.remove_vertex(&id("a"));

        assert_eq!(removed, vec![id("a"), id("b"), id("c")]);
        assert_eq!(store.len(), 1);
        assert!(store.contains(&id("self")));
    }

    #[test]
    fn test_remove_vertex_keeps_alternate_paths() {
        // self -> a -> c, self -> d -> c
        let mut store = store_with_chain();
        store.create_vertex(id("d"), LinkRef::None);
        store.add_edge(&id("self"), &id("d"));
        store.add_edge(&id("d"), &id("c"));
        store.remove_edge(&id("self"), &id("a"));

        let removed = store.remove_vertex(&id("a"));

        assert_eq!(removed, vec![id("a"), id("b")]);
        assert!(store.contains(&id("c")));
        assert!(store.is_reachable(&id("c")));
    }

    #[test]
    fn test_snapshot_merge_adds_reporter_edge_and_creates_vertices() {
        let mut store = TopologyStore::new(id("self"), 0);
        store.create_vertex(id("e"), LinkRef::None);

        let snapshot = TopologySnapshot {
            sender: id("e"),
            vertices: vec![entry("e", 10, &["self", "f"]), entry("f", 7, &["g"])],
        };
        let outcome = store.apply_exchanged_snapshot(&id("e"), &snapshot, 50);

        assert!(store.is_neighbor(&id("e")));
        assert_eq!(store.edges(&id("e")), &[id("self"), id("f")]);
        assert_eq!(store.edges(&id("f")), &[id("g")]);
        assert!(store.contains(&id("g")));
        assert_eq!(outcome.created, vec![id("f"), id("g")]);
        assert_eq!(store.time_of_last_update(), 50);
        assert_eq!(store.last_update_origin(), Some(&id("e")));
        assert_eq!(store.vertex(&id("f")).unwrap().edges_last_updated, 7);
    }

    #[test]
    fn test_snapshot_merge_ignores_older_edges() {
        let mut store = TopologyStore::new(id("self"), 0);
        store.create_vertex(id("e"), LinkRef::None);
        store.add_edge(&id("self"), &id("e"));
        store.create_vertex(id("f"), LinkRef::None);
        store.create_vertex(id("x"), LinkRef::None);
        store.add_edge(&id("e"), &id("f"));
        store.add_edge(&id("f"), &id("x"));
        store.vertex_mut(&id("f")).unwrap().edges_last_updated = 100;

        let snapshot = TopologySnapshot {
            sender: id("e"),
            vertices: vec![entry("e", 5, &["f"]), entry("f", 50, &[])],
        };
        store.apply_exchanged_snapshot(&id("e"), &snapshot, 200);

        assert_eq!(store.edges(&id("f")), &[id("x")]);
        assert_eq!(store.vertex(&id("f")).unwrap().edges_last_updated, 100);
    }

    #[test]
    fn test_snapshot_merge_prunes_lost_destinations() {
        let mut store = TopologyStore::new(id("self"), 0);
        store.create_vertex(id("e"), LinkRef::None);
        store.add_edge(&id("self"), &id("e"));
        let first = TopologySnapshot {
            sender: id("e"),
            vertices: vec![entry("e", 1, &["f"]), entry("f", 1, &["g"])],
        };
        store.apply_exchanged_snapshot(&id("e"), &first, 10);
        assert!(store.contains(&id("g")));

        let second = TopologySnapshot {
            sender: id("e"),
            vertices: vec![entry("e", 2, &[])],
        };
        let outcome = store.apply_exchanged_snapshot(&id("e"), &second, 20);

        assert_eq!(outcome.removed, vec![id("f"), id("g")]);
        assert!(!store.contains(&id("f")));
        assert!(!store.contains(&id("g")));
    }

    #[test]
    fn test_snapshot_merge_is_idempotent() {
        let mut store = TopologyStore::new(id("self"), 0);
        store.create_vertex(id("e"), LinkRef::None);
        let snapshot = TopologySnapshot {
            sender: id("e"),
            vertices: vec![entry("e", 3, &["f"]), entry("f", 3, &["self"])],
        };

        assert!(store.apply_exchanged_snapshot(&id("e"), &snapshot, 10).changed());
        let edges_before: Vec<_> = store
            .vertices()
            .map(|v| (v.id().clone(), v.outgoing_edges().to_vec(), v.edges_last_updated))
            .collect();

        let outcome = store.apply_exchanged_snapshot(&id("e"), &snapshot, 99);
        let edges_after: Vec<_> = store
            .vertices()
            .map(|v| (v.id().clone(), v.outgoing_edges().to_vec(), v.edges_last_updated))
            .collect();

        assert!(!outcome.changed());
        assert_eq!(edges_before, edges_after);
        assert_eq!(store.time_of_last_update(), 10);
    }

    #[test]
    fn test_snapshot_never_overrides_own_edges() {
        let mut store = TopologyStore::new(id("self"), 0);
        store.create_vertex(id("e"), LinkRef::None);
        store.create_vertex(id("a"), LinkRef::None);
        store.add_edge(&id("self"), &id("a"));

        let snapshot = TopologySnapshot {
            sender: id("e"),
            vertices: vec![entry("self", u64::MAX, &[]), entry("e", 1, &[])],
        };
        store.apply_exchanged_snapshot(&id("e"), &snapshot, 10);

        assert_eq!(store.edges(&id("self")), &[id("a"), id("e")]);
    }

    #[test]
    fn test_update_marks_kept_per_origin() {
        let mut store = TopologyStore::new(id("self"), 0);
        store.create_vertex(id("e"), LinkRef::None);
        store.create_vertex(id("h"), LinkRef::None);
        store.add_edge(&id("self"), &id("e"));
        store.add_edge(&id("self"), &id("h"));
        let start = store.graph_version();

        let from_e = TopologySnapshot {
            sender: id("e"),
            vertices: vec![entry("e", 1, &["f"])],
        };
        store.apply_exchanged_snapshot(&id("e"), &from_e, 10);
        let from_h = TopologySnapshot {
            sender: id("h"),
            vertices: vec![entry("h", 1, &["g"])],
        };
        store.apply_exchanged_snapshot(&id("h"), &from_h, 20);

        // The latest change came from h, but e's earlier one is still news to h
        assert_eq!(store.last_update_origin(), Some(&id("h")));
        assert!(store.changed_since_version(start, &id("h")));
        assert!(store.changed_since(5, &id("h")));
        assert!(store.changed_since_version(start, &id("e")));

        // Past e's change, only h has news, which h already knows
        assert!(!store.changed_since(10, &id("h")));
        assert!(store.changed_since(10, &id("e")));

        store.mark_local_update(30);
        assert!(store.changed_since(20, &id("h")));
        assert_eq!(store.graph_version(), start + 3);
    }

    #[test]
    fn test_graph_version_ignores_clock() {
        let mut store = TopologyStore::new(id("self"), 100);
        store.mark_local_update(100);
        let version = store.graph_version();
        store.mark_local_update(100);

        assert!(!store.changed_since(100, &id("e")));
        assert!(store.changed_since_version(version, &id("e")));
    }
}
