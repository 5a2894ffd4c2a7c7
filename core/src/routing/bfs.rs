//! Breadth-first routing over the topology store.
//!
//! The graph is unweighted: hop count is the only cost. Edges are expanded in
//! insertion order and the first edge to discover a vertex wins, so ties are
//! broken by edge-list order, not by name.

use crate::topology::{TopologyStore, VertexId};
use std::collections::{HashMap, HashSet, VecDeque};

/// A directed hop `source -> destination`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub source: VertexId,
    pub destination: VertexId,
}

/// Read-only path computation over a [`TopologyStore`]
pub struct Router<'a> {
    store: &'a TopologyStore,
}

impl<'a> Router<'a> {
    pub fn new(store: &'a TopologyStore) -> Self {
        Self { store }
    }

    /// Shortest path from `from` to `to`, as the list of edges to traverse.
    ///
    /// `Some(vec![])` when `from == to`; `None` when `to` is never visited.
    pub fn shortest_path(&self, from: &VertexId, to: &VertexId) -> Option<Vec<Edge>> {
        if !self.store.contains(from) || !self.store.contains(to) {
            return None;
        }
        if from == to {
            return Some(Vec::new());
        }

        let mut visited: HashSet<&VertexId> = HashSet::new();
        let mut discovered_by: HashMap<&VertexId, &VertexId> = HashMap::new();
        let mut queue: VecDeque<&VertexId> = VecDeque::new();
        visited.insert(from);
        queue.push_back(from);

        'search: while let Some(current) = queue.pop_front() {
            for next in self.store.edges(current) {
                if !self.store.contains(next) || !visited.insert(next) {
                    continue;
                }
                discovered_by.insert(next, current);
                if next == to {
                    break 'search;
                }
                queue.push_back(next);
            }
        }

        let mut path = Vec::new();
        let mut cursor = discovered_by.get_key_value(to).map(|(k, _)| *k)?;
        while cursor != from {
            let source = discovered_by.get(cursor)?;
            path.push(Edge {
                source: (*source).clone(),
                destination: cursor.clone(),
            });
            cursor = *source;
        }
        path.reverse();
        Some(path)
    }

    /// First vertex on the shortest path from self to `target`
    pub fn next_hop(&self, target: &VertexId) -> Option<VertexId> {
        self.shortest_path(self.store.self_id(), target)?
            .into_iter()
            .next()
            .map(|edge| edge.destination)
    }

    /// Vertices along the shortest path from self to `target`, excluding self
    pub fn route(&self, target: &VertexId) -> Option<Vec<VertexId>> {
        self.shortest_path(self.store.self_id(), target)
            .map(|path| path.into_iter().map(|edge| edge.destination).collect())
    }
}
