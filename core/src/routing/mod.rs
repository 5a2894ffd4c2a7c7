//! Routing: shortest-path computation and next-hop resolution

pub mod bfs;

pub use bfs::{Edge, Router};
