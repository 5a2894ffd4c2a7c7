//! Mesh protocols, each an `impl MeshNode` block over shared node state
//!
//! - **handshake**: identity announcement on every new link
//! - **liveness**: neighbor pings with cancellable timeouts, eviction
//! - **exchange**: chunked, ack-driven topology snapshot transfer

pub mod exchange;
pub mod handshake;
pub mod liveness;

pub use exchange::{join_segments, split_into_segments, ExchangeProgress};
pub use liveness::{TimerRequest, TimerToken};
