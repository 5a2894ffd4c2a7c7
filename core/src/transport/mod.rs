// Transport module: link abstraction and the in-memory hub

pub mod abstraction;
pub mod memory;

pub use abstraction::{Channel, LinkRole, PeerHandle, Transport, TransportEvent};
pub use memory::{Inbox, MemoryHub, MemoryTransport};

#[cfg(test)]
pub use abstraction::MockTransport;
