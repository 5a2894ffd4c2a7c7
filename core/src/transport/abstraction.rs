//! Transport abstraction layer for HopMesh
//!
//! The physical transport (BLE advertising, scanning, connection setup) lives
//! outside the core. It is seen here only as the ability to send bytes to a
//! peer on a named logical channel, plus a stream of [`TransportEvent`]s.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque transport-level identifier of a connected peer (e.g. a BLE device
/// UUID). Distinct from the peer's mesh identity, which is only learned
/// through the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerHandle(String);

impl PeerHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical channels multiplexed over one link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Handshake,
    Chat,
    Routing,
    Ping,
    Exchange,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Handshake => "handshake",
            Channel::Chat => "chat",
            Channel::Routing => "routing",
            Channel::Ping => "ping",
            Channel::Exchange => "exchange",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side initiated the link, from the local device's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkRole {
    /// We connected to the peer
    Central,
    /// The peer connected to us
    Peripheral,
}

impl fmt::Display for LinkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkRole::Central => write!(f, "central"),
            LinkRole::Peripheral => write!(f, "peripheral"),
        }
    }
}

/// Events from the transport layer to the mesh core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A new link is up; the handshake has not happened yet
    LinkEstablished { peer: PeerHandle, role: LinkRole },
    /// Bytes arrived on a logical channel
    DataReceived {
        peer: PeerHandle,
        role: LinkRole,
        channel: Channel,
        data: Vec<u8>,
    },
    /// The link is gone
    LinkLost { peer: PeerHandle },
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::LinkEstablished { peer, role } => {
                write!(f, "LinkEstablished {{ peer: {}, role: {} }}", peer, role)
            }
            TransportEvent::DataReceived {
                peer,
                role,
                channel,
                data,
            } => write!(
                f,
                "DataReceived {{ peer: {}, role: {}, channel: {}, data_len: {} }}",
                peer,
                role,
                channel,
                data.len()
            ),
            TransportEvent::LinkLost { peer } => write!(f, "LinkLost {{ peer: {} }}", peer),
        }
    }
}

/// Send side of the transport, implemented by platform code.
///
/// Sends are fire-and-forget: `false` means the bytes did not leave the
/// device, and the core never retries implicitly.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Send bytes to a connected peer on a logical channel
    fn send(&self, peer: &PeerHandle, channel: Channel, data: &[u8]) -> bool;

    /// Tear down the link to a peer
    fn disconnect(&self, peer: &PeerHandle);

    /// Largest payload a single `send` accepts
    fn max_payload_size(&self) -> usize;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, peer: &PeerHandle, channel: Channel, data: &[u8]) -> bool {
        (**self).send(peer, channel, data)
    }

    fn disconnect(&self, peer: &PeerHandle) {
        (**self).disconnect(peer)
    }

    fn max_payload_size(&self) -> usize {
        (**self).max_payload_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        let names: Vec<&str> = [
            Channel::Handshake,
            Channel::Chat,
            Channel::Routing,
            Channel::Ping,
            Channel::Exchange,
        ]
        .iter()
        .map(|c| c.as_str())
        .collect();
        assert_eq!(names, vec!["handshake", "chat", "routing", "ping", "exchange"]);
    }

    #[test]
    fn test_event_display_hides_payload() {
        let event = TransportEvent::DataReceived {
            peer: PeerHandle::new("dev-7"),
            role: LinkRole::Central,
            channel: Channel::Chat,
            data: vec![1, 2, 3],
        };
        assert_eq!(
            event.to_string(),
            "DataReceived { peer: dev-7, role: central, channel: chat, data_len: 3 }"
        );
    }

    #[test]
    fn test_arc_forwards_to_inner_transport() {
        let mut mock = MockTransport::new();
        mock.expect_send().times(1).returning(|_, _, _| true);
        mock.expect_max_payload_size().return_const(512usize);

        let shared: Arc<dyn Transport> = Arc::new(mock);
        assert!(shared.send(&PeerHandle::new("p"), Channel::Ping, b"x"));
        assert_eq!(shared.max_payload_size(), 512);
    }
}
