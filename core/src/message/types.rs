// Wire records: one struct per protocol message, one logical channel each

use serde::{Deserialize, Serialize};

/// Identity announcement sent once per new link (`handshake` channel)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Sender's full name (`display_name#id`)
    pub name: String,
}

/// Direction of a liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PingType {
    Initial,
    Response,
}

/// Liveness probe (`ping` channel).
///
/// A response carries the same sender/receiver as the initial ping it
/// answers; only `ping_type` is flipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub ping_type: PingType,
    /// Full name of the vertex that started the probe
    pub sender: String,
    /// Full name of the probed vertex
    pub receiver: String,
}

impl Ping {
    pub fn initial(sender: &str, receiver: &str) -> Self {
        Self {
            ping_type: PingType::Initial,
            sender: sender.to_string(),
            receiver: receiver.to_string(),
        }
    }

    /// Same probe, type flipped
    pub fn into_response(self) -> Self {
        Self {
            ping_type: PingType::Response,
            ..self
        }
    }
}

/// A chat message between two users (`chat` channel, or inside a `RoutedMessage`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub message: String,
    pub receiver: String,
}

/// Multi-hop envelope (`routing` channel). Forwarded unchanged at every hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedMessage {
    /// Full name of the final recipient
    pub target_user: String,
    pub message: ChatMessage,
}

/// Kind of record carried in an [`ExchangeEnvelope`] payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeType {
    Request,
    Package,
    Ack,
}

/// Wrapper for every record on the `exchange` channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeEnvelope {
    #[serde(rename = "type")]
    pub kind: ExchangeType,
    /// Full name of the sending vertex
    pub sender: String,
    /// Encoded `ExchangeRequest`, `ExchangePackage` or `ExchangeAck`
    pub payload: Vec<u8>,
}

/// "Send me your graph if it changed since this time"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRequest {
    /// When the requester last completed receiving our graph (None = never)
    pub last_update_received: Option<u64>,
}

/// One segment of a serialized topology snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangePackage {
    pub package_total_count: u32,
    /// 1-based
    pub current_package_number: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeAck {
    pub received_package_number: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_response_keeps_addressing() {
        let ping = Ping::initial("a#1", "b#2");
        let response = ping.clone().into_response();

        assert_eq!(response.ping_type, PingType::Response);
        assert_eq!(response.sender, ping.sender);
        assert_eq!(response.receiver, ping.receiver);
    }
}
