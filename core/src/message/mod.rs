// Message module: wire records and serialization for the mesh protocols

pub mod types;
pub mod codec;

pub use types::{
    ChatMessage, ExchangeAck, ExchangeEnvelope, ExchangePackage, ExchangeRequest, ExchangeType,
    Handshake, Ping, PingType, RoutedMessage,
};
pub use codec::{decode_record, encode_record, MAX_CHAT_TEXT, MAX_RECORD_SIZE};
