// Record codec: bincode serialization with size limits to prevent abuse

use anyhow::{bail, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Maximum encoded record size: 64 KB.
/// Nothing the mesh sends legitimately comes close; anything larger is dropped
/// before deserialization.
pub const MAX_RECORD_SIZE: usize = 64 * 1024;

/// Maximum chat text accepted for sending: 16 KB
pub const MAX_CHAT_TEXT: usize = 16 * 1024;

/// Serialize any wire record to bytes (bincode)
pub fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    let bytes = bincode::serialize(record)?;

    if bytes.len() > MAX_RECORD_SIZE {
        bail!(
            "Encoded record too large: {} bytes (max {})",
            bytes.len(),
            MAX_RECORD_SIZE
        );
    }

    Ok(bytes)
}

/// Deserialize bytes into a wire record
pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() > MAX_RECORD_SIZE {
        bail!(
            "Record too large: {} bytes (max {})",
            bytes.len(),
            MAX_RECORD_SIZE
        );
    }

    let record: T = bincode::deserialize(bytes)?;
    Ok(record)
}
