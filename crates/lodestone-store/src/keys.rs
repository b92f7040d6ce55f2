//! Key encoding utilities for `RocksDB`.
//!
//! Record keys are `server_id || 0x00 || record_type`. Server IDs never
//! contain a NUL byte, so a server's prefix cannot collide with another
//! server whose ID merely starts with the same characters.

use lodestone_core::ServerId;

use crate::error::{Result, StoreError};
use crate::types::{RecordKey, RecordType};

const SEPARATOR: u8 = 0x00;

/// Encode a record key.
#[must_use]
pub fn record_key(key: &RecordKey) -> Vec<u8> {
    let sort = key.record_type.to_string();
    let mut bytes = server_prefix(&key.server_id);
    bytes.extend_from_slice(sort.as_bytes());
    bytes
}

/// Encode the prefix shared by every record of a server.
#[must_use]
pub fn server_prefix(server_id: &ServerId) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(server_id.as_str().len() + 16);
    bytes.extend_from_slice(server_id.as_ref());
    bytes.push(SEPARATOR);
    bytes
}

/// Decode a record key produced by [`record_key`].
///
/// # Errors
///
/// Returns a serialization error if the bytes are not a valid record key.
pub fn decode_record_key(bytes: &[u8]) -> Result<RecordKey> {
    let split = bytes
        .iter()
        .position(|b| *b == SEPARATOR)
        .ok_or_else(|| StoreError::Serialization("record key missing separator".into()))?;
    let server = std::str::from_utf8(&bytes[..split])
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    let sort = std::str::from_utf8(&bytes[split + 1..])
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    let server_id =
        ServerId::parse(server).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let record_type: RecordType = sort.parse()?;
    Ok(RecordKey {
        server_id,
        record_type,
    })
}

/// Encode a state index key: `state || server_id`.
#[must_use]
pub fn state_index_key(state: u8, server_id: &ServerId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + server_id.as_str().len());
    key.push(state);
    key.extend_from_slice(server_id.as_ref());
    key
}

/// Encode a state prefix for scanning all servers in a state.
#[must_use]
pub fn state_prefix(state: u8) -> Vec<u8> {
    vec![state]
}

/// Extract the server ID from a state index key.
///
/// # Errors
///
/// Returns a serialization error if the key is malformed.
pub fn extract_server_id_from_state_key(key: &[u8]) -> Result<ServerId> {
    let raw = key
        .get(1..)
        .ok_or_else(|| StoreError::Serialization("empty state index key".into()))?;
    let s = std::str::from_utf8(raw).map_err(|e| StoreError::Serialization(e.to_string()))?;
    ServerId::parse(s).map_err(|e| StoreError::Serialization(e.to_string()))
}
