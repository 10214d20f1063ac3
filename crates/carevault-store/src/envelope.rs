//! Persisted state envelope encode/decode.
//!
//! Every key in the backing store holds one JSON envelope:
//! `{ "metadata": { schemaVersion, encrypted, writtenAt }, "payload": {...} }`.
//! `metadata.encrypted` is authoritative for whether the sensitive
//! partitions in `payload` are ciphertext — readers trust the flag, they do
//! not sniff content.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// Current envelope schema version. Stored data with a different version is
/// read best-effort, never rejected.
pub const SCHEMA_VERSION: u32 = 1;

/// Envelope metadata, rewritten fresh on every persisted mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub schema_version: u32,
    /// Whether the sensitive partitions in `payload` are ciphertext.
    pub encrypted: bool,
    /// Write timestamp, epoch milliseconds.
    pub written_at: i64,
}

/// The versioned wrapper stored per key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEnvelope {
    pub metadata: EnvelopeMetadata,
    /// Partition name → plain structured value, or base64 ciphertext string
    /// for sensitive partitions when encryption is active.
    pub payload: serde_json::Map<String, Value>,
}

/// Encode an envelope as the JSON text stored in the backing store.
pub fn encode_envelope(envelope: &PersistedEnvelope) -> Result<String, StoreError> {
    serde_json::to_string(envelope).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Decode stored text as a versioned envelope.
pub fn decode_envelope(raw: &str) -> Result<PersistedEnvelope, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Decode stored text as a bare, pre-versioning state object (the format
/// written before the envelope existed, or by the raw-write fallback).
pub fn decode_legacy(raw: &str) -> Option<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
