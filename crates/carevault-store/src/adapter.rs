//! EncryptedStore — the partitioned storage adapter.
//!
//! Sits between the application's state-persistence layer and a
//! `StorageBackend`, selectively routing sensitive partitions through the
//! `CryptoSession`. Structural and non-sensitive fields are stored in the
//! clear so the envelope stays inspectable.
//!
//! Per-session state machine: `Uninitialized → {Encrypted | Plaintext}`.
//! The terminal mode is entered once; `clear()` resets the whole session.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use carevault_crypto::{CryptoSession, EncryptionOutcome};

use crate::backend::StorageBackend;
use crate::envelope::{
    decode_envelope, decode_legacy, encode_envelope, EnvelopeMetadata, PersistedEnvelope,
    SCHEMA_VERSION,
};
use crate::error::Result;
use crate::partition::Partition;

/// A logical state object: partition name → structured value.
pub type StateObject = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreMode {
    Uninitialized,
    Encrypted,
    Plaintext,
}

/// Storage adapter that encrypts sensitive partitions at rest.
///
/// All operations are async (the backend may suspend) and never panic past
/// this boundary; only backing-store failures surface as errors.
pub struct EncryptedStore<B: StorageBackend> {
    backend: B,
    session: Mutex<CryptoSession>,
    mode: Mutex<StoreMode>,
    /// Last `writtenAt` stamp observed per key, for concurrent-writer
    /// detection. Advisory only — last write wins.
    seen_stamps: Mutex<HashMap<String, i64>>,
}

impl<B: StorageBackend> EncryptedStore<B> {
    /// Wrap a backend with a crypto session constructed at startup.
    /// The store is not operational until `initialize` is called.
    pub fn new(backend: B, session: CryptoSession) -> Self {
        Self {
            backend,
            session: Mutex::new(session),
            mode: Mutex::new(StoreMode::Uninitialized),
            seen_stamps: Mutex::new(HashMap::new()),
        }
    }

    /// Derive the session key and self-test the crypto environment. On any
    /// failure the store downgrades to plaintext mode for the remainder of
    /// the session. Idempotent: repeated calls return without re-entering
    /// initialization. Returns whether the store is operational in some
    /// mode, which it always is — plaintext is the guaranteed fallback.
    pub fn initialize(&self) -> bool {
        let mut mode = self.mode.lock();
        if *mode != StoreMode::Uninitialized {
            return true;
        }
        let mut session = self.session.lock();
        if session.initialize() && session.validate() {
            debug!("encrypted storage ready");
            *mode = StoreMode::Encrypted;
        } else {
            warn!("crypto primitives unavailable, storing state unencrypted this session");
            *mode = StoreMode::Plaintext;
        }
        true
    }

    /// Whether sensitive partitions are currently being encrypted.
    pub fn is_encrypting(&self) -> bool {
        *self.mode.lock() == StoreMode::Encrypted
    }

    /// Persist a state object under `key`, sealing sensitive partitions.
    ///
    /// The full envelope is built in memory and written with a single
    /// backend call, so no partial-write state is ever visible. If any
    /// sensitive partition fails to seal, the entire write downgrades to
    /// plaintext — `metadata.encrypted` must stay accurate for the whole
    /// payload. Processing failures fall back to one raw write of the
    /// unprocessed object; backend failures propagate.
    pub async fn set_item(&self, key: &str, state: &StateObject) -> Result<()> {
        self.warn_on_concurrent_writer(key).await;

        let encrypting = self.is_encrypting();
        let (payload, encrypted) = if encrypting {
            self.seal_payload(state)
        } else {
            (state.clone(), false)
        };

        let envelope = PersistedEnvelope {
            metadata: EnvelopeMetadata {
                schema_version: SCHEMA_VERSION,
                encrypted,
                written_at: chrono::Utc::now().timestamp_millis(),
            },
            payload,
        };

        let text = match encode_envelope(&envelope) {
            Ok(text) => text,
            Err(e) => {
                // Best-effort raw fallback: losing the protection layer for
                // one write beats losing the write.
                warn!(error = %e, "envelope encoding failed, writing raw state");
                let Ok(raw) = serde_json::to_string(state) else {
                    // Only backing-store failures propagate; a state object
                    // that cannot be serialized at all drops the write.
                    warn!(key, "state object is unserializable, write dropped");
                    return Ok(());
                };
                return self.backend.set(key, &raw).await;
            }
        };

        self.backend.set(key, &text).await?;
        self.seen_stamps
            .lock()
            .insert(key.to_string(), envelope.metadata.written_at);
        Ok(())
    }

    /// Load and decode the state object stored under `key`.
    ///
    /// Absent keys return `None`. Undecodable text is retried as a bare
    /// pre-versioning state object before giving up. A sensitive partition
    /// that fails to decrypt is returned as its raw ciphertext string so the
    /// caller can detect unreadable data instead of silently losing it.
    pub async fn get_item(&self, key: &str) -> Result<Option<StateObject>> {
        let Some(raw) = self.backend.get(key).await? else {
            return Ok(None);
        };

        let envelope = match decode_envelope(&raw) {
            Ok(envelope) => envelope,
            Err(_) => {
                if let Some(state) = decode_legacy(&raw) {
                    debug!(key, "read pre-versioning state object");
                    return Ok(Some(state));
                }
                warn!(key, "stored value is unreadable");
                return Ok(None);
            }
        };

        if envelope.metadata.schema_version != SCHEMA_VERSION {
            // Forward/backward tolerance: the store outlives app upgrades.
            warn!(
                key,
                stored = envelope.metadata.schema_version,
                current = SCHEMA_VERSION,
                "schema version mismatch, reading best-effort"
            );
        }
        self.seen_stamps
            .lock()
            .insert(key.to_string(), envelope.metadata.written_at);

        let mut payload = envelope.payload;
        if envelope.metadata.encrypted {
            let session = self.session.lock();
            for (name, value) in payload.iter_mut() {
                if !Partition::name_is_sensitive(name) {
                    continue;
                }
                let Value::String(ciphertext) = &*value else {
                    continue;
                };
                match session.decrypt(ciphertext) {
                    Some(recovered) => *value = recovered,
                    None => {
                        // Leave the ciphertext in place, never a placeholder.
                        warn!(key, partition = %name, "partition is unreadable, leaving opaque");
                    }
                }
            }
        }

        Ok(Some(payload))
    }

    /// Delete the value stored under `key`.
    pub async fn remove_item(&self, key: &str) -> Result<()> {
        self.seen_stamps.lock().remove(key);
        self.backend.remove(key).await
    }

    /// Delete all stored values and discard the session key. The store
    /// returns to `Uninitialized`; a later `initialize` derives a fresh key.
    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await?;
        self.session.lock().clear();
        *self.mode.lock() = StoreMode::Uninitialized;
        self.seen_stamps.lock().clear();
        Ok(())
    }

    /// Access the backing store.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Seal every sensitive partition. Returns the processed payload and
    /// whether it is actually encrypted: one failed partition downgrades the
    /// whole write so the metadata flag stays truthful.
    fn seal_payload(&self, state: &StateObject) -> (StateObject, bool) {
        let session = self.session.lock();
        let mut payload = StateObject::new();
        for (name, value) in state {
            if !Partition::name_is_sensitive(name) {
                payload.insert(name.clone(), value.clone());
                continue;
            }
            match session.encrypt(value) {
                EncryptionOutcome::Encrypted(ciphertext) => {
                    payload.insert(name.clone(), Value::String(ciphertext));
                }
                EncryptionOutcome::Plaintext(_) | EncryptionOutcome::Unavailable => {
                    warn!(partition = %name, "sealing failed, writing this state plaintext");
                    return (state.clone(), false);
                }
            }
        }
        (payload, true)
    }

    /// Advisory concurrent-writer check: if the stored stamp differs from
    /// the one this adapter last read or wrote, another writer touched the
    /// key. Logged and overwritten — last write wins.
    async fn warn_on_concurrent_writer(&self, key: &str) {
        let Some(known) = self.seen_stamps.lock().get(key).copied() else {
            return;
        };
        let stored = match self.backend.get(key).await {
            Ok(Some(raw)) => decode_envelope(&raw).ok().map(|e| e.metadata.written_at),
            _ => None,
        };
        if let Some(stored) = stored {
            if stored != known {
                warn!(key, "concurrent writer detected, last write wins");
            }
        }
    }
}

#[cfg(test)]
impl<B: StorageBackend> EncryptedStore<B> {
    /// Force the degraded mode, simulating a failed `initialize`.
    fn force_plaintext_mode(&self) {
        *self.mode.lock() = StoreMode::Plaintext;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::StoreError;
    use async_trait::async_trait;
    use carevault_crypto::KdfConfig;

    fn test_session() -> CryptoSession {
        CryptoSession::new(KdfConfig {
            iterations: 1000,
            ..KdfConfig::default()
        })
    }

    fn ready_store() -> EncryptedStore<MemoryBackend> {
        let store = EncryptedStore::new(MemoryBackend::new(), test_session());
        assert!(store.initialize());
        assert!(store.is_encrypting());
        store
    }

    fn clinical_state() -> StateObject {
        let mut state = StateObject::new();
        state.insert(
            "patients".into(),
            serde_json::json!([{ "id": "p1", "name": "Alice Carter" }]),
        );
        state.insert(
            "vitals".into(),
            serde_json::json!({ "p1": [{ "hr": 72, "spo2": 98 }] }),
        );
        state.insert("uiPrefs".into(), serde_json::json!({ "theme": "dark" }));
        state
    }

    #[tokio::test]
    async fn sensitive_partitions_are_ciphertext_at_rest() {
        let store = ready_store();
        let state = clinical_state();
        store.set_item("store", &state).await.unwrap();

        let raw = store.backend().get("store").await.unwrap().unwrap();
        let envelope = decode_envelope(&raw).unwrap();
        assert!(envelope.metadata.encrypted);
        assert!(envelope.payload["patients"].is_string());
        assert!(envelope.payload["vitals"].is_string());
        assert_eq!(
            envelope.payload["uiPrefs"],
            serde_json::json!({ "theme": "dark" })
        );
        assert!(!raw.contains("Alice Carter"));

        let loaded = store.get_item("store").await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn get_missing_key_returns_none() {
        let store = ready_store();
        assert_eq!(store.get_item("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let store = ready_store();
        assert!(store.initialize());
        assert!(store.initialize());
        assert!(store.is_encrypting());
    }

    #[tokio::test]
    async fn degraded_mode_round_trips_plaintext() {
        let store = EncryptedStore::new(MemoryBackend::new(), test_session());
        store.force_plaintext_mode();
        assert!(!store.is_encrypting());

        let state = clinical_state();
        store.set_item("store", &state).await.unwrap();

        let raw = store.backend().get("store").await.unwrap().unwrap();
        let envelope = decode_envelope(&raw).unwrap();
        assert!(!envelope.metadata.encrypted);
        assert_eq!(envelope.payload["patients"], state["patients"]);

        let loaded = store.get_item("store").await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn uninitialized_store_still_operates() {
        let store = EncryptedStore::new(MemoryBackend::new(), test_session());
        let state = clinical_state();
        store.set_item("store", &state).await.unwrap();
        assert_eq!(store.get_item("store").await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn corrupt_partition_is_returned_opaque() {
        let store = ready_store();
        store.set_item("store", &clinical_state()).await.unwrap();

        // Flip one character inside the patients ciphertext string.
        let raw = store.backend().get("store").await.unwrap().unwrap();
        let mut envelope = decode_envelope(&raw).unwrap();
        let ciphertext = envelope.payload["patients"].as_str().unwrap().to_string();
        let mut chars: Vec<char> = ciphertext.chars().collect();
        chars[10] = if chars[10] == 'A' { 'B' } else { 'A' };
        let corrupted: String = chars.into_iter().collect();
        envelope.payload["patients"] = Value::String(corrupted.clone());
        store
            .backend()
            .set("store", &encode_envelope(&envelope).unwrap())
            .await
            .unwrap();

        let loaded = store.get_item("store").await.unwrap().unwrap();
        // The corrupt partition stays an opaque string, the rest decodes.
        assert_eq!(loaded["patients"], Value::String(corrupted));
        assert_eq!(
            loaded["vitals"],
            serde_json::json!({ "p1": [{ "hr": 72, "spo2": 98 }] })
        );
        assert_eq!(loaded["uiPrefs"], serde_json::json!({ "theme": "dark" }));
    }

    #[tokio::test]
    async fn legacy_bare_state_is_readable() {
        let store = ready_store();
        store
            .backend()
            .set("store", r#"{"patients": [], "uiPrefs": {"theme": "light"}}"#)
            .await
            .unwrap();

        let loaded = store.get_item("store").await.unwrap().unwrap();
        assert_eq!(loaded["uiPrefs"], serde_json::json!({ "theme": "light" }));
    }

    #[tokio::test]
    async fn unreadable_text_returns_none() {
        let store = ready_store();
        store.backend().set("store", "][ not json").await.unwrap();
        assert_eq!(store.get_item("store").await.unwrap(), None);
    }

    #[tokio::test]
    async fn schema_version_mismatch_still_reads() {
        let store = ready_store();
        let raw = r#"{
            "metadata": { "schemaVersion": 99, "encrypted": false, "writtenAt": 0 },
            "payload": { "settings": { "locale": "en" } }
        }"#;
        store.backend().set("store", raw).await.unwrap();

        let loaded = store.get_item("store").await.unwrap().unwrap();
        assert_eq!(loaded["settings"], serde_json::json!({ "locale": "en" }));
    }

    #[tokio::test]
    async fn unknown_partitions_pass_through() {
        let store = ready_store();
        let mut state = StateObject::new();
        state.insert("telemetry".into(), serde_json::json!({ "events": 4 }));
        store.set_item("store", &state).await.unwrap();

        let raw = store.backend().get("store").await.unwrap().unwrap();
        let envelope = decode_envelope(&raw).unwrap();
        assert_eq!(
            envelope.payload["telemetry"],
            serde_json::json!({ "events": 4 })
        );
        assert_eq!(store.get_item("store").await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn remove_item_deletes() {
        let store = ready_store();
        store.set_item("store", &clinical_state()).await.unwrap();
        store.remove_item("store").await.unwrap();
        assert_eq!(store.get_item("store").await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_resets_session_and_backend() {
        let store = ready_store();
        store.set_item("store", &clinical_state()).await.unwrap();

        store.clear().await.unwrap();
        assert_eq!(store.get_item("store").await.unwrap(), None);
        assert!(!store.is_encrypting());

        // A fresh initialize enters encrypted mode with a new key.
        assert!(store.initialize());
        assert!(store.is_encrypting());
    }

    #[tokio::test]
    async fn clear_before_initialize_is_safe() {
        let store = EncryptedStore::new(MemoryBackend::new(), test_session());
        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(!store.is_encrypting());
    }

    #[tokio::test]
    async fn last_write_wins_across_adapters() {
        let backend = std::sync::Arc::new(MemoryBackend::new());
        let store_a = EncryptedStore::new(backend.clone(), test_session());
        let store_b = EncryptedStore::new(backend.clone(), test_session());
        store_a.force_plaintext_mode();
        store_b.force_plaintext_mode();

        let mut state_a = StateObject::new();
        state_a.insert("settings".into(), serde_json::json!({ "writer": "a" }));
        let mut state_b = StateObject::new();
        state_b.insert("settings".into(), serde_json::json!({ "writer": "b" }));

        store_a.set_item("store", &state_a).await.unwrap();
        store_b.set_item("store", &state_b).await.unwrap();
        // store_a overwrites despite the foreign stamp (logged, not blocked).
        store_a.set_item("store", &state_a).await.unwrap();

        assert_eq!(store_b.get_item("store").await.unwrap(), Some(state_a));
    }

    // ------------------------------------------------------------------
    // Backend failure propagation
    // ------------------------------------------------------------------

    struct FailingBackend;

    #[async_trait]
    impl StorageBackend for FailingBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(StoreError::backend("read failed"))
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(StoreError::backend("write failed"))
        }
        async fn remove(&self, _key: &str) -> Result<()> {
            Err(StoreError::backend("remove failed"))
        }
        async fn clear(&self) -> Result<()> {
            Err(StoreError::backend("clear failed"))
        }
    }

    #[tokio::test]
    async fn backend_failures_propagate() {
        let store = EncryptedStore::new(FailingBackend, test_session());
        store.initialize();

        let err = store.set_item("store", &clinical_state()).await.unwrap_err();
        assert!(err.to_string().contains("write failed"));
        // Only backing-store failures cross this boundary.
        assert!(matches!(err, StoreError::Backend { .. }));

        let err = store.get_item("store").await.unwrap_err();
        assert!(err.to_string().contains("read failed"));

        assert!(store.remove_item("store").await.is_err());
        assert!(store.clear().await.is_err());
    }
}
