//! CryptoSession — session key lifecycle and structured-payload encryption.
//!
//! One instance per application session, constructed at startup and handed
//! to the storage adapter. The key exists only inside this struct and is
//! zeroized on `clear()` or drop. There is no rotation within a session.
//!
//! Cryptographic failure is an expected, recoverable condition here:
//! `initialize` reports `false` instead of erroring, `encrypt` returns a
//! tagged outcome, and `decrypt` returns `None`. Callers degrade to an
//! unencrypted path; they never crash on this layer's account.

use serde_json::Value;
use zeroize::Zeroizing;

use crate::aead::{open, seal};
use crate::b64::{base64_decode, base64_encode};
use crate::kdf::{derive_session_key, generate_salt, session_seed};
use crate::types::{KdfConfig, AES_KEY_LENGTH, SESSION_AAD};

/// Result of an encryption attempt. Every call site must handle all three
/// variants explicitly; there is no silent fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionOutcome {
    /// Base64 of [IV:12][ciphertext+tag], sealed under the session key.
    Encrypted(String),
    /// Session not ready — the payload's plain serialized form. The caller
    /// must flag the surrounding envelope as unencrypted.
    Plaintext(String),
    /// The payload could not be serialized or sealed at all.
    Unavailable,
}

/// Session-scoped encryption context with owned key lifetime.
pub struct CryptoSession {
    config: KdfConfig,
    key: Option<Zeroizing<[u8; AES_KEY_LENGTH]>>,
}

impl CryptoSession {
    /// Create a session in the not-ready state. Call `initialize` before use.
    pub fn new(config: KdfConfig) -> Self {
        Self { config, key: None }
    }

    /// Derive the session key: fresh random salt + locally generated seed,
    /// run through PBKDF2. Returns `false` when the platform's secure random
    /// source is unavailable; callers treat that as "encryption unavailable"
    /// and proceed via the degraded path.
    pub fn initialize(&mut self) -> bool {
        let salt = match generate_salt(self.config.salt_length) {
            Ok(salt) => salt,
            Err(_) => return false,
        };
        let seed = match session_seed() {
            Ok(seed) => seed,
            Err(_) => return false,
        };
        self.key = Some(derive_session_key(&seed, &salt, self.config.iterations));
        true
    }

    /// Whether the session key is derived and encryption is operational.
    pub fn is_available(&self) -> bool {
        self.key.is_some()
    }

    /// Encrypt a structured payload under the session key.
    ///
    /// A fresh IV is drawn per call, so identical payloads encrypted twice
    /// yield different ciphertext strings.
    pub fn encrypt(&self, payload: &Value) -> EncryptionOutcome {
        let serialized = match serde_json::to_string(payload) {
            Ok(s) => s,
            Err(_) => return EncryptionOutcome::Unavailable,
        };
        let Some(key) = &self.key else {
            return EncryptionOutcome::Plaintext(serialized);
        };
        match seal(key.as_ref(), serialized.as_bytes(), SESSION_AAD) {
            Ok(blob) => EncryptionOutcome::Encrypted(base64_encode(&blob)),
            Err(_) => EncryptionOutcome::Unavailable,
        }
    }

    /// Decrypt a string produced by `encrypt`.
    ///
    /// Accepts either the base64 envelope or the plain serialized form
    /// written on the degraded path. Authentication failure, truncation and
    /// malformed base64 all fall back to a direct JSON parse of the input;
    /// if that also fails, returns `None` — "data unreadable", never a
    /// partially decrypted value.
    pub fn decrypt(&self, input: &str) -> Option<Value> {
        if let Some(key) = &self.key {
            if let Ok(blob) = base64_decode(input) {
                if let Ok(plaintext) = open(key.as_ref(), &blob, SESSION_AAD) {
                    if let Ok(value) = serde_json::from_slice(&plaintext) {
                        return Some(value);
                    }
                }
            }
        }
        serde_json::from_str(input).ok()
    }

    /// Discard the session key. Idempotent; safe before `initialize`.
    pub fn clear(&mut self) {
        self.key = None;
    }

    /// Startup self-test: round-trip a synthetic payload and compare.
    /// Detects an unusable cryptographic environment before it is trusted
    /// with real data.
    pub fn validate(&self) -> bool {
        let probe = serde_json::json!({ "probe": "carevault", "n": 1 });
        match self.encrypt(&probe) {
            EncryptionOutcome::Encrypted(ciphertext) => {
                self.decrypt(&ciphertext).as_ref() == Some(&probe)
            }
            EncryptionOutcome::Plaintext(_) | EncryptionOutcome::Unavailable => false,
        }
    }
}
