pub mod aead;
pub mod b64;
pub mod error;
pub mod kdf;
pub mod session;
pub mod types;

pub use aead::{open, seal};
pub use b64::{base64_decode, base64_encode};
pub use error::CryptoError;
pub use kdf::{derive_session_key, generate_salt, session_seed};
pub use session::{CryptoSession, EncryptionOutcome};
pub use types::{KdfConfig, AES_GCM_IV_LENGTH, AES_GCM_TAG_LENGTH, AES_KEY_LENGTH};
