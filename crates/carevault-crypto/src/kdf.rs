//! Session key derivation.
//!
//! The session key is derived once per process from a locally generated seed
//! and a fresh random salt via PBKDF2-HMAC-SHA256. The seed is a
//! passphrase-equivalent (low entropy relative to a raw key), so a
//! deliberately slow KDF with a configurable iteration count is used rather
//! than a single hash expansion.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::types::AES_KEY_LENGTH;

/// Generate a random salt of the given length.
pub fn generate_salt(length: usize) -> Result<Vec<u8>, CryptoError> {
    let mut salt = vec![0u8; length];
    getrandom::getrandom(&mut salt).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(salt)
}

/// Build the session seed from locally observable inputs: a monotonic-ish
/// timestamp, 32 bytes of secure randomness, and a coarse environment
/// fingerprint. The randomness carries the entropy; the rest is domain
/// separation across hosts and processes.
pub fn session_seed() -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut random = [0u8; 32];
    getrandom::getrandom(&mut random).map_err(|e| CryptoError::RngFailed(e.to_string()))?;

    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let mut seed = Zeroizing::new(Vec::with_capacity(64));
    seed.extend_from_slice(&nanos.to_be_bytes());
    seed.extend_from_slice(&random);
    seed.extend_from_slice(std::env::consts::OS.as_bytes());
    seed.extend_from_slice(std::env::consts::ARCH.as_bytes());
    seed.extend_from_slice(&std::process::id().to_be_bytes());
    Ok(seed)
}

/// Derive a 256-bit session key from a seed and salt.
///
/// Deterministic for a given (seed, salt, iterations) triple; unpredictable
/// across sessions because both the seed and the salt are freshly random.
pub fn derive_session_key(
    seed: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Zeroizing<[u8; AES_KEY_LENGTH]> {
    let mut key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
    pbkdf2_hmac::<Sha256>(seed, salt, iterations, &mut *key);
    key
}
