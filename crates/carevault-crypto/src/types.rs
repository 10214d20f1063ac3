/// AES-GCM IV length in bytes (96 bits per NIST recommendation).
pub const AES_GCM_IV_LENGTH: usize = 12;

/// AES-GCM tag length in bytes (128 bits).
pub const AES_GCM_TAG_LENGTH: usize = 16;

/// AES key length in bytes (256 bits).
pub const AES_KEY_LENGTH: usize = 32;

/// Associated data binding ciphertext to the session envelope format.
/// Ciphertext produced by another subsystem (or a future format revision)
/// fails authentication instead of decrypting to garbage.
pub const SESSION_AAD: &[u8] = b"carevault.session.v1";

/// Key-derivation parameters, exposed to the integrator rather than
/// hard-coded at call sites.
#[derive(Debug, Clone, Copy)]
pub struct KdfConfig {
    /// PBKDF2-HMAC-SHA256 iteration count.
    pub iterations: u32,
    /// Random salt length in bytes.
    pub salt_length: usize,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            iterations: 100_000,
            salt_length: 16,
        }
    }
}
