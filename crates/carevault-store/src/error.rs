use thiserror::Error;

/// Errors that escape the storage adapter. Cryptographic and format
/// conditions are absorbed below this boundary; only backing-store failures
/// surface here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Backing store failure: {message}")]
    Backend { message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
