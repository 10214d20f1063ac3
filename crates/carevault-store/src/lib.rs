pub mod adapter;
pub mod backend;
pub mod envelope;
pub mod error;
pub mod partition;

pub use adapter::{EncryptedStore, StateObject};
pub use backend::{MemoryBackend, StorageBackend};
pub use envelope::{EnvelopeMetadata, PersistedEnvelope, SCHEMA_VERSION};
pub use error::{Result, StoreError};
pub use partition::Partition;
