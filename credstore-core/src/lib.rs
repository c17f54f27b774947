//! Envelope-encrypted, versioned secrets stored in a shared key-value table.

pub mod backend;
pub mod config;
pub mod context;
pub mod credstore;
pub mod crypto;
pub mod errors;
pub mod key_provider;
pub mod memory;
pub mod store;
pub mod table;
pub mod types;
pub mod version;

pub use backend::{
    AttributeValue, Item, ItemKey, Page, QueryRequest, RecordBackend, TableSpec, TableStatus,
};
pub use config::StoreConfig;
pub use context::EncryptionContext;
pub use credstore::Credstore;
pub use crypto::{DATA_KEY_LEN, Envelope, EnvelopeCodec};
pub use errors::{Error, Result};
pub use key_provider::{DataKey, KeyManagement};
pub use memory::{Activation, MemoryBackend, MemoryCalls, MemoryKeyProvider};
pub use store::RecordStore;
pub use table::WaitPolicy;
pub use types::{
    CREATED_AT_NOT_AVAILABLE, DecryptedSecret, SecretListing, SecretRecord, StoredRow,
    VERSION_WIDTH, Version,
};
