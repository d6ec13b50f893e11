//! Persistence for the device identity and pairing keys.
//!
//! Both are narrow traits so the protocol client and the orchestrator never
//! know where things are kept.

mod file;
mod memory;

use std::path::PathBuf;

pub use file::FileConfigStore;
pub use file::FileKeyStore;
pub use memory::MemoryConfigStore;
pub use memory::MemoryKeyStore;

use crate::device::TvConfiguration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("failed to serialize: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Pairing keys issued by TVs, keyed by the TV's address.
pub trait KeyStore: Send + Sync {
    /// Store `key` for `address`, replacing any previous key.
    fn save_key(&self, address: &str, key: &str) -> Result<(), StoreError>;

    fn load_key(&self, address: &str) -> Result<Option<String>, StoreError>;

    fn delete_key(&self, address: &str) -> Result<(), StoreError>;
}

/// The saved device identity.
pub trait ConfigStore: Send + Sync {
    fn save(&self, config: &TvConfiguration) -> Result<(), StoreError>;

    fn load(&self) -> Result<Option<TvConfiguration>, StoreError>;

    fn clear(&self) -> Result<(), StoreError>;
}
