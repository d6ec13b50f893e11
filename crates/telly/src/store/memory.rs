use std::collections::HashMap;
use std::sync::Mutex;

use super::ConfigStore;
use super::KeyStore;
use super::StoreError;
use crate::device::TvConfiguration;

/// Keys held in memory only. Used by tests and one-shot commands that must
/// not touch disk.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<String, String>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn save_key(&self, address: &str, key: &str) -> Result<(), StoreError> {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address.to_string(), key.to_string());
        Ok(())
    }

    fn load_key(&self, address: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
            .cloned())
    }

    fn delete_key(&self, address: &str) -> Result<(), StoreError> {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(address);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    config: Mutex<Option<TvConfiguration>>,
}

impl MemoryConfigStore {
    pub fn new(config: Option<TvConfiguration>) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn save(&self, config: &TvConfiguration) -> Result<(), StoreError> {
        *self.config.lock().unwrap_or_else(|e| e.into_inner()) = Some(config.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<TvConfiguration>, StoreError> {
        Ok(self.config.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.config.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
