use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::ConfigStore;
use super::KeyStore;
use super::StoreError;
use crate::device::TvConfiguration;

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyFile {
    #[serde(default)]
    keys: BTreeMap<String, String>,
}

/// Pairing keys in a TOML file readable only by the owner.
pub struct FileKeyStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    lock: Mutex<()>,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<KeyFile, StoreError> {
        match read_optional(&self.path)? {
            Some(contents) => {
                toml::from_str(&contents).map_err(|e| StoreError::Parse(self.path.clone(), e))
            }
            None => Ok(KeyFile::default()),
        }
    }

    fn write(&self, file: &KeyFile) -> Result<(), StoreError> {
        let contents = toml::to_string(file)?;
        write_private(&self.path, &contents)
    }
}

impl KeyStore for FileKeyStore {
    fn save_key(&self, address: &str, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = self.read()?;
        file.keys.insert(address.to_string(), key.to_string());
        self.write(&file)?;
        debug!(address, path = %self.path.display(), "saved pairing key");
        Ok(())
    }

    fn load_key(&self, address: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read()?.keys.get(address).cloned())
    }

    fn delete_key(&self, address: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = self.read()?;
        if file.keys.remove(address).is_some() {
            self.write(&file)?;
        }
        Ok(())
    }
}

/// Device identity in a TOML file.
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigStore for FileConfigStore {
    fn save(&self, config: &TvConfiguration) -> Result<(), StoreError> {
        let contents = toml::to_string(config)?;
        write_private(&self.path, &contents)
    }

    fn load(&self) -> Result<Option<TvConfiguration>, StoreError> {
        read_optional(&self.path)?
            .map(|contents| {
                toml::from_str(&contents).map_err(|e| StoreError::Parse(self.path.clone(), e))
            })
            .transpose()
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(self.path.clone(), e)),
        }
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Io(path.to_path_buf(), e)),
    }
}

/// Write via a temporary sibling and rename, so readers never see a partial file.
fn write_private(path: &Path, contents: &str) -> Result<(), StoreError> {
    let io_err = |e| StoreError::Io(path.to_path_buf(), e);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).map_err(io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600)).map_err(io_err)?;
    }

    fs::rename(&tmp, path).map_err(io_err)
}
