//! Persisted "wallet was linked" flag.
//!
//! Reconnecting silently on startup is only attempted when the user linked a
//! wallet in an earlier run and has not unlinked it since.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkStoreError {
    #[error("link state io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("link state at {path} is malformed: {message}")]
    Malformed { path: PathBuf, message: String },
}

pub trait LinkStore: Send + Sync {
    fn is_linked(&self) -> Result<bool, LinkStoreError>;
    fn set_linked(&self) -> Result<(), LinkStoreError>;
    fn clear(&self) -> Result<(), LinkStoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct LinkState {
    wallet_connected: bool,
}

/// Keeps the flag in a small TOML document.
#[derive(Clone, Debug)]
pub struct FileLinkStore {
    path: PathBuf,
}

impl FileLinkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> LinkStoreError {
        LinkStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl LinkStore for FileLinkStore {
    fn is_linked(&self) -> Result<bool, LinkStoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let state: LinkState =
                    toml::from_str(&contents).map_err(|err| LinkStoreError::Malformed {
                        path: self.path.clone(),
                        message: err.to_string(),
                    })?;
                Ok(state.wallet_connected)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(self.io_error(err)),
        }
    }

    fn set_linked(&self) -> Result<(), LinkStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
            }
        }
        let state = LinkState {
            wallet_connected: true,
        };
        let encoded = toml::to_string(&state).map_err(|err| LinkStoreError::Malformed {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        fs::write(&self.path, encoded).map_err(|err| self.io_error(err))
    }

    fn clear(&self) -> Result<(), LinkStoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryLinkStore {
    linked: Mutex<bool>,
}

impl MemoryLinkStore {
    pub fn linked() -> Self {
        Self {
            linked: Mutex::new(true),
        }
    }
}

impl LinkStore for MemoryLinkStore {
    fn is_linked(&self) -> Result<bool, LinkStoreError> {
        Ok(*self.linked.lock())
    }

    fn set_linked(&self) -> Result<(), LinkStoreError> {
        *self.linked.lock() = true;
        Ok(())
    }

    fn clear(&self) -> Result<(), LinkStoreError> {
        *self.linked.lock() = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_means_not_linked() {
        let dir = tempdir().expect("tempdir");
        let store = FileLinkStore::new(dir.path().join("link.toml"));
        assert!(!store.is_linked().expect("read"));
        store.clear().expect("clearing a missing file is fine");
    }

    #[test]
    fn flag_survives_reopen_and_clears() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state").join("link.toml");
        FileLinkStore::new(&path).set_linked().expect("set");

        let reopened = FileLinkStore::new(&path);
        assert!(reopened.is_linked().expect("read"));
        reopened.clear().expect("clear");
        assert!(!reopened.is_linked().expect("read"));
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("link.toml");
        fs::write(&path, "wallet_connected = \"maybe\"").expect("write");
        assert!(matches!(
            FileLinkStore::new(&path).is_linked(),
            Err(LinkStoreError::Malformed { .. })
        ));
    }

    #[test]
    fn memory_store_toggles() {
        let store = MemoryLinkStore::default();
        assert!(!store.is_linked().unwrap());
        store.set_linked().unwrap();
        assert!(store.is_linked().unwrap());
        store.clear().unwrap();
        assert!(!store.is_linked().unwrap());
    }
}
