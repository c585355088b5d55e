//! Shared configuration handle
//!
//! Readers take immutable snapshots; the only write path is the cached
//! file-service token.

use crate::config::{Config, ConfigError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Config snapshot provider with token write-back
#[derive(Debug)]
pub struct ConfigStore {
    /// Backing file; `None` keeps everything in memory
    path: Option<PathBuf>,
    current: RwLock<Config>,
}

impl ConfigStore {
    /// Load from file and apply environment overrides
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Config::load(path.as_ref())?;
        Ok(Self {
            path: Some(path.as_ref().to_path_buf()),
            current: RwLock::new(config),
        })
    }

    /// A store that never touches the filesystem
    pub fn in_memory(config: Config) -> Self {
        Self {
            path: None,
            current: RwLock::new(config),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Immutable copy of the current settings
    pub fn snapshot(&self) -> Config {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace (or clear) the cached file-service token
    ///
    /// The in-memory value is always updated. For file-backed stores the file
    /// is re-read without environment overrides and only `file_service.token`
    /// is changed, so overrides such as passwords are never written to disk.
    pub fn store_auth_token(&self, token: Option<String>) -> Result<(), ConfigError> {
        {
            let mut current = self
                .current
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            current.file_service.token = token.clone();
        }

        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut on_disk = Config::load_from_file(path)?;
        if on_disk.file_service.token == token {
            return Ok(());
        }
        on_disk.file_service.token = token;

        let text = toml::to_string_pretty(&on_disk)?;
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
