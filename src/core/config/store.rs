//! Preference stores
//!
//! The chat core never reads the preference file directly; it goes through a
//! [`PreferenceStore`] so tests and embedders can substitute their own.

use crate::core::config::data::Config;
use crate::core::config::io::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

pub trait PreferenceStore: Send + Sync {
    fn load(&self) -> Result<Config, ConfigError>;
    fn save(&self, config: &Config) -> Result<(), ConfigError>;
}

#[derive(Default)]
struct CacheState {
    config: Option<Config>,
    modified: Option<SystemTime>,
}

/// TOML file on disk, re-read only when its modification time changes.
pub struct FilePreferenceStore {
    path: PathBuf,
    state: Mutex<CacheState>,
}

impl FilePreferenceStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Store at the platform configuration directory.
    pub fn default_location() -> Result<Self, ConfigError> {
        Ok(Self::new(Config::config_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn modified_time(path: &Path) -> Option<SystemTime> {
        fs::metadata(path).ok()?.modified().ok()
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn load(&self) -> Result<Config, ConfigError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let disk_modified = Self::modified_time(&self.path);
        if let Some(config) = state.config.as_ref().filter(|_| state.modified == disk_modified) {
            return Ok(config.clone());
        }

        let config = Config::load_from_path(&self.path)?;
        state.modified = disk_modified;
        state.config = Some(config.clone());
        Ok(config)
    }

    fn save(&self, config: &Config) -> Result<(), ConfigError> {
        config.validate()?;
        config.save_to_path(&self.path)?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.modified = Self::modified_time(&self.path);
        state.config = Some(config.clone());
        Ok(())
    }
}

/// Process-local store; nothing survives the process.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    config: Mutex<Config>,
}

impl MemoryPreferenceStore {
    pub fn new(config: Config) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> Result<Config, ConfigError> {
        Ok(self
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, config: &Config) -> Result<(), ConfigError> {
        config.validate()?;
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config.clone();
        Ok(())
    }
}
