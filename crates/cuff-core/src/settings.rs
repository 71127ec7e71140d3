//! Persisted runtime settings.
//!
//! A handful of values the controller can change at runtime survive a
//! restart: the two frame rates and the rep-detection tuning. They are stored
//! as a small TOML file and overlaid on the configuration at construction.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CuffError, Result};

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "CUFF_DATA_DIR";

/// Settings file name inside the data directory.
pub const SETTINGS_FILE: &str = "settings.toml";

/// Values that survive a restart. `None` means "use the configured default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedSettings {
    /// Frame rate while scanning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_fps: Option<f32>,
    /// Frame rate while loitering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loiter_fps: Option<f32>,
    /// Rep-detection travel in centimetres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_travel_cm: Option<f32>,
    /// Rep idle timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rep_idle_ms: Option<u64>,
}

impl PersistedSettings {
    /// `true` if no value has been stored.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.target_fps.is_none()
            && self.loiter_fps.is_none()
            && self.min_travel_cm.is_none()
            && self.max_rep_idle_ms.is_none()
    }
}

/// Durable key-value storage for [`PersistedSettings`].
pub trait SettingsStore: Send {
    /// Read the stored settings. A store with nothing saved returns the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn load(&self) -> Result<PersistedSettings>;

    /// Replace the stored settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn save(&self, settings: &PersistedSettings) -> Result<()>;

    /// Remove everything that was stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be cleared.
    fn clear(&self) -> Result<()>;
}

/// Get the default data directory.
///
/// `CUFF_DATA_DIR` wins if set. Otherwise, on the device: `/var/lib/cuff/`;
/// for development: the platform data directory.
///
/// # Errors
///
/// Returns an error if no data directory can be determined.
pub fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }

    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/var/lib/cuff"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs = directories::ProjectDirs::from("", "", "cuff").ok_or_else(|| {
            CuffError::PersistenceError("Cannot determine data directory".into())
        })?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Get the default settings file path.
///
/// # Errors
///
/// Returns an error if no data directory can be determined.
pub fn default_settings_path() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(SETTINGS_FILE))
}

/// Settings stored in a TOML file.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    /// Store settings at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store settings at [`default_settings_path`].
    ///
    /// # Errors
    ///
    /// Returns an error if no data directory can be determined.
    pub fn at_default_path() -> Result<Self> {
        Ok(Self::new(default_settings_path()?))
    }

    /// Path of the settings file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> Result<PersistedSettings> {
        if !self.path.exists() {
            return Ok(PersistedSettings::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        toml::from_str(&content).map_err(|e| {
            CuffError::PersistenceError(format!("Failed to parse {}: {e}", self.path.display()))
        })
    }

    fn save(&self, settings: &PersistedSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(settings)
            .map_err(|e| CuffError::PersistenceError(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    inner: Arc<Mutex<PersistedSettings>>,
}

impl MemorySettingsStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `settings`.
    #[must_use]
    pub fn with_settings(settings: PersistedSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(settings)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PersistedSettings>> {
        self.inner
            .lock()
            .map_err(|_| CuffError::PersistenceError("settings lock poisoned".into()))
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<PersistedSettings> {
        Ok(*self.lock()?)
    }

    fn save(&self, settings: &PersistedSettings) -> Result<()> {
        *self.lock()? = *settings;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.lock()? = PersistedSettings::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::new(dir.path().join("settings.toml"));
        let settings = store.load().unwrap();
        assert!(settings.is_empty());
    }

    #[test]
    fn test_file_round_trip_creates_parents() {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::new(dir.path().join("a").join("b").join("settings.toml"));

        let settings = PersistedSettings {
            target_fps: Some(15.0),
            max_rep_idle_ms: Some(2500),
            ..PersistedSettings::default()
        };
        store.save(&settings).unwrap();
        assert!(store.path().exists());
        assert_eq!(store.load().unwrap(), settings);
    }

    #[test]
    fn test_unset_fields_are_omitted() {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::new(dir.path().join("settings.toml"));
        store
            .save(&PersistedSettings {
                loiter_fps: Some(0.5),
                ..PersistedSettings::default()
            })
            .unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("loiter_fps"));
        assert!(!content.contains("target_fps"));
    }

    #[test]
    fn test_corrupt_file_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "target_fps = \"fast\"").unwrap();

        let err = FileSettingsStore::new(&path).load().unwrap_err();
        assert!(matches!(err, CuffError::PersistenceError(_)));
    }

    #[test]
    fn test_clear_removes_file_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::new(dir.path().join("settings.toml"));
        store
            .save(&PersistedSettings {
                min_travel_cm: Some(20.0),
                ..PersistedSettings::default()
            })
            .unwrap();

        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
    }

    #[test]
    fn test_memory_store_clones_share_state() {
        let store = MemorySettingsStore::new();
        let handle = store.clone();

        store
            .save(&PersistedSettings {
                target_fps: Some(8.0),
                ..PersistedSettings::default()
            })
            .unwrap();
        assert_eq!(handle.load().unwrap().target_fps, Some(8.0));

        handle.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
    }
}
