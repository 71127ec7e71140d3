//! Startup wiring.
//!
//! Reads the process options from the environment and builds the controller
//! from the config file and the settings store.

use std::path::PathBuf;

use anyhow::Context;
use cuff_core::settings::{DATA_DIR_ENV, SETTINGS_FILE};
use cuff_core::{ControllerConfig, DeviceController, EventSink, FileSettingsStore};
use tracing::info;

use crate::link::DEFAULT_LINK_ADDR;

/// Selects production logging when set to `production`.
pub const RUN_ENV: &str = "CUFF_ENV";

/// Path of the TOML config file.
pub const CONFIG_PATH_ENV: &str = "CUFF_CONFIG";

/// Listen address of the development link.
pub const LINK_ADDR_ENV: &str = "CUFF_LINK_ADDR";

/// Config file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cuff/config.toml";

/// Process options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOptions {
    /// JSON file logging instead of pretty stdout.
    pub is_production: bool,
    /// TOML config file. A missing file means defaults plus environment.
    pub config_path: PathBuf,
    /// Directory holding the settings file. `None` uses the platform default.
    pub data_dir: Option<PathBuf>,
    /// Listen address of the development link.
    pub link_addr: String,
}

impl DeviceOptions {
    /// Read options from the process environment.
    ///
    /// # Variables
    ///
    /// * `CUFF_ENV` - `production` selects production logging
    /// * `CUFF_CONFIG` - config file, default [`DEFAULT_CONFIG_PATH`]
    /// * `CUFF_DATA_DIR` - settings directory, default
    ///   [`default_data_dir`](cuff_core::settings::default_data_dir)
    /// * `CUFF_LINK_ADDR` - link listen address, default [`DEFAULT_LINK_ADDR`]
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build options from any variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            is_production: lookup(RUN_ENV).is_some_and(|v| v == "production"),
            config_path: lookup(CONFIG_PATH_ENV)
                .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from),
            data_dir: lookup(DATA_DIR_ENV).map(PathBuf::from),
            link_addr: lookup(LINK_ADDR_ENV).unwrap_or_else(|| DEFAULT_LINK_ADDR.to_string()),
        }
    }

    /// Open the settings store these options point at.
    ///
    /// # Errors
    ///
    /// Returns an error if no data directory is set and none can be
    /// determined for the platform.
    pub fn settings_store(&self) -> cuff_core::Result<FileSettingsStore> {
        match &self.data_dir {
            Some(dir) => Ok(FileSettingsStore::new(dir.join(SETTINGS_FILE))),
            None => FileSettingsStore::at_default_path(),
        }
    }
}

/// Load the config, open the settings store and build the controller.
///
/// Persisted settings are overlaid on the loaded config, so values changed at
/// runtime survive a restart.
///
/// # Arguments
///
/// * `options` - Where the config file and settings live
/// * `sink` - Receiver of every event the controller emits
///
/// # Errors
///
/// Returns an error if the config cannot be parsed or fails validation, or
/// if the settings location cannot be determined.
pub fn build_controller<S: EventSink>(
    options: &DeviceOptions,
    sink: S,
) -> anyhow::Result<DeviceController<S>> {
    let config = ControllerConfig::load(&options.config_path)
        .with_context(|| format!("loading {}", options.config_path.display()))?;
    let settings = options.settings_store()?;
    info!(
        config = %options.config_path.display(),
        settings = %settings.path().display(),
        test_mode = config.test_mode,
        "configured"
    );
    Ok(DeviceController::new(config, sink, Box::new(settings)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use cuff_core::DeviceMessage;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = DeviceOptions::from_lookup(|_| None);
        assert!(!options.is_production);
        assert_eq!(options.config_path, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(options.data_dir, None);
        assert_eq!(options.link_addr, DEFAULT_LINK_ADDR);
    }

    #[test]
    fn test_options_from_variables() {
        let vars: HashMap<&str, &str> = [
            (RUN_ENV, "production"),
            (CONFIG_PATH_ENV, "/tmp/cuff.toml"),
            (DATA_DIR_ENV, "/tmp/cuff-data"),
            (LINK_ADDR_ENV, "127.0.0.1:9000"),
        ]
        .into_iter()
        .collect();
        let options = DeviceOptions::from_lookup(|key| vars.get(key).map(|v| (*v).to_string()));

        assert!(options.is_production);
        assert_eq!(options.config_path, PathBuf::from("/tmp/cuff.toml"));
        assert_eq!(
            options.settings_store().unwrap().path(),
            PathBuf::from("/tmp/cuff-data").join(SETTINGS_FILE)
        );
        assert_eq!(options.link_addr, "127.0.0.1:9000");
    }

    #[test]
    fn test_build_controller_reloads_persisted_settings() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "target_fps = 15.0\nloiter_fps = 0.5\n").unwrap();
        let options = DeviceOptions {
            is_production: false,
            config_path,
            data_dir: Some(dir.path().join("data")),
            link_addr: DEFAULT_LINK_ADDR.to_string(),
        };

        let mut first = build_controller(&options, Vec::<DeviceMessage>::new()).unwrap();
        assert!((first.target_fps() - 15.0).abs() < f32::EPSILON);
        assert!(first.set_target_fps(20.0, 0));
        assert!(dir.path().join("data").join(SETTINGS_FILE).exists());

        let second = build_controller(&options, Vec::<DeviceMessage>::new()).unwrap();
        assert!((second.target_fps() - 20.0).abs() < f32::EPSILON);
        assert!((second.loiter_fps() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invalid_config_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "target_fps = 99.0\n").unwrap();
        let options = DeviceOptions {
            is_production: false,
            config_path,
            data_dir: Some(dir.path().to_path_buf()),
            link_addr: DEFAULT_LINK_ADDR.to_string(),
        };

        let err = build_controller(&options, Vec::<DeviceMessage>::new()).unwrap_err();
        assert!(err.to_string().contains("loading"));
    }
}
