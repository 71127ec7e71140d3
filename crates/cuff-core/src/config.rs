//! Controller configuration.
//!
//! Handles loading, saving, and validating the cuff configuration:
//! - Frame rates for active scanning and loiter
//! - Marker-lost timeout
//! - Rep detection sensitivity and idle timeout
//! - The synthetic exercise used in test mode
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `CUFF_*` environment variables (e.g. `CUFF_TARGET_FPS=15`).

use std::path::{Path, PathBuf};

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::rep_counter::{DEFAULT_MAX_IDLE_MS, DEFAULT_MIN_TRAVEL_CM};
use crate::types::{bounded, ExerciseName, MetadataEntry, MetadataList};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "CUFF";

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The configuration file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    ReadError {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be written.
    #[error("failed to write {}: {source}", .path.display())]
    WriteError {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or type error.
    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Could not render the configuration as TOML.
    #[error("failed to serialize TOML: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// The layered loader rejected a source.
    #[error("failed to load configuration: {0}")]
    LoadError(#[from] ::config::ConfigError),

    /// A single field is out of range.
    #[error("invalid {field}: {message}")]
    ValidationError {
        /// Field name as it appears in the file.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are out of range.
    #[error("{} invalid configuration values", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Accepted target frame rate: `0.1 < fps <= 30`.
#[must_use]
pub fn is_valid_target_fps(fps: f32) -> bool {
    fps > 0.1 && fps <= 30.0
}

/// Accepted loiter frame rate: `0.05 < fps <= 10`.
#[must_use]
pub fn is_valid_loiter_fps(fps: f32) -> bool {
    fps > 0.05 && fps <= 10.0
}

/// Accepted minimum rep travel: 1 to 100 cm.
#[must_use]
pub fn is_valid_min_travel_cm(cm: f32) -> bool {
    (1.0..=100.0).contains(&cm)
}

/// Accepted rep idle timeout: 500 ms to 60 s.
#[must_use]
pub fn is_valid_max_rep_idle_ms(ms: u64) -> bool {
    (500..=60_000).contains(&ms)
}

/// Configuration snapshot handed to the controller at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Frame rate while scanning or awaiting an exercise.
    pub target_fps: f32,

    /// Whether the device boots into test mode.
    pub test_mode: bool,

    /// Frame rate while loitering.
    pub loiter_fps: f32,

    /// How long the marker may be out of view before the device loiters.
    pub marker_lost_ms: u64,

    /// Travel required for one rep, in centimetres.
    pub min_travel_cm: f32,

    /// Time without movement after which a half-finished rep is abandoned.
    pub max_rep_idle_ms: u64,

    /// Marker id used by the synthetic test session.
    pub test_marker_id: u32,

    /// Exercise name used by the synthetic test session.
    pub test_exercise_name: ExerciseName,

    /// Exercise metadata used by the synthetic test session.
    pub test_metadata: MetadataList,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let mut test_metadata = MetadataList::new();
        for (key, value) in [
            ("exercise", "Lat Pulldown"),
            ("muscleGroup", "Back"),
            ("intensity", "moderate"),
        ] {
            if let Some(entry) = MetadataEntry::new(key, value) {
                let _ = test_metadata.push(entry);
            }
        }

        Self {
            target_fps: 12.0,
            test_mode: false,
            loiter_fps: 0.3333,
            marker_lost_ms: 10_000,
            min_travel_cm: DEFAULT_MIN_TRAVEL_CM,
            max_rep_idle_ms: DEFAULT_MAX_IDLE_MS,
            test_marker_id: 4242,
            test_exercise_name: bounded("Demo Exercise").unwrap_or_default(),
            test_metadata,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from defaults, `path` (if it exists) and the
    /// environment, then validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or a value is out of range.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        debug!(path = %path.display(), ?config, "configuration loaded");
        Ok(config)
    }

    /// Parse a TOML document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or a value is out of range.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file is missing.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every field, reporting all violations at once.
    ///
    /// # Errors
    ///
    /// Returns the single violation, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if !is_valid_target_fps(self.target_fps) {
            errors.push(ConfigError::ValidationError {
                field: "target_fps",
                message: format!("{} is outside (0.1, 30]", self.target_fps),
            });
        }
        if !is_valid_loiter_fps(self.loiter_fps) {
            errors.push(ConfigError::ValidationError {
                field: "loiter_fps",
                message: format!("{} is outside (0.05, 10]", self.loiter_fps),
            });
        }
        if self.marker_lost_ms == 0 {
            errors.push(ConfigError::ValidationError {
                field: "marker_lost_ms",
                message: "must be greater than zero".into(),
            });
        }
        if !is_valid_min_travel_cm(self.min_travel_cm) {
            errors.push(ConfigError::ValidationError {
                field: "min_travel_cm",
                message: format!("{} is outside [1, 100]", self.min_travel_cm),
            });
        }
        if !is_valid_max_rep_idle_ms(self.max_rep_idle_ms) {
            errors.push(ConfigError::ValidationError {
                field: "max_rep_idle_ms",
                message: format!("{} is outside [500, 60000]", self.max_rep_idle_ms),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}
