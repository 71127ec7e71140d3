//! # cuff-core
//!
//! Core logic for the cuff, a wearable that watches gym-station markers and
//! counts reps.
//!
//! This crate provides:
//! - Station engagement sessions keyed by marker id
//! - Distance-based rep counting with idle reset
//! - A synthetic detection source for test mode
//! - The framed binary protocol spoken with the controller app
//! - Configuration loading and persisted settings
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`controller`] - Mode state machine tying sessions, reps and events together
//! - [`protocol`] - Wire messages, framing and command dispatch
//! - [`rep_counter`] - Rep detection over a stream of distances
//! - [`session`] - The marker currently being engaged with
//! - [`simulator`] - Deterministic fake detections
//! - [`system`] - Deferred restart and throttling hooks
//! - [`config`] - Controller configuration loading, saving, and validation
//! - [`settings`] - Settings that survive a restart
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod config;
pub mod controller;
pub mod error;
pub mod protocol;
pub mod rep_counter;
pub mod session;
pub mod settings;
pub mod simulator;
pub mod system;
pub mod types;

// Re-export primary types for convenience
pub use config::{
    is_valid_loiter_fps, is_valid_max_rep_idle_ms, is_valid_min_travel_cm, is_valid_target_fps,
    ConfigError, ControllerConfig,
};
pub use controller::{DeviceController, EventSink};
pub use error::{CuffError, Result};
pub use protocol::{
    dispatch_command, handle_command_frame, DeviceCommand, DeviceEvent, DeviceMessage,
    DeviceSnapshot, DispatchOutcome, FrameAssembler,
};
pub use rep_counter::{RepCounter, RepPhase};
pub use session::EngagementSession;
pub use settings::{
    default_data_dir, default_settings_path, FileSettingsStore, MemorySettingsStore,
    PersistedSettings, SettingsStore,
};
pub use simulator::DetectionSimulator;
pub use system::{NeverThrottle, ResetScheduler, ThrottleAdvisor};
pub use types::{
    bounded, Detection, DetectionSource, DeviceMode, ExerciseName, ExercisePayload, MetadataEntry,
    MetadataList, NoCamera,
};
