//! Messages sent from the controller to the cuff.
//!
//! Decoded from the numbered-field schema in [`wire`](super::wire); string
//! and byte fields are length-checked on the way in.

use crate::types::{ExerciseName, MetadataList};

/// Largest firmware chunk carried in one command.
pub const OTA_CHUNK_CAPACITY: usize = 256;

/// Capacity of a firmware version string in bytes.
pub const OTA_VERSION_CAPACITY: usize = 16;

/// Everything the controller can ask of the cuff.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    /// Turn the synthetic detection source on or off.
    SetTestMode {
        /// New state.
        enabled: bool,
    },
    /// Change the scanning frame rate.
    SetTargetFps {
        /// Frames per second, `0.1 < fps <= 30`.
        fps: f32,
    },
    /// Exercise details for a marker the cuff asked about.
    ExerciseUpdate {
        /// Exercise id, equal to the marker id.
        exercise_id: u32,
        /// Exercise name.
        name: ExerciseName,
        /// Rep-detection travel override.
        min_travel_cm: Option<f32>,
        /// Frame rate override.
        fps: Option<f32>,
        /// Exercise metadata.
        metadata: Option<MetadataList>,
    },
    /// Start counting from zero.
    ResetReps,
    /// Power control.
    Power {
        /// `true` to shut down.
        shutdown: bool,
    },
    /// Wipe persisted settings and restart.
    FactoryReset {
        /// Must be `true` to take effect.
        confirm: bool,
    },
    /// Change any of the persisted settings.
    UpdateDeviceConfig {
        /// Scanning frame rate.
        target_fps: Option<f32>,
        /// Loiter frame rate, `0.05 < fps <= 10`.
        loiter_fps: Option<f32>,
        /// Rep-detection travel, 1 to 100 cm.
        min_travel_cm: Option<f32>,
        /// Rep idle timeout, 500 to 60000 ms.
        max_rep_idle_ms: Option<u32>,
    },
    /// Ask for a [`Snapshot`](super::DeviceEvent::Snapshot).
    SnapshotRequest,
    /// Capture a still image.
    TakePhoto,
    /// Start streaming video.
    StartVideo,
    /// Stop streaming video.
    StopVideo,
    /// Start a firmware update.
    OtaBegin {
        /// Image size in bytes.
        image_size: u32,
        /// Firmware version string.
        version: heapless::String<OTA_VERSION_CAPACITY>,
    },
    /// Part of a firmware image.
    OtaChunk {
        /// Offset of `data` in the image.
        offset: u32,
        /// Chunk bytes.
        data: heapless::Vec<u8, OTA_CHUNK_CAPACITY>,
    },
    /// End of a firmware update.
    OtaComplete {
        /// CRC-32 of the whole image.
        crc32: u32,
    },
}

impl DeviceCommand {
    /// Command name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SetTestMode { .. } => "setTestMode",
            Self::SetTargetFps { .. } => "setTargetFps",
            Self::ExerciseUpdate { .. } => "exerciseUpdate",
            Self::ResetReps => "resetReps",
            Self::Power { .. } => "power",
            Self::FactoryReset { .. } => "factoryReset",
            Self::UpdateDeviceConfig { .. } => "updateDeviceConfig",
            Self::SnapshotRequest => "snapshotRequest",
            Self::TakePhoto => "takePhoto",
            Self::StartVideo => "startVideo",
            Self::StopVideo => "stopVideo",
            Self::OtaBegin { .. } => "otaBegin",
            Self::OtaChunk { .. } => "otaChunk",
            Self::OtaComplete { .. } => "otaComplete",
        }
    }
}
