//! Shared types.
//!
//! Names and metadata are bounded (`heapless`) so every value that reaches
//! the wire is known to fit. Conversions from unbounded strings go through
//! [`bounded`], which refuses oversized input instead of cutting it short.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum number of metadata entries carried for one exercise.
pub const MAX_METADATA_ENTRIES: usize = 10;

/// Capacity of an exercise name in bytes.
pub const EXERCISE_NAME_CAPACITY: usize = 48;

/// Capacity of a metadata key in bytes.
pub const METADATA_KEY_CAPACITY: usize = 32;

/// Capacity of a metadata value in bytes.
pub const METADATA_VALUE_CAPACITY: usize = 64;

/// Exercise display name.
pub type ExerciseName = heapless::String<EXERCISE_NAME_CAPACITY>;

/// Ordered exercise metadata, at most [`MAX_METADATA_ENTRIES`] entries.
pub type MetadataList = heapless::Vec<MetadataEntry, MAX_METADATA_ENTRIES>;

/// Copy `value` into a bounded string, or `None` if it does not fit.
#[must_use]
pub fn bounded<const N: usize>(value: &str) -> Option<heapless::String<N>> {
    let mut out = heapless::String::new();
    out.push_str(value).ok()?;
    Some(out)
}

/// Operating mode of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceMode {
    /// No station session.
    #[default]
    Idle,
    /// Marker bound, exercise metadata not yet known.
    AwaitingExercise,
    /// Marker bound and exercise metadata applied.
    Scanning,
    /// Marker lost for longer than the timeout; low frame rate.
    Loiter,
}

impl DeviceMode {
    /// Name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingExercise => "awaitingExercise",
            Self::Scanning => "scanning",
            Self::Loiter => "loiter",
        }
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One key/value pair of exercise metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    /// Metadata key, e.g. `muscleGroup`.
    pub key: heapless::String<METADATA_KEY_CAPACITY>,
    /// Metadata value, e.g. `Back`.
    pub value: heapless::String<METADATA_VALUE_CAPACITY>,
}

impl MetadataEntry {
    /// Build an entry, or `None` if either side exceeds its capacity.
    #[must_use]
    pub fn new(key: &str, value: &str) -> Option<Self> {
        Some(Self {
            key: bounded(key)?,
            value: bounded(value)?,
        })
    }
}

/// A single marker reading: which station, and how far away.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Detection {
    /// Fiducial marker id.
    pub marker_id: u32,
    /// Estimated distance from the camera in centimetres.
    pub distance_cm: f32,
}

impl Detection {
    /// Create a detection.
    #[must_use]
    pub const fn new(marker_id: u32, distance_cm: f32) -> Self {
        Self {
            marker_id,
            distance_cm,
        }
    }
}

/// Pull-style provider of marker detections (camera + vision pipeline).
///
/// `None` means "nothing seen this tick", which is distinct from a reading of
/// zero centimetres.
pub trait DetectionSource {
    /// Capture and analyse one frame.
    fn next_detection(&mut self, now_ms: u64) -> Option<Detection>;
}

impl<F> DetectionSource for F
where
    F: FnMut(u64) -> Option<Detection>,
{
    fn next_detection(&mut self, now_ms: u64) -> Option<Detection> {
        self(now_ms)
    }
}

/// Detection source for hosts without a camera. Never sees anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCamera;

impl DetectionSource for NoCamera {
    fn next_detection(&mut self, _now_ms: u64) -> Option<Detection> {
        None
    }
}

/// Exercise details pushed by the mobile controller for a marker.
#[derive(Debug, Clone, PartialEq)]
pub struct ExercisePayload {
    /// Marker / exercise id the payload belongs to.
    pub id: u32,
    /// Exercise display name.
    pub name: ExerciseName,
    /// Exercise metadata.
    pub metadata: MetadataList,
    /// Optional rep-detection sensitivity override.
    pub min_travel_cm: Option<f32>,
    /// Optional frame rate override.
    pub fps: Option<f32>,
}
