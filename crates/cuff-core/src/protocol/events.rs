//! Messages sent from the cuff to the controller.
//!
//! These are the in-memory forms. Their numbered-field wire schema lives in
//! [`wire`](super::wire).

use crate::types::{DeviceMode, ExerciseName, MetadataList};

/// Capacity of a status label in bytes.
pub const STATUS_LABEL_CAPACITY: usize = 32;

/// Largest photo or video chunk carried in one message.
pub const MEDIA_CHUNK_CAPACITY: usize = 400;

/// Short machine-readable status, e.g. `scanning`.
pub type StatusLabel = heapless::String<STATUS_LABEL_CAPACITY>;

/// One outbound message: when it happened and what happened.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceMessage {
    /// Device time the event was produced at.
    pub timestamp_ms: u64,
    /// The event itself.
    pub event: DeviceEvent,
}

/// Read-only view of the controller state.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    /// Current mode.
    pub mode: DeviceMode,
    /// Whether test mode is on.
    pub test_mode: bool,
    /// Frame rate while scanning.
    pub target_fps: f32,
    /// Frame rate while loitering.
    pub loiter_fps: f32,
    /// Rep-detection travel.
    pub min_travel_cm: f32,
    /// Rep idle timeout.
    pub max_rep_idle_ms: u64,
    /// Bound marker, if a session is active.
    pub marker_id: Option<u32>,
    /// Whether exercise details have been applied.
    pub metadata_ready: bool,
    /// Reps counted in the current session.
    pub rep_count: u32,
    /// Exercise name, once known.
    pub exercise_name: Option<ExerciseName>,
}

/// Everything the cuff reports.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Mode or setting change.
    Status {
        /// What changed.
        label: StatusLabel,
        /// Mode after the change.
        mode: DeviceMode,
        /// Effective frame rate.
        fps: f32,
        /// Whether test mode is on.
        test_mode: bool,
    },
    /// Sent once a controller connects.
    Boot {
        /// Whether test mode is on.
        test_mode: bool,
        /// Current mode.
        mode: DeviceMode,
        /// Effective frame rate.
        fps: f32,
    },
    /// A new marker was bound.
    Tag {
        /// Marker id.
        marker_id: u32,
        /// The marker came from the simulator.
        from_test_mode: bool,
    },
    /// Ask the controller for the exercise behind a marker.
    ExerciseRequest {
        /// Marker id.
        marker_id: u32,
    },
    /// Exercise details the device already knows (test mode).
    ExerciseBroadcast {
        /// Exercise id.
        exercise_id: u32,
        /// Exercise name.
        name: ExerciseName,
        /// Metadata, omitted when empty.
        metadata: Option<MetadataList>,
        /// The exercise is the synthetic test exercise.
        from_test_mode: bool,
    },
    /// Exercise details were applied.
    ExerciseReady {
        /// Exercise id.
        exercise_id: u32,
    },
    /// One processed detection.
    Scan {
        /// Marker id.
        marker_id: u32,
        /// Distance to the marker.
        distance_cm: f32,
        /// Current mode.
        mode: DeviceMode,
        /// Effective frame rate.
        fps: f32,
        /// Exercise name, once known.
        exercise_name: Option<ExerciseName>,
    },
    /// A repetition was completed.
    Rep {
        /// Marker id.
        marker_id: u32,
        /// Reps counted in this session.
        rep_count: u32,
        /// Exercise name, once known.
        exercise_name: Option<ExerciseName>,
    },
    /// Full state, on request or after a settings change.
    Snapshot(DeviceSnapshot),
    /// Answer to a firmware update command.
    OtaStatus {
        /// Whether the step was accepted.
        accepted: bool,
        /// Short explanation.
        reason: StatusLabel,
    },
    /// The device is about to power off or restart.
    PowerEvent {
        /// `true` for shutdown.
        shutdown: bool,
    },
    /// Start of a photo transfer.
    PhotoMeta {
        /// Photo id.
        photo_id: u32,
        /// Total size in bytes.
        total_size: u32,
        /// Number of chunks that follow.
        chunk_count: u16,
    },
    /// Part of a photo.
    PhotoChunk {
        /// Photo id.
        photo_id: u32,
        /// Chunk index.
        index: u16,
        /// Chunk bytes.
        data: heapless::Vec<u8, MEDIA_CHUNK_CAPACITY>,
    },
    /// Part of a video stream.
    VideoFrame {
        /// Frame sequence number.
        frame_id: u32,
        /// Chunk index within the frame.
        index: u16,
        /// Chunk bytes.
        data: heapless::Vec<u8, MEDIA_CHUNK_CAPACITY>,
    },
    /// Raw marker detection from the vision pipeline.
    AprilTagDetected {
        /// Marker id.
        marker_id: u32,
        /// Distance to the marker.
        distance_cm: f32,
        /// Detector confidence.
        decision_margin: f32,
    },
    /// Frame-difference motion report.
    MotionDetected {
        /// Relative amount of change.
        magnitude: f32,
    },
}

impl DeviceEvent {
    /// Event name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Boot { .. } => "boot",
            Self::Tag { .. } => "tag",
            Self::ExerciseRequest { .. } => "exerciseRequest",
            Self::ExerciseBroadcast { .. } => "exerciseBroadcast",
            Self::ExerciseReady { .. } => "exerciseReady",
            Self::Scan { .. } => "scan",
            Self::Rep { .. } => "rep",
            Self::Snapshot(_) => "snapshot",
            Self::OtaStatus { .. } => "otaStatus",
            Self::PowerEvent { .. } => "powerEvent",
            Self::PhotoMeta { .. } => "photoMeta",
            Self::PhotoChunk { .. } => "photoChunk",
            Self::VideoFrame { .. } => "videoFrame",
            Self::AprilTagDetected { .. } => "aprilTagDetected",
            Self::MotionDetected { .. } => "motionDetected",
        }
    }

    /// Label of a `Status` event.
    #[must_use]
    pub fn status_label(&self) -> Option<&str> {
        match self {
            Self::Status { label, .. } => Some(label.as_str()),
            _ => None,
        }
    }
}

/// Build a status label. Labels that do not fit are cut at a character boundary.
#[must_use]
pub fn status_label(label: &str) -> StatusLabel {
    let mut out = StatusLabel::new();
    for c in label.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
