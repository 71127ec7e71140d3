//! Numbered-field wire schema.
//!
//! Every payload is a protobuf message. Fields are identified by number, so
//! peers built against older or newer revisions of this schema interoperate:
//! unknown fields are skipped on decode and absent fields take their
//! defaults. Field numbers are never reused; new fields and variants get new
//! numbers.
//!
//! Conversions into the in-memory types check every bounded field and reject
//! oversized input rather than cutting it short.

// Field meanings match the in-memory types in `events` and `commands`.
#![allow(missing_docs)]

use prost::Message;

use super::commands::{DeviceCommand, OTA_CHUNK_CAPACITY, OTA_VERSION_CAPACITY};
use super::events::{DeviceEvent, DeviceMessage, DeviceSnapshot, MEDIA_CHUNK_CAPACITY};
use crate::error::{CuffError, Result};
use crate::types::{
    bounded, DeviceMode, ExerciseName, MetadataEntry, MetadataList, EXERCISE_NAME_CAPACITY,
    MAX_METADATA_ENTRIES, METADATA_KEY_CAPACITY, METADATA_VALUE_CAPACITY,
};

// =============================================================================
// SIZE BOUNDS
// =============================================================================

const fn varint_len(value: usize) -> usize {
    let mut len = 1;
    let mut rest = value >> 7;
    while rest > 0 {
        len += 1;
        rest >>= 7;
    }
    len
}

/// Key length of any field numbered below 16.
const KEY_LEN: usize = 1;

const fn length_delimited(body: usize) -> usize {
    KEY_LEN + varint_len(body) + body
}

const fn max(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

const BOOL_FIELD: usize = KEY_LEN + 1;
const FLOAT_FIELD: usize = KEY_LEN + 4;
const U32_FIELD: usize = KEY_LEN + 5;
const U64_FIELD: usize = KEY_LEN + 10;
const NAME_FIELD: usize = length_delimited(EXERCISE_NAME_CAPACITY);
const METADATA_FIELD: usize = length_delimited(
    MAX_METADATA_ENTRIES
        * length_delimited(
            length_delimited(METADATA_KEY_CAPACITY) + length_delimited(METADATA_VALUE_CAPACITY),
        ),
);

/// Largest encoded event: an `ExerciseBroadcast` with every bounded field full.
pub const MAX_EVENT_MESSAGE_LEN: usize =
    U64_FIELD + length_delimited(U32_FIELD + NAME_FIELD + METADATA_FIELD + BOOL_FIELD);

/// Largest encoded command: an `ExerciseUpdate` with every bounded field full.
pub const MAX_COMMAND_MESSAGE_LEN: usize =
    length_delimited(U32_FIELD + NAME_FIELD + 2 * FLOAT_FIELD + METADATA_FIELD);

/// Largest encoded message of either direction.
pub const MAX_MESSAGE_LEN: usize = max(MAX_EVENT_MESSAGE_LEN, MAX_COMMAND_MESSAGE_LEN);

// =============================================================================
// SHARED
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Mode {
    Idle = 0,
    AwaitingExercise = 1,
    Scanning = 2,
    Loiter = 3,
}

impl From<DeviceMode> for Mode {
    fn from(mode: DeviceMode) -> Self {
        match mode {
            DeviceMode::Idle => Self::Idle,
            DeviceMode::AwaitingExercise => Self::AwaitingExercise,
            DeviceMode::Scanning => Self::Scanning,
            DeviceMode::Loiter => Self::Loiter,
        }
    }
}

impl From<Mode> for DeviceMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Idle => Self::Idle,
            Mode::AwaitingExercise => Self::AwaitingExercise,
            Mode::Scanning => Self::Scanning,
            Mode::Loiter => Self::Loiter,
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct MetadataPair {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Metadata {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<MetadataPair>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Empty {}

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Clone, PartialEq, Message)]
pub struct Status {
    #[prost(string, tag = "1")]
    pub label: String,
    #[prost(enumeration = "Mode", tag = "2")]
    pub mode: i32,
    #[prost(float, tag = "3")]
    pub fps: f32,
    #[prost(bool, tag = "4")]
    pub test_mode: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct Boot {
    #[prost(bool, tag = "1")]
    pub test_mode: bool,
    #[prost(enumeration = "Mode", tag = "2")]
    pub mode: i32,
    #[prost(float, tag = "3")]
    pub fps: f32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Tag {
    #[prost(uint32, tag = "1")]
    pub marker_id: u32,
    #[prost(bool, tag = "2")]
    pub from_test_mode: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct ExerciseRequest {
    #[prost(uint32, tag = "1")]
    pub marker_id: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ExerciseBroadcast {
    #[prost(uint32, tag = "1")]
    pub exercise_id: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(message, optional, tag = "3")]
    pub metadata: Option<Metadata>,
    #[prost(bool, tag = "4")]
    pub from_test_mode: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct ExerciseReady {
    #[prost(uint32, tag = "1")]
    pub exercise_id: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Scan {
    #[prost(uint32, tag = "1")]
    pub marker_id: u32,
    #[prost(float, tag = "2")]
    pub distance_cm: f32,
    #[prost(enumeration = "Mode", tag = "3")]
    pub mode: i32,
    #[prost(float, tag = "4")]
    pub fps: f32,
    #[prost(string, optional, tag = "5")]
    pub exercise_name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Rep {
    #[prost(uint32, tag = "1")]
    pub marker_id: u32,
    #[prost(uint32, tag = "2")]
    pub rep_count: u32,
    #[prost(string, optional, tag = "3")]
    pub exercise_name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Snapshot {
    #[prost(enumeration = "Mode", tag = "1")]
    pub mode: i32,
    #[prost(bool, tag = "2")]
    pub test_mode: bool,
    #[prost(float, tag = "3")]
    pub target_fps: f32,
    #[prost(float, tag = "4")]
    pub loiter_fps: f32,
    #[prost(float, tag = "5")]
    pub min_travel_cm: f32,
    #[prost(uint64, tag = "6")]
    pub max_rep_idle_ms: u64,
    #[prost(uint32, optional, tag = "7")]
    pub marker_id: Option<u32>,
    #[prost(bool, tag = "8")]
    pub metadata_ready: bool,
    #[prost(uint32, tag = "9")]
    pub rep_count: u32,
    #[prost(string, optional, tag = "10")]
    pub exercise_name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct OtaStatus {
    #[prost(bool, tag = "1")]
    pub accepted: bool,
    #[prost(string, tag = "2")]
    pub reason: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct PowerEvent {
    #[prost(bool, tag = "1")]
    pub shutdown: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct PhotoMeta {
    #[prost(uint32, tag = "1")]
    pub photo_id: u32,
    #[prost(uint32, tag = "2")]
    pub total_size: u32,
    #[prost(uint32, tag = "3")]
    pub chunk_count: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct PhotoChunk {
    #[prost(uint32, tag = "1")]
    pub photo_id: u32,
    #[prost(uint32, tag = "2")]
    pub index: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct VideoFrame {
    #[prost(uint32, tag = "1")]
    pub frame_id: u32,
    #[prost(uint32, tag = "2")]
    pub index: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AprilTagDetected {
    #[prost(uint32, tag = "1")]
    pub marker_id: u32,
    #[prost(float, tag = "2")]
    pub distance_cm: f32,
    #[prost(float, tag = "3")]
    pub decision_margin: f32,
}

#[derive(Clone, PartialEq, Message)]
pub struct MotionDetected {
    #[prost(float, tag = "1")]
    pub magnitude: f32,
}

/// Outbound envelope.
#[derive(Clone, PartialEq, Message)]
pub struct EventMessage {
    #[prost(uint64, tag = "1")]
    pub timestamp_ms: u64,
    #[prost(
        oneof = "event_message::Event",
        tags = "2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17"
    )]
    pub event: Option<event_message::Event>,
}

pub mod event_message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Event {
        #[prost(message, tag = "2")]
        Status(super::Status),
        #[prost(message, tag = "3")]
        Boot(super::Boot),
        #[prost(message, tag = "4")]
        Tag(super::Tag),
        #[prost(message, tag = "5")]
        ExerciseRequest(super::ExerciseRequest),
        #[prost(message, tag = "6")]
        ExerciseBroadcast(super::ExerciseBroadcast),
        #[prost(message, tag = "7")]
        ExerciseReady(super::ExerciseReady),
        #[prost(message, tag = "8")]
        Scan(super::Scan),
        #[prost(message, tag = "9")]
        Rep(super::Rep),
        #[prost(message, tag = "10")]
        Snapshot(super::Snapshot),
        #[prost(message, tag = "11")]
        OtaStatus(super::OtaStatus),
        #[prost(message, tag = "12")]
        PowerEvent(super::PowerEvent),
        #[prost(message, tag = "13")]
        PhotoMeta(super::PhotoMeta),
        #[prost(message, tag = "14")]
        PhotoChunk(super::PhotoChunk),
        #[prost(message, tag = "15")]
        VideoFrame(super::VideoFrame),
        #[prost(message, tag = "16")]
        AprilTagDetected(super::AprilTagDetected),
        #[prost(message, tag = "17")]
        MotionDetected(super::MotionDetected),
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

#[derive(Clone, PartialEq, Message)]
pub struct SetTestMode {
    #[prost(bool, tag = "1")]
    pub enabled: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct SetTargetFps {
    #[prost(float, tag = "1")]
    pub fps: f32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ExerciseUpdate {
    #[prost(uint32, tag = "1")]
    pub exercise_id: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(float, optional, tag = "3")]
    pub min_travel_cm: Option<f32>,
    #[prost(float, optional, tag = "4")]
    pub fps: Option<f32>,
    #[prost(message, optional, tag = "5")]
    pub metadata: Option<Metadata>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Power {
    #[prost(bool, tag = "1")]
    pub shutdown: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct FactoryReset {
    #[prost(bool, tag = "1")]
    pub confirm: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct UpdateDeviceConfig {
    #[prost(float, optional, tag = "1")]
    pub target_fps: Option<f32>,
    #[prost(float, optional, tag = "2")]
    pub loiter_fps: Option<f32>,
    #[prost(float, optional, tag = "3")]
    pub min_travel_cm: Option<f32>,
    #[prost(uint32, optional, tag = "4")]
    pub max_rep_idle_ms: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct OtaBegin {
    #[prost(uint32, tag = "1")]
    pub image_size: u32,
    #[prost(string, tag = "2")]
    pub version: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct OtaChunk {
    #[prost(uint32, tag = "1")]
    pub offset: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct OtaComplete {
    #[prost(uint32, tag = "1")]
    pub crc32: u32,
}

/// Inbound envelope.
#[derive(Clone, PartialEq, Message)]
pub struct CommandMessage {
    #[prost(
        oneof = "command_message::Command",
        tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14"
    )]
    pub command: Option<command_message::Command>,
}

pub mod command_message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Command {
        #[prost(message, tag = "1")]
        SetTestMode(super::SetTestMode),
        #[prost(message, tag = "2")]
        SetTargetFps(super::SetTargetFps),
        #[prost(message, tag = "3")]
        ExerciseUpdate(super::ExerciseUpdate),
        #[prost(message, tag = "4")]
        ResetReps(super::Empty),
        #[prost(message, tag = "5")]
        Power(super::Power),
        #[prost(message, tag = "6")]
        FactoryReset(super::FactoryReset),
        #[prost(message, tag = "7")]
        UpdateDeviceConfig(super::UpdateDeviceConfig),
        #[prost(message, tag = "8")]
        SnapshotRequest(super::Empty),
        #[prost(message, tag = "9")]
        TakePhoto(super::Empty),
        #[prost(message, tag = "10")]
        StartVideo(super::Empty),
        #[prost(message, tag = "11")]
        StopVideo(super::Empty),
        #[prost(message, tag = "12")]
        OtaBegin(super::OtaBegin),
        #[prost(message, tag = "13")]
        OtaChunk(super::OtaChunk),
        #[prost(message, tag = "14")]
        OtaComplete(super::OtaComplete),
    }
}

// =============================================================================
// CONVERSIONS
// =============================================================================

/// In-memory types with a wire form.
pub trait ToWire {
    /// The protobuf message this type is sent as.
    type Wire: Message;

    /// Build the wire form.
    fn to_wire(&self) -> Self::Wire;
}

impl ToWire for DeviceMessage {
    type Wire = EventMessage;

    fn to_wire(&self) -> EventMessage {
        EventMessage {
            timestamp_ms: self.timestamp_ms,
            event: Some(event_to_wire(&self.event)),
        }
    }
}

impl ToWire for DeviceCommand {
    type Wire = CommandMessage;

    fn to_wire(&self) -> CommandMessage {
        CommandMessage {
            command: Some(command_to_wire(self)),
        }
    }
}

fn invalid(message: String) -> CuffError {
    CuffError::DecodeFailed(message)
}

fn bounded_str<const N: usize>(field: &str, value: &str) -> Result<heapless::String<N>> {
    bounded(value).ok_or_else(|| invalid(format!("{field} is {} bytes, limit {N}", value.len())))
}

fn bounded_bytes<const N: usize>(field: &str, value: &[u8]) -> Result<heapless::Vec<u8, N>> {
    heapless::Vec::from_slice(value)
        .map_err(|()| invalid(format!("{field} is {} bytes, limit {N}", value.len())))
}

fn optional_name(value: Option<String>) -> Result<Option<ExerciseName>> {
    value
        .map(|name| bounded_str("exercise name", &name))
        .transpose()
}

fn narrow_u16(field: &str, value: u32) -> Result<u16> {
    u16::try_from(value).map_err(|_| invalid(format!("{field} {value} does not fit in 16 bits")))
}

fn mode_to_wire(mode: DeviceMode) -> i32 {
    i32::from(Mode::from(mode))
}

fn mode_from_wire(value: i32) -> Result<DeviceMode> {
    Mode::try_from(value)
        .map(DeviceMode::from)
        .map_err(|_| invalid(format!("unknown mode {value}")))
}

fn metadata_to_wire(list: &MetadataList) -> Metadata {
    Metadata {
        entries: list
            .iter()
            .map(|entry| MetadataPair {
                key: entry.key.as_str().to_owned(),
                value: entry.value.as_str().to_owned(),
            })
            .collect(),
    }
}

fn metadata_from_wire(metadata: Metadata) -> Result<MetadataList> {
    if metadata.entries.len() > MAX_METADATA_ENTRIES {
        return Err(invalid(format!(
            "metadata has {} entries, limit {MAX_METADATA_ENTRIES}",
            metadata.entries.len()
        )));
    }
    let mut list = MetadataList::new();
    for pair in metadata.entries {
        let entry = MetadataEntry {
            key: bounded_str("metadata key", &pair.key)?,
            value: bounded_str("metadata value", &pair.value)?,
        };
        list.push(entry)
            .map_err(|_| invalid("metadata list full".into()))?;
    }
    Ok(list)
}

fn event_to_wire(event: &DeviceEvent) -> event_message::Event {
    use event_message::Event as E;

    match event {
        DeviceEvent::Status {
            label,
            mode,
            fps,
            test_mode,
        } => E::Status(Status {
            label: label.as_str().to_owned(),
            mode: mode_to_wire(*mode),
            fps: *fps,
            test_mode: *test_mode,
        }),
        DeviceEvent::Boot {
            test_mode,
            mode,
            fps,
        } => E::Boot(Boot {
            test_mode: *test_mode,
            mode: mode_to_wire(*mode),
            fps: *fps,
        }),
        DeviceEvent::Tag {
            marker_id,
            from_test_mode,
        } => E::Tag(Tag {
            marker_id: *marker_id,
            from_test_mode: *from_test_mode,
        }),
        DeviceEvent::ExerciseRequest { marker_id } => E::ExerciseRequest(ExerciseRequest {
            marker_id: *marker_id,
        }),
        DeviceEvent::ExerciseBroadcast {
            exercise_id,
            name,
            metadata,
            from_test_mode,
        } => E::ExerciseBroadcast(ExerciseBroadcast {
            exercise_id: *exercise_id,
            name: name.as_str().to_owned(),
            metadata: metadata.as_ref().map(metadata_to_wire),
            from_test_mode: *from_test_mode,
        }),
        DeviceEvent::ExerciseReady { exercise_id } => E::ExerciseReady(ExerciseReady {
            exercise_id: *exercise_id,
        }),
        DeviceEvent::Scan {
            marker_id,
            distance_cm,
            mode,
            fps,
            exercise_name,
        } => E::Scan(Scan {
            marker_id: *marker_id,
            distance_cm: *distance_cm,
            mode: mode_to_wire(*mode),
            fps: *fps,
            exercise_name: exercise_name.as_ref().map(|n| n.as_str().to_owned()),
        }),
        DeviceEvent::Rep {
            marker_id,
            rep_count,
            exercise_name,
        } => E::Rep(Rep {
            marker_id: *marker_id,
            rep_count: *rep_count,
            exercise_name: exercise_name.as_ref().map(|n| n.as_str().to_owned()),
        }),
        DeviceEvent::Snapshot(snapshot) => E::Snapshot(Snapshot {
            mode: mode_to_wire(snapshot.mode),
            test_mode: snapshot.test_mode,
            target_fps: snapshot.target_fps,
            loiter_fps: snapshot.loiter_fps,
            min_travel_cm: snapshot.min_travel_cm,
            max_rep_idle_ms: snapshot.max_rep_idle_ms,
            marker_id: snapshot.marker_id,
            metadata_ready: snapshot.metadata_ready,
            rep_count: snapshot.rep_count,
            exercise_name: snapshot
                .exercise_name
                .as_ref()
                .map(|n| n.as_str().to_owned()),
        }),
        DeviceEvent::OtaStatus { accepted, reason } => E::OtaStatus(OtaStatus {
            accepted: *accepted,
            reason: reason.as_str().to_owned(),
        }),
        DeviceEvent::PowerEvent { shutdown } => E::PowerEvent(PowerEvent {
            shutdown: *shutdown,
        }),
        DeviceEvent::PhotoMeta {
            photo_id,
            total_size,
            chunk_count,
        } => E::PhotoMeta(PhotoMeta {
            photo_id: *photo_id,
            total_size: *total_size,
            chunk_count: u32::from(*chunk_count),
        }),
        DeviceEvent::PhotoChunk {
            photo_id,
            index,
            data,
        } => E::PhotoChunk(PhotoChunk {
            photo_id: *photo_id,
            index: u32::from(*index),
            data: data.to_vec(),
        }),
        DeviceEvent::VideoFrame {
            frame_id,
            index,
            data,
        } => E::VideoFrame(VideoFrame {
            frame_id: *frame_id,
            index: u32::from(*index),
            data: data.to_vec(),
        }),
        DeviceEvent::AprilTagDetected {
            marker_id,
            distance_cm,
            decision_margin,
        } => E::AprilTagDetected(AprilTagDetected {
            marker_id: *marker_id,
            distance_cm: *distance_cm,
            decision_margin: *decision_margin,
        }),
        DeviceEvent::MotionDetected { magnitude } => E::MotionDetected(MotionDetected {
            magnitude: *magnitude,
        }),
    }
}

impl TryFrom<event_message::Event> for DeviceEvent {
    type Error = CuffError;

    fn try_from(event: event_message::Event) -> Result<Self> {
        use event_message::Event as E;

        Ok(match event {
            E::Status(s) => Self::Status {
                label: bounded_str("status label", &s.label)?,
                mode: mode_from_wire(s.mode)?,
                fps: s.fps,
                test_mode: s.test_mode,
            },
            E::Boot(b) => Self::Boot {
                test_mode: b.test_mode,
                mode: mode_from_wire(b.mode)?,
                fps: b.fps,
            },
            E::Tag(t) => Self::Tag {
                marker_id: t.marker_id,
                from_test_mode: t.from_test_mode,
            },
            E::ExerciseRequest(r) => Self::ExerciseRequest {
                marker_id: r.marker_id,
            },
            E::ExerciseBroadcast(b) => Self::ExerciseBroadcast {
                exercise_id: b.exercise_id,
                name: bounded_str("exercise name", &b.name)?,
                metadata: b.metadata.map(metadata_from_wire).transpose()?,
                from_test_mode: b.from_test_mode,
            },
            E::ExerciseReady(r) => Self::ExerciseReady {
                exercise_id: r.exercise_id,
            },
            E::Scan(s) => Self::Scan {
                marker_id: s.marker_id,
                distance_cm: s.distance_cm,
                mode: mode_from_wire(s.mode)?,
                fps: s.fps,
                exercise_name: optional_name(s.exercise_name)?,
            },
            E::Rep(r) => Self::Rep {
                marker_id: r.marker_id,
                rep_count: r.rep_count,
                exercise_name: optional_name(r.exercise_name)?,
            },
            E::Snapshot(s) => Self::Snapshot(DeviceSnapshot {
                mode: mode_from_wire(s.mode)?,
                test_mode: s.test_mode,
                target_fps: s.target_fps,
                loiter_fps: s.loiter_fps,
                min_travel_cm: s.min_travel_cm,
                max_rep_idle_ms: s.max_rep_idle_ms,
                marker_id: s.marker_id,
                metadata_ready: s.metadata_ready,
                rep_count: s.rep_count,
                exercise_name: optional_name(s.exercise_name)?,
            }),
            E::OtaStatus(s) => Self::OtaStatus {
                accepted: s.accepted,
                reason: bounded_str("ota reason", &s.reason)?,
            },
            E::PowerEvent(p) => Self::PowerEvent {
                shutdown: p.shutdown,
            },
            E::PhotoMeta(p) => Self::PhotoMeta {
                photo_id: p.photo_id,
                total_size: p.total_size,
                chunk_count: narrow_u16("chunk count", p.chunk_count)?,
            },
            E::PhotoChunk(c) => Self::PhotoChunk {
                photo_id: c.photo_id,
                index: narrow_u16("chunk index", c.index)?,
                data: bounded_bytes::<MEDIA_CHUNK_CAPACITY>("photo chunk", &c.data)?,
            },
            E::VideoFrame(f) => Self::VideoFrame {
                frame_id: f.frame_id,
                index: narrow_u16("frame index", f.index)?,
                data: bounded_bytes::<MEDIA_CHUNK_CAPACITY>("video chunk", &f.data)?,
            },
            E::AprilTagDetected(d) => Self::AprilTagDetected {
                marker_id: d.marker_id,
                distance_cm: d.distance_cm,
                decision_margin: d.decision_margin,
            },
            E::MotionDetected(m) => Self::MotionDetected {
                magnitude: m.magnitude,
            },
        })
    }
}

impl TryFrom<EventMessage> for DeviceMessage {
    type Error = CuffError;

    fn try_from(message: EventMessage) -> Result<Self> {
        let event = message
            .event
            .ok_or_else(|| invalid("message carries no known event".into()))?;
        Ok(Self {
            timestamp_ms: message.timestamp_ms,
            event: DeviceEvent::try_from(event)?,
        })
    }
}

fn command_to_wire(command: &DeviceCommand) -> command_message::Command {
    use command_message::Command as C;

    match command {
        DeviceCommand::SetTestMode { enabled } => C::SetTestMode(SetTestMode { enabled: *enabled }),
        DeviceCommand::SetTargetFps { fps } => C::SetTargetFps(SetTargetFps { fps: *fps }),
        DeviceCommand::ExerciseUpdate {
            exercise_id,
            name,
            min_travel_cm,
            fps,
            metadata,
        } => C::ExerciseUpdate(ExerciseUpdate {
            exercise_id: *exercise_id,
            name: name.as_str().to_owned(),
            min_travel_cm: *min_travel_cm,
            fps: *fps,
            metadata: metadata.as_ref().map(metadata_to_wire),
        }),
        DeviceCommand::ResetReps => C::ResetReps(Empty {}),
        DeviceCommand::Power { shutdown } => C::Power(Power {
            shutdown: *shutdown,
        }),
        DeviceCommand::FactoryReset { confirm } => C::FactoryReset(FactoryReset { confirm: *confirm }),
        DeviceCommand::UpdateDeviceConfig {
            target_fps,
            loiter_fps,
            min_travel_cm,
            max_rep_idle_ms,
        } => C::UpdateDeviceConfig(UpdateDeviceConfig {
            target_fps: *target_fps,
            loiter_fps: *loiter_fps,
            min_travel_cm: *min_travel_cm,
            max_rep_idle_ms: *max_rep_idle_ms,
        }),
        DeviceCommand::SnapshotRequest => C::SnapshotRequest(Empty {}),
        DeviceCommand::TakePhoto => C::TakePhoto(Empty {}),
        DeviceCommand::StartVideo => C::StartVideo(Empty {}),
        DeviceCommand::StopVideo => C::StopVideo(Empty {}),
        DeviceCommand::OtaBegin {
            image_size,
            version,
        } => C::OtaBegin(OtaBegin {
            image_size: *image_size,
            version: version.as_str().to_owned(),
        }),
        DeviceCommand::OtaChunk { offset, data } => C::OtaChunk(OtaChunk {
            offset: *offset,
            data: data.to_vec(),
        }),
        DeviceCommand::OtaComplete { crc32 } => C::OtaComplete(OtaComplete { crc32: *crc32 }),
    }
}

impl TryFrom<command_message::Command> for DeviceCommand {
    type Error = CuffError;

    fn try_from(command: command_message::Command) -> Result<Self> {
        use command_message::Command as C;

        Ok(match command {
            C::SetTestMode(c) => Self::SetTestMode { enabled: c.enabled },
            C::SetTargetFps(c) => Self::SetTargetFps { fps: c.fps },
            C::ExerciseUpdate(c) => Self::ExerciseUpdate {
                exercise_id: c.exercise_id,
                name: bounded_str("exercise name", &c.name)?,
                min_travel_cm: c.min_travel_cm,
                fps: c.fps,
                metadata: c.metadata.map(metadata_from_wire).transpose()?,
            },
            C::ResetReps(_) => Self::ResetReps,
            C::Power(c) => Self::Power {
                shutdown: c.shutdown,
            },
            C::FactoryReset(c) => Self::FactoryReset { confirm: c.confirm },
            C::UpdateDeviceConfig(c) => Self::UpdateDeviceConfig {
                target_fps: c.target_fps,
                loiter_fps: c.loiter_fps,
                min_travel_cm: c.min_travel_cm,
                max_rep_idle_ms: c.max_rep_idle_ms,
            },
            C::SnapshotRequest(_) => Self::SnapshotRequest,
            C::TakePhoto(_) => Self::TakePhoto,
            C::StartVideo(_) => Self::StartVideo,
            C::StopVideo(_) => Self::StopVideo,
            C::OtaBegin(c) => Self::OtaBegin {
                image_size: c.image_size,
                version: bounded_str::<OTA_VERSION_CAPACITY>("firmware version", &c.version)?,
            },
            C::OtaChunk(c) => Self::OtaChunk {
                offset: c.offset,
                data: bounded_bytes::<OTA_CHUNK_CAPACITY>("firmware chunk", &c.data)?,
            },
            C::OtaComplete(c) => Self::OtaComplete { crc32: c.crc32 },
        })
    }
}

impl TryFrom<CommandMessage> for DeviceCommand {
    type Error = CuffError;

    fn try_from(message: CommandMessage) -> Result<Self> {
        message
            .command
            .ok_or(CuffError::UnknownCommand)
            .and_then(Self::try_from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::status_label;

    fn full_metadata() -> MetadataList {
        let mut metadata = MetadataList::new();
        for i in 0..MAX_METADATA_ENTRIES {
            let key = format!("{i:0>32}");
            let value = "v".repeat(METADATA_VALUE_CAPACITY);
            metadata.push(MetadataEntry::new(&key, &value).unwrap()).unwrap();
        }
        metadata
    }

    fn full_name() -> ExerciseName {
        bounded(&"n".repeat(EXERCISE_NAME_CAPACITY)).unwrap()
    }

    #[test]
    fn test_largest_event_matches_bound() {
        let message = DeviceMessage {
            timestamp_ms: u64::MAX,
            event: DeviceEvent::ExerciseBroadcast {
                exercise_id: u32::MAX,
                name: full_name(),
                metadata: Some(full_metadata()),
                from_test_mode: true,
            },
        };
        assert_eq!(message.to_wire().encoded_len(), MAX_EVENT_MESSAGE_LEN);
    }

    #[test]
    fn test_largest_command_matches_bound() {
        let command = DeviceCommand::ExerciseUpdate {
            exercise_id: u32::MAX,
            name: full_name(),
            min_travel_cm: Some(50.0),
            fps: Some(10.0),
            metadata: Some(full_metadata()),
        };
        assert_eq!(command.to_wire().encoded_len(), MAX_COMMAND_MESSAGE_LEN);
    }

    #[test]
    fn test_other_full_events_stay_under_bound() {
        let events = [
            DeviceEvent::Snapshot(DeviceSnapshot {
                mode: DeviceMode::Loiter,
                test_mode: true,
                target_fps: 30.0,
                loiter_fps: 10.0,
                min_travel_cm: 100.0,
                max_rep_idle_ms: u64::MAX,
                marker_id: Some(u32::MAX),
                metadata_ready: true,
                rep_count: u32::MAX,
                exercise_name: Some(full_name()),
            }),
            DeviceEvent::PhotoChunk {
                photo_id: u32::MAX,
                index: u16::MAX,
                data: heapless::Vec::from_slice(&[0xAB; MEDIA_CHUNK_CAPACITY]).unwrap(),
            },
            DeviceEvent::OtaStatus {
                accepted: true,
                reason: status_label(&"r".repeat(64)),
            },
        ];
        for event in events {
            let message = DeviceMessage {
                timestamp_ms: u64::MAX,
                event,
            };
            assert!(message.to_wire().encoded_len() <= MAX_EVENT_MESSAGE_LEN);
        }
    }

    #[test]
    fn test_event_survives_wire_form() {
        let message = DeviceMessage {
            timestamp_ms: 5,
            event: DeviceEvent::Scan {
                marker_id: 4242,
                distance_cm: 61.5,
                mode: DeviceMode::Scanning,
                fps: 12.0,
                exercise_name: bounded("Row"),
            },
        };
        assert_eq!(DeviceMessage::try_from(message.to_wire()).unwrap(), message);
    }

    #[test]
    fn test_inbound_bounds_are_enforced() {
        let update = CommandMessage {
            command: Some(command_message::Command::ExerciseUpdate(ExerciseUpdate {
                exercise_id: 1,
                name: "n".repeat(EXERCISE_NAME_CAPACITY + 1),
                ..ExerciseUpdate::default()
            })),
        };
        assert!(matches!(
            DeviceCommand::try_from(update),
            Err(CuffError::DecodeFailed(_))
        ));

        let crowded = Metadata {
            entries: vec![MetadataPair::default(); MAX_METADATA_ENTRIES + 1],
        };
        assert!(metadata_from_wire(crowded).is_err());

        let chunk = CommandMessage {
            command: Some(command_message::Command::OtaChunk(OtaChunk {
                offset: 0,
                data: vec![0; OTA_CHUNK_CAPACITY + 1],
            })),
        };
        assert!(DeviceCommand::try_from(chunk).is_err());
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        assert!(mode_from_wire(3).is_ok());
        assert!(mode_from_wire(9).is_err());
    }

    #[test]
    fn test_missing_command_is_unknown() {
        assert!(matches!(
            DeviceCommand::try_from(CommandMessage::default()),
            Err(CuffError::UnknownCommand)
        ));
    }
}
