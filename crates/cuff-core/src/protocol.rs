//! Device protocol: wire messages, framing and command dispatch.
//!
//! Outbound [`DeviceMessage`]s and inbound [`DeviceCommand`]s are encoded
//! with the numbered-field schema in [`wire`] and carried in length-prefixed
//! frames (see [`codec`]).
//! [`dispatch`] turns decoded commands into controller calls.

pub mod codec;
pub mod commands;
pub mod dispatch;
pub mod events;
pub mod wire;

pub use codec::{
    decode_command, decode_command_frame, decode_message_frame, encode_frame, encode_frame_into,
    send_message, split_frame, FrameAssembler,
};
pub use commands::DeviceCommand;
pub use dispatch::{dispatch_command, handle_command_frame, DispatchOutcome};
pub use events::{status_label, DeviceEvent, DeviceMessage, DeviceSnapshot, StatusLabel};
pub use wire::ToWire;

/// Width of the frame length prefix.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Largest payload this firmware encodes into a single frame.
///
/// Derived from the worst-case encoding of any valid message, so every
/// message that passes the in-memory bounds fits.
pub const MAX_PAYLOAD_LEN: usize = wire::MAX_MESSAGE_LEN;

/// Largest frame this firmware encodes, prefix included.
pub const MAX_FRAME_LEN: usize = LENGTH_PREFIX_LEN + MAX_PAYLOAD_LEN;
