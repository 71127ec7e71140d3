//! Length-prefixed framing.
//!
//! A frame is a 2-byte little-endian payload length followed by exactly that
//! many bytes of protobuf-encoded message (see [`wire`](super::wire)). A frame
//! is encoded whole or not at all; a received frame is decoded whole or
//! dropped. Unknown fields inside a payload are skipped, so newer peers can
//! add fields without breaking this firmware.

use prost::Message;
use tracing::warn;

use super::wire::{CommandMessage, EventMessage, ToWire};
use super::{DeviceCommand, DeviceMessage, LENGTH_PREFIX_LEN, MAX_FRAME_LEN, MAX_PAYLOAD_LEN};
use crate::error::{CuffError, Result};

/// Encode `value` as a frame into `buf`, returning the frame length.
///
/// Nothing past the returned length is touched, and nothing at all is
/// written when the message does not fit.
///
/// # Arguments
///
/// * `value` - Any message with a wire form ([`DeviceMessage`] or
///   [`DeviceCommand`])
/// * `buf` - Destination, prefix included
///
/// # Errors
///
/// Returns [`CuffError::EncodeOverflow`] if the payload does not fit in `buf`
/// or exceeds the 16-bit length prefix.
pub fn encode_frame_into<T: ToWire>(value: &T, buf: &mut [u8]) -> Result<usize> {
    if buf.len() < LENGTH_PREFIX_LEN {
        return Err(CuffError::EncodeOverflow { limit: 0 });
    }
    let wire = value.to_wire();
    let payload_len = wire.encoded_len();
    let (prefix, payload_buf) = buf.split_at_mut(LENGTH_PREFIX_LEN);
    if payload_len > payload_buf.len() {
        return Err(CuffError::EncodeOverflow {
            limit: payload_buf.len(),
        });
    }
    let declared = u16::try_from(payload_len).map_err(|_| CuffError::EncodeOverflow {
        limit: usize::from(u16::MAX),
    })?;
    let mut out = &mut payload_buf[..payload_len];
    wire.encode(&mut out)?;
    prefix.copy_from_slice(&declared.to_le_bytes());
    Ok(LENGTH_PREFIX_LEN + payload_len)
}

/// Encode `value` as a frame using a [`MAX_PAYLOAD_LEN`] buffer.
///
/// # Errors
///
/// Returns [`CuffError::EncodeOverflow`] if the payload exceeds
/// [`MAX_PAYLOAD_LEN`]. Every valid message fits.
pub fn encode_frame<T: ToWire>(value: &T) -> Result<Vec<u8>> {
    let mut buf = [0u8; MAX_FRAME_LEN];
    let len = encode_frame_into(value, &mut buf)?;
    Ok(buf[..len].to_vec())
}

/// Encode `message` and hand the frame to `transmit`.
///
/// This is the single outbound path of the controller: the frame is built in
/// a stack buffer and passed on in one piece.
///
/// # Returns
///
/// `true` if the frame was handed over. `false`, without calling `transmit`,
/// if encoding failed; the failure is logged at `warn`.
pub fn send_message(message: &DeviceMessage, transmit: impl FnOnce(&[u8])) -> bool {
    let mut buf = [0u8; MAX_FRAME_LEN];
    match encode_frame_into(message, &mut buf) {
        Ok(len) => {
            transmit(&buf[..len]);
            true
        }
        Err(e) => {
            warn!(
                event = message.event.name(),
                error = %e,
                code = e.error_code(),
                "dropping outbound message"
            );
            false
        }
    }
}

/// Check the length prefix and return the payload.
///
/// # Errors
///
/// Returns [`CuffError::FrameTooShort`] if there is no complete prefix, or
/// [`CuffError::FrameLengthMismatch`] if the prefix disagrees with the number
/// of bytes that follow.
pub fn split_frame(frame: &[u8]) -> Result<&[u8]> {
    if frame.len() < LENGTH_PREFIX_LEN {
        return Err(CuffError::FrameTooShort { len: frame.len() });
    }
    let (prefix, payload) = frame.split_at(LENGTH_PREFIX_LEN);
    let declared = usize::from(u16::from_le_bytes([prefix[0], prefix[1]]));
    if declared != payload.len() {
        return Err(CuffError::FrameLengthMismatch {
            declared,
            actual: payload.len(),
        });
    }
    Ok(payload)
}

/// Decode a command payload (no length prefix).
///
/// Unknown fields are skipped. Fields an older peer leaves out take their
/// defaults.
///
/// # Errors
///
/// * [`CuffError::DecodeFailed`] if the payload is empty, malformed, or
///   carries a field larger than its in-memory bound
/// * [`CuffError::UnknownCommand`] if it decodes but names no command this
///   firmware knows
pub fn decode_command(payload: &[u8]) -> Result<DeviceCommand> {
    if payload.is_empty() {
        return Err(CuffError::DecodeFailed("empty payload".into()));
    }
    DeviceCommand::try_from(CommandMessage::decode(payload)?)
}

/// Validate the framing of `frame` and decode the command in it.
///
/// # Errors
///
/// Any framing or decode error; see [`split_frame`] and [`decode_command`].
pub fn decode_command_frame(frame: &[u8]) -> Result<DeviceCommand> {
    decode_command(split_frame(frame)?)
}

/// Validate the framing of `frame` and decode the message in it.
///
/// # Errors
///
/// Any framing or decode error. A message whose event this firmware does not
/// know is [`CuffError::DecodeFailed`].
pub fn decode_message_frame(frame: &[u8]) -> Result<DeviceMessage> {
    DeviceMessage::try_from(EventMessage::decode(split_frame(frame)?)?)
}

/// Reassembles frames from a byte stream.
///
/// Stream transports deliver arbitrary chunks; this buffers them and yields
/// each complete frame (prefix included) in order.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.buf.len() < LENGTH_PREFIX_LEN {
            return None;
        }
        let declared = usize::from(u16::from_le_bytes([self.buf[0], self.buf[1]]));
        let total = LENGTH_PREFIX_LEN + declared;
        if self.buf.len() < total {
            return None;
        }
        Some(self.buf.drain(..total).collect())
    }

    /// Bytes buffered but not yet returned.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

const _: () = assert!(MAX_PAYLOAD_LEN <= u16::MAX as usize);
