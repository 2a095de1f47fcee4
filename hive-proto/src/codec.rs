// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Frame encoding and decoding for hive peer messages.

use bytes::{BufMut, BytesMut};

use crate::msgs::HiveMessage;

/// The four magic bytes prefixing every hive frame: ASCII "HIVE".
pub const HIVE_MAGIC: [u8; 4] = [0x48, 0x49, 0x56, 0x45];

/// Upper bound on a frame payload. Frames declaring a larger length are
/// rejected before any payload allocation happens. Kept below the u16 LEN
/// ceiling so an oversize declaration is still representable on the wire.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 - 1024;

const HEADER_LEN: usize = 4 + 1 + 2;

/// Errors raised while parsing a frame that did carry the hive magic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
	/// The declared payload length exceeds [`MAX_MESSAGE_BYTES`].
	Oversize { declared: usize },
	/// The frame ended before the declared payload length.
	Truncated { declared: usize, available: usize },
	/// The payload was not a valid JSON document for its message type.
	InvalidPayload(String),
	/// The message was too large to serialize within [`MAX_MESSAGE_BYTES`].
	PayloadTooLarge,
}

impl std::fmt::Display for FrameError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			FrameError::Oversize { declared } => {
				write!(f, "frame declares {} payload bytes, limit is {}", declared, MAX_MESSAGE_BYTES)
			},
			FrameError::Truncated { declared, available } => {
				write!(f, "frame declares {} payload bytes but only {} present", declared, available)
			},
			FrameError::InvalidPayload(e) => write!(f, "invalid payload: {}", e),
			FrameError::PayloadTooLarge => {
				write!(f, "serialized payload exceeds {} bytes", MAX_MESSAGE_BYTES)
			},
		}
	}
}

impl std::error::Error for FrameError {}

/// Serializes a message into a complete frame.
pub fn encode(msg: &HiveMessage) -> Result<Vec<u8>, FrameError> {
	let payload = msg.serialize_payload().map_err(|e| FrameError::InvalidPayload(e.to_string()))?;
	if payload.len() > MAX_MESSAGE_BYTES {
		return Err(FrameError::PayloadTooLarge);
	}
	let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
	buf.put_slice(&HIVE_MAGIC);
	buf.put_u8(msg.msg_type());
	buf.put_u16(payload.len() as u16);
	buf.put_slice(&payload);
	Ok(buf.to_vec())
}

/// Parses a custom-message frame.
///
/// Returns `Ok(None)` when the frame does not start with the hive magic:
/// such frames belong to other plugins and must be ignored without error.
/// A frame with valid magic but an unknown TYPE decodes to
/// [`HiveMessage::Unknown`] so callers can count it.
pub fn decode(frame: &[u8]) -> Result<Option<HiveMessage>, FrameError> {
	if frame.len() < 4 || frame[..4] != HIVE_MAGIC {
		return Ok(None);
	}
	if frame.len() < HEADER_LEN {
		return Err(FrameError::Truncated { declared: 0, available: 0 });
	}
	let msg_type = frame[4];
	let declared = u16::from_be_bytes([frame[5], frame[6]]) as usize;
	if declared > MAX_MESSAGE_BYTES {
		return Err(FrameError::Oversize { declared });
	}
	let available = frame.len() - HEADER_LEN;
	if available < declared {
		return Err(FrameError::Truncated { declared, available });
	}
	let payload = &frame[HEADER_LEN..HEADER_LEN + declared];
	HiveMessage::deserialize_payload(msg_type, payload)
		.map(Some)
		.map_err(|e| FrameError::InvalidPayload(e.to_string()))
}
