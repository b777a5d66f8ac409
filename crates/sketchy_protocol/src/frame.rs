#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use sketchy_domain::{RoomId, ShapeId, UserId};
use thiserror::Error;

/// Maximum accepted size of a single JSON text frame.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024; // 1 MiB

#[derive(Debug, Error)]
pub enum FrameError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("malformed frame: {0}")]
	Malformed(#[from] serde_json::Error),
}

/// A drawing shape as it travels over the wire: a client-assigned id plus an
/// opaque bag of geometry/style attributes the server never interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
	pub id: ShapeId,

	#[serde(flatten)]
	pub attrs: serde_json::Map<String, serde_json::Value>,
}

impl Shape {
	pub fn new(id: ShapeId, attrs: serde_json::Map<String, serde_json::Value>) -> Self {
		Self { id, attrs }
	}
}

/// One entry of a room's participant list as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
	pub user_id: UserId,
	pub user_name: String,
}

/// Client-to-server frames, discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ClientFrame {
	JoinRoom {
		room_id: RoomId,
	},
	LeaveRoom {
		room_id: RoomId,
	},
	CreateShape {
		room_id: RoomId,
		shape: Shape,
	},
	DeleteShape {
		room_id: RoomId,
		shape_id: ShapeId,
	},
}

/// Server-to-client frames, discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ServerFrame {
	RoomJoined {
		room_id: RoomId,
		message: String,
	},
	// Kept as the original client spells it.
	RoomLeaved {
		room_id: RoomId,
		message: String,
	},
	UserLeft {
		user_id: UserId,
		user_name: String,
		participants: Vec<Participant>,
	},
	LoadShapes {
		shapes: Vec<Shape>,
	},
	NewShape {
		shape: Shape,
	},
	DeleteShape {
		shape_id: ShapeId,
	},
	Error {
		message: String,
	},
}

/// Decode one inbound JSON text frame, enforcing the size limit first.
pub fn decode_client_frame(text: &str) -> Result<ClientFrame, FrameError> {
	if text.len() > MAX_FRAME_BYTES {
		return Err(FrameError::FrameTooLarge {
			len: text.len(),
			max: MAX_FRAME_BYTES,
		});
	}

	Ok(serde_json::from_str(text)?)
}

/// Encode an outbound frame to its JSON text representation.
pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, FrameError> {
	Ok(serde_json::to_string(frame)?)
}
