#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Identifier of a collaborative drawing room.
///
/// The id itself is minted by the out-of-scope room-creation flow; this core
/// only requires it to be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
	/// Create a non-empty `RoomId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for RoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RoomId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomId::new(s.to_string())
	}
}

/// Stable user identity, taken from a verified bearer token's subject claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
	/// Create a non-empty `UserId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for UserId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		UserId::new(s.to_string())
	}
}

/// Client-assigned shape identifier, used for idempotent broadcast and
/// delete matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeId(String);

impl ShapeId {
	/// Create a non-empty `ShapeId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for ShapeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ShapeId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ShapeId::new(s.to_string())
	}
}

/// Kind of mutation a `ShapeEvent` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
	Create,
	Delete,
}

impl EventKind {
	/// Stable string identifier, used as the persisted discriminator.
	pub const fn as_str(self) -> &'static str {
		match self {
			EventKind::Create => "create",
			EventKind::Delete => "delete",
		}
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EventKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim() {
			"create" => Ok(EventKind::Create),
			"delete" => Ok(EventKind::Delete),
			other => Err(ParseIdError::InvalidFormat(format!("unknown event kind: {other}"))),
		}
	}
}

/// One create or delete mutation to a room's drawing.
///
/// Append-only: a delete is recorded as a companion event with the same
/// `shape_id`, never by mutating the create. `received_at` is server arrival
/// time (unix ms) and is the only ordering the core guarantees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeEvent {
	pub shape_id: ShapeId,
	pub room_id: RoomId,
	pub author: UserId,
	pub kind: EventKind,
	/// Opaque geometry/style blob; the core never inspects it.
	pub payload: serde_json::Value,
	pub received_at: i64,
}

impl ShapeEvent {
	pub fn create(
		shape_id: ShapeId,
		room_id: RoomId,
		author: UserId,
		payload: serde_json::Value,
		received_at: i64,
	) -> Self {
		Self {
			shape_id,
			room_id,
			author,
			kind: EventKind::Create,
			payload,
			received_at,
		}
	}

	pub fn delete(shape_id: ShapeId, room_id: RoomId, author: UserId, received_at: i64) -> Self {
		Self {
			shape_id,
			room_id,
			author,
			kind: EventKind::Delete,
			payload: serde_json::Value::Null,
			received_at,
		}
	}
}

/// String wrapper that redacts its contents in `Debug`/`Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl serde::Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<<S as serde::Serializer>::Ok, <S as serde::Serializer>::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str("")
	}
}

impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ids_reject_empty() {
		assert_eq!(RoomId::new("  "), Err(ParseIdError::Empty));
		assert_eq!(UserId::new(""), Err(ParseIdError::Empty));
		assert_eq!(ShapeId::new("\t"), Err(ParseIdError::Empty));
		assert_eq!(RoomId::new("r1").unwrap().as_str(), "r1");
	}

	#[test]
	fn ids_serialize_transparently() {
		let room = RoomId::new("r1").unwrap();
		assert_eq!(serde_json::to_string(&room).unwrap(), "\"r1\"");
		let back: RoomId = serde_json::from_str("\"r1\"").unwrap();
		assert_eq!(back, room);
	}

	#[test]
	fn event_kind_parse_and_display() {
		assert_eq!("create".parse::<EventKind>().unwrap(), EventKind::Create);
		assert_eq!("delete".parse::<EventKind>().unwrap(), EventKind::Delete);
		assert!("update".parse::<EventKind>().is_err());
		assert_eq!(EventKind::Create.to_string(), "create");
	}

	#[test]
	fn delete_event_has_null_payload() {
		let ev = ShapeEvent::delete(
			ShapeId::new("s1").unwrap(),
			RoomId::new("r1").unwrap(),
			UserId::new("u1").unwrap(),
			42,
		);
		assert_eq!(ev.kind, EventKind::Delete);
		assert!(ev.payload.is_null());
	}

	#[test]
	fn secret_string_redacts_debug() {
		let s = SecretString::new("hunter2");
		assert_eq!(format!("{s:?}"), "SecretString(<redacted>)");
		assert_eq!(s.expose(), "hunter2");
	}
}
