#![forbid(unsafe_code)]

use std::collections::HashSet;

use sketchy_domain::RoomId;

use crate::server::events::StoreError;

/// Read-only boundary to the external room directory.
///
/// The directory records which room ids exist and who administratively owns
/// them; rows are written by a separate HTTP flow this core never touches.
#[async_trait::async_trait]
pub trait RoomDirectory: Send + Sync {
	async fn room_exists(&self, room_id: &RoomId) -> Result<bool, StoreError>;
}

/// Directory backed by the shared sqlite database's `rooms` table.
#[derive(Clone)]
pub struct SqliteRoomDirectory {
	pool: sqlx::SqlitePool,
}

impl SqliteRoomDirectory {
	pub fn new(pool: sqlx::SqlitePool) -> Self {
		Self { pool }
	}
}

#[async_trait::async_trait]
impl RoomDirectory for SqliteRoomDirectory {
	async fn room_exists(&self, room_id: &RoomId) -> Result<bool, StoreError> {
		let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM rooms WHERE id = ?")
			.bind(room_id.as_str())
			.fetch_optional(&self.pool)
			.await?;

		Ok(row.is_some())
	}
}

/// Fixed allow-list directory for dev setups and tests without a database.
#[derive(Debug, Default)]
pub struct StaticRoomDirectory {
	rooms: HashSet<RoomId>,
}

impl StaticRoomDirectory {
	pub fn new(rooms: impl IntoIterator<Item = RoomId>) -> Self {
		Self {
			rooms: rooms.into_iter().collect(),
		}
	}
}

#[async_trait::async_trait]
impl RoomDirectory for StaticRoomDirectory {
	async fn room_exists(&self, room_id: &RoomId) -> Result<bool, StoreError> {
		Ok(self.rooms.contains(room_id))
	}
}
