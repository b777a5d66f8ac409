#![forbid(unsafe_code)]

use std::collections::HashMap;

use sketchy_domain::{EventKind, RoomId, ShapeEvent, ShapeId};
use tokio::sync::Mutex;
use tracing::debug;

use crate::util::time::unix_ms_now;

/// Failure talking to a persistent store (event log or room directory).
///
/// Recoverable from the protocol's perspective: the originating caller gets
/// an `ERROR` frame and any broadcast that would have followed is suppressed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("store backend failure: {0}")]
	Backend(String),
}

impl From<sqlx::Error> for StoreError {
	fn from(e: sqlx::Error) -> Self {
		StoreError::Backend(e.to_string())
	}
}

/// Append/query boundary to the external event log store.
///
/// `append` and `remove` must complete before any broadcast of the event is
/// attempted; every event a peer sees is durable.
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
	/// Append one shape event. Never mutates prior records.
	async fn append(&self, event: &ShapeEvent) -> Result<(), StoreError>;

	/// Record the deletion of a shape as a companion delete event.
	async fn remove(&self, room_id: &RoomId, shape_id: &ShapeId) -> Result<(), StoreError>;

	/// Create events not yet superseded by a matching delete, in receipt
	/// order. A fresh query is required for each replay.
	async fn list_active(&self, room_id: &RoomId) -> Result<Vec<ShapeEvent>, StoreError>;
}

/// Event log held in process memory. Used when persistence is disabled and
/// by tests; events do not survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
	inner: Mutex<HashMap<RoomId, Vec<ShapeEvent>>>,
}

#[async_trait::async_trait]
impl EventStore for InMemoryEventStore {
	async fn append(&self, event: &ShapeEvent) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner.entry(event.room_id.clone()).or_default().push(event.clone());
		Ok(())
	}

	async fn remove(&self, room_id: &RoomId, shape_id: &ShapeId) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner.entry(room_id.clone()).or_default().push(ShapeEvent {
			shape_id: shape_id.clone(),
			room_id: room_id.clone(),
			author: sketchy_domain::UserId::new("-").expect("static id"),
			kind: EventKind::Delete,
			payload: serde_json::Value::Null,
			received_at: unix_ms_now(),
		});
		Ok(())
	}

	async fn list_active(&self, room_id: &RoomId) -> Result<Vec<ShapeEvent>, StoreError> {
		let inner = self.inner.lock().await;
		let Some(log) = inner.get(room_id) else {
			return Ok(Vec::new());
		};

		Ok(active_from_log(log))
	}
}

/// Fold an append-ordered log into the still-active create events.
fn active_from_log(log: &[ShapeEvent]) -> Vec<ShapeEvent> {
	let mut active: Vec<ShapeEvent> = Vec::new();
	for event in log {
		match event.kind {
			EventKind::Create => active.push(event.clone()),
			EventKind::Delete => active.retain(|e| e.shape_id != event.shape_id),
		}
	}
	active
}

/// Event log backed by the shared sqlite database, append-only.
#[derive(Clone)]
pub struct SqliteEventStore {
	pool: sqlx::SqlitePool,
}

impl SqliteEventStore {
	pub fn new(pool: sqlx::SqlitePool) -> Self {
		Self { pool }
	}
}

#[async_trait::async_trait]
impl EventStore for SqliteEventStore {
	async fn append(&self, event: &ShapeEvent) -> Result<(), StoreError> {
		let payload = serde_json::to_string(&event.payload).map_err(|e| StoreError::Backend(e.to_string()))?;

		sqlx::query(
			"INSERT INTO shape_events (room_id, shape_id, author_id, kind, payload, received_at) VALUES (?, ?, ?, ?, ?, ?)",
		)
		.bind(event.room_id.as_str())
		.bind(event.shape_id.as_str())
		.bind(event.author.as_str())
		.bind(event.kind.as_str())
		.bind(payload)
		.bind(event.received_at)
		.execute(&self.pool)
		.await?;

		debug!(room = %event.room_id, shape = %event.shape_id, kind = %event.kind, "appended shape event");
		Ok(())
	}

	async fn remove(&self, room_id: &RoomId, shape_id: &ShapeId) -> Result<(), StoreError> {
		sqlx::query(
			"INSERT INTO shape_events (room_id, shape_id, author_id, kind, payload, received_at) VALUES (?, ?, '-', 'delete', 'null', ?)",
		)
		.bind(room_id.as_str())
		.bind(shape_id.as_str())
		.bind(unix_ms_now())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	async fn list_active(&self, room_id: &RoomId) -> Result<Vec<ShapeEvent>, StoreError> {
		let rows = sqlx::query_as::<_, (String, String, String, i64)>(
			"SELECT e.shape_id, e.author_id, e.payload, e.received_at \
			 FROM shape_events e \
			 WHERE e.room_id = ? AND e.kind = 'create' AND NOT EXISTS ( \
			     SELECT 1 FROM shape_events d \
			     WHERE d.room_id = e.room_id AND d.shape_id = e.shape_id AND d.kind = 'delete' AND d.id > e.id \
			 ) \
			 ORDER BY e.id ASC",
		)
		.bind(room_id.as_str())
		.fetch_all(&self.pool)
		.await?;

		let mut events = Vec::with_capacity(rows.len());
		for (shape_id, author_id, payload, received_at) in rows {
			let shape_id = ShapeId::new(shape_id).map_err(|e| StoreError::Backend(e.to_string()))?;
			let author = sketchy_domain::UserId::new(author_id).map_err(|e| StoreError::Backend(e.to_string()))?;
			let payload: serde_json::Value =
				serde_json::from_str(&payload).map_err(|e| StoreError::Backend(e.to_string()))?;

			events.push(ShapeEvent {
				shape_id,
				room_id: room_id.clone(),
				author,
				kind: EventKind::Create,
				payload,
				received_at,
			});
		}

		Ok(events)
	}
}
