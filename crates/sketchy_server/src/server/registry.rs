#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sketchy_domain::{RoomId, UserId};
use sketchy_protocol::ServerFrame;
use tokio::sync::mpsc;
use tracing::debug;

/// Server-side state bound to one live transport connection.
///
/// Created after successful authentication, destroyed when the transport
/// closes. Holds at most one room membership at a time; `room` is mutated
/// only by the join/leave handlers for this session.
#[derive(Debug)]
pub struct Session {
	pub conn_id: u64,
	pub user_id: UserId,
	pub display_name: String,

	/// Bounded outbox drained by the connection's writer task.
	pub outbox: mpsc::Sender<ServerFrame>,

	room: Mutex<Option<RoomId>>,
}

impl Session {
	pub fn new(conn_id: u64, user_id: UserId, display_name: String, outbox: mpsc::Sender<ServerFrame>) -> Self {
		Self {
			conn_id,
			user_id,
			display_name,
			outbox,
			room: Mutex::new(None),
		}
	}

	pub fn current_room(&self) -> Option<RoomId> {
		self.room.lock().unwrap_or_else(|e| e.into_inner()).clone()
	}

	pub(crate) fn bind_room(&self, room_id: RoomId) {
		*self.room.lock().unwrap_or_else(|e| e.into_inner()) = Some(room_id);
	}

	pub(crate) fn clear_room(&self) {
		*self.room.lock().unwrap_or_else(|e| e.into_inner()) = None;
	}

	/// Best-effort direct reply to this session; a full outbox drops the
	/// frame rather than blocking the caller.
	pub fn reply(&self, frame: ServerFrame) -> bool {
		match self.outbox.try_send(frame) {
			Ok(()) => true,
			Err(mpsc::error::TrySendError::Full(_)) => {
				metrics::counter!("sketchy_server_reply_dropped_total").increment(1);
				debug!(conn_id = self.conn_id, "reply dropped due to full outbox");
				false
			}
			Err(mpsc::error::TrySendError::Closed(_)) => false,
		}
	}
}

/// Maps active transport connections to their sessions.
///
/// At most one session per live connection; a user id may appear under many
/// connections (multiple tabs), each tracked independently.
#[derive(Debug, Default)]
pub struct SessionRegistry {
	inner: Mutex<HashMap<u64, Arc<Session>>>,
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, session: Arc<Session>) {
		let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
		inner.insert(session.conn_id, session);
	}

	/// Remove a session on transport close. The caller is responsible for
	/// the implicit leave of any bound room.
	pub fn unregister(&self, conn_id: u64) -> Option<Arc<Session>> {
		let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
		inner.remove(&conn_id)
	}

	pub fn len(&self) -> usize {
		let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
		inner.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
