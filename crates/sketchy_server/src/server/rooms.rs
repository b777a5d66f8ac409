#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use sketchy_domain::{RoomId, ShapeEvent, ShapeId, UserId};
use sketchy_protocol::{Participant, ServerFrame, Shape};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::server::broadcast::broadcast;
use crate::server::directory::RoomDirectory;
use crate::server::events::{EventStore, StoreError};
use crate::server::registry::Session;
use crate::util::time::unix_ms_now;

/// Room-level failures surfaced to the sender as an `ERROR` frame. None of
/// these leave partial room state behind.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
	#[error("Room does not exist")]
	RoomNotFound,

	#[error("You are not a member of this room")]
	NotAMember,

	#[error("Something went wrong, please try again")]
	Store(#[from] StoreError),
}

/// One room membership. Entries are kept in join order; the front of the
/// list is the longest-tenured member.
#[derive(Debug, Clone)]
struct Member {
	user_id: UserId,
	user_name: String,
	session: Arc<Session>,
	joined_at: i64,
}

/// In-memory room state. Exists iff the room has at least one member.
#[derive(Debug)]
struct Room {
	room_id: RoomId,
	admin: UserId,
	created_at: i64,
	members: Vec<Member>,
}

impl Room {
	fn member_index(&self, user_id: &UserId) -> Option<usize> {
		self.members.iter().position(|m| &m.user_id == user_id)
	}

	fn participants(&self) -> Vec<Participant> {
		self.members
			.iter()
			.map(|m| Participant {
				user_id: m.user_id.clone(),
				user_name: m.user_name.clone(),
			})
			.collect()
	}

	fn recipient_sessions(&self) -> Vec<Arc<Session>> {
		self.members.iter().map(|m| Arc::clone(&m.session)).collect()
	}
}

/// Per-room lock slot. `detached` marks a slot that has been pruned from the
/// slot table; a task that raced the teardown must retry with a fresh slot.
#[derive(Debug, Default)]
struct RoomSlot {
	detached: bool,
	room: Option<Room>,
}

/// Successful join result, delivered to the caller only.
#[derive(Debug)]
pub struct JoinOutcome {
	pub room_id: RoomId,
	pub is_admin: bool,
	pub rejoined: bool,
	/// Active-shape replay in original append order.
	pub replay: Vec<Shape>,
}

/// Successful leave result (leaves are idempotent).
#[derive(Debug)]
pub struct LeaveOutcome {
	pub room_id: RoomId,
	pub was_member: bool,
}

/// Owns all room state behind per-room serialized access.
///
/// Every handler that touches one room's state runs to completion, awaited
/// external calls included, before the next handler for that room starts.
/// Different rooms proceed fully in parallel; there is no global lock held
/// across suspension points.
pub struct RoomManager {
	slots: Mutex<HashMap<RoomId, Arc<Mutex<RoomSlot>>>>,
	directory: Arc<dyn RoomDirectory>,
	events: Arc<dyn EventStore>,
}

impl RoomManager {
	pub fn new(directory: Arc<dyn RoomDirectory>, events: Arc<dyn EventStore>) -> Self {
		Self {
			slots: Mutex::new(HashMap::new()),
			directory,
			events,
		}
	}

	pub fn event_store(&self) -> &Arc<dyn EventStore> {
		&self.events
	}

	/// Serialize on the room's slot. The slot table lock is never held
	/// across an await of the slot lock.
	async fn lock_room(&self, room_id: &RoomId) -> OwnedMutexGuard<RoomSlot> {
		loop {
			let slot = {
				let mut slots = self.slots.lock().await;
				Arc::clone(slots.entry(room_id.clone()).or_default())
			};

			let guard = slot.lock_owned().await;
			if !guard.detached {
				return guard;
			}
			// Raced a teardown that pruned this slot; take a fresh one.
		}
	}

	/// Drop the guard, pruning the slot when the room is gone. Slots are
	/// only removed here, under their own guard, so a held guard always
	/// matches the table entry.
	async fn release(&self, room_id: &RoomId, mut guard: OwnedMutexGuard<RoomSlot>) {
		if guard.room.is_none() {
			guard.detached = true;
			let mut slots = self.slots.lock().await;
			slots.remove(room_id);
		}
	}

	/// Join a room: directory existence check, lazy room creation, replay.
	///
	/// A join by a user who is already a member of the room is a no-op
	/// success and still gets a fresh replay. A session holds at most one
	/// membership, so joining while bound to a different room leaves that
	/// room first.
	pub async fn join(&self, session: &Arc<Session>, room_id: RoomId) -> Result<JoinOutcome, RoomError> {
		if let Some(current) = session.current_room()
			&& current != room_id
		{
			debug!(conn_id = session.conn_id, from = %current, to = %room_id, "leaving bound room before join");
			self.leave(session, current).await;
		}

		let mut guard = self.lock_room(&room_id).await;

		if guard.room.is_none() {
			let exists = match self.directory.room_exists(&room_id).await {
				Ok(exists) => exists,
				Err(e) => {
					self.release(&room_id, guard).await;
					return Err(e.into());
				}
			};

			if !exists {
				debug!(room = %room_id, "join rejected: room not in directory");
				self.release(&room_id, guard).await;
				return Err(RoomError::RoomNotFound);
			}
		}

		// Query the replay before touching membership so a store failure
		// leaves no partial state behind.
		let replay = match self.events.list_active(&room_id).await {
			Ok(events) => replay_shapes(events),
			Err(e) => {
				self.release(&room_id, guard).await;
				return Err(e.into());
			}
		};

		let now = unix_ms_now();
		let room = guard.room.get_or_insert_with(|| {
			info!(room = %room_id, admin = %session.user_id, "room created");
			metrics::counter!("sketchy_server_rooms_created_total").increment(1);
			Room {
				room_id: room_id.clone(),
				admin: session.user_id.clone(),
				created_at: now,
				members: Vec::new(),
			}
		});

		let rejoined = room.member_index(&session.user_id).is_some();
		if !rejoined {
			room.members.push(Member {
				user_id: session.user_id.clone(),
				user_name: session.display_name.clone(),
				session: Arc::clone(session),
				joined_at: now,
			});
			session.bind_room(room_id.clone());
			debug!(room = %room_id, user = %session.user_id, members = room.members.len(), "member joined");
		}

		let is_admin = room.admin == session.user_id;
		drop(guard);

		Ok(JoinOutcome {
			room_id,
			is_admin,
			rejoined,
			replay,
		})
	}

	/// Leave a room. Idempotent: leaving a room the user is not a member of
	/// is a no-op success. Broadcasts `USER_LEFT` to the remaining members.
	pub async fn leave(&self, session: &Arc<Session>, room_id: RoomId) -> LeaveOutcome {
		let mut guard = self.lock_room(&room_id).await;

		let Some(room) = guard.room.as_mut() else {
			self.release(&room_id, guard).await;
			return LeaveOutcome {
				room_id,
				was_member: false,
			};
		};

		let Some(idx) = room.member_index(&session.user_id) else {
			drop(guard);
			return LeaveOutcome {
				room_id,
				was_member: false,
			};
		};

		let departed = room.members.remove(idx);
		departed.session.clear_room();
		if departed.session.conn_id != session.conn_id {
			session.clear_room();
		}

		if room.members.is_empty() {
			info!(room = %room.room_id, lived_ms = unix_ms_now() - room.created_at, "room torn down after last member left");
			metrics::counter!("sketchy_server_rooms_destroyed_total").increment(1);
			guard.room = None;
			self.release(&room_id, guard).await;
			return LeaveOutcome {
				room_id,
				was_member: true,
			};
		}

		if room.admin == departed.user_id
			&& let Some(next) = room.members.iter().min_by_key(|m| m.joined_at)
		{
			// Deterministic handover: the longest-tenured remaining member.
			room.admin = next.user_id.clone();
			info!(room = %room.room_id, admin = %room.admin, "admin handed over");
		}

		let frame = ServerFrame::UserLeft {
			user_id: departed.user_id.clone(),
			user_name: departed.user_name.clone(),
			participants: room.participants(),
		};
		broadcast(&room.recipient_sessions(), &frame, Some(departed.session.conn_id));

		drop(guard);
		LeaveOutcome {
			room_id,
			was_member: true,
		}
	}

	/// Implicit leave on transport close, equivalent to a `LEAVE_ROOM` frame
	/// for the session's bound room.
	pub async fn leave_current(&self, session: &Arc<Session>) {
		if let Some(room_id) = session.current_room() {
			debug!(conn_id = session.conn_id, room = %room_id, "implicit leave on disconnect");
			self.leave(session, room_id).await;
		}
	}

	/// Persist and fan out a shape creation. The broadcast happens only
	/// after the append succeeds; the sender gets its ack as a direct reply,
	/// not via broadcast.
	pub async fn create_shape(&self, session: &Arc<Session>, room_id: RoomId, shape: Shape) -> Result<Shape, RoomError> {
		let guard = self.lock_room(&room_id).await;

		let Some(room) = guard.room.as_ref() else {
			self.release(&room_id, guard).await;
			return Err(RoomError::NotAMember);
		};
		if room.member_index(&session.user_id).is_none() {
			drop(guard);
			return Err(RoomError::NotAMember);
		}

		let payload = serde_json::to_value(&shape).map_err(|e| StoreError::Backend(e.to_string()))?;
		let event = ShapeEvent::create(
			shape.id.clone(),
			room_id.clone(),
			session.user_id.clone(),
			payload,
			unix_ms_now(),
		);

		if let Err(e) = self.events.append(&event).await {
			warn!(room = %room_id, shape = %shape.id, error = %e, "shape append failed; broadcast suppressed");
			drop(guard);
			return Err(e.into());
		}

		let frame = ServerFrame::NewShape { shape: shape.clone() };
		broadcast(&room.recipient_sessions(), &frame, Some(session.conn_id));

		drop(guard);
		Ok(shape)
	}

	/// Persist and fan out a shape deletion; same durability-before-broadcast
	/// rule as `create_shape`.
	pub async fn delete_shape(
		&self,
		session: &Arc<Session>,
		room_id: RoomId,
		shape_id: ShapeId,
	) -> Result<ShapeId, RoomError> {
		let guard = self.lock_room(&room_id).await;

		let Some(room) = guard.room.as_ref() else {
			self.release(&room_id, guard).await;
			return Err(RoomError::NotAMember);
		};
		if room.member_index(&session.user_id).is_none() {
			drop(guard);
			return Err(RoomError::NotAMember);
		}

		if let Err(e) = self.events.remove(&room_id, &shape_id).await {
			warn!(room = %room_id, shape = %shape_id, error = %e, "shape delete failed; broadcast suppressed");
			drop(guard);
			return Err(e.into());
		}

		let frame = ServerFrame::DeleteShape {
			shape_id: shape_id.clone(),
		};
		broadcast(&room.recipient_sessions(), &frame, Some(session.conn_id));

		drop(guard);
		Ok(shape_id)
	}

	/// Snapshot for tests and diagnostics: `(admin, member ids in join order)`.
	pub async fn room_snapshot(&self, room_id: &RoomId) -> Option<(UserId, Vec<UserId>)> {
		let guard = self.lock_room(room_id).await;
		let snapshot = guard
			.room
			.as_ref()
			.map(|room| (room.admin.clone(), room.members.iter().map(|m| m.user_id.clone()).collect()));
		self.release(room_id, guard).await;
		snapshot
	}

	/// Number of rooms currently held in the store.
	pub async fn active_rooms(&self) -> usize {
		let slots = self.slots.lock().await;
		slots.len()
	}
}

/// Turn replayed events back into wire shapes, preserving append order.
/// Rows whose payload no longer parses as a shape are skipped, not fatal.
fn replay_shapes(events: Vec<ShapeEvent>) -> Vec<Shape> {
	events
		.into_iter()
		.filter_map(|event| match serde_json::from_value::<Shape>(event.payload) {
			Ok(shape) => Some(shape),
			Err(e) => {
				warn!(shape = %event.shape_id, error = %e, "skipping unparseable replay payload");
				None
			}
		})
		.collect()
}
