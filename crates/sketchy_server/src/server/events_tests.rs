#![forbid(unsafe_code)]

use sketchy_domain::{EventKind, RoomId, ShapeEvent, ShapeId, UserId};

use crate::server::events::{EventStore, InMemoryEventStore, SqliteEventStore};

fn room(id: &str) -> RoomId {
	RoomId::new(id).expect("valid RoomId")
}

fn create_event(room_id: &str, shape_id: &str, received_at: i64) -> ShapeEvent {
	ShapeEvent::create(
		ShapeId::new(shape_id).expect("valid ShapeId"),
		room(room_id),
		UserId::new("alice").expect("valid UserId"),
		serde_json::json!({ "id": shape_id, "type": "rectangle", "x": 1 }),
		received_at,
	)
}

#[tokio::test]
async fn memory_store_lists_creates_in_receipt_order() {
	let store = InMemoryEventStore::default();
	store.append(&create_event("r1", "s1", 10)).await.expect("append");
	store.append(&create_event("r1", "s2", 11)).await.expect("append");
	store.append(&create_event("r1", "s3", 12)).await.expect("append");

	let active = store.list_active(&room("r1")).await.expect("list");
	let ids: Vec<&str> = active.iter().map(|e| e.shape_id.as_str()).collect();
	assert_eq!(ids, vec!["s1", "s2", "s3"]);
	assert!(active.iter().all(|e| e.kind == EventKind::Create));
}

#[tokio::test]
async fn memory_store_remove_masks_the_create() {
	let store = InMemoryEventStore::default();
	store.append(&create_event("r1", "s1", 10)).await.expect("append");
	store.append(&create_event("r1", "s2", 11)).await.expect("append");
	store
		.remove(&room("r1"), &ShapeId::new("s1").unwrap())
		.await
		.expect("remove");

	let active = store.list_active(&room("r1")).await.expect("list");
	let ids: Vec<&str> = active.iter().map(|e| e.shape_id.as_str()).collect();
	assert_eq!(ids, vec!["s2"]);
}

#[tokio::test]
async fn memory_store_recreate_after_delete_is_active_again() {
	let store = InMemoryEventStore::default();
	store.append(&create_event("r1", "s1", 10)).await.expect("append");
	store
		.remove(&room("r1"), &ShapeId::new("s1").unwrap())
		.await
		.expect("remove");
	store.append(&create_event("r1", "s1", 12)).await.expect("append");

	let active = store.list_active(&room("r1")).await.expect("list");
	assert_eq!(active.len(), 1);
	assert_eq!(active[0].received_at, 12);
}

#[tokio::test]
async fn memory_store_rooms_are_isolated() {
	let store = InMemoryEventStore::default();
	store.append(&create_event("r1", "s1", 10)).await.expect("append");
	store.append(&create_event("r2", "s2", 11)).await.expect("append");

	let active = store.list_active(&room("r1")).await.expect("list");
	assert_eq!(active.len(), 1);
	assert_eq!(active[0].shape_id.as_str(), "s1");

	let active = store.list_active(&room("empty")).await.expect("list");
	assert!(active.is_empty());
}

async fn sqlite_store() -> SqliteEventStore {
	// A pooled in-memory sqlite gets a fresh database per connection; pin the
	// pool to one connection so every query sees the same database.
	let pool = sqlx::sqlite::SqlitePoolOptions::new()
		.max_connections(1)
		.connect("sqlite::memory:")
		.await
		.expect("connect");
	sqlx::migrate!("migrations/sqlite").run(&pool).await.expect("migrate");
	SqliteEventStore::new(pool)
}

#[tokio::test]
async fn sqlite_store_round_trips_events() {
	let store = sqlite_store().await;
	store.append(&create_event("r1", "s1", 10)).await.expect("append");
	store.append(&create_event("r1", "s2", 11)).await.expect("append");

	let active = store.list_active(&room("r1")).await.expect("list");
	assert_eq!(active.len(), 2);
	assert_eq!(active[0].shape_id.as_str(), "s1");
	assert_eq!(active[0].author.as_str(), "alice");
	assert_eq!(active[0].payload["type"], "rectangle");
	assert_eq!(active[1].received_at, 11);
}

#[tokio::test]
async fn sqlite_store_delete_and_recreate() {
	let store = sqlite_store().await;
	store.append(&create_event("r1", "s1", 10)).await.expect("append");
	store.append(&create_event("r1", "s2", 11)).await.expect("append");
	store
		.remove(&room("r1"), &ShapeId::new("s1").unwrap())
		.await
		.expect("remove");

	let active = store.list_active(&room("r1")).await.expect("list");
	let ids: Vec<&str> = active.iter().map(|e| e.shape_id.as_str()).collect();
	assert_eq!(ids, vec!["s2"]);

	// A later create with the same id is not masked by the older delete.
	store.append(&create_event("r1", "s1", 13)).await.expect("append");
	let active = store.list_active(&room("r1")).await.expect("list");
	let ids: Vec<&str> = active.iter().map(|e| e.shape_id.as_str()).collect();
	assert_eq!(ids, vec!["s2", "s1"]);
}
