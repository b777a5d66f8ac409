use sketchy_domain::{RoomId, ShapeId, UserId};
use sketchy_protocol::{
	ClientFrame, FrameError, MAX_FRAME_BYTES, Participant, ServerFrame, Shape, decode_client_frame, encode_server_frame,
};

fn shape(id: &str) -> Shape {
	let mut attrs = serde_json::Map::new();
	attrs.insert("type".to_string(), serde_json::json!("rectangle"));
	attrs.insert("x".to_string(), serde_json::json!(10));
	attrs.insert("y".to_string(), serde_json::json!(20));
	attrs.insert("color".to_string(), serde_json::json!("#ff0000"));
	Shape::new(ShapeId::new(id).expect("valid ShapeId"), attrs)
}

#[test]
fn decodes_join_room() {
	let frame = decode_client_frame(r#"{"type":"JOIN_ROOM","roomId":"r1"}"#).expect("decode");
	assert_eq!(
		frame,
		ClientFrame::JoinRoom {
			room_id: RoomId::new("r1").unwrap(),
		}
	);
}

#[test]
fn decodes_create_shape_with_opaque_attrs() {
	let text = r#"{"type":"CREATE_SHAPE","roomId":"r1","shape":{"id":"s1","type":"ellipse","x":1,"y":2,"strokeWidth":3}}"#;
	let frame = decode_client_frame(text).expect("decode");

	match frame {
		ClientFrame::CreateShape { room_id, shape } => {
			assert_eq!(room_id.as_str(), "r1");
			assert_eq!(shape.id.as_str(), "s1");
			assert_eq!(shape.attrs.get("type"), Some(&serde_json::json!("ellipse")));
			assert_eq!(shape.attrs.get("strokeWidth"), Some(&serde_json::json!(3)));
		}
		other => panic!("expected CreateShape, got: {other:?}"),
	}
}

#[test]
fn decodes_delete_shape() {
	let frame = decode_client_frame(r#"{"type":"DELETE_SHAPE","roomId":"r1","shapeId":"s9"}"#).expect("decode");
	assert_eq!(
		frame,
		ClientFrame::DeleteShape {
			room_id: RoomId::new("r1").unwrap(),
			shape_id: ShapeId::new("s9").unwrap(),
		}
	);
}

#[test]
fn rejects_unknown_kind() {
	let err = decode_client_frame(r#"{"type":"SPIN_ROOM","roomId":"r1"}"#).expect_err("must fail");
	assert!(matches!(err, FrameError::Malformed(_)));
}

#[test]
fn rejects_non_json() {
	let err = decode_client_frame("Hii ").expect_err("must fail");
	assert!(matches!(err, FrameError::Malformed(_)));
}

#[test]
fn rejects_oversized_frame() {
	let blob = "x".repeat(MAX_FRAME_BYTES + 1);
	let err = decode_client_frame(&blob).expect_err("must fail");
	match err {
		FrameError::FrameTooLarge { len, max } => {
			assert_eq!(len, MAX_FRAME_BYTES + 1);
			assert_eq!(max, MAX_FRAME_BYTES);
		}
		other => panic!("expected FrameTooLarge, got: {other:?}"),
	}
}

#[test]
fn encodes_server_frames_with_wire_tags() {
	let text = encode_server_frame(&ServerFrame::RoomJoined {
		room_id: RoomId::new("r1").unwrap(),
		message: "Joined room r1".to_string(),
	})
	.expect("encode");
	let value: serde_json::Value = serde_json::from_str(&text).unwrap();
	assert_eq!(value["type"], "ROOM_JOINED");
	assert_eq!(value["roomId"], "r1");

	let text = encode_server_frame(&ServerFrame::UserLeft {
		user_id: UserId::new("u1").unwrap(),
		user_name: "Ada".to_string(),
		participants: vec![Participant {
			user_id: UserId::new("u2").unwrap(),
			user_name: "Grace".to_string(),
		}],
	})
	.expect("encode");
	let value: serde_json::Value = serde_json::from_str(&text).unwrap();
	assert_eq!(value["type"], "USER_LEFT");
	assert_eq!(value["userName"], "Ada");
	assert_eq!(value["participants"][0]["userId"], "u2");
}

#[test]
fn new_shape_round_trips_attrs_flattened() {
	let frame = ServerFrame::NewShape { shape: shape("s1") };
	let text = encode_server_frame(&frame).expect("encode");
	let value: serde_json::Value = serde_json::from_str(&text).unwrap();

	assert_eq!(value["type"], "NEW_SHAPE");
	assert_eq!(value["shape"]["id"], "s1");
	// Attrs are flattened next to the id, not nested under a payload key.
	assert_eq!(value["shape"]["color"], "#ff0000");

	let back: ServerFrame = serde_json::from_str(&text).unwrap();
	assert_eq!(back, frame);
}

#[test]
fn load_shapes_preserves_order() {
	let frame = ServerFrame::LoadShapes {
		shapes: vec![shape("s1"), shape("s2"), shape("s3")],
	};
	let text = encode_server_frame(&frame).expect("encode");
	let value: serde_json::Value = serde_json::from_str(&text).unwrap();
	let ids: Vec<&str> = value["shapes"]
		.as_array()
		.unwrap()
		.iter()
		.map(|s| s["id"].as_str().unwrap())
		.collect();
	assert_eq!(ids, vec!["s1", "s2", "s3"]);
}
