#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use futures::{SinkExt, StreamExt};
use sketchy_domain::{RoomId, SecretString};
use sketchy_protocol::{ClientFrame, ServerFrame, decode_client_frame, encode_server_frame};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

use crate::server::auth::{Identity, authenticate};
use crate::server::registry::{Session, SessionRegistry};
use crate::server::rooms::RoomManager;

/// Per-connection settings, shared by every accepted socket.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub auth_hmac_secret: SecretString,

	/// Grace period for the WebSocket handshake plus token verification; a
	/// connection that has not authenticated within it is closed.
	pub handshake_timeout: Duration,

	/// Capacity of the per-connection outbox queue.
	pub outbox_capacity: usize,
}

impl ConnectionSettings {
	pub fn new(auth_hmac_secret: SecretString) -> Self {
		Self {
			auth_hmac_secret,
			handshake_timeout: Duration::from_secs(10),
			outbox_capacity: 256,
		}
	}
}

struct Established {
	ws: WebSocketStream<TcpStream>,
	identity: Identity,
	requested_room: RoomId,
}

/// Handle one client connection end to end: handshake, authentication,
/// frame dispatch in arrival order, implicit leave on close.
pub async fn handle_connection(
	conn_id: u64,
	stream: TcpStream,
	registry: Arc<SessionRegistry>,
	rooms: Arc<RoomManager>,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("sketchy_server_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("sketchy_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let established = match timeout(settings.handshake_timeout, establish(conn_id, stream, &settings)).await {
		Ok(Ok(Some(est))) => est,
		Ok(Ok(None)) => return Ok(()), // rejected with a policy close
		Ok(Err(e)) => return Err(e),
		Err(_) => {
			warn!(conn_id, "connection closed: handshake grace period elapsed");
			return Ok(());
		}
	};

	let Established {
		mut ws,
		identity,
		requested_room,
	} = established;

	let (outbox_tx, mut outbox_rx) = mpsc::channel::<ServerFrame>(settings.outbox_capacity);
	let session = Arc::new(Session::new(
		conn_id,
		identity.user_id,
		identity.display_name,
		outbox_tx,
	));
	registry.register(Arc::clone(&session));

	info!(
		conn_id,
		user = %session.user_id,
		name = %session.display_name,
		room = %requested_room,
		"session established"
	);

	loop {
		tokio::select! {
			outbound = outbox_rx.recv() => {
				// The registry holds the sender for this session's lifetime,
				// so recv() yielding None only happens at shutdown.
				let Some(frame) = outbound else { break };
				match encode_server_frame(&frame) {
					Ok(text) => {
						if ws.send(Message::text(text)).await.is_err() {
							break;
						}
					}
					Err(e) => warn!(conn_id, error = %e, "dropping unencodable frame"),
				}
			}
			inbound = ws.next() => {
				let Some(msg) = inbound else { break };
				let msg = match msg {
					Ok(msg) => msg,
					Err(e) => {
						debug!(conn_id, error = %e, "websocket read failed");
						break;
					}
				};

				match msg {
					Message::Text(text) => {
						metrics::counter!("sketchy_server_frames_in_total").increment(1);
						dispatch_frame(&session, &rooms, text.as_str()).await;
					}
					Message::Ping(payload) => {
						let _ = ws.send(Message::Pong(payload)).await;
					}
					Message::Pong(_) => {}
					Message::Binary(_) => {
						session.reply(ServerFrame::Error {
							message: "binary frames are not supported".to_string(),
						});
					}
					Message::Close(_) => break,
					Message::Frame(_) => {}
				}
			}
		}
	}

	registry.unregister(conn_id);
	rooms.leave_current(&session).await;
	info!(conn_id, user = %session.user_id, "session closed");

	Ok(())
}

/// Parse one inbound frame and route it to the matching room handler.
///
/// Dispatch is synchronous with respect to frame arrival order on this
/// connection; every failure is answered to the sender only, and none closes
/// the connection.
async fn dispatch_frame(session: &Arc<Session>, rooms: &Arc<RoomManager>, text: &str) {
	let frame = match decode_client_frame(text) {
		Ok(frame) => frame,
		Err(e) => {
			debug!(conn_id = session.conn_id, error = %e, "rejecting inbound frame");
			session.reply(ServerFrame::Error { message: e.to_string() });
			return;
		}
	};

	match frame {
		ClientFrame::JoinRoom { room_id } => match rooms.join(session, room_id).await {
			Ok(outcome) => {
				session.reply(ServerFrame::RoomJoined {
					room_id: outcome.room_id.clone(),
					message: format!("Joined room {}", outcome.room_id),
				});
				session.reply(ServerFrame::LoadShapes { shapes: outcome.replay });
			}
			Err(e) => {
				session.reply(ServerFrame::Error { message: e.to_string() });
			}
		},
		ClientFrame::LeaveRoom { room_id } => {
			let outcome = rooms.leave(session, room_id).await;
			session.reply(ServerFrame::RoomLeaved {
				room_id: outcome.room_id.clone(),
				message: format!("Left room {}", outcome.room_id),
			});
		}
		ClientFrame::CreateShape { room_id, shape } => match rooms.create_shape(session, room_id, shape).await {
			Ok(shape) => {
				session.reply(ServerFrame::NewShape { shape });
			}
			Err(e) => {
				session.reply(ServerFrame::Error { message: e.to_string() });
			}
		},
		ClientFrame::DeleteShape { room_id, shape_id } => match rooms.delete_shape(session, room_id, shape_id).await {
			Ok(shape_id) => {
				session.reply(ServerFrame::DeleteShape { shape_id });
			}
			Err(e) => {
				session.reply(ServerFrame::Error { message: e.to_string() });
			}
		},
	}
}

/// Accept the WebSocket handshake and authenticate the connection.
///
/// Both the `token` and `room` query parameters must be present and the
/// token must verify; otherwise the socket is closed with a policy-violation
/// status before any frame exchange and `Ok(None)` is returned.
async fn establish(
	conn_id: u64,
	stream: TcpStream,
	settings: &ConnectionSettings,
) -> anyhow::Result<Option<Established>> {
	let mut query: Option<String> = None;
	let capture_query = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
		query = req.uri().query().map(str::to_string);
		Ok(resp)
	};

	let mut ws = tokio_tungstenite::accept_hdr_async(stream, capture_query)
		.await
		.context("websocket handshake")?;

	let mut token: Option<String> = None;
	let mut room: Option<String> = None;
	if let Some(query) = query.as_deref() {
		for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
			match key.as_ref() {
				"token" => token = Some(value.into_owned()),
				"room" => room = Some(value.into_owned()),
				_ => {}
			}
		}
	}

	let (Some(token), Some(room)) = (token, room) else {
		warn!(conn_id, "rejecting connection: missing token or room query parameter");
		policy_close(&mut ws, "token and room query parameters are required").await;
		return Ok(None);
	};

	let Ok(requested_room) = RoomId::new(room) else {
		warn!(conn_id, "rejecting connection: empty room query parameter");
		policy_close(&mut ws, "token and room query parameters are required").await;
		return Ok(None);
	};

	let identity = match authenticate(&token, &settings.auth_hmac_secret) {
		Ok(identity) => identity,
		Err(e) => {
			warn!(conn_id, error = %e, "rejecting connection: auth failed");
			metrics::counter!("sketchy_server_auth_rejected_total").increment(1);
			policy_close(&mut ws, "authentication failed").await;
			return Ok(None);
		}
	};

	Ok(Some(Established {
		ws,
		identity,
		requested_room,
	}))
}

async fn policy_close(ws: &mut WebSocketStream<TcpStream>, reason: &'static str) {
	let frame = CloseFrame {
		code: CloseCode::Policy,
		reason: reason.into(),
	};
	let _ = ws.close(Some(frame)).await;
}
