#![forbid(unsafe_code)]

use std::sync::Arc;

use sketchy_protocol::ServerFrame;
use tokio::sync::mpsc;
use tracing::debug;

use crate::server::registry::Session;

/// Fans one frame out to every given session except the excluded connection.
///
/// Delivery is best-effort per connection: a full or closed outbox is
/// counted and skipped, it never aborts delivery to other peers and never
/// fails the triggering request.
pub fn broadcast(recipients: &[Arc<Session>], frame: &ServerFrame, exclude_conn: Option<u64>) -> usize {
	let mut delivered = 0usize;
	let mut dropped = 0usize;

	for session in recipients {
		if exclude_conn == Some(session.conn_id) {
			continue;
		}

		match session.outbox.try_send(frame.clone()) {
			Ok(()) => delivered += 1,
			Err(mpsc::error::TrySendError::Full(_)) => {
				dropped += 1;
				metrics::counter!("sketchy_server_broadcast_dropped_total").increment(1);
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {
				// Dead connection; unregister will reap it shortly.
			}
		}
	}

	if dropped > 0 {
		debug!(dropped, "broadcast dropped frames due to full subscriber queues");
	}

	delivered
}
