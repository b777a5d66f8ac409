#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use sketchy_server::config;
use sketchy_server::server::connection::{ConnectionSettings, handle_connection};
use sketchy_server::server::directory::{RoomDirectory, SqliteRoomDirectory, StaticRoomDirectory};
use sketchy_server::server::events::{EventStore, InMemoryEventStore, SqliteEventStore};
use sketchy_server::server::registry::SessionRegistry;
use sketchy_server::server::rooms::RoomManager;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: sketchy_server [--bind host:port]\n\
\n\
Options:\n\
\t--bind    Bind address (default: 127.0.0.1:8080)\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> SocketAddr {
	let mut bind = "127.0.0.1:8080".to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected host:port)");
					usage_and_exit();
				}
				bind = v;
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	bind.parse::<SocketAddr>().unwrap_or_else(|e| {
		eprintln!("invalid bind address {bind}: {e}");
		usage_and_exit();
	})
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sketchy_server=debug".to_string());

	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false))
		.init();
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let bind_addr = parse_args();

	let config_path = config::default_config_path()?;
	let server_cfg = config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let Some(auth_hmac_secret) = server_cfg.server.auth_hmac_secret.clone() else {
		return Err(anyhow::anyhow!(
			"no auth_hmac_secret configured (set [server].auth_hmac_secret or SKETCHY_AUTH_HMAC_SECRET)"
		));
	};

	let (directory, events): (Arc<dyn RoomDirectory>, Arc<dyn EventStore>) = if server_cfg.persistence.enabled {
		let Some(database_url) = server_cfg.persistence.database_url.as_deref() else {
			return Err(anyhow::anyhow!("persistence enabled but no database_url configured"));
		};

		let pool = sqlx::SqlitePool::connect(database_url).await.context("connect sqlite")?;
		sqlx::migrate!("migrations/sqlite")
			.run(&pool)
			.await
			.context("run sqlite migrations")?;
		info!(%database_url, "persistence enabled (sqlite)");

		(
			Arc::new(SqliteRoomDirectory::new(pool.clone())),
			Arc::new(SqliteEventStore::new(pool)),
		)
	} else {
		if server_cfg.directory.static_rooms.is_empty() {
			warn!("persistence disabled and no static rooms configured; every join will fail");
		}
		info!(
			rooms = server_cfg.directory.static_rooms.len(),
			"persistence disabled; in-memory event log and static room directory"
		);

		(
			Arc::new(StaticRoomDirectory::new(server_cfg.directory.static_rooms.clone())),
			Arc::new(InMemoryEventStore::default()),
		)
	};

	let registry = Arc::new(SessionRegistry::new());
	let rooms = Arc::new(RoomManager::new(directory, events));

	let mut conn_settings = ConnectionSettings::new(auth_hmac_secret);
	conn_settings.handshake_timeout = server_cfg.server.handshake_timeout;
	conn_settings.outbox_capacity = server_cfg.server.outbox_capacity;

	let listener = tokio::net::TcpListener::bind(bind_addr)
		.await
		.with_context(|| format!("bind {bind_addr}"))?;
	info!(bind = %bind_addr, "sketchy_server: websocket endpoint ready");

	let mut next_conn_id: u64 = 1;

	loop {
		let (stream, remote) = match listener.accept().await {
			Ok(accepted) => accepted,
			Err(e) => {
				warn!(error = %e, "accept failed");
				continue;
			}
		};

		let conn_id = next_conn_id;
		next_conn_id += 1;
		metrics::counter!("sketchy_server_connections_total").increment(1);
		info!(conn_id, remote = %remote, "accepted connection");

		let registry = Arc::clone(&registry);
		let rooms = Arc::clone(&rooms);
		let conn_settings = conn_settings.clone();

		tokio::spawn(async move {
			if let Err(e) = handle_connection(conn_id, stream, registry, rooms, conn_settings).await {
				warn!(conn_id, error = %e, "connection handler exited with error");
			}
		});
	}
}
