#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use sketchy_domain::{RoomId, SecretString};
use tracing::info;

/// Default config path: `~/.sketchy/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".sketchy").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config() -> anyhow::Result<ServerConfig> {
	let path = default_config_path()?;
	load_server_config_from_path(&path)
}

/// Same as `load_server_config` but with an explicit config path.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub persistence: PersistenceSettings,
	pub directory: DirectorySettings,
}

/// Server settings loaded by the server.
#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// HMAC secret for bearer tokens. Required; connections cannot
	/// authenticate without it.
	pub auth_hmac_secret: Option<SecretString>,
	/// Grace period for handshake plus token verification.
	pub handshake_timeout: Duration,
	/// Per-connection outbox queue capacity.
	pub outbox_capacity: usize,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			auth_hmac_secret: None,
			handshake_timeout: Duration::from_secs(10),
			outbox_capacity: 256,
			metrics_bind: None,
		}
	}
}

/// Persistence settings for the shape event log.
#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// Persist shape events to the database; in-memory log otherwise.
	pub enabled: bool,
	/// Sqlite database URL (`sqlite:...`).
	pub database_url: Option<String>,
}

/// Room directory settings.
#[derive(Debug, Clone, Default)]
pub struct DirectorySettings {
	/// Allow-list of room ids for running without a database. Ignored when
	/// persistence is enabled (the directory then reads the `rooms` table).
	pub static_rooms: Vec<RoomId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,

	#[serde(default)]
	directory: FileDirectorySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	auth_hmac_secret: Option<String>,
	handshake_timeout_secs: Option<u64>,
	outbox_capacity: Option<usize>,
	metrics_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	enabled: Option<bool>,
	database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileDirectorySettings {
	#[serde(default)]
	static_rooms: Vec<String>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let static_rooms = file
			.directory
			.static_rooms
			.into_iter()
			.filter_map(|s| RoomId::new(s).ok())
			.collect();

		Self {
			server: ServerSettings {
				auth_hmac_secret: file
					.server
					.auth_hmac_secret
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				handshake_timeout: Duration::from_secs(file.server.handshake_timeout_secs.unwrap_or(10)),
				outbox_capacity: file.server.outbox_capacity.filter(|c| *c > 0).unwrap_or(256),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
			},
			persistence: PersistenceSettings {
				enabled: file.persistence.enabled.unwrap_or(false),
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
			directory: DirectorySettings { static_rooms },
		}
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Ok(v) = std::env::var("SKETCHY_AUTH_HMAC_SECRET") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.auth_hmac_secret = Some(SecretString::new(v));
			info!("server config: auth_hmac_secret overridden by env");
		}
	}

	if let Ok(v) = std::env::var("SKETCHY_HANDSHAKE_TIMEOUT_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
	{
		cfg.server.handshake_timeout = Duration::from_secs(secs);
		info!(secs, "server config: handshake_timeout overridden by env");
	}

	if let Ok(v) = std::env::var("SKETCHY_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("SKETCHY_PERSISTENCE_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.persistence.enabled = enabled;
		info!(enabled, "persistence: enabled overridden by env");
	}

	if let Ok(v) = std::env::var("SKETCHY_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.persistence.database_url = Some(v);
			info!("persistence: database_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("SKETCHY_STATIC_ROOMS") {
		let rooms: Vec<RoomId> = v.split(',').filter_map(|s| RoomId::new(s.trim()).ok()).collect();
		if !rooms.is_empty() {
			info!(count = rooms.len(), "directory: static_rooms overridden by env");
			cfg.directory.static_rooms = rooms;
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_when_file_missing() {
		let cfg = ServerConfig::from_file(FileConfig::default());
		assert!(cfg.server.auth_hmac_secret.is_none());
		assert_eq!(cfg.server.handshake_timeout, Duration::from_secs(10));
		assert_eq!(cfg.server.outbox_capacity, 256);
		assert!(!cfg.persistence.enabled);
	}

	#[test]
	fn parses_full_toml() {
		let file: FileConfig = toml::from_str(
			r#"
[server]
auth_hmac_secret = "s3cret"
handshake_timeout_secs = 3
outbox_capacity = 64
metrics_bind = "127.0.0.1:9100"

[persistence]
enabled = true
database_url = "sqlite::memory:"

[directory]
static_rooms = ["r1", "r2", "  "]
"#,
		)
		.expect("valid toml");

		let cfg = ServerConfig::from_file(file);
		assert_eq!(
			cfg.server.auth_hmac_secret.as_ref().map(|s| s.expose()),
			Some("s3cret")
		);
		assert_eq!(cfg.server.handshake_timeout, Duration::from_secs(3));
		assert_eq!(cfg.server.outbox_capacity, 64);
		assert_eq!(cfg.server.metrics_bind.as_deref(), Some("127.0.0.1:9100"));
		assert!(cfg.persistence.enabled);
		assert_eq!(cfg.persistence.database_url.as_deref(), Some("sqlite::memory:"));
		// Blank entries are dropped during normalization.
		assert_eq!(cfg.directory.static_rooms.len(), 2);
	}

	#[test]
	fn blank_secret_is_dropped() {
		let file: FileConfig = toml::from_str("[server]\nauth_hmac_secret = \"   \"\n").expect("valid toml");
		let cfg = ServerConfig::from_file(file);
		assert!(cfg.server.auth_hmac_secret.is_none());
	}
}
