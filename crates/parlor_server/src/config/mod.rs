#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use parlor_domain::{DEFAULT_ROOM, DEFAULT_ROOMS, RoomName};
use serde::Deserialize;
use tracing::{info, warn};

/// Default config path: `~/.parlor/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".parlor").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Server config.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub broker: BrokerSettings,
	pub persistence: PersistenceSettings,
}

/// Transport and side-endpoint settings.
#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// PEM-encoded certificate path for QUIC/TLS.
	pub tls_cert_path: Option<PathBuf>,
	/// PEM-encoded private key path for QUIC/TLS.
	pub tls_key_path: Option<PathBuf>,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
}

/// Room broker tuning.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
	/// Rooms bootstrapped at startup. Always includes the built-in defaults.
	pub default_rooms: Vec<RoomName>,
	/// Fallback room for messages sent outside any room.
	pub default_room: RoomName,
	/// Joining an unknown room creates it (non-persistent, public).
	pub auto_create_rooms: bool,
	/// Per-room in-memory ring buffer size.
	pub history_capacity: usize,
	/// Persisted messages replayed on join.
	pub persisted_history_limit: usize,
	/// Persisted messages kept per room.
	pub store_capacity: usize,
	/// Client-facing message length cap, in characters.
	pub max_message_chars: usize,
	pub typing_timeout: Duration,
	/// Upper bound on every store call made on the message path.
	pub persist_timeout: Duration,
	/// Per-connection outbound queue size.
	pub outbox_capacity: usize,
	pub debug_logs: bool,
}

impl Default for BrokerSettings {
	fn default() -> Self {
		Self {
			default_rooms: builtin_rooms(),
			default_room: RoomName::default_room(),
			auto_create_rooms: true,
			history_capacity: 100,
			persisted_history_limit: 50,
			store_capacity: 1000,
			max_message_chars: 200,
			typing_timeout: Duration::from_millis(3000),
			persist_timeout: Duration::from_millis(2000),
			outbox_capacity: 256,
			debug_logs: false,
		}
	}
}

fn builtin_rooms() -> Vec<RoomName> {
	DEFAULT_ROOMS.iter().filter_map(|r| RoomName::new(r).ok()).collect()
}

/// Persistence settings loaded by the server.
#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// Enable persistence.
	pub enabled: bool,
	/// Database URL (`sqlite:`, `postgres:` or `memory:`).
	pub database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	broker: FileBrokerSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	tls_cert_path: Option<String>,
	tls_key_path: Option<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileBrokerSettings {
	default_rooms: Option<Vec<String>>,
	default_room: Option<String>,
	auto_create_rooms: Option<bool>,
	history_capacity: Option<usize>,
	persisted_history_limit: Option<usize>,
	store_capacity: Option<usize>,
	max_message_chars: Option<usize>,
	typing_timeout_ms: Option<u64>,
	persist_timeout_ms: Option<u64>,
	outbox_capacity: Option<usize>,
	debug_logs: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	enabled: Option<bool>,
	database_url: Option<String>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = BrokerSettings::default();

		let mut default_rooms = builtin_rooms();
		for name in file.broker.default_rooms.unwrap_or_default() {
			match RoomName::new(&name) {
				Ok(room) if !default_rooms.contains(&room) => default_rooms.push(room),
				Ok(_) => {}
				Err(e) => warn!(error = %e, room = %name, "broker config: ignoring invalid default room"),
			}
		}

		let default_room = match file.broker.default_room.filter(|s| !s.trim().is_empty()) {
			Some(name) => match RoomName::new(&name) {
				Ok(room) => room,
				Err(e) => {
					warn!(error = %e, room = %name, fallback = DEFAULT_ROOM, "broker config: invalid default_room");
					RoomName::default_room()
				}
			},
			None => RoomName::default_room(),
		};
		if !default_rooms.contains(&default_room) {
			default_rooms.push(default_room.clone());
		}

		Self {
			server: ServerSettings {
				tls_cert_path: file.server.tls_cert_path.filter(|s| !s.trim().is_empty()).map(PathBuf::from),
				tls_key_path: file.server.tls_key_path.filter(|s| !s.trim().is_empty()).map(PathBuf::from),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
			},
			broker: BrokerSettings {
				default_rooms,
				default_room,
				auto_create_rooms: file.broker.auto_create_rooms.unwrap_or(defaults.auto_create_rooms),
				history_capacity: file.broker.history_capacity.unwrap_or(defaults.history_capacity),
				persisted_history_limit: file
					.broker
					.persisted_history_limit
					.unwrap_or(defaults.persisted_history_limit),
				store_capacity: file
					.broker
					.store_capacity
					.filter(|v| *v > 0)
					.unwrap_or(defaults.store_capacity),
				max_message_chars: file
					.broker
					.max_message_chars
					.filter(|v| *v > 0)
					.unwrap_or(defaults.max_message_chars),
				typing_timeout: file
					.broker
					.typing_timeout_ms
					.filter(|v| *v > 0)
					.map(Duration::from_millis)
					.unwrap_or(defaults.typing_timeout),
				persist_timeout: file
					.broker
					.persist_timeout_ms
					.filter(|v| *v > 0)
					.map(Duration::from_millis)
					.unwrap_or(defaults.persist_timeout),
				outbox_capacity: file
					.broker
					.outbox_capacity
					.filter(|v| *v > 0)
					.unwrap_or(defaults.outbox_capacity),
				debug_logs: file.broker.debug_logs.unwrap_or(false),
			},
			persistence: PersistenceSettings {
				enabled: file.persistence.enabled.unwrap_or(false),
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
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
	if let Ok(v) = std::env::var("PARLOR_SERVER_TLS_CERT") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.tls_cert_path = Some(PathBuf::from(v));
			info!("server config: tls_cert_path overridden by env");
		}
	}

	if let Ok(v) = std::env::var("PARLOR_SERVER_TLS_KEY") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.tls_key_path = Some(PathBuf::from(v));
			info!("server config: tls_key_path overridden by env");
		}
	}

	if let Ok(v) = std::env::var("PARLOR_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("PARLOR_HEALTH_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.health_bind = Some(v);
			info!("server config: health_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("PARLOR_AUTO_CREATE_ROOMS")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.broker.auto_create_rooms = enabled;
		info!(enabled, "broker config: auto_create_rooms overridden by env");
	}

	if let Ok(v) = std::env::var("PARLOR_HISTORY_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
	{
		cfg.broker.history_capacity = capacity;
		info!(capacity, "broker config: history_capacity overridden by env");
	}

	if let Ok(v) = std::env::var("PARLOR_STORE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
		&& capacity > 0
	{
		cfg.broker.store_capacity = capacity;
		info!(capacity, "broker config: store_capacity overridden by env");
	}

	if let Ok(v) = std::env::var("PARLOR_MAX_MESSAGE_CHARS")
		&& let Ok(max) = v.trim().parse::<usize>()
		&& max > 0
	{
		cfg.broker.max_message_chars = max;
		info!(max, "broker config: max_message_chars overridden by env");
	}

	if let Ok(v) = std::env::var("PARLOR_TYPING_TIMEOUT_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
		&& ms > 0
	{
		cfg.broker.typing_timeout = Duration::from_millis(ms);
		info!(ms, "broker config: typing_timeout overridden by env");
	}

	if let Ok(v) = std::env::var("PARLOR_PERSIST_TIMEOUT_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
		&& ms > 0
	{
		cfg.broker.persist_timeout = Duration::from_millis(ms);
		info!(ms, "broker config: persist_timeout overridden by env");
	}

	if let Ok(v) = std::env::var("PARLOR_BROKER_DEBUG_LOGS")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.broker.debug_logs = enabled;
		info!(enabled, "broker config: debug_logs overridden by env");
	}

	if let Ok(v) = std::env::var("PARLOR_PERSISTENCE_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.persistence.enabled = enabled;
		info!(enabled, "persistence: enabled overridden by env");
	}

	if let Ok(v) = std::env::var("PARLOR_PERSISTENCE_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.persistence.database_url = Some(v);
			info!("persistence: database_url overridden by env");
		}
	}

	if cfg.persistence.enabled && cfg.persistence.database_url.is_none() {
		warn!("persistence: enabled without database_url; startup will fail");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(s: &str) -> ServerConfig {
		ServerConfig::from_file(toml::from_str(s).expect("toml"))
	}

	#[test]
	fn empty_file_yields_defaults() {
		let cfg = parse("");
		assert_eq!(cfg.broker.default_room.as_str(), "global");
		assert_eq!(
			cfg.broker.default_rooms.iter().map(RoomName::as_str).collect::<Vec<_>>(),
			["global", "general", "random"]
		);
		assert_eq!(cfg.broker.history_capacity, 100);
		assert_eq!(cfg.broker.persisted_history_limit, 50);
		assert_eq!(cfg.broker.store_capacity, 1000);
		assert_eq!(cfg.broker.max_message_chars, 200);
		assert_eq!(cfg.broker.typing_timeout, Duration::from_secs(3));
		assert!(cfg.broker.auto_create_rooms);
		assert!(!cfg.persistence.enabled);
	}

	#[test]
	fn broker_section_overrides_defaults() {
		let cfg = parse(
			r#"
			[broker]
			default_rooms = ["lobby", "  ", "global"]
			auto_create_rooms = false
			history_capacity = 10
			typing_timeout_ms = 500

			[persistence]
			enabled = true
			database_url = "memory:"
			"#,
		);

		let rooms: Vec<_> = cfg.broker.default_rooms.iter().map(RoomName::as_str).collect();
		assert_eq!(rooms, ["global", "general", "random", "lobby"]);
		assert!(!cfg.broker.auto_create_rooms);
		assert_eq!(cfg.broker.history_capacity, 10);
		assert_eq!(cfg.broker.typing_timeout, Duration::from_millis(500));
		assert!(cfg.persistence.enabled);
		assert_eq!(cfg.persistence.database_url.as_deref(), Some("memory:"));
	}

	#[test]
	fn blank_strings_are_treated_as_unset() {
		let cfg = parse(
			r#"
			[server]
			health_bind = "   "
			[persistence]
			database_url = ""
			"#,
		);
		assert!(cfg.server.health_bind.is_none());
		assert!(cfg.persistence.database_url.is_none());
	}

	#[test]
	fn env_bool_parsing() {
		assert_eq!(parse_env_bool(" YES "), Some(true));
		assert_eq!(parse_env_bool("off"), Some(false));
		assert_eq!(parse_env_bool("maybe"), None);
	}
}
