#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tickbridge_twitch::{BridgeConfig, SecretString};
use tracing::{info, warn};

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Default config path: `<config dir>/tickbridge/config.toml`.
pub fn default_config_path() -> PathBuf {
	tickbridge_twitch::config::default_storage_dir().join("config.toml")
}

/// Load the host config from TOML and process env overrides.
pub fn load_host_config_from_path(path: &Path) -> anyhow::Result<HostConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = HostConfig::from_file(file_cfg);
	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct HostConfig {
	pub twitch: TwitchSettings,
	pub host: HostSettings,
}

#[derive(Debug, Clone)]
pub struct HostSettings {
	/// How often the tick consumer drains the queue.
	pub tick_interval: Duration,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
}

impl Default for HostSettings {
	fn default() -> Self {
		Self {
			tick_interval: DEFAULT_TICK_INTERVAL,
			metrics_bind: None,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct TwitchSettings {
	/// Twitch App Client ID.
	pub client_id: Option<String>,
	/// Twitch App Client Secret.
	pub client_secret: Option<SecretString>,
	pub redirect_uri: Option<String>,

	/// Persist the token pair between runs (default on).
	pub store_token: Option<bool>,
	pub storage_dir: Option<PathBuf>,

	/// Use the local mock EventSub server.
	pub use_debug_ws: bool,
	pub eventsub_ws_url: Option<String>,
	pub debug_ws_url: Option<String>,

	/// Reconnect backoff min/max (optional).
	pub reconnect_min_delay: Option<Duration>,
	pub reconnect_max_delay: Option<Duration>,
	/// Consecutive failures before giving up; `Some(0)` retries forever.
	pub max_reconnect_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	twitch: FileTwitchSettings,

	#[serde(default)]
	host: FileHostSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileHostSettings {
	tick_interval_ms: Option<u64>,
	metrics_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileTwitchSettings {
	client_id: Option<String>,
	client_secret: Option<String>,
	redirect_uri: Option<String>,
	store_token: Option<bool>,
	storage_dir: Option<String>,
	use_debug_ws: Option<bool>,
	eventsub_ws_url: Option<String>,
	debug_ws_url: Option<String>,

	reconnect_min_delay_ms: Option<u64>,
	reconnect_max_delay_ms: Option<u64>,
	max_reconnect_attempts: Option<u32>,
}

fn non_blank(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl HostConfig {
	fn from_file(file: FileConfig) -> Self {
		let twitch = TwitchSettings {
			client_id: non_blank(file.twitch.client_id),
			client_secret: non_blank(file.twitch.client_secret).map(SecretString::new),
			redirect_uri: non_blank(file.twitch.redirect_uri),
			store_token: file.twitch.store_token,
			storage_dir: non_blank(file.twitch.storage_dir).map(PathBuf::from),
			use_debug_ws: file.twitch.use_debug_ws.unwrap_or(false),
			eventsub_ws_url: non_blank(file.twitch.eventsub_ws_url),
			debug_ws_url: non_blank(file.twitch.debug_ws_url),
			reconnect_min_delay: file.twitch.reconnect_min_delay_ms.map(Duration::from_millis),
			reconnect_max_delay: file.twitch.reconnect_max_delay_ms.map(Duration::from_millis),
			max_reconnect_attempts: file.twitch.max_reconnect_attempts,
		};

		Self {
			twitch,
			host: HostSettings {
				tick_interval: file
					.host
					.tick_interval_ms
					.filter(|ms| *ms > 0)
					.map(Duration::from_millis)
					.unwrap_or(DEFAULT_TICK_INTERVAL),
				metrics_bind: non_blank(file.host.metrics_bind),
			},
		}
	}

	/// Runtime bridge configuration. Blank credentials pass through; the bridge reports them at startup.
	pub fn bridge_config(&self) -> BridgeConfig {
		let t = &self.twitch;
		let mut cfg = BridgeConfig::new(
			t.client_id.clone().unwrap_or_default(),
			t.client_secret.clone().unwrap_or_default(),
		);

		if let Some(v) = &t.redirect_uri {
			cfg.redirect_uri = v.clone();
		}
		if let Some(v) = t.store_token {
			cfg.store_token = v;
		}
		if let Some(v) = &t.storage_dir {
			cfg.storage_dir = v.clone();
		}
		cfg.use_debug_ws = t.use_debug_ws;
		if let Some(v) = &t.eventsub_ws_url {
			cfg.eventsub_ws_url = v.clone();
		}
		if let Some(v) = &t.debug_ws_url {
			cfg.debug_ws_url = v.clone();
		}
		if let Some(v) = t.reconnect_min_delay {
			cfg.reconnect_min_delay = v;
		}
		if let Some(v) = t.reconnect_max_delay {
			cfg.reconnect_max_delay = v;
		}
		match t.max_reconnect_attempts {
			Some(0) => cfg.max_reconnect_attempts = None,
			Some(n) => cfg.max_reconnect_attempts = Some(n),
			None => {}
		}

		cfg
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

fn apply_env_overrides(cfg: &mut HostConfig, env: impl Fn(&str) -> Option<String>) {
	let text = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

	if let Some(v) = text("TICKBRIDGE_TWITCH_CLIENT_ID") {
		cfg.twitch.client_id = Some(v);
		info!("twitch config: client_id overridden by env");
	}

	if let Some(v) = text("TICKBRIDGE_TWITCH_CLIENT_SECRET") {
		cfg.twitch.client_secret = Some(SecretString::new(v));
		info!("twitch config: client_secret overridden by env");
	}

	if let Some(v) = text("TICKBRIDGE_REDIRECT_URI") {
		cfg.twitch.redirect_uri = Some(v);
		info!("twitch config: redirect_uri overridden by env");
	}

	if let Some(store) = text("TICKBRIDGE_STORE_TOKEN").as_deref().and_then(parse_env_bool) {
		cfg.twitch.store_token = Some(store);
		info!(store_token = store, "twitch config: store_token overridden by env");
	}

	if let Some(v) = text("TICKBRIDGE_STORAGE_DIR") {
		cfg.twitch.storage_dir = Some(PathBuf::from(v));
		info!("twitch config: storage_dir overridden by env");
	}

	if let Some(use_debug) = text("TICKBRIDGE_USE_DEBUG_WS").as_deref().and_then(parse_env_bool) {
		cfg.twitch.use_debug_ws = use_debug;
		info!(use_debug_ws = use_debug, "twitch config: use_debug_ws overridden by env");
	}

	if let Some(v) = text("TICKBRIDGE_EVENTSUB_WS_URL") {
		cfg.twitch.eventsub_ws_url = Some(v);
		info!("twitch config: eventsub_ws_url overridden by env");
	}

	if let Some(v) = text("TICKBRIDGE_DEBUG_WS_URL") {
		cfg.twitch.debug_ws_url = Some(v);
		info!("twitch config: debug_ws_url overridden by env");
	}

	if let Some(ms) = text("TICKBRIDGE_RECONNECT_MIN_DELAY_MS").and_then(|v| v.parse::<u64>().ok()) {
		cfg.twitch.reconnect_min_delay = Some(Duration::from_millis(ms));
		info!(ms, "twitch config: reconnect_min_delay overridden by env");
	}

	if let Some(ms) = text("TICKBRIDGE_RECONNECT_MAX_DELAY_MS").and_then(|v| v.parse::<u64>().ok()) {
		cfg.twitch.reconnect_max_delay = Some(Duration::from_millis(ms));
		info!(ms, "twitch config: reconnect_max_delay overridden by env");
	}

	if let Some(attempts) = text("TICKBRIDGE_MAX_RECONNECT_ATTEMPTS").and_then(|v| v.parse::<u32>().ok()) {
		cfg.twitch.max_reconnect_attempts = Some(attempts);
		info!(attempts, "twitch config: max_reconnect_attempts overridden by env");
	}

	if let Some(ms) = text("TICKBRIDGE_TICK_INTERVAL_MS")
		.and_then(|v| v.parse::<u64>().ok())
		.filter(|ms| *ms > 0)
	{
		cfg.host.tick_interval = Duration::from_millis(ms);
		info!(ms, "host config: tick_interval overridden by env");
	}

	if let Some(v) = text("TICKBRIDGE_METRICS_BIND") {
		cfg.host.metrics_bind = Some(v);
		info!("host config: metrics_bind overridden by env");
	}

	if cfg.twitch.client_id.is_none() || cfg.twitch.client_secret.is_none() {
		warn!("twitch config: client_id/client_secret missing; startup will fail");
	}

	if let (Some(min), Some(max)) = (cfg.twitch.reconnect_min_delay, cfg.twitch.reconnect_max_delay)
		&& min > max
	{
		warn!(
			min_ms = min.as_millis(),
			max_ms = max.as_millis(),
			"twitch config: reconnect_min_delay > reconnect_max_delay; swapping"
		);
		cfg.twitch.reconnect_min_delay = Some(max);
		cfg.twitch.reconnect_max_delay = Some(min);
	}
}
