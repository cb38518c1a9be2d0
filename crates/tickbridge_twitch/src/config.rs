#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use tickbridge_domain::SecretString;

pub const DEFAULT_EVENTSUB_WS_URL: &str = "wss://eventsub.wss.twitch.tv/ws?keepalive_timeout_seconds=30";
pub const DEFAULT_DEBUG_WS_URL: &str = "ws://localhost:8190/ws";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8189/";

/// Twitch ingestion configuration.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
	pub client_id: String,
	pub client_secret: SecretString,
	pub redirect_uri: String,

	/// Persist and reuse the token pair between runs.
	pub store_token: bool,
	/// Directory holding the persisted token files.
	pub storage_dir: PathBuf,

	/// Connect to the local mock server instead of Twitch; subscriptions are not registered.
	pub use_debug_ws: bool,
	pub eventsub_ws_url: String,
	pub debug_ws_url: String,

	pub helix_base_url: String,
	pub oauth_base_url: String,

	pub reconnect_min_delay: Duration,
	pub reconnect_max_delay: Duration,
	/// Consecutive failed connects before the socket gives up. `None` retries forever.
	pub max_reconnect_attempts: Option<u32>,
	/// Slack added on top of the session keepalive before the watchdog fires.
	pub keepalive_grace: Duration,

	/// Capacity of the socket → worker channel.
	pub output_capacity: usize,
}

impl BridgeConfig {
	pub fn new(client_id: impl Into<String>, client_secret: SecretString) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret,
			redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
			store_token: true,
			storage_dir: default_storage_dir(),
			use_debug_ws: false,
			eventsub_ws_url: DEFAULT_EVENTSUB_WS_URL.to_string(),
			debug_ws_url: DEFAULT_DEBUG_WS_URL.to_string(),
			helix_base_url: "https://api.twitch.tv".to_string(),
			oauth_base_url: "https://id.twitch.tv".to_string(),
			reconnect_min_delay: Duration::from_millis(500),
			reconnect_max_delay: Duration::from_secs(30),
			max_reconnect_attempts: Some(20),
			keepalive_grace: Duration::from_secs(10),
			output_capacity: 1024,
		}
	}

	/// URL dialed when no reconnect target is pending.
	pub fn primary_ws_url(&self) -> &str {
		if self.use_debug_ws {
			&self.debug_ws_url
		} else {
			&self.eventsub_ws_url
		}
	}
}

/// `<config dir>/tickbridge`, falling back to `~/.tickbridge`.
pub fn default_storage_dir() -> PathBuf {
	if let Some(mut dir) = dirs::config_dir() {
		dir.push("tickbridge");
		dir
	} else {
		let mut p = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
		p.push(".tickbridge");
		p
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn primary_url_follows_debug_flag() {
		let mut cfg = BridgeConfig::new("cid", SecretString::new("secret"));
		assert_eq!(cfg.primary_ws_url(), DEFAULT_EVENTSUB_WS_URL);
		cfg.use_debug_ws = true;
		assert_eq!(cfg.primary_ws_url(), DEFAULT_DEBUG_WS_URL);
	}
}
