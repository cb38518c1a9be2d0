#![forbid(unsafe_code)]

mod callback;

use anyhow::Context;
use serde::Deserialize;
use tickbridge_domain::{BridgeError, Credential, SecretString};
use tokio::net::TcpListener;
use tracing::{error, info};
use url::Url;

use crate::config::BridgeConfig;

/// Scopes requested by the authorization URL.
pub const SCOPES: [&str; 10] = [
	"bits:read",
	"channel:read:charity",
	"channel:read:redemptions",
	"channel:read:ads",
	"channel:read:subscriptions",
	"channel:read:polls",
	"channel:read:predictions",
	"channel:read:goals",
	"moderator:read:followers",
	"moderator:read:shoutouts",
];

#[derive(Debug, Deserialize)]
struct TokenResponse {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	expires_in: Option<u64>,
}

/// Authorization-code flow against `id.twitch.tv`.
#[derive(Clone, Debug)]
pub struct TokenManager {
	http: reqwest::Client,
	client_id: String,
	client_secret: SecretString,
	redirect_uri: String,
	oauth_base_url: String,
}

impl TokenManager {
	pub fn new(cfg: &BridgeConfig) -> Result<Self, BridgeError> {
		let http = reqwest::Client::builder()
			.user_agent("tickbridge/0.x (oauth)")
			.build()
			.map_err(|e| BridgeError::Config(format!("build reqwest client: {e}")))?;

		Ok(Self {
			http,
			client_id: cfg.client_id.clone(),
			client_secret: cfg.client_secret.clone(),
			redirect_uri: cfg.redirect_uri.clone(),
			oauth_base_url: cfg.oauth_base_url.trim_end_matches('/').to_string(),
		})
	}

	fn ensure_client_credentials(&self) -> Result<(), BridgeError> {
		if self.client_id.trim().is_empty() {
			return Err(BridgeError::Config("missing twitch client_id".to_string()));
		}
		if self.client_secret.is_blank() {
			return Err(BridgeError::Config("missing twitch client_secret".to_string()));
		}
		Ok(())
	}

	/// The URL the broadcaster opens to grant access.
	pub fn authorization_url(&self) -> Result<Url, BridgeError> {
		self.ensure_client_credentials()?;

		let scope = SCOPES.join(" ");
		Url::parse_with_params(
			&format!("{}/oauth2/authorize", self.oauth_base_url),
			&[
				("client_id", self.client_id.as_str()),
				("redirect_uri", self.redirect_uri.as_str()),
				("response_type", "code"),
				("scope", scope.as_str()),
			],
		)
		.map_err(|e| BridgeError::Config(format!("invalid oauth_base_url: {e}")))
	}

	fn redirect(&self) -> Result<Url, BridgeError> {
		Url::parse(&self.redirect_uri).map_err(|e| BridgeError::Config(format!("invalid redirect_uri: {e}")))
	}

	/// Bind the loopback listener named by the redirect URI.
	pub async fn bind_callback_listener(&self) -> Result<TcpListener, BridgeError> {
		let redirect = self.redirect()?;
		let host = match redirect.host_str() {
			Some("localhost") | None => "127.0.0.1",
			Some(host) => host,
		};
		let port = redirect.port_or_known_default().unwrap_or(80);

		TcpListener::bind((host, port))
			.await
			.map_err(|e| BridgeError::Auth(format!("bind oauth callback listener on {host}:{port}: {e}")))
	}

	/// Bind, wait for one authorization code and exchange it.
	///
	/// Errors are logged; `None` leaves the caller unauthenticated.
	pub async fn run_callback_exchange(&self) -> Option<Credential> {
		match self.bind_callback_listener().await {
			Ok(listener) => self.run_callback_exchange_on(listener).await,
			Err(e) => {
				error!(error = %e, "oauth callback listener unavailable");
				None
			}
		}
	}

	/// Same as `run_callback_exchange` with a listener the caller already bound.
	pub async fn run_callback_exchange_on(&self, listener: TcpListener) -> Option<Credential> {
		match self.callback_exchange(listener).await {
			Ok(credential) => {
				info!("twitch authorization complete");
				Some(credential)
			}
			Err(e) => {
				error!(error = %e, "twitch authorization failed");
				None
			}
		}
	}

	async fn callback_exchange(&self, listener: TcpListener) -> Result<Credential, BridgeError> {
		self.ensure_client_credentials()?;
		let redirect = self.redirect()?;

		let code = callback::wait_for_code(listener, redirect.path()).await?;
		self.exchange_code(&code).await
	}

	pub async fn exchange_code(&self, code: &str) -> Result<Credential, BridgeError> {
		let resp = self
			.post_token_form(
				&[
					("client_id", self.client_id.as_str()),
					("client_secret", self.client_secret.expose()),
					("code", code),
					("grant_type", "authorization_code"),
					("redirect_uri", self.redirect_uri.as_str()),
				],
				"authorization_code",
			)
			.await
			.map_err(|e| BridgeError::Auth(format!("{e:#}")))?;

		let refresh_token = resp
			.refresh_token
			.filter(|t| !t.trim().is_empty())
			.ok_or_else(|| BridgeError::Auth("token response missing refresh_token".to_string()))?;

		info!(expires_in = ?resp.expires_in, "exchanged authorization code");
		Ok(Credential::new(resp.access_token, refresh_token))
	}

	/// Trade a refresh token for a new pair. Twitch may omit a rotated refresh token.
	pub async fn refresh(&self, refresh_token: &SecretString) -> Result<Credential, BridgeError> {
		self.ensure_client_credentials()?;

		let resp = self
			.post_token_form(
				&[
					("client_id", self.client_id.as_str()),
					("client_secret", self.client_secret.expose()),
					("grant_type", "refresh_token"),
					("refresh_token", refresh_token.expose()),
				],
				"refresh_token",
			)
			.await
			.map_err(|e| BridgeError::Auth(format!("{e:#}")))?;

		let refreshed = resp
			.refresh_token
			.filter(|t| !t.trim().is_empty())
			.unwrap_or_else(|| refresh_token.expose().to_string());

		info!(expires_in = ?resp.expires_in, "refreshed user OAuth token");
		Ok(Credential::new(resp.access_token, refreshed))
	}

	async fn post_token_form(&self, form: &[(&str, &str)], grant: &'static str) -> anyhow::Result<TokenResponse> {
		let url = format!("{}/oauth2/token", self.oauth_base_url);

		let resp = self
			.http
			.post(url)
			.form(form)
			.send()
			.await
			.with_context(|| format!("twitch token request (grant={grant})"))?;

		let status = resp.status();
		let body = resp
			.text()
			.await
			.with_context(|| format!("twitch token read body (grant={grant})"))?;

		if !status.is_success() {
			anyhow::bail!("twitch token exchange failed (grant={grant}): status={status} body={body}");
		}

		serde_json::from_str(&body).with_context(|| format!("twitch token parse json (grant={grant})"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn mk_manager(client_id: &str, secret: &str) -> TokenManager {
		TokenManager::new(&BridgeConfig::new(client_id, SecretString::new(secret))).expect("token manager")
	}

	#[test]
	fn authorization_url_carries_fixed_scopes() {
		let url = mk_manager("cid", "secret").authorization_url().expect("url");
		assert_eq!(url.host_str(), Some("id.twitch.tv"));
		assert_eq!(url.path(), "/oauth2/authorize");

		let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
		assert_eq!(params["client_id"], "cid");
		assert_eq!(params["redirect_uri"], "http://localhost:8189/");
		assert_eq!(params["response_type"], "code");
		assert_eq!(params["scope"].split(' ').collect::<Vec<_>>(), SCOPES.to_vec());
	}

	#[test]
	fn authorization_url_is_deterministic() {
		let m = mk_manager("cid", "secret");
		assert_eq!(m.authorization_url().unwrap(), m.authorization_url().unwrap());
	}

	#[test]
	fn blank_client_credentials_are_config_errors() {
		let err = mk_manager("  ", "secret").authorization_url().unwrap_err();
		assert!(matches!(err, BridgeError::Config(_)));

		let err = mk_manager("cid", "").authorization_url().unwrap_err();
		assert!(matches!(err, BridgeError::Config(_)));
	}
}
