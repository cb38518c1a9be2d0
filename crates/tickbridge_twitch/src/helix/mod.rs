#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tickbridge_domain::{EventType, SecretString, Subscription, Transport};
use url::Url;

const EVENTSUB_SUBSCRIPTIONS_PATH: &str = "/helix/eventsub/subscriptions";
const USERS_PATH: &str = "/helix/users";
const CHANNELS_PATH: &str = "/helix/channels";
const CHANNEL_FOLLOWERS_PATH: &str = "/helix/channels/followers";
const SUBSCRIPTIONS_PATH: &str = "/helix/subscriptions";

/// REST surface the pipeline needs from Twitch.
#[async_trait]
pub trait TwitchApi: Send + Sync {
	/// Token used by every later call.
	fn set_bearer_token(&self, token: SecretString);

	/// User owning the current bearer token.
	async fn token_user(&self) -> anyhow::Result<HelixUser>;

	async fn user_by_id(&self, user_id: &str) -> anyhow::Result<Option<HelixUser>>;

	async fn channel_information(&self, broadcaster_id: &str) -> anyhow::Result<Option<HelixChannel>>;

	/// Display name of the most recent follower, if any.
	async fn latest_follower(&self, broadcaster_id: &str) -> anyhow::Result<Option<String>>;

	/// Display name of the first subscriber Helix lists, if any.
	async fn latest_subscriber(&self, broadcaster_id: &str) -> anyhow::Result<Option<String>>;

	async fn create_subscription(
		&self,
		event_type: EventType,
		session_id: &str,
		condition: serde_json::Value,
	) -> anyhow::Result<Subscription>;
}

/// Whether an error came from a 401/403 Helix response.
pub fn is_auth_error(err: &anyhow::Error) -> bool {
	err.chain()
		.any(|cause| cause.to_string().to_ascii_lowercase().contains("helix auth failed"))
}

fn retry_delay_from_headers(headers: &HeaderMap) -> Option<Duration> {
	if let Some(v) = headers.get(RETRY_AFTER)
		&& let Ok(s) = v.to_str()
		&& let Ok(secs) = s.trim().parse::<u64>()
	{
		return Some(Duration::from_secs(secs));
	}

	if let Some(v) = headers.get("Ratelimit-Reset")
		&& let Ok(s) = v.to_str()
		&& let Ok(reset_unix) = s.trim().parse::<u64>()
	{
		let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
		if reset_unix > now {
			return Some(Duration::from_secs(reset_unix - now));
		}
	}

	None
}

async fn send_with_retry(req: reqwest::RequestBuilder, label: &'static str) -> anyhow::Result<reqwest::Response> {
	let retry_builder = req.try_clone();
	let resp = req.send().await.with_context(|| format!("helix {label} send"))?;
	let status = resp.status();

	if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
		let body = resp.text().await.unwrap_or_default();
		anyhow::bail!("helix auth failed (status={status}) body={body}");
	}

	if status == StatusCode::TOO_MANY_REQUESTS
		&& let Some(delay) = retry_delay_from_headers(resp.headers())
		&& let Some(retry) = retry_builder
	{
		tokio::time::sleep(delay).await;
		let retry_resp = retry.send().await.with_context(|| format!("helix {label} retry send"))?;
		return Ok(retry_resp);
	}

	if status.is_server_error()
		&& let Some(retry) = retry_builder
	{
		tokio::time::sleep(Duration::from_millis(250)).await;
		let retry_resp = retry.send().await.with_context(|| format!("helix {label} retry send"))?;
		return Ok(retry_resp);
	}

	Ok(resp)
}

/// Helix client shared by the worker and the enrichment path.
///
/// The bearer token is the only mutable state and sits behind a lock; clones share it.
#[derive(Clone, Debug)]
pub struct HelixClient {
	http: reqwest::Client,
	base_url: Url,
	client_id: String,
	bearer_token: Arc<RwLock<SecretString>>,
}

impl HelixClient {
	pub fn new(base_url: Url, client_id: String) -> anyhow::Result<Self> {
		let http = reqwest::Client::builder()
			.user_agent("tickbridge/0.x (eventsub-ws)")
			.build()
			.context("build reqwest client")?;

		Ok(Self {
			http,
			base_url,
			client_id,
			bearer_token: Arc::new(RwLock::new(SecretString::default())),
		})
	}

	pub fn set_bearer_token(&self, token: SecretString) {
		*self.bearer_token.write() = token;
	}

	pub fn has_bearer_token(&self) -> bool {
		!self.bearer_token.read().is_blank()
	}

	fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		let bearer = format!("Bearer {}", self.bearer_token.read().expose());
		req.header("Client-Id", &self.client_id).header("Authorization", bearer)
	}

	fn url(&self, path_and_query: &str) -> anyhow::Result<Url> {
		self.base_url.join(path_and_query).context("join helix url")
	}

	async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str, label: &'static str) -> anyhow::Result<T> {
		let url = self.url(path_and_query)?;

		let resp = send_with_retry(self.authed(self.http.get(url)), label)
			.await
			.with_context(|| format!("helix {label} send"))?;

		let status = resp.status();
		let body = resp.text().await.with_context(|| format!("helix {label} read body"))?;

		if !status.is_success() {
			anyhow::bail!("helix {label} failed: status={status} body={body}");
		}

		serde_json::from_str(&body).with_context(|| format!("helix {label} parse json"))
	}

	pub async fn get_token_user(&self) -> anyhow::Result<HelixUser> {
		let parsed: HelixDataResponse<HelixUser> = self.get_json(USERS_PATH, "GET /helix/users (whoami)").await?;
		parsed.data.into_iter().next().context("helix whoami returned empty data")
	}

	pub async fn get_user_by_id(&self, user_id: &str) -> anyhow::Result<Option<HelixUser>> {
		let path = format!("{USERS_PATH}?id={}", urlencoding::encode(user_id));
		let parsed: HelixDataResponse<HelixUser> = self.get_json(&path, "GET /helix/users").await?;
		Ok(parsed.data.into_iter().next())
	}

	pub async fn get_channel_information(&self, broadcaster_id: &str) -> anyhow::Result<Option<HelixChannel>> {
		let path = format!("{CHANNELS_PATH}?broadcaster_id={}", urlencoding::encode(broadcaster_id));
		let parsed: HelixDataResponse<HelixChannel> = self.get_json(&path, "GET /helix/channels").await?;
		Ok(parsed.data.into_iter().next())
	}

	pub async fn get_latest_follower(&self, broadcaster_id: &str) -> anyhow::Result<Option<HelixFollower>> {
		let path = format!(
			"{CHANNEL_FOLLOWERS_PATH}?broadcaster_id={}&first=1",
			urlencoding::encode(broadcaster_id)
		);
		let parsed: HelixDataResponse<HelixFollower> = self.get_json(&path, "GET /helix/channels/followers").await?;
		Ok(parsed.data.into_iter().next())
	}

	pub async fn get_latest_subscriber(&self, broadcaster_id: &str) -> anyhow::Result<Option<HelixSubscriber>> {
		let path = format!(
			"{SUBSCRIPTIONS_PATH}?broadcaster_id={}&first=1",
			urlencoding::encode(broadcaster_id)
		);
		let parsed: HelixDataResponse<HelixSubscriber> = self.get_json(&path, "GET /helix/subscriptions").await?;
		Ok(parsed.data.into_iter().next())
	}

	pub async fn create_eventsub_subscription(
		&self,
		event_type: EventType,
		session_id: &str,
		condition: &serde_json::Value,
	) -> anyhow::Result<Subscription> {
		let url = self.url(EVENTSUB_SUBSCRIPTIONS_PATH)?;
		let kind = event_type.as_str();

		let req = HelixCreateSubscriptionRequest {
			r#type: kind,
			version: event_type.version(),
			condition,
			transport: HelixWebsocketTransport {
				method: "websocket",
				session_id,
			},
		};

		let resp = send_with_retry(
			self.authed(self.http.post(url)).json(&req),
			"POST /helix/eventsub/subscriptions",
		)
		.await
		.with_context(|| format!("helix POST {EVENTSUB_SUBSCRIPTIONS_PATH} send (type={kind})"))?;

		let status = resp.status();
		let body = resp
			.text()
			.await
			.with_context(|| format!("helix POST {EVENTSUB_SUBSCRIPTIONS_PATH} read body (type={kind})"))?;

		if status == StatusCode::CONFLICT {
			anyhow::bail!("helix create subscription conflict (type={kind}): body={body}");
		}
		if !status.is_success() {
			anyhow::bail!("helix create subscription failed (type={kind}): status={status} body={body}");
		}

		let parsed: HelixDataResponse<HelixSubscriptionData> =
			serde_json::from_str(&body).with_context(|| format!("helix create subscription parse json (type={kind})"))?;
		let data = parsed
			.data
			.into_iter()
			.next()
			.with_context(|| format!("helix create subscription returned empty data (type={kind})"))?;

		Ok(Subscription {
			id: data.id,
			event_type,
			version: data.version,
			status: data.status,
			condition: condition.clone(),
			transport: Transport::websocket(session_id),
		})
	}
}

#[async_trait]
impl TwitchApi for HelixClient {
	fn set_bearer_token(&self, token: SecretString) {
		HelixClient::set_bearer_token(self, token);
	}

	async fn token_user(&self) -> anyhow::Result<HelixUser> {
		self.get_token_user().await
	}

	async fn user_by_id(&self, user_id: &str) -> anyhow::Result<Option<HelixUser>> {
		self.get_user_by_id(user_id).await
	}

	async fn channel_information(&self, broadcaster_id: &str) -> anyhow::Result<Option<HelixChannel>> {
		self.get_channel_information(broadcaster_id).await
	}

	async fn latest_follower(&self, broadcaster_id: &str) -> anyhow::Result<Option<String>> {
		Ok(self.get_latest_follower(broadcaster_id).await?.map(|f| f.user_name))
	}

	async fn latest_subscriber(&self, broadcaster_id: &str) -> anyhow::Result<Option<String>> {
		Ok(self.get_latest_subscriber(broadcaster_id).await?.map(|s| s.user_name))
	}

	async fn create_subscription(
		&self,
		event_type: EventType,
		session_id: &str,
		condition: serde_json::Value,
	) -> anyhow::Result<Subscription> {
		self.create_eventsub_subscription(event_type, session_id, &condition).await
	}
}

#[derive(Debug, Deserialize)]
struct HelixDataResponse<T> {
	data: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HelixUser {
	pub id: String,
	pub login: String,
	#[serde(default)]
	pub display_name: String,
	#[serde(default)]
	pub profile_image_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HelixChannel {
	pub broadcaster_id: String,
	#[serde(default)]
	pub broadcaster_name: String,
	#[serde(default)]
	pub game_name: String,
	#[serde(default)]
	pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixFollower {
	pub user_id: String,
	pub user_name: String,
	#[serde(default)]
	pub followed_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixSubscriber {
	pub user_id: String,
	pub user_name: String,
	#[serde(default)]
	pub tier: Option<String>,
}

#[derive(Debug, Serialize)]
struct HelixCreateSubscriptionRequest<'a> {
	#[serde(rename = "type")]
	r#type: &'static str,
	version: &'static str,
	condition: &'a serde_json::Value,
	transport: HelixWebsocketTransport<'a>,
}

#[derive(Debug, Serialize)]
struct HelixWebsocketTransport<'a> {
	method: &'static str,
	session_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct HelixSubscriptionData {
	id: String,
	status: String,
	version: String,
}
