#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tickbridge_domain::{EventType, SecretString, Subscription, Transport};

use crate::helix::{HelixChannel, HelixUser, TwitchApi};

/// In-memory [`TwitchApi`] for unit tests.
#[derive(Default)]
pub(crate) struct FakeApi {
	pub token_user: Option<HelixUser>,
	/// When set, `token_user` answers 401 for any other bearer token.
	pub valid_token: Option<String>,
	pub token_user_delay: Option<Duration>,
	pub bearer: Mutex<String>,
	pub users: HashMap<String, HelixUser>,
	pub channels: HashMap<String, HelixChannel>,
	pub latest_follower: Option<String>,
	pub latest_subscriber: Option<String>,
	pub fail_lookups: bool,
	pub fail_subscription: Option<EventType>,
	pub created: Mutex<Vec<(EventType, String, Value)>>,
	/// Every call in order, e.g. `user:77` or `create:channel.follow:sess-1`.
	pub calls: Mutex<Vec<String>>,
}

impl FakeApi {
	pub fn with_user(mut self, id: &str, login: &str, profile_image_url: &str) -> Self {
		self.users.insert(
			id.to_string(),
			HelixUser {
				id: id.to_string(),
				login: login.to_string(),
				display_name: login.to_string(),
				profile_image_url: profile_image_url.to_string(),
			},
		);
		self
	}

	pub fn with_channel(mut self, id: &str, game_name: &str, title: &str) -> Self {
		self.channels.insert(
			id.to_string(),
			HelixChannel {
				broadcaster_id: id.to_string(),
				broadcaster_name: id.to_string(),
				game_name: game_name.to_string(),
				title: title.to_string(),
			},
		);
		self
	}

	pub fn with_token_user(mut self, id: &str, login: &str) -> Self {
		self.token_user = Some(HelixUser {
			id: id.to_string(),
			login: login.to_string(),
			display_name: login.to_string(),
			profile_image_url: String::new(),
		});
		self
	}

	pub fn created_types(&self) -> Vec<EventType> {
		self.created.lock().iter().map(|(t, _, _)| *t).collect()
	}

	pub fn calls(&self) -> Vec<String> {
		self.calls.lock().clone()
	}

	fn trace(&self, call: String) {
		self.calls.lock().push(call);
	}
}

#[async_trait]
impl TwitchApi for FakeApi {
	fn set_bearer_token(&self, token: SecretString) {
		*self.bearer.lock() = token.expose().to_string();
	}

	async fn token_user(&self) -> anyhow::Result<HelixUser> {
		if let Some(delay) = self.token_user_delay {
			tokio::time::sleep(delay).await;
		}
		if let Some(valid) = &self.valid_token
			&& *self.bearer.lock() != *valid
		{
			anyhow::bail!("helix auth failed (status=401 Unauthorized) body=invalid access token");
		}
		match &self.token_user {
			Some(user) => Ok(user.clone()),
			None => anyhow::bail!("helix auth failed (status=401 Unauthorized) body=invalid token"),
		}
	}

	async fn user_by_id(&self, user_id: &str) -> anyhow::Result<Option<HelixUser>> {
		self.trace(format!("user:{user_id}"));
		if self.fail_lookups {
			anyhow::bail!("helix GET /helix/users failed: status=503");
		}
		Ok(self.users.get(user_id).cloned())
	}

	async fn channel_information(&self, broadcaster_id: &str) -> anyhow::Result<Option<HelixChannel>> {
		self.trace(format!("channel:{broadcaster_id}"));
		if self.fail_lookups {
			anyhow::bail!("helix GET /helix/channels failed: status=503");
		}
		Ok(self.channels.get(broadcaster_id).cloned())
	}

	async fn latest_follower(&self, _broadcaster_id: &str) -> anyhow::Result<Option<String>> {
		if self.fail_lookups {
			anyhow::bail!("helix GET /helix/channels/followers failed: status=503");
		}
		Ok(self.latest_follower.clone())
	}

	async fn latest_subscriber(&self, _broadcaster_id: &str) -> anyhow::Result<Option<String>> {
		if self.fail_lookups {
			anyhow::bail!("helix GET /helix/subscriptions failed: status=503");
		}
		Ok(self.latest_subscriber.clone())
	}

	async fn create_subscription(
		&self,
		event_type: EventType,
		session_id: &str,
		condition: Value,
	) -> anyhow::Result<Subscription> {
		self.trace(format!("create:{event_type}:{session_id}"));
		self.created.lock().push((event_type, session_id.to_string(), condition.clone()));
		if self.fail_subscription == Some(event_type) {
			anyhow::bail!("helix create subscription failed (type={event_type}): status=400");
		}
		Ok(Subscription {
			id: format!("sub-{event_type}"),
			event_type,
			version: event_type.version().to_string(),
			status: "enabled".to_string(),
			condition,
			transport: Transport::websocket(session_id),
		})
	}
}

/// Form bodies posted to a [`spawn_token_endpoint`] server, in order.
pub(crate) type Forms = Arc<Mutex<Vec<String>>>;

/// Loopback `/oauth2/token` endpoint. `reply` maps each posted form body to a status and JSON body.
pub(crate) async fn spawn_token_endpoint<F>(reply: F) -> (SocketAddr, Forms)
where
	F: Fn(&str) -> (StatusCode, &'static str) + Send + Sync + 'static,
{
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind token endpoint");
	let addr = listener.local_addr().expect("addr");
	let forms: Forms = Arc::default();
	let seen = Arc::clone(&forms);
	let reply = Arc::new(reply);

	tokio::spawn(async move {
		loop {
			let Ok((stream, _)) = listener.accept().await else { return };
			let seen = Arc::clone(&seen);
			let reply = Arc::clone(&reply);
			tokio::spawn(async move {
				let service = service_fn(move |req: Request<Incoming>| {
					let seen = Arc::clone(&seen);
					let reply = Arc::clone(&reply);
					async move {
						let body = req.into_body().collect().await?.to_bytes();
						let form = String::from_utf8_lossy(&body).into_owned();
						let (status, json) = reply(&form);
						seen.lock().push(form);

						let mut resp = Response::new(Full::new(Bytes::from_static(json.as_bytes())));
						*resp.status_mut() = status;
						Ok::<_, hyper::Error>(resp)
					}
				});
				let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
			});
		}
	});

	(addr, forms)
}

/// Port that was free a moment ago, for a redirect URI the code under test binds itself.
pub(crate) async fn free_port() -> u16 {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	listener.local_addr().expect("addr").port()
}

/// Hit the OAuth redirect once its listener is up.
pub(crate) async fn complete_login(port: u16, query: &str) {
	let url = format!("http://127.0.0.1:{port}/callback?{query}");
	for _ in 0..100 {
		if let Ok(resp) = reqwest::get(&url).await {
			assert_eq!(resp.status(), reqwest::StatusCode::OK);
			return;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	panic!("oauth callback listener never came up on port {port}");
}
