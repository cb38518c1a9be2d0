#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tickbridge_domain::{BridgeError, Credential, ErrorKind, NormalizedEvent};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::BridgeConfig;
use crate::credentials::CredentialStore;
use crate::eventsub::socket::{SessionSocket, SocketOutput};
use crate::eventsub::subscriptions;
use crate::helix::{HelixClient, HelixUser, TwitchApi, is_auth_error};
use crate::normalize::{Decoded, decode_message};
use crate::oauth::TokenManager;
use crate::queue::{ChannelSnapshot, Drained, EventQueue, InfoUpdate};

const AUTH_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Startup progress visible to the host while `Bridge::run` is in flight.
#[derive(Debug, Default)]
pub struct BridgeStatus {
	authenticated: AtomicBool,
	auth_url: RwLock<Option<String>>,
	broadcaster_login: RwLock<Option<String>>,
}

impl BridgeStatus {
	pub fn is_authenticated(&self) -> bool {
		self.authenticated.load(Ordering::Acquire)
	}

	/// Authorization URL the user should open, once built.
	pub fn auth_url(&self) -> Option<String> {
		self.auth_url.read().clone()
	}

	pub fn broadcaster_login(&self) -> Option<String> {
		self.broadcaster_login.read().clone()
	}

	fn set_auth_url(&self, url: &Url) {
		*self.auth_url.write() = Some(url.to_string());
	}

	fn set_authenticated(&self, user: &HelixUser) {
		*self.broadcaster_login.write() = Some(user.login.clone());
		self.authenticated.store(true, Ordering::Release);
	}
}

fn api_error(err: anyhow::Error) -> BridgeError {
	if is_auth_error(&err) {
		BridgeError::Auth(format!("{err:#}"))
	} else {
		BridgeError::UpstreamApi(format!("{err:#}"))
	}
}

/// What the worker hands to the host tick, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Queued {
	Event(NormalizedEvent),
	/// Recipient of a gifted subscription. Updates the latest subscriber without emitting an event.
	SubscriberSeen(String),
}

impl From<NormalizedEvent> for Queued {
	fn from(event: NormalizedEvent) -> Self {
		Queued::Event(event)
	}
}

/// `None` when shutdown is signalled first.
async fn until_shutdown<F: Future>(fut: F, shutdown: &mut watch::Receiver<bool>) -> Option<F::Output> {
	tokio::select! {
		out = fut => Some(out),
		_ = shutdown.changed() => None,
	}
}

/// Owns the whole ingestion pipeline for one broadcaster.
pub struct Bridge {
	cfg: BridgeConfig,
	tokens: TokenManager,
	store: CredentialStore,
	api: Arc<dyn TwitchApi>,
	queue: Arc<EventQueue<Queued>>,
	status: Arc<BridgeStatus>,
}

impl Bridge {
	pub fn new(cfg: BridgeConfig) -> Result<Self, BridgeError> {
		let base = Url::parse(&cfg.helix_base_url)
			.map_err(|e| BridgeError::Config(format!("invalid helix_base_url {}: {e}", cfg.helix_base_url)))?;
		let api = HelixClient::new(base, cfg.client_id.clone()).map_err(|e| BridgeError::Config(format!("{e:#}")))?;
		Self::with_api(cfg, Arc::new(api))
	}

	/// Like [`Bridge::new`], talking to Twitch through `api`.
	pub fn with_api(cfg: BridgeConfig, api: Arc<dyn TwitchApi>) -> Result<Self, BridgeError> {
		let tokens = TokenManager::new(&cfg)?;
		let store = CredentialStore::new(cfg.storage_dir.clone());

		Ok(Self {
			cfg,
			tokens,
			store,
			api,
			queue: Arc::new(EventQueue::new()),
			status: Arc::new(BridgeStatus::default()),
		})
	}

	pub fn status(&self) -> Arc<BridgeStatus> {
		Arc::clone(&self.status)
	}

	pub fn queue(&self) -> Arc<EventQueue<Queued>> {
		Arc::clone(&self.queue)
	}

	/// Consumer for the host tick, sharing this bridge's queue.
	pub fn tick_consumer(&self) -> TickConsumer {
		TickConsumer::new(self.queue())
	}

	/// Authenticate, resolve the broadcaster, take the snapshot, then pump the socket until shutdown.
	///
	/// Returns `Ok(())` on shutdown. Errors are a missing configuration, a rejected identity lookup,
	/// or a socket that ran out of reconnect attempts.
	pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), BridgeError> {
		let Some(broadcaster) = self.start(&mut shutdown).await? else {
			return Ok(());
		};

		let (out_tx, out_rx) = mpsc::channel(self.cfg.output_capacity.max(1));
		let socket = SessionSocket::new(&self.cfg);
		let socket_task = tokio::spawn(socket.run(out_tx, shutdown.clone()));

		pump(out_rx, self.api.as_ref(), &self.queue, &broadcaster.id, !self.cfg.use_debug_ws).await;

		match socket_task.await {
			Ok(Ok(())) => Ok(()),
			Ok(Err(e)) => {
				error!(error = %e, "eventsub socket stopped");
				Err(e.into())
			}
			Err(join) => Err(BridgeError::Connection(format!("eventsub socket task failed: {join}"))),
		}
	}

	/// Everything before the socket: credential, identity, snapshot. `None` on shutdown.
	pub(crate) async fn start(&self, shutdown: &mut watch::Receiver<bool>) -> Result<Option<HelixUser>, BridgeError> {
		let auth_url = self.tokens.authorization_url()?;
		self.status.set_auth_url(&auth_url);

		let persisted = if self.cfg.store_token {
			self.store.load_persisted()
		} else {
			None
		};
		let from_store = persisted.is_some();

		let credential = match persisted {
			Some(c) => {
				info!(dir = %self.store.dir().display(), "using persisted twitch credential");
				c
			}
			None => match self.authorize_interactive(&auth_url, shutdown).await {
				Some(c) => c,
				None => return Ok(None),
			},
		};

		let Some(broadcaster) = self.resolve_identity(credential, from_store, &auth_url, shutdown).await? else {
			return Ok(None);
		};
		self.status.set_authenticated(&broadcaster);
		info!(broadcaster_id = %broadcaster.id, login = %broadcaster.login, "twitch identity resolved");

		if until_shutdown(snapshot(self.api.as_ref(), &broadcaster.id, &self.queue), shutdown)
			.await
			.is_none()
		{
			return Ok(None);
		}
		Ok(Some(broadcaster))
	}

	/// Run the callback exchange until it yields a credential. `None` on shutdown.
	async fn authorize_interactive(&self, auth_url: &Url, shutdown: &mut watch::Receiver<bool>) -> Option<Credential> {
		loop {
			info!(url = %auth_url, "open this url to authorize twitch access");

			if let Some(credential) = until_shutdown(self.tokens.run_callback_exchange(), shutdown).await? {
				self.persist(&credential);
				return Some(credential);
			}

			warn!(kind = %ErrorKind::Auth, "twitch authorization did not complete; waiting for another attempt");
			until_shutdown(tokio::time::sleep(AUTH_RETRY_DELAY), shutdown).await?;
		}
	}

	fn persist(&self, credential: &Credential) {
		if !self.cfg.store_token {
			return;
		}
		match self.store.persist(credential) {
			Ok(()) => debug!(dir = %self.store.dir().display(), "persisted twitch credential"),
			Err(e) => warn!(error = %e, "failed to persist twitch credential"),
		}
	}

	/// Resolve the token owner. A persisted token that is rejected is refreshed once, then the
	/// interactive flow takes over.
	async fn resolve_identity(
		&self,
		credential: Credential,
		from_store: bool,
		auth_url: &Url,
		shutdown: &mut watch::Receiver<bool>,
	) -> Result<Option<HelixUser>, BridgeError> {
		self.api.set_bearer_token(credential.access_token.clone());

		let err = match until_shutdown(self.api.token_user(), shutdown).await {
			None => return Ok(None),
			Some(Ok(user)) => return Ok(Some(user)),
			Some(Err(e)) if from_store && is_auth_error(&e) => e,
			Some(Err(e)) => return Err(api_error(e)),
		};
		warn!(error = %format!("{err:#}"), "persisted twitch credential rejected; refreshing");

		let Some(refreshed) = until_shutdown(self.tokens.refresh(&credential.refresh_token), shutdown).await else {
			return Ok(None);
		};
		let renewed = match refreshed {
			Ok(c) => {
				self.persist(&c);
				c
			}
			Err(e) => {
				warn!(error = %e, "token refresh failed; falling back to interactive authorization");
				match self.authorize_interactive(auth_url, shutdown).await {
					Some(c) => c,
					None => return Ok(None),
				}
			}
		};

		self.api.set_bearer_token(renewed.access_token);
		match until_shutdown(self.api.token_user(), shutdown).await {
			Some(res) => res.map(Some).map_err(api_error),
			None => Ok(None),
		}
	}
}

/// Queue the latest follower and subscriber as informational updates. Failures are skipped.
pub(crate) async fn snapshot<T>(api: &dyn TwitchApi, broadcaster_id: &str, queue: &EventQueue<T>) {
	match api.latest_follower(broadcaster_id).await {
		Ok(Some(name)) => queue.push_update(InfoUpdate::LatestFollower(name)),
		Ok(None) => debug!("no followers to snapshot"),
		Err(e) => warn!(kind = %ErrorKind::UpstreamApi, error = %format!("{e:#}"), "latest follower lookup failed"),
	}

	match api.latest_subscriber(broadcaster_id).await {
		Ok(Some(name)) => queue.push_update(InfoUpdate::LatestSubscriber(name)),
		Ok(None) => debug!("no subscribers to snapshot"),
		Err(e) => warn!(kind = %ErrorKind::UpstreamApi, error = %format!("{e:#}"), "latest subscriber lookup failed"),
	}
}

/// Background worker: registers subscriptions for each new session and normalizes messages into `queue`.
///
/// Outputs are handled strictly in order, so registration for a session finishes before any message
/// read on that session is decoded. Returns when the socket drops its sender.
pub async fn pump(
	mut outputs: mpsc::Receiver<SocketOutput>,
	api: &dyn TwitchApi,
	queue: &EventQueue<Queued>,
	broadcaster_id: &str,
	register_subscriptions: bool,
) {
	while let Some(output) = outputs.recv().await {
		match output {
			SocketOutput::SessionStarted(session) => {
				if register_subscriptions {
					subscriptions::register(api, &session.id, broadcaster_id).await;
				} else {
					info!(session_id = %session.id, "debug websocket; not registering subscriptions");
				}
			}
			SocketOutput::Message(msg) => match decode_message(&msg, api).await {
				Ok(Decoded::Event(event)) => {
					metrics::counter!("tickbridge_events_normalized_total").increment(1);
					debug!(event_type = %event.event_type(), "queued event");
					queue.append(Queued::Event(event));
				}
				Ok(Decoded::GiftedSubscriber(user_name)) => queue.append(Queued::SubscriberSeen(user_name)),
				Ok(Decoded::Skipped) => {}
				Err(e) => {
					metrics::counter!("tickbridge_events_dropped_total").increment(1);
					error!(
						kind = %e.kind(),
						subscription_type = ?msg.subscription_type(),
						error = %e,
						"dropping event"
					);
				}
			},
		}
	}

	debug!("eventsub worker finished");
}

/// Drains the queue on the host tick. Never blocks on I/O.
#[derive(Debug)]
pub struct TickConsumer {
	queue: Arc<EventQueue<Queued>>,
	snapshot: ChannelSnapshot,
}

impl TickConsumer {
	pub fn new(queue: Arc<EventQueue<Queued>>) -> Self {
		Self {
			queue,
			snapshot: ChannelSnapshot::default(),
		}
	}

	/// Everything queued since the last tick, in arrival order.
	pub fn tick(&mut self) -> Vec<NormalizedEvent> {
		let Drained { events: queued, updates } = self.queue.drain_all();

		for update in updates {
			if !self.snapshot.apply_update(update.clone()) {
				debug!(?update, "live value already present; ignoring snapshot");
			}
		}

		let mut events = Vec::with_capacity(queued.len());
		for item in queued {
			let event = match item {
				Queued::SubscriberSeen(user_name) => {
					self.snapshot.record_subscriber(&user_name);
					continue;
				}
				Queued::Event(event) => event,
			};
			match &event {
				NormalizedEvent::Follow { user_name, .. } => self.snapshot.record_follower(user_name),
				NormalizedEvent::Subscription { user_name, .. } => self.snapshot.record_subscriber(user_name),
				NormalizedEvent::SubscriptionWithMessage(sub) => self.snapshot.record_subscriber(&sub.user_name),
				_ => {}
			}
			events.push(event);
		}

		events
	}

	pub fn latest_follower(&self) -> &str {
		&self.snapshot.latest_follower
	}

	pub fn latest_subscriber(&self) -> &str {
		&self.snapshot.latest_subscriber
	}

	pub fn snapshot(&self) -> &ChannelSnapshot {
		&self.snapshot
	}
}
