#![forbid(unsafe_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tickbridge_domain::{BridgeError, ErrorKind, Session};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};
use url::Url;

use super::{InboundMessage, SESSION_KEEPALIVE, SESSION_RECONNECT, SESSION_WELCOME, parse_message};
use crate::config::BridgeConfig;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type EventSubWs = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
pub type WsConnector = Arc<dyn Fn(Url) -> BoxFuture<'static, anyhow::Result<EventSubWs>> + Send + Sync>;

/// Keepalive assumed until a welcome says otherwise.
const DEFAULT_KEEPALIVE_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
	Connecting,
	AwaitingWelcome,
	Active,
	Reconnecting,
	Closed,
}

/// Everything the socket hands to the worker, in read order.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketOutput {
	/// A welcome was received; subscriptions must be (re)created against this session.
	SessionStarted(Session),
	/// Any non-control message, unmodified.
	Message(InboundMessage),
}

#[derive(Debug, Error)]
pub enum SocketError {
	#[error("gave up after {attempts} consecutive connection failures (last: {last_error})")]
	RetriesExhausted { attempts: u32, last_error: String },
	#[error("invalid eventsub url {url}: {reason}")]
	InvalidUrl { url: String, reason: String },
}

impl From<SocketError> for BridgeError {
	fn from(err: SocketError) -> Self {
		match err {
			SocketError::RetriesExhausted { .. } => BridgeError::Connection(err.to_string()),
			SocketError::InvalidUrl { .. } => BridgeError::Config(err.to_string()),
		}
	}
}

/// What a single inbound message does to the session state machine.
#[derive(Debug, PartialEq)]
pub(crate) enum Transition {
	Ignore,
	Forward(InboundMessage),
	Welcome {
		session: Session,
		reconnect_to: Option<String>,
	},
	Reconnect(String),
	Reject(String),
}

pub(crate) fn transition(state: SocketState, msg: InboundMessage) -> Transition {
	let kind = msg.metadata.message_type.clone();

	match (state, kind.as_str()) {
		(SocketState::AwaitingWelcome, SESSION_WELCOME) => match msg.payload.session {
			Some(session) if !session.id.trim().is_empty() => {
				let reconnect_to = session.reconnect_target().map(str::to_string);
				Transition::Welcome { session, reconnect_to }
			}
			_ => Transition::Reject("session_welcome without a session id".to_string()),
		},
		(SocketState::AwaitingWelcome, other) => Transition::Reject(format!("expected session_welcome, got {other}")),
		(SocketState::Active, SESSION_KEEPALIVE) => Transition::Ignore,
		(SocketState::Active, SESSION_RECONNECT) => {
			match msg.payload.session.as_ref().and_then(Session::reconnect_target) {
				Some(url) => Transition::Reconnect(url.to_string()),
				None => Transition::Reject("session_reconnect without a reconnect_url".to_string()),
			}
		}
		(SocketState::Active, SESSION_WELCOME) => Transition::Reject("session_welcome on an active session".to_string()),
		(SocketState::Active, _) => Transition::Forward(msg),
		(state, other) => Transition::Reject(format!("{other} received while {state:?}")),
	}
}

fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
	let pow = attempt.min(16);
	let ms = min.as_millis().saturating_mul(1u128 << pow);
	let d = Duration::from_millis(ms.min(u64::MAX as u128) as u64);
	d.min(max).max(min)
}

async fn connect_eventsub_ws(url: Url) -> anyhow::Result<EventSubWs> {
	let (ws, _resp) = tokio_tungstenite::connect_async(url.as_str())
		.await
		.context("connect_async to eventsub ws")?;
	Ok(ws)
}

enum Ended {
	Shutdown,
	OutputClosed,
	Reconnect(String),
	Lost(String),
}

/// Owns the EventSub websocket and its welcome/keepalive/reconnect protocol.
pub struct SessionSocket {
	primary_url: String,
	reconnect_min_delay: Duration,
	reconnect_max_delay: Duration,
	max_reconnect_attempts: Option<u32>,
	keepalive_grace: Duration,
	connector: WsConnector,
	state_tx: watch::Sender<SocketState>,
	session: Option<Session>,
	consecutive_failures: u32,
}

impl SessionSocket {
	pub fn new(cfg: &BridgeConfig) -> Self {
		let (state_tx, _) = watch::channel(SocketState::Connecting);
		Self {
			primary_url: cfg.primary_ws_url().to_string(),
			reconnect_min_delay: cfg.reconnect_min_delay,
			reconnect_max_delay: cfg.reconnect_max_delay,
			max_reconnect_attempts: cfg.max_reconnect_attempts,
			keepalive_grace: cfg.keepalive_grace,
			connector: Arc::new(|url: Url| {
				Box::pin(async move { connect_eventsub_ws(url).await }) as BoxFuture<'static, anyhow::Result<EventSubWs>>
			}),
			state_tx,
			session: None,
			consecutive_failures: 0,
		}
	}

	/// Replace how websocket connections are dialed.
	pub fn with_connector(mut self, connector: WsConnector) -> Self {
		self.connector = connector;
		self
	}

	pub fn state(&self) -> SocketState {
		*self.state_tx.borrow()
	}

	/// Observe state changes while `run` owns the socket.
	pub fn subscribe_state(&self) -> watch::Receiver<SocketState> {
		self.state_tx.subscribe()
	}

	pub fn session(&self) -> Option<&Session> {
		self.session.as_ref()
	}

	fn set_state(&self, next: SocketState) {
		let prev = self.state_tx.send_replace(next);
		if prev != next {
			debug!(from = ?prev, to = ?next, "eventsub socket state");
		}
	}

	fn keepalive_window(&self, keepalive_secs: Option<u64>) -> Duration {
		Duration::from_secs(keepalive_secs.unwrap_or(DEFAULT_KEEPALIVE_SECS)) + self.keepalive_grace
	}

	fn record_failure(&mut self, reason: &str) -> Result<(), SocketError> {
		self.consecutive_failures = self.consecutive_failures.saturating_add(1);
		warn!(
			attempt = self.consecutive_failures,
			kind = %ErrorKind::Connection,
			%reason,
			"eventsub connection failed"
		);

		if let Some(max) = self.max_reconnect_attempts
			&& self.consecutive_failures >= max
		{
			return Err(SocketError::RetriesExhausted {
				attempts: self.consecutive_failures,
				last_error: reason.to_string(),
			});
		}
		Ok(())
	}

	/// Run until shutdown, until `out` is dropped, or until the retry budget is spent.
	///
	/// Shutdown is signalled by sending `true` on the watch channel or dropping its sender.
	pub async fn run(
		mut self,
		out: mpsc::Sender<SocketOutput>,
		mut shutdown: watch::Receiver<bool>,
	) -> Result<(), SocketError> {
		let mut target = self.primary_url.clone();

		loop {
			if *shutdown.borrow() {
				self.set_state(SocketState::Closed);
				return Ok(());
			}

			if self.state() != SocketState::Reconnecting {
				self.set_state(SocketState::Connecting);
			}

			if self.consecutive_failures > 0 {
				let delay = backoff_delay(
					self.consecutive_failures,
					self.reconnect_min_delay,
					self.reconnect_max_delay,
				);
				debug!(?delay, attempt = self.consecutive_failures, "eventsub reconnect backoff");
				tokio::select! {
					_ = sleep(delay) => {}
					_ = shutdown.changed() => {
						self.set_state(SocketState::Closed);
						return Ok(());
					}
				}
			}

			let url = match Url::parse(&target) {
				Ok(u) => u,
				Err(e) if target == self.primary_url => {
					return Err(SocketError::InvalidUrl {
						url: target,
						reason: e.to_string(),
					});
				}
				Err(e) => {
					warn!(url = %target, error = %e, "invalid reconnect url; falling back to primary");
					target = self.primary_url.clone();
					continue;
				}
			};

			debug!(url = %url, "dialing eventsub");
			let connected = tokio::select! {
				r = (self.connector)(url) => r,
				_ = shutdown.changed() => {
					self.set_state(SocketState::Closed);
					return Ok(());
				}
			};

			let mut ws = match connected {
				Ok(ws) => ws,
				Err(e) => {
					self.record_failure(&format!("{e:#}"))?;
					target = self.primary_url.clone();
					continue;
				}
			};

			metrics::counter!("tickbridge_eventsub_connects_total").increment(1);
			self.set_state(SocketState::AwaitingWelcome);

			match self.drive(&mut ws, &out, &mut shutdown).await {
				Ended::Shutdown | Ended::OutputClosed => {
					let _ = ws.close(None).await;
					self.set_state(SocketState::Closed);
					info!("eventsub socket closed");
					return Ok(());
				}
				Ended::Reconnect(url) => {
					self.set_state(SocketState::Reconnecting);
					let _ = ws.close(None).await;
					self.session = None;
					metrics::counter!("tickbridge_eventsub_reconnects_total").increment(1);
					info!(url = %url, "eventsub reconnecting to mandated url");
					target = url;
				}
				Ended::Lost(reason) => {
					self.set_state(SocketState::Reconnecting);
					self.session = None;
					metrics::counter!("tickbridge_eventsub_reconnects_total").increment(1);
					self.record_failure(&reason)?;
					target = self.primary_url.clone();
				}
			}
		}
	}

	async fn drive(
		&mut self,
		ws: &mut EventSubWs,
		out: &mpsc::Sender<SocketOutput>,
		shutdown: &mut watch::Receiver<bool>,
	) -> Ended {
		let mut keepalive = self.keepalive_window(None);

		loop {
			let frame = tokio::select! {
				_ = shutdown.changed() => return Ended::Shutdown,
				frame = tokio::time::timeout(keepalive, ws.next()) => frame,
			};

			let msg = match frame {
				Err(_) => return Ended::Lost(format!("keepalive watchdog: no frame within {keepalive:?}")),
				Ok(None) => return Ended::Lost("eventsub ws ended".to_string()),
				Ok(Some(Err(e))) => return Ended::Lost(format!("eventsub ws read error: {e}")),
				Ok(Some(Ok(m))) => m,
			};

			let text = match msg {
				Message::Text(t) => t,
				Message::Ping(p) => {
					let _ = ws.send(Message::Pong(p)).await;
					continue;
				}
				Message::Close(frame) => return Ended::Lost(format!("eventsub ws closed: {frame:?}")),
				_ => continue,
			};

			let inbound = match parse_message(&text) {
				Ok(m) => m,
				Err(e) => {
					warn!(kind = %ErrorKind::Protocol, error = %e, "dropping malformed eventsub frame");
					continue;
				}
			};

			match transition(self.state(), inbound) {
				Transition::Ignore => debug!("eventsub keepalive"),
				Transition::Forward(m) => {
					metrics::counter!("tickbridge_eventsub_messages_forwarded_total").increment(1);
					if out.send(SocketOutput::Message(m)).await.is_err() {
						return Ended::OutputClosed;
					}
				}
				Transition::Welcome { session, reconnect_to } => {
					self.consecutive_failures = 0;
					keepalive = self.keepalive_window(session.keepalive_timeout_seconds);
					info!(
						session_id = %session.id,
						keepalive_secs = ?session.keepalive_timeout_seconds,
						"eventsub session welcome"
					);

					self.session = Some(session.clone());
					if out.send(SocketOutput::SessionStarted(session)).await.is_err() {
						return Ended::OutputClosed;
					}

					match reconnect_to {
						Some(url) => return Ended::Reconnect(url),
						None => self.set_state(SocketState::Active),
					}
				}
				Transition::Reconnect(url) => {
					info!("eventsub session_reconnect received");
					return Ended::Reconnect(url);
				}
				Transition::Reject(reason) => {
					warn!(kind = %ErrorKind::Protocol, %reason, "dropping unexpected eventsub message");
				}
			}
		}
	}
}
