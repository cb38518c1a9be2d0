#![forbid(unsafe_code)]

//! Turns schema-less EventSub notifications into [`NormalizedEvent`]s.
//!
//! Scalar fields are read leniently (see [`fields`]): a missing or mistyped value is logged and replaced
//! with a zero value. Structural problems (a missing nested object, a bad timestamp, a failed enrichment
//! lookup) abort only the event being decoded.

mod decoders;
pub mod fields;

#[cfg(test)]
mod tests;

use thiserror::Error;
use tickbridge_domain::{BridgeError, ErrorKind, EventType, NormalizedEvent};
use tracing::{debug, warn};

pub use fields::{FieldIssue, FieldReader, read_bool, read_int, read_string};

use crate::eventsub::{InboundMessage, NOTIFICATION, REVOCATION};
use crate::helix::TwitchApi;

/// Why an event was dropped instead of emitted.
#[derive(Debug, Error)]
pub enum NormalizeError {
	#[error("notification without event payload")]
	MissingEvent,
	#[error("missing event data: {0}")]
	MissingNested(String),
	#[error("{key} is {found}, expected {expected}")]
	WrongShape {
		key: String,
		expected: &'static str,
		found: &'static str,
	},
	#[error("error converting timestamp {key}={value:?}: {source}")]
	Timestamp {
		key: &'static str,
		value: String,
		#[source]
		source: chrono::ParseError,
	},
	#[error("unable to fetch {what} {id}: {reason}")]
	Upstream {
		what: &'static str,
		id: String,
		reason: String,
	},
	#[error("unable to fetch {what} {id}: empty result")]
	UpstreamEmpty { what: &'static str, id: String },
}

impl NormalizeError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			NormalizeError::MissingEvent => ErrorKind::Protocol,
			NormalizeError::Upstream { .. } | NormalizeError::UpstreamEmpty { .. } => ErrorKind::UpstreamApi,
			_ => ErrorKind::Data,
		}
	}
}

impl From<NormalizeError> for BridgeError {
	fn from(err: NormalizeError) -> Self {
		let msg = err.to_string();
		match err.kind() {
			ErrorKind::Protocol => BridgeError::Protocol(msg),
			ErrorKind::UpstreamApi => BridgeError::UpstreamApi(msg),
			_ => BridgeError::Data(msg),
		}
	}
}

/// Outcome of decoding one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
	Event(NormalizedEvent),
	/// Recipient of a gifted `channel.subscribe`. Not emitted; it still counts as the latest subscriber.
	GiftedSubscriber(String),
	/// Control or revocation message, or a subscription type outside the fixed table.
	Skipped,
}

impl Decoded {
	pub fn into_event(self) -> Option<NormalizedEvent> {
		match self {
			Decoded::Event(event) => Some(event),
			Decoded::GiftedSubscriber(_) | Decoded::Skipped => None,
		}
	}
}

/// Decode one inbound message.
///
/// `Ok(None)` means nothing to emit: a control or revocation message, a subscription type outside the
/// fixed table, or a gifted `channel.subscribe` (the gift event is the canonical signal).
pub async fn normalize(msg: &InboundMessage, api: &dyn TwitchApi) -> Result<Option<NormalizedEvent>, NormalizeError> {
	decode_message(msg, api).await.map(Decoded::into_event)
}

/// Like [`normalize`], but keeps the recipient of a gifted subscription.
pub async fn decode_message(msg: &InboundMessage, api: &dyn TwitchApi) -> Result<Decoded, NormalizeError> {
	match msg.message_type() {
		NOTIFICATION => {}
		REVOCATION => {
			warn!(
				subscription_type = ?msg.subscription_type(),
				status = ?msg.payload.subscription.as_ref().map(|s| s.status.as_str()),
				"eventsub subscription revoked"
			);
			return Ok(Decoded::Skipped);
		}
		other => {
			debug!(message_type = %other, "ignoring non-notification message");
			return Ok(Decoded::Skipped);
		}
	}

	let Some(sub_type) = msg.subscription_type() else {
		warn!(message_id = %msg.metadata.message_id, "received non subscription event");
		return Ok(Decoded::Skipped);
	};

	let event_type = match sub_type.parse::<EventType>() {
		Ok(t) => t,
		Err(e) => {
			debug!(error = %e, "ignoring notification");
			return Ok(Decoded::Skipped);
		}
	};

	let event = msg.payload.event.as_ref().ok_or(NormalizeError::MissingEvent)?;
	let mut fields = FieldReader::new(event_type);
	decoders::decode(event_type, event, &mut fields, api).await
}
