#![forbid(unsafe_code)]

pub mod socket;
pub mod subscriptions;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tickbridge_domain::Session;

pub const SESSION_WELCOME: &str = "session_welcome";
pub const SESSION_KEEPALIVE: &str = "session_keepalive";
pub const SESSION_RECONNECT: &str = "session_reconnect";
pub const NOTIFICATION: &str = "notification";
pub const REVOCATION: &str = "revocation";

/// One EventSub websocket message, kept schema-less below `payload.event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
	pub metadata: MessageMetadata,
	#[serde(default)]
	pub payload: MessagePayload,
}

/// EventSub metadata (present on all WebSocket messages).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
	pub message_id: String,
	pub message_type: String,

	#[serde(default)]
	pub message_timestamp: Option<String>,
	#[serde(default)]
	pub subscription_type: Option<String>,
	#[serde(default)]
	pub subscription_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
	#[serde(default)]
	pub session: Option<Session>,
	#[serde(default)]
	pub subscription: Option<SubscriptionInfo>,
	#[serde(default)]
	pub event: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
	#[serde(default)]
	pub id: String,
	#[serde(default)]
	pub status: String,
	#[serde(rename = "type")]
	pub r#type: String,
	#[serde(default)]
	pub version: String,
	#[serde(default)]
	pub condition: serde_json::Value,
}

impl InboundMessage {
	pub fn message_type(&self) -> &str {
		&self.metadata.message_type
	}

	/// Subscription type from the payload, falling back to metadata.
	pub fn subscription_type(&self) -> Option<&str> {
		self.payload
			.subscription
			.as_ref()
			.map(|s| s.r#type.as_str())
			.or(self.metadata.subscription_type.as_deref())
	}
}

pub fn parse_message(raw_json: &str) -> anyhow::Result<InboundMessage> {
	serde_json::from_str(raw_json).context("parse eventsub message")
}
