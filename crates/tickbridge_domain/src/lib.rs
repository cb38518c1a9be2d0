#![forbid(unsafe_code)]

mod error;
mod events;

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use error::{BridgeError, ErrorKind};
pub use events::{
	Choice, GiftSubscription, NormalizedEvent, PollBegin, PollEnd, PollProgress, PredictionBegin, PredictionEnd,
	PredictionOutcome, PredictionProgress, Raid, Reward, RewardRedemption, ShoutoutCreate, SubscriptionWithMessage,
	TopPredictor,
};

/// Wrapper that redacts in logs.
#[derive(Clone, Default)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_blank(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str("")
	}
}

/// OAuth user token pair.
#[derive(Debug, Clone)]
pub struct Credential {
	pub access_token: SecretString,
	pub refresh_token: SecretString,
}

impl Credential {
	pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
		Self {
			access_token: SecretString::new(access_token),
			refresh_token: SecretString::new(refresh_token),
		}
	}

	/// Both halves are present and non-blank.
	pub fn is_complete(&self) -> bool {
		!self.access_token.is_blank() && !self.refresh_token.is_blank()
	}
}

/// EventSub websocket session, issued by `session_welcome`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
	pub id: String,
	#[serde(default)]
	pub status: String,
	#[serde(default)]
	pub keepalive_timeout_seconds: Option<u64>,
	#[serde(default)]
	pub reconnect_url: Option<String>,
}

impl Session {
	/// Reconnect target carried by the session, ignoring blank values.
	pub fn reconnect_target(&self) -> Option<&str> {
		self.reconnect_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
	}
}

/// The fixed set of EventSub subscription types this pipeline ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
	Follow,
	Subscribe,
	SubscriptionMessage,
	SubscriptionGift,
	Raid,
	RewardRedemptionAdd,
	ShoutoutCreate,
	CharityDonation,
	PollBegin,
	PollProgress,
	PollEnd,
	PredictionBegin,
	PredictionProgress,
	PredictionLock,
	PredictionEnd,
}

impl EventType {
	pub const ALL: [EventType; 15] = [
		EventType::Follow,
		EventType::Subscribe,
		EventType::SubscriptionMessage,
		EventType::SubscriptionGift,
		EventType::Raid,
		EventType::RewardRedemptionAdd,
		EventType::ShoutoutCreate,
		EventType::CharityDonation,
		EventType::PollBegin,
		EventType::PollProgress,
		EventType::PollEnd,
		EventType::PredictionBegin,
		EventType::PredictionProgress,
		EventType::PredictionLock,
		EventType::PredictionEnd,
	];

	/// EventSub subscription type string.
	pub const fn as_str(self) -> &'static str {
		match self {
			EventType::Follow => "channel.follow",
			EventType::Subscribe => "channel.subscribe",
			EventType::SubscriptionMessage => "channel.subscription.message",
			EventType::SubscriptionGift => "channel.subscription.gift",
			EventType::Raid => "channel.raid",
			EventType::RewardRedemptionAdd => "channel.channel_points_custom_reward_redemption.add",
			EventType::ShoutoutCreate => "channel.shoutout.create",
			EventType::CharityDonation => "channel.charity_campaign.donate",
			EventType::PollBegin => "channel.poll.begin",
			EventType::PollProgress => "channel.poll.progress",
			EventType::PollEnd => "channel.poll.end",
			EventType::PredictionBegin => "channel.prediction.begin",
			EventType::PredictionProgress => "channel.prediction.progress",
			EventType::PredictionLock => "channel.prediction.lock",
			EventType::PredictionEnd => "channel.prediction.end",
		}
	}

	/// Subscription version used when registering.
	pub const fn version(self) -> &'static str {
		match self {
			EventType::Follow => "2",
			_ => "1",
		}
	}
}

impl fmt::Display for EventType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown subscription type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
	type Err = UnknownEventType;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		EventType::ALL
			.into_iter()
			.find(|ty| ty.as_str() == s)
			.ok_or_else(|| UnknownEventType(s.to_string()))
	}
}

/// Where Twitch delivers a subscription's notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transport {
	pub method: String,
	pub session_id: String,
}

impl Transport {
	pub fn websocket(session_id: impl Into<String>) -> Self {
		Self {
			method: "websocket".to_string(),
			session_id: session_id.into(),
		}
	}
}

/// A created EventSub subscription, bound to exactly one session.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
	pub id: String,
	pub event_type: EventType,
	pub version: String,
	pub status: String,
	/// Filter the subscription was created with, e.g. `{"broadcaster_user_id": "42"}`.
	pub condition: serde_json::Value,
	pub transport: Transport,
}

impl Subscription {
	pub fn session_id(&self) -> &str {
		&self.transport.session_id
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn event_type_parse_and_display() {
		for ty in EventType::ALL {
			assert_eq!(ty.as_str().parse::<EventType>().unwrap(), ty);
		}
		assert_eq!(EventType::Raid.to_string(), "channel.raid");
		assert!("channel.chat.message".parse::<EventType>().is_err());
	}

	#[test]
	fn only_follow_uses_version_two() {
		let v2: Vec<_> = EventType::ALL.into_iter().filter(|t| t.version() == "2").collect();
		assert_eq!(v2, vec![EventType::Follow]);
	}

	#[test]
	fn subscription_is_bound_to_its_session() {
		let sub = Subscription {
			id: "sub-1".to_string(),
			event_type: EventType::Raid,
			version: "1".to_string(),
			status: "enabled".to_string(),
			condition: serde_json::json!({ "to_broadcaster_user_id": "42" }),
			transport: Transport::websocket("sess-1"),
		};
		assert_eq!(sub.session_id(), "sess-1");
		assert_eq!(sub.transport.method, "websocket");
		assert_eq!(sub.condition["to_broadcaster_user_id"], "42");
	}

	#[test]
	fn secret_string_is_redacted() {
		let s = SecretString::new("hunter2");
		assert_eq!(format!("{s}"), "<redacted>");
		assert_eq!(format!("{s:?}"), "SecretString(<redacted>)");
		assert_eq!(s.expose(), "hunter2");
	}

	#[test]
	fn credential_requires_both_halves() {
		assert!(Credential::new("a", "r").is_complete());
		assert!(!Credential::new("a", " ").is_complete());
		assert!(!Credential::new("", "r").is_complete());
	}

	#[test]
	fn session_reconnect_target_ignores_blank() {
		let mut session = Session {
			id: "s".to_string(),
			status: "connected".to_string(),
			keepalive_timeout_seconds: Some(10),
			reconnect_url: Some("   ".to_string()),
		};
		assert_eq!(session.reconnect_target(), None);
		session.reconnect_url = Some("wss://example.test/ws".to_string());
		assert_eq!(session.reconnect_target(), Some("wss://example.test/ws"));
	}
}
