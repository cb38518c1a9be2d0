#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::EventType;

/// Typed broadcaster event handed to the host on each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedEvent {
	Follow {
		user_id: String,
		user_name: String,
	},

	/// Plain (non-gifted) subscription. `months` is always 1; `tier` is the raw thousands code.
	Subscription {
		user_name: String,
		months: i64,
		tier: i64,
	},

	SubscriptionWithMessage(SubscriptionWithMessage),
	GiftSubscription(GiftSubscription),
	Raid(Raid),
	RewardRedemption(RewardRedemption),
	ShoutoutCreate(ShoutoutCreate),

	CharityDonation {
		user_name: String,
		amount: f64,
		currency: String,
	},

	PollBegin(PollBegin),
	PollProgress(PollProgress),
	PollEnd(PollEnd),
	PredictionBegin(PredictionBegin),
	PredictionProgress(PredictionProgress),
	PredictionLock(PredictionProgress),
	PredictionEnd(PredictionEnd),
}

impl NormalizedEvent {
	/// Subscription type this event was decoded from.
	pub fn event_type(&self) -> EventType {
		match self {
			NormalizedEvent::Follow { .. } => EventType::Follow,
			NormalizedEvent::Subscription { .. } => EventType::Subscribe,
			NormalizedEvent::SubscriptionWithMessage(_) => EventType::SubscriptionMessage,
			NormalizedEvent::GiftSubscription(_) => EventType::SubscriptionGift,
			NormalizedEvent::Raid(_) => EventType::Raid,
			NormalizedEvent::RewardRedemption(_) => EventType::RewardRedemptionAdd,
			NormalizedEvent::ShoutoutCreate(_) => EventType::ShoutoutCreate,
			NormalizedEvent::CharityDonation { .. } => EventType::CharityDonation,
			NormalizedEvent::PollBegin(_) => EventType::PollBegin,
			NormalizedEvent::PollProgress(_) => EventType::PollProgress,
			NormalizedEvent::PollEnd(_) => EventType::PollEnd,
			NormalizedEvent::PredictionBegin(_) => EventType::PredictionBegin,
			NormalizedEvent::PredictionProgress(_) => EventType::PredictionProgress,
			NormalizedEvent::PredictionLock(_) => EventType::PredictionLock,
			NormalizedEvent::PredictionEnd(_) => EventType::PredictionEnd,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionWithMessage {
	pub user_name: String,
	pub cumulative_months: i64,
	/// `tier mod 1000` when the raw tier is at least 1000.
	pub tier: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftSubscription {
	/// Empty when the gifter is anonymous.
	pub gifter_name: String,
	pub total: i64,
	pub tier: i64,
	/// Zero when the gifter is anonymous.
	pub cumulative_total: i64,
	pub is_anonymous: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Raid {
	pub from_broadcaster_user_id: String,
	pub from_broadcaster_user_name: String,
	pub profile_image_url: String,
	pub viewers: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
	pub id: String,
	pub title: String,
	pub prompt: String,
	pub cost: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardRedemption {
	pub user_name: String,
	pub user_input: String,
	pub reward: Reward,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoutoutCreate {
	pub to_broadcaster_user_id: String,
	pub to_broadcaster_user_name: String,
	pub profile_image_url: String,
	pub last_game_name: String,
	pub last_stream_title: String,
}

/// Poll choice. Vote counts are absent on `begin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
	pub id: String,
	pub title: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bits_votes: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub channel_points_votes: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub votes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopPredictor {
	pub user_id: String,
	pub user_name: String,
	pub channel_points_used: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub channel_points_won: Option<i64>,
}

/// Prediction outcome. Progress fields are absent on `begin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionOutcome {
	pub id: String,
	pub title: String,
	pub color: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub users: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub channel_points: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub top_predictors: Option<Vec<TopPredictor>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollBegin {
	pub title: String,
	/// Unix seconds.
	pub ends_at: i64,
	pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollProgress {
	pub title: String,
	pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollEnd {
	pub title: String,
	pub status: String,
	pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionBegin {
	pub title: String,
	/// Unix seconds.
	pub locks_at: i64,
	pub outcomes: Vec<PredictionOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionProgress {
	pub title: String,
	pub outcomes: Vec<PredictionOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionEnd {
	pub title: String,
	pub status: String,
	pub winning_outcome_id: String,
	pub outcomes: Vec<PredictionOutcome>,
}
