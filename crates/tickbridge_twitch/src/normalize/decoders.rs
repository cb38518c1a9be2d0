#![forbid(unsafe_code)]

use chrono::DateTime;
use serde_json::{Map, Value};
use tickbridge_domain::{
	Choice, EventType, GiftSubscription, NormalizedEvent, PollBegin, PollEnd, PollProgress, PredictionBegin,
	PredictionEnd, PredictionOutcome, PredictionProgress, Raid, Reward, RewardRedemption, ShoutoutCreate,
	SubscriptionWithMessage, TopPredictor,
};
use tracing::debug;

use super::{Decoded, NormalizeError};
use super::fields::{FieldIssue, FieldReader, array, element, object, type_name};
use crate::helix::{HelixChannel, HelixUser, TwitchApi};

type Event = Map<String, Value>;

pub(super) async fn decode(
	event_type: EventType,
	event: &Event,
	f: &mut FieldReader,
	api: &dyn TwitchApi,
) -> Result<Decoded, NormalizeError> {
	let decoded = match event_type {
		EventType::Follow => NormalizedEvent::Follow {
			user_id: f.string(event, "user_id"),
			user_name: f.string(event, "user_name"),
		},
		EventType::Subscribe => return Ok(subscribe(event, f)),
		EventType::SubscriptionMessage => subscription_message(event, f),
		EventType::SubscriptionGift => subscription_gift(event, f),
		EventType::Raid => raid(event, f, api).await?,
		EventType::RewardRedemptionAdd => reward_redemption(event, f)?,
		EventType::ShoutoutCreate => shoutout(event, f, api).await?,
		EventType::CharityDonation => charity_donation(event, f)?,
		EventType::PollBegin => NormalizedEvent::PollBegin(PollBegin {
			title: f.string(event, "title"),
			ends_at: timestamp(event, "ends_at", f)?,
			choices: choices(event, f, false)?,
		}),
		EventType::PollProgress => NormalizedEvent::PollProgress(PollProgress {
			title: f.string(event, "title"),
			choices: choices(event, f, true)?,
		}),
		EventType::PollEnd => NormalizedEvent::PollEnd(PollEnd {
			title: f.string(event, "title"),
			status: f.string(event, "status"),
			choices: choices(event, f, true)?,
		}),
		EventType::PredictionBegin => NormalizedEvent::PredictionBegin(PredictionBegin {
			title: f.string(event, "title"),
			locks_at: timestamp(event, "locks_at", f)?,
			outcomes: outcomes(event, f, Stage::Begin)?,
		}),
		EventType::PredictionProgress => NormalizedEvent::PredictionProgress(PredictionProgress {
			title: f.string(event, "title"),
			outcomes: outcomes(event, f, Stage::Running)?,
		}),
		EventType::PredictionLock => NormalizedEvent::PredictionLock(PredictionProgress {
			title: f.string(event, "title"),
			outcomes: outcomes(event, f, Stage::Running)?,
		}),
		EventType::PredictionEnd => NormalizedEvent::PredictionEnd(PredictionEnd {
			title: f.string(event, "title"),
			status: f.string(event, "status"),
			winning_outcome_id: f.string(event, "winning_outcome_id"),
			outcomes: outcomes(event, f, Stage::Ended)?,
		}),
	};

	Ok(Decoded::Event(decoded))
}

fn subscribe(event: &Event, f: &mut FieldReader) -> Decoded {
	let user_name = f.string(event, "user_name");

	if f.boolean(event, "is_gift") {
		debug!(%user_name, "gifted subscription; gift event carries it");
		return Decoded::GiftedSubscriber(user_name);
	}

	Decoded::Event(NormalizedEvent::Subscription {
		user_name,
		months: 1,
		tier: f.int(event, "tier"),
	})
}

fn subscription_message(event: &Event, f: &mut FieldReader) -> NormalizedEvent {
	let user_name = f.string(event, "user_name");
	let mut tier = f.int(event, "tier");
	if tier >= 1000 {
		tier %= 1000;
	}

	NormalizedEvent::SubscriptionWithMessage(SubscriptionWithMessage {
		user_name,
		cumulative_months: f.int(event, "cumulative_months"),
		tier,
	})
}

fn subscription_gift(event: &Event, f: &mut FieldReader) -> NormalizedEvent {
	let is_anonymous = f.boolean(event, "is_anonymous");
	let (gifter_name, cumulative_total) = if is_anonymous {
		(String::new(), 0)
	} else {
		(f.string(event, "user_name"), f.int(event, "cumulative_total"))
	};

	NormalizedEvent::GiftSubscription(GiftSubscription {
		gifter_name,
		total: f.int(event, "total"),
		tier: f.int(event, "tier"),
		cumulative_total,
		is_anonymous,
	})
}

async fn lookup_user(api: &dyn TwitchApi, id: &str) -> Result<HelixUser, NormalizeError> {
	api.user_by_id(id)
		.await
		.map_err(|e| NormalizeError::Upstream {
			what: "user",
			id: id.to_string(),
			reason: format!("{e:#}"),
		})?
		.ok_or_else(|| NormalizeError::UpstreamEmpty {
			what: "user",
			id: id.to_string(),
		})
}

async fn lookup_channel(api: &dyn TwitchApi, id: &str) -> Result<HelixChannel, NormalizeError> {
	api.channel_information(id)
		.await
		.map_err(|e| NormalizeError::Upstream {
			what: "channel info for",
			id: id.to_string(),
			reason: format!("{e:#}"),
		})?
		.ok_or_else(|| NormalizeError::UpstreamEmpty {
			what: "channel",
			id: id.to_string(),
		})
}

async fn raid(event: &Event, f: &mut FieldReader, api: &dyn TwitchApi) -> Result<NormalizedEvent, NormalizeError> {
	let from_broadcaster_user_id = f.string(event, "from_broadcaster_user_id");
	let from_broadcaster_user_name = f.string(event, "from_broadcaster_user_name");
	let viewers = f.int(event, "viewers");

	let user = lookup_user(api, &from_broadcaster_user_id).await?;

	Ok(NormalizedEvent::Raid(Raid {
		from_broadcaster_user_id,
		from_broadcaster_user_name,
		profile_image_url: user.profile_image_url,
		viewers,
	}))
}

async fn shoutout(event: &Event, f: &mut FieldReader, api: &dyn TwitchApi) -> Result<NormalizedEvent, NormalizeError> {
	let to_broadcaster_user_id = f.string(event, "to_broadcaster_user_id");
	let to_broadcaster_user_name = f.string(event, "to_broadcaster_user_name");

	let user = lookup_user(api, &to_broadcaster_user_id).await?;
	let channel = lookup_channel(api, &to_broadcaster_user_id).await?;

	Ok(NormalizedEvent::ShoutoutCreate(ShoutoutCreate {
		to_broadcaster_user_id,
		to_broadcaster_user_name,
		profile_image_url: user.profile_image_url,
		last_game_name: channel.game_name,
		last_stream_title: channel.title,
	}))
}

fn reward_redemption(event: &Event, f: &mut FieldReader) -> Result<NormalizedEvent, NormalizeError> {
	let reward = object(event, "reward")?;

	Ok(NormalizedEvent::RewardRedemption(RewardRedemption {
		user_name: f.string(event, "user_name"),
		user_input: f.string(event, "user_input"),
		reward: Reward {
			id: f.string(reward, "id"),
			title: f.string(reward, "title"),
			prompt: f.string(reward, "prompt"),
			cost: f.int(reward, "cost"),
		},
	}))
}

fn charity_donation(event: &Event, f: &mut FieldReader) -> Result<NormalizedEvent, NormalizeError> {
	let amount = object(event, "amount")?;

	let user_name = f.string(event, "user_name");
	let value = f.int(amount, "value");
	let decimal_places = f.int(amount, "decimal_places");
	let currency = f.string(amount, "currency");

	let mut scaled = value as f64;
	if decimal_places > 0 {
		scaled /= 10f64.powi(i32::try_from(decimal_places).unwrap_or(i32::MAX));
	}

	Ok(NormalizedEvent::CharityDonation {
		user_name,
		amount: scaled,
		currency,
	})
}

/// RFC 3339 field as unix seconds.
fn timestamp(event: &Event, key: &'static str, f: &mut FieldReader) -> Result<i64, NormalizeError> {
	let raw = f.string(event, key);
	DateTime::parse_from_rfc3339(&raw)
		.map(|t| t.timestamp())
		.map_err(|source| NormalizeError::Timestamp {
			key,
			value: raw,
			source,
		})
}

fn choices(event: &Event, f: &mut FieldReader, with_votes: bool) -> Result<Vec<Choice>, NormalizeError> {
	let items = array(event, "choices")?;

	let mut out = Vec::with_capacity(items.len());
	for (i, item) in items.iter().enumerate() {
		let choice = element(item, "choices", i)?;

		let mut decoded = Choice {
			id: f.string(choice, "id"),
			title: f.string(choice, "title"),
			bits_votes: None,
			channel_points_votes: None,
			votes: None,
		};
		if with_votes {
			decoded.bits_votes = Some(f.int(choice, "bits_votes"));
			decoded.channel_points_votes = Some(f.int(choice, "channel_points_votes"));
			decoded.votes = Some(f.int(choice, "votes"));
		}
		out.push(decoded);
	}
	Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
	Begin,
	Running,
	Ended,
}

fn outcomes(event: &Event, f: &mut FieldReader, stage: Stage) -> Result<Vec<PredictionOutcome>, NormalizeError> {
	let items = array(event, "outcomes")?;

	let mut out = Vec::with_capacity(items.len());
	for (i, item) in items.iter().enumerate() {
		let outcome = element(item, "outcomes", i)?;

		let mut decoded = PredictionOutcome {
			id: f.string(outcome, "id"),
			title: f.string(outcome, "title"),
			color: f.string(outcome, "color"),
			users: None,
			channel_points: None,
			top_predictors: None,
		};
		if stage != Stage::Begin {
			decoded.users = Some(f.int(outcome, "users"));
			decoded.channel_points = Some(f.int(outcome, "channel_points"));
			decoded.top_predictors = Some(top_predictors(outcome, f, stage == Stage::Ended)?);
		}
		out.push(decoded);
	}
	Ok(out)
}

fn top_predictors(outcome: &Event, f: &mut FieldReader, with_winnings: bool) -> Result<Vec<TopPredictor>, NormalizeError> {
	let items = match outcome.get("top_predictors") {
		None => {
			f.note(Some(FieldIssue::Missing {
				key: "top_predictors".to_string(),
			}));
			return Ok(Vec::new());
		}
		Some(Value::Null) => return Ok(Vec::new()),
		Some(Value::Array(items)) => items,
		Some(other) => {
			return Err(NormalizeError::WrongShape {
				key: "top_predictors".to_string(),
				expected: "array",
				found: type_name(other),
			});
		}
	};

	let mut out = Vec::with_capacity(items.len());
	for (i, item) in items.iter().enumerate() {
		let predictor = element(item, "top_predictors", i)?;
		out.push(TopPredictor {
			user_id: f.string(predictor, "user_id"),
			user_name: f.string(predictor, "user_name"),
			channel_points_used: f.int(predictor, "channel_points_used"),
			channel_points_won: with_winnings.then(|| f.int(predictor, "channel_points_won")),
		});
	}
	Ok(out)
}
