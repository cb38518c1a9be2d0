#![forbid(unsafe_code)]

use serde_json::{Value, json};
use tickbridge_domain::{ErrorKind, NormalizedEvent};

use super::*;
use crate::eventsub::{MessageMetadata, MessagePayload, SubscriptionInfo};
use crate::testing::FakeApi;

fn mk_notification(sub_type: &str, event: Value) -> InboundMessage {
	let event = match event {
		Value::Object(m) => Some(m),
		_ => panic!("event fixture must be an object"),
	};
	InboundMessage {
		metadata: MessageMetadata {
			message_id: "msg-1".to_string(),
			message_type: NOTIFICATION.to_string(),
			message_timestamp: None,
			subscription_type: Some(sub_type.to_string()),
			subscription_version: Some("1".to_string()),
		},
		payload: MessagePayload {
			session: None,
			subscription: Some(SubscriptionInfo {
				id: "sub-1".to_string(),
				status: "enabled".to_string(),
				r#type: sub_type.to_string(),
				version: "1".to_string(),
				condition: json!({ "broadcaster_user_id": "42" }),
			}),
			event,
		},
	}
}

async fn normalize_ok(sub_type: &str, event: Value) -> Option<NormalizedEvent> {
	normalize(&mk_notification(sub_type, event), &FakeApi::default())
		.await
		.expect("normalize")
}

#[tokio::test]
async fn follow_reads_user() {
	let ev = normalize_ok("channel.follow", json!({ "user_id": "9", "user_name": "Viewer" })).await;
	assert_eq!(
		ev,
		Some(NormalizedEvent::Follow {
			user_id: "9".to_string(),
			user_name: "Viewer".to_string(),
		})
	);
}

#[tokio::test]
async fn plain_subscription_keeps_raw_tier() {
	let ev = normalize_ok(
		"channel.subscribe",
		json!({ "user_name": "Sub", "tier": "2000", "is_gift": false }),
	)
	.await;
	assert_eq!(
		ev,
		Some(NormalizedEvent::Subscription {
			user_name: "Sub".to_string(),
			months: 1,
			tier: 2000,
		})
	);
}

#[tokio::test]
async fn gifted_subscription_is_suppressed() {
	let ev = normalize_ok(
		"channel.subscribe",
		json!({ "user_name": "Recipient", "tier": "1000", "is_gift": true }),
	)
	.await;
	assert_eq!(ev, None);

	let msg = mk_notification(
		"channel.subscribe",
		json!({ "user_name": "Recipient", "tier": "1000", "is_gift": true }),
	);
	let decoded = decode_message(&msg, &FakeApi::default()).await.expect("decode");
	assert_eq!(decoded, Decoded::GiftedSubscriber("Recipient".to_string()));
}

#[tokio::test]
async fn subscription_message_applies_tier_modulo() {
	let ev = normalize_ok(
		"channel.subscription.message",
		json!({ "user_name": "Sub", "tier": "3000", "cumulative_months": 14 }),
	)
	.await;
	let Some(NormalizedEvent::SubscriptionWithMessage(sub)) = ev else {
		panic!("expected subscription with message, got {ev:?}");
	};
	assert_eq!(sub.tier, 0);
	assert_eq!(sub.cumulative_months, 14);
}

#[tokio::test]
async fn anonymous_gift_hides_gifter() {
	let ev = normalize_ok(
		"channel.subscription.gift",
		json!({
			"user_name": "Someone",
			"total": 5,
			"tier": "1000",
			"cumulative_total": 50,
			"is_anonymous": true,
		}),
	)
	.await;
	let Some(NormalizedEvent::GiftSubscription(gift)) = ev else {
		panic!("expected gift, got {ev:?}");
	};
	assert_eq!(gift.gifter_name, "");
	assert_eq!(gift.cumulative_total, 0);
	assert_eq!(gift.total, 5);
	assert_eq!(gift.tier, 1000);
	assert!(gift.is_anonymous);
}

#[tokio::test]
async fn named_gift_keeps_gifter() {
	let ev = normalize_ok(
		"channel.subscription.gift",
		json!({
			"user_name": "Gifter",
			"total": 2,
			"tier": "1000",
			"cumulative_total": 7,
			"is_anonymous": false,
		}),
	)
	.await;
	let Some(NormalizedEvent::GiftSubscription(gift)) = ev else {
		panic!("expected gift, got {ev:?}");
	};
	assert_eq!(gift.gifter_name, "Gifter");
	assert_eq!(gift.cumulative_total, 7);
}

#[tokio::test]
async fn raid_is_enriched_with_profile_image() {
	let api = FakeApi::default().with_user("77", "raider", "https://cdn.test/raider.png");
	let msg = mk_notification(
		"channel.raid",
		json!({
			"from_broadcaster_user_id": "77",
			"from_broadcaster_user_name": "Raider",
			"viewers": 120,
		}),
	);

	let ev = normalize(&msg, &api).await.expect("raid");
	let Some(NormalizedEvent::Raid(raid)) = ev else {
		panic!("expected raid, got {ev:?}");
	};
	assert_eq!(raid.profile_image_url, "https://cdn.test/raider.png");
	assert_eq!(raid.viewers, 120);
	assert_eq!(raid.from_broadcaster_user_name, "Raider");
}

#[tokio::test]
async fn raid_lookup_failure_aborts_event() {
	let api = FakeApi {
		fail_lookups: true,
		..FakeApi::default()
	};
	let msg = mk_notification(
		"channel.raid",
		json!({ "from_broadcaster_user_id": "77", "from_broadcaster_user_name": "Raider", "viewers": 3 }),
	);

	let err = normalize(&msg, &api).await.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::UpstreamApi);

	let err = normalize(&msg, &FakeApi::default()).await.unwrap_err();
	assert!(matches!(err, NormalizeError::UpstreamEmpty { what: "user", .. }));
}

#[tokio::test]
async fn shoutout_is_enriched_with_channel_info() {
	let api = FakeApi::default()
		.with_user("55", "friend", "https://cdn.test/friend.png")
		.with_channel("55", "Celeste", "any% attempts");
	let msg = mk_notification(
		"channel.shoutout.create",
		json!({ "to_broadcaster_user_id": "55", "to_broadcaster_user_name": "Friend" }),
	);

	let ev = normalize(&msg, &api).await.expect("shoutout");
	let Some(NormalizedEvent::ShoutoutCreate(so)) = ev else {
		panic!("expected shoutout, got {ev:?}");
	};
	assert_eq!(so.to_broadcaster_user_name, "Friend");
	assert_eq!(so.profile_image_url, "https://cdn.test/friend.png");
	assert_eq!(so.last_game_name, "Celeste");
	assert_eq!(so.last_stream_title, "any% attempts");
}

#[tokio::test]
async fn reward_without_reward_object_is_dropped_and_next_message_still_decodes() {
	let api = FakeApi::default();
	let broken = mk_notification(
		"channel.channel_points_custom_reward_redemption.add",
		json!({ "user_name": "Viewer", "user_input": "hi" }),
	);
	let next = mk_notification("channel.follow", json!({ "user_id": "1", "user_name": "Next" }));

	let err = normalize(&broken, &api).await.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Data);
	assert!(matches!(err, NormalizeError::MissingNested(ref k) if k == "reward"));

	let ev = normalize(&next, &api).await.expect("follow");
	assert!(matches!(ev, Some(NormalizedEvent::Follow { ref user_name, .. }) if user_name == "Next"));
}

#[tokio::test]
async fn reward_redemption_reads_nested_reward() {
	let ev = normalize_ok(
		"channel.channel_points_custom_reward_redemption.add",
		json!({
			"user_name": "Viewer",
			"user_input": "play a song",
			"reward": { "id": "r1", "title": "Song", "prompt": "Pick one", "cost": 500 },
		}),
	)
	.await;
	let Some(NormalizedEvent::RewardRedemption(r)) = ev else {
		panic!("expected redemption, got {ev:?}");
	};
	assert_eq!(r.reward.cost, 500);
	assert_eq!(r.reward.title, "Song");
	assert_eq!(r.user_input, "play a song");
}

#[tokio::test]
async fn charity_amount_is_scaled_by_decimal_places() {
	let ev = normalize_ok(
		"channel.charity_campaign.donate",
		json!({
			"user_name": "Donor",
			"amount": { "value": 1250, "decimal_places": 2, "currency": "USD" },
		}),
	)
	.await;
	let Some(NormalizedEvent::CharityDonation { amount, currency, .. }) = ev else {
		panic!("expected donation, got {ev:?}");
	};
	assert!((amount - 12.5).abs() < f64::EPSILON);
	assert_eq!(currency, "USD");
}

#[tokio::test]
async fn charity_without_amount_is_dropped() {
	let err = normalize(
		&mk_notification("channel.charity_campaign.donate", json!({ "user_name": "Donor" })),
		&FakeApi::default(),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, NormalizeError::MissingNested(ref k) if k == "amount"));
}

#[tokio::test]
async fn poll_begin_choices_carry_only_id_and_title() {
	let ev = normalize_ok(
		"channel.poll.begin",
		json!({
			"title": "Next game?",
			"ends_at": "2024-01-01T00:05:00Z",
			"choices": [
				{ "id": "a", "title": "Celeste", "votes": 0 },
				{ "id": "b", "title": "Hades" },
				{ "id": "c", "title": "Tunic" },
			],
		}),
	)
	.await;
	let Some(NormalizedEvent::PollBegin(poll)) = ev else {
		panic!("expected poll begin, got {ev:?}");
	};
	assert_eq!(poll.ends_at, 1_704_067_500);
	assert_eq!(poll.choices.len(), 3);
	for choice in &poll.choices {
		assert_eq!(choice.bits_votes, None);
		assert_eq!(choice.channel_points_votes, None);
		assert_eq!(choice.votes, None);
	}
	assert_eq!(poll.choices[1].title, "Hades");
}

#[tokio::test]
async fn poll_begin_with_bad_timestamp_is_dropped() {
	let err = normalize(
		&mk_notification(
			"channel.poll.begin",
			json!({ "title": "t", "ends_at": "soon", "choices": [] }),
		),
		&FakeApi::default(),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, NormalizeError::Timestamp { key: "ends_at", .. }));
}

#[tokio::test]
async fn poll_without_choices_is_dropped() {
	let err = normalize(
		&mk_notification("channel.poll.progress", json!({ "title": "t" })),
		&FakeApi::default(),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, NormalizeError::MissingNested(ref k) if k == "choices"));
}

#[tokio::test]
async fn poll_end_carries_votes_and_status() {
	let ev = normalize_ok(
		"channel.poll.end",
		json!({
			"title": "Next game?",
			"status": "completed",
			"choices": [{ "id": "a", "title": "Celeste", "bits_votes": 10, "channel_points_votes": "200", "votes": 12 }],
		}),
	)
	.await;
	let Some(NormalizedEvent::PollEnd(poll)) = ev else {
		panic!("expected poll end, got {ev:?}");
	};
	assert_eq!(poll.status, "completed");
	assert_eq!(poll.choices[0].channel_points_votes, Some(200));
	assert_eq!(poll.choices[0].votes, Some(12));
}

#[tokio::test]
async fn poll_choice_that_is_not_an_object_aborts() {
	let err = normalize(
		&mk_notification("channel.poll.progress", json!({ "title": "t", "choices": ["a"] })),
		&FakeApi::default(),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, NormalizeError::WrongShape { ref key, .. } if key == "choices[0]"));
}

#[tokio::test]
async fn prediction_begin_outcomes_have_no_progress_fields() {
	let ev = normalize_ok(
		"channel.prediction.begin",
		json!({
			"title": "Will we win?",
			"locks_at": "2024-01-01T00:01:00+00:00",
			"outcomes": [
				{ "id": "o1", "title": "Yes", "color": "blue" },
				{ "id": "o2", "title": "No", "color": "pink" },
			],
		}),
	)
	.await;
	let Some(NormalizedEvent::PredictionBegin(p)) = ev else {
		panic!("expected prediction begin, got {ev:?}");
	};
	assert_eq!(p.locks_at, 1_704_067_260);
	assert_eq!(p.outcomes.len(), 2);
	assert!(p.outcomes.iter().all(|o| o.users.is_none() && o.top_predictors.is_none()));
}

fn prediction_outcomes() -> Value {
	json!([
		{
			"id": "o1", "title": "Yes", "color": "blue", "users": 3, "channel_points": 1500,
			"top_predictors": [
				{ "user_id": "u1", "user_name": "Alpha", "channel_points_used": 1000, "channel_points_won": 2000 },
			],
		},
		{
			"id": "o2", "title": "No", "color": "pink", "users": 1, "channel_points": 100,
			"top_predictors": null,
		},
	])
}

#[tokio::test]
async fn prediction_progress_reads_top_predictors_per_outcome() {
	let ev = normalize_ok(
		"channel.prediction.progress",
		json!({ "title": "Will we win?", "outcomes": prediction_outcomes() }),
	)
	.await;
	let Some(NormalizedEvent::PredictionProgress(p)) = ev else {
		panic!("expected prediction progress, got {ev:?}");
	};
	let first = &p.outcomes[0];
	assert_eq!(first.users, Some(3));
	assert_eq!(first.channel_points, Some(1500));

	let predictors = first.top_predictors.as_ref().expect("predictors");
	assert_eq!(predictors.len(), 1);
	assert_eq!(predictors[0].user_name, "Alpha");
	assert_eq!(predictors[0].channel_points_won, None);

	assert_eq!(p.outcomes[1].top_predictors, Some(Vec::new()));
}

#[tokio::test]
async fn prediction_lock_shares_progress_shape() {
	let ev = normalize_ok(
		"channel.prediction.lock",
		json!({ "title": "Will we win?", "outcomes": prediction_outcomes() }),
	)
	.await;
	assert!(matches!(ev, Some(NormalizedEvent::PredictionLock(ref p)) if p.outcomes.len() == 2));
}

#[tokio::test]
async fn prediction_end_includes_winnings() {
	let ev = normalize_ok(
		"channel.prediction.end",
		json!({
			"title": "Will we win?",
			"status": "resolved",
			"winning_outcome_id": "o1",
			"outcomes": prediction_outcomes(),
		}),
	)
	.await;
	let Some(NormalizedEvent::PredictionEnd(p)) = ev else {
		panic!("expected prediction end, got {ev:?}");
	};
	assert_eq!(p.status, "resolved");
	assert_eq!(p.winning_outcome_id, "o1");
	let predictors = p.outcomes[0].top_predictors.as_ref().expect("predictors");
	assert_eq!(predictors[0].channel_points_won, Some(2000));
}

#[tokio::test]
async fn missing_top_predictors_yields_empty_list() {
	let ev = normalize_ok(
		"channel.prediction.progress",
		json!({
			"title": "t",
			"outcomes": [{ "id": "o1", "title": "Yes", "color": "blue", "users": 0, "channel_points": 0 }],
		}),
	)
	.await;
	let Some(NormalizedEvent::PredictionProgress(p)) = ev else {
		panic!("expected prediction progress, got {ev:?}");
	};
	assert_eq!(p.outcomes[0].top_predictors, Some(Vec::new()));
}

#[tokio::test]
async fn unknown_subscription_type_is_ignored() {
	let ev = normalize_ok("channel.chat.message", json!({ "text": "hi" })).await;
	assert_eq!(ev, None);
}

#[tokio::test]
async fn non_notifications_produce_nothing() {
	let mut msg = mk_notification("channel.follow", json!({ "user_id": "1", "user_name": "x" }));
	msg.metadata.message_type = REVOCATION.to_string();
	assert_eq!(normalize(&msg, &FakeApi::default()).await.unwrap(), None);

	msg.metadata.message_type = "session_keepalive".to_string();
	assert_eq!(normalize(&msg, &FakeApi::default()).await.unwrap(), None);
}

#[tokio::test]
async fn notification_without_subscription_is_ignored() {
	let mut msg = mk_notification("channel.follow", json!({ "user_id": "1", "user_name": "x" }));
	msg.payload.subscription = None;
	msg.metadata.subscription_type = None;
	assert_eq!(normalize(&msg, &FakeApi::default()).await.unwrap(), None);
}

#[tokio::test]
async fn notification_without_event_is_a_protocol_error() {
	let mut msg = mk_notification("channel.follow", json!({}));
	msg.payload.event = None;
	let err = normalize(&msg, &FakeApi::default()).await.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn mistyped_scalars_fall_back_to_zero_values() {
	let ev = normalize_ok(
		"channel.subscription.message",
		json!({ "user_name": ["x"], "tier": "gold", "cumulative_months": null }),
	)
	.await;
	let Some(NormalizedEvent::SubscriptionWithMessage(sub)) = ev else {
		panic!("expected subscription with message, got {ev:?}");
	};
	assert_eq!(sub.user_name, "");
	assert_eq!(sub.tier, 0);
	assert_eq!(sub.cumulative_months, 0);
}
