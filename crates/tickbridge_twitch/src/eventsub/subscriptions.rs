#![forbid(unsafe_code)]

use serde_json::{Value, json};
use tickbridge_domain::{ErrorKind, EventType, Subscription};
use tracing::{debug, info, warn};

use crate::helix::TwitchApi;

/// Shape of the `condition` object a subscription type expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionTemplate {
	Broadcaster,
	/// The broadcaster acts as their own moderator.
	BroadcasterAndModerator,
	/// Incoming raids target the broadcaster.
	ToBroadcaster,
}

impl ConditionTemplate {
	pub fn for_event(event_type: EventType) -> Self {
		match event_type {
			EventType::Follow | EventType::ShoutoutCreate => ConditionTemplate::BroadcasterAndModerator,
			EventType::Raid => ConditionTemplate::ToBroadcaster,
			_ => ConditionTemplate::Broadcaster,
		}
	}

	pub fn render(self, broadcaster_id: &str) -> Value {
		match self {
			ConditionTemplate::Broadcaster => json!({ "broadcaster_user_id": broadcaster_id }),
			ConditionTemplate::BroadcasterAndModerator => json!({
				"broadcaster_user_id": broadcaster_id,
				"moderator_user_id": broadcaster_id,
			}),
			ConditionTemplate::ToBroadcaster => json!({ "to_broadcaster_user_id": broadcaster_id }),
		}
	}
}

/// Outcome of one registration pass.
#[derive(Debug, Default)]
pub struct RegistrationReport {
	pub created: Vec<Subscription>,
	pub failed: Vec<(EventType, String)>,
}

impl RegistrationReport {
	pub fn is_complete(&self) -> bool {
		self.failed.is_empty()
	}
}

/// Create one subscription per entry of [`EventType::ALL`] against `session_id`.
///
/// Calls are independent; a failure is logged and the remaining types are still attempted.
pub async fn register(api: &dyn TwitchApi, session_id: &str, broadcaster_id: &str) -> RegistrationReport {
	let mut report = RegistrationReport::default();

	for event_type in EventType::ALL {
		let condition = ConditionTemplate::for_event(event_type).render(broadcaster_id);

		match api.create_subscription(event_type, session_id, condition).await {
			Ok(sub) => {
				debug!(event_type = %event_type, subscription_id = %sub.id, status = %sub.status, "created eventsub subscription");
				metrics::counter!("tickbridge_subscriptions_created_total").increment(1);
				report.created.push(sub);
			}
			Err(e) => {
				warn!(
					event_type = %event_type,
					kind = %ErrorKind::UpstreamApi,
					error = %format!("{e:#}"),
					"failed to create eventsub subscription"
				);
				metrics::counter!("tickbridge_subscriptions_failed_total").increment(1);
				report.failed.push((event_type, format!("{e:#}")));
			}
		}
	}

	info!(
		session_id = %session_id,
		created = report.created.len(),
		failed = report.failed.len(),
		"eventsub subscriptions registered"
	);
	report
}
