#![forbid(unsafe_code)]

use std::mem;

use parking_lot::Mutex;

/// Best-effort value fetched from the REST API rather than observed live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoUpdate {
	LatestFollower(String),
	LatestSubscriber(String),
}

/// Everything queued since the previous drain.
#[derive(Debug)]
pub struct Drained<T> {
	pub events: Vec<T>,
	pub updates: Vec<InfoUpdate>,
}

impl<T> Drained<T> {
	pub fn is_empty(&self) -> bool {
		self.events.is_empty() && self.updates.is_empty()
	}
}

#[derive(Debug)]
struct Buffers<T> {
	events: Vec<T>,
	updates: Vec<InfoUpdate>,
}

/// Mailbox between the network worker and the host tick.
///
/// The lock covers only the push and the swap in `drain_all`.
#[derive(Debug)]
pub struct EventQueue<T> {
	inner: Mutex<Buffers<T>>,
}

impl<T> Default for EventQueue<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> EventQueue<T> {
	pub fn new() -> Self {
		Self {
			inner: Mutex::new(Buffers {
				events: Vec::new(),
				updates: Vec::new(),
			}),
		}
	}

	pub fn append(&self, event: T) {
		self.inner.lock().events.push(event);
	}

	pub fn push_update(&self, update: InfoUpdate) {
		self.inner.lock().updates.push(update);
	}

	/// Take both buffers, leaving them empty for later appends.
	pub fn drain_all(&self) -> Drained<T> {
		let mut inner = self.inner.lock();
		Drained {
			events: mem::take(&mut inner.events),
			updates: mem::take(&mut inner.updates),
		}
	}

	pub fn len(&self) -> usize {
		self.inner.lock().events.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Latest follower and subscriber as the host sees them.
///
/// Live events always overwrite; snapshot updates only fill a field that is still empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSnapshot {
	pub latest_follower: String,
	pub latest_subscriber: String,
}

impl ChannelSnapshot {
	/// Returns whether the update was applied.
	pub fn apply_update(&mut self, update: InfoUpdate) -> bool {
		let (field, value) = match update {
			InfoUpdate::LatestFollower(v) => (&mut self.latest_follower, v),
			InfoUpdate::LatestSubscriber(v) => (&mut self.latest_subscriber, v),
		};
		if !field.is_empty() {
			return false;
		}
		*field = value;
		true
	}

	pub fn record_follower(&mut self, user_name: &str) {
		self.latest_follower = user_name.to_string();
	}

	pub fn record_subscriber(&mut self, user_name: &str) {
		self.latest_subscriber = user_name.to_string();
	}
}
