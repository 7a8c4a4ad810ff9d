use std::fmt::{self, Display};
use std::sync::Arc;

use arcstr::ArcStr;
use rumqttc::QoS;

use super::handler::MessageHandler;
use crate::topic::TopicPatternPath;

/// A subscription identifier.
///
/// Assigned in registration order; useful for correlating log records.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) usize);

impl SubscriptionId {
	/// Position of the subscription in registration order.
	pub fn index(&self) -> usize {
		self.0
	}
}

impl Display for SubscriptionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "SubscriptionId({})", self.0)
	}
}

/// Per-subscription options given at registration time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionOptions {
	/// Deliver the payload as received instead of decoding it as JSON
	pub raw_payload: bool,
	/// Only invoked when no non-fallback subscription matches the topic
	pub fallback: bool,
	/// Requested QoS; the router's default applies when unset
	pub qos: Option<QoS>,
}

impl SubscriptionOptions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Skip JSON decoding.
	pub fn raw_payload(self, raw_payload: bool) -> Self {
		Self {
			raw_payload,
			..self
		}
	}

	/// Mark as fallback.
	pub fn fallback(self, fallback: bool) -> Self {
		Self { fallback, ..self }
	}

	/// Set QoS level
	pub fn qos(self, qos: QoS) -> Self {
		Self {
			qos: Some(qos),
			..self
		}
	}
}

/// A registered subscription. Never mutated after registration.
pub struct Subscription {
	id: SubscriptionId,
	pattern: TopicPatternPath,
	options: SubscriptionOptions,
	handler: Arc<dyn MessageHandler>,
}

impl Subscription {
	pub(crate) fn new(
		id: SubscriptionId,
		pattern: TopicPatternPath,
		options: SubscriptionOptions,
		handler: Arc<dyn MessageHandler>,
	) -> Self {
		Self {
			id,
			pattern,
			options,
			handler,
		}
	}

	pub fn id(&self) -> SubscriptionId {
		self.id
	}

	/// Compiled pattern.
	pub fn pattern(&self) -> &TopicPatternPath {
		&self.pattern
	}

	/// Pattern as it was registered.
	pub fn raw_pattern(&self) -> ArcStr {
		self.pattern.topic_pattern()
	}

	pub fn options(&self) -> &SubscriptionOptions {
		&self.options
	}

	pub fn is_fallback(&self) -> bool {
		self.options.fallback
	}

	pub fn raw_payload(&self) -> bool {
		self.options.raw_payload
	}

	pub(crate) fn handler(&self) -> Arc<dyn MessageHandler> {
		Arc::clone(&self.handler)
	}
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("pattern", &self.pattern.topic_pattern())
			.field("options", &self.options)
			.finish_non_exhaustive()
	}
}
