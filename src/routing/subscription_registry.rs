//! Ordered, append-only collection of subscriptions.

use std::sync::{Arc, PoisonError, RwLock};

use arcstr::ArcStr;
use rumqttc::QoS;

use super::handler::MessageHandler;
use super::subscription::{Subscription, SubscriptionId, SubscriptionOptions};
use crate::topic::TopicPatternPath;

/// Immutable view of the registry at one point in time
pub type RegistrySnapshot = Arc<Vec<Arc<Subscription>>>;

/// Registered subscriptions in registration order.
///
/// Registration swaps in a new snapshot, so dispatches already iterating an
/// older snapshot are never affected. Duplicate patterns are kept: each
/// registration is matched and invoked on its own.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
	entries: RwLock<RegistrySnapshot>,
}

impl SubscriptionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends a subscription and returns it.
	pub fn register(
		&self,
		pattern: TopicPatternPath,
		options: SubscriptionOptions,
		handler: Arc<dyn MessageHandler>,
	) -> Arc<Subscription> {
		self.register_with_filter(
			pattern,
			options,
			handler,
			QoS::AtMostOnce,
			|_, _| {},
		)
	}

	/// Appends a subscription, calling `on_upgrade` with its broker filter
	/// when the registration raises the QoS that filter needs.
	///
	/// A filter seen for the first time always counts as raised. The
	/// callback runs under the registry's write lock, so concurrent
	/// registrations report upgrades one at a time in increasing QoS order.
	/// It must not block or touch the registry.
	pub fn register_with_filter(
		&self,
		pattern: TopicPatternPath,
		options: SubscriptionOptions,
		handler: Arc<dyn MessageHandler>,
		default_qos: QoS,
		on_upgrade: impl FnOnce(&ArcStr, QoS),
	) -> Arc<Subscription> {
		let mut entries =
			self.entries.write().unwrap_or_else(PoisonError::into_inner);
		let filter = pattern.mqtt_pattern();
		let previous = max_filter_qos(&entries, &filter, default_qos);
		let qos = options.qos.unwrap_or(default_qos);
		if previous.is_none_or(|prev| qos as u8 > prev as u8) {
			on_upgrade(&filter, qos);
		}

		let id = SubscriptionId(entries.len());
		let subscription =
			Arc::new(Subscription::new(id, pattern, options, handler));

		let mut next = Vec::with_capacity(entries.len() + 1);
		next.extend(entries.iter().cloned());
		next.push(Arc::clone(&subscription));
		*entries = Arc::new(next);

		subscription
	}

	/// Current subscriptions, first registered first.
	pub fn all(&self) -> RegistrySnapshot {
		Arc::clone(
			&self.entries.read().unwrap_or_else(PoisonError::into_inner),
		)
	}

	pub fn len(&self) -> usize {
		self.all().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Highest QoS requested so far for a broker filter.
	pub fn filter_qos(&self, filter: &str, default_qos: QoS) -> Option<QoS> {
		max_filter_qos(&self.all(), filter, default_qos)
	}

	/// Unique broker filters with the highest QoS requested for each,
	/// in order of first registration.
	pub fn filters(&self, default_qos: QoS) -> Vec<(ArcStr, QoS)> {
		let mut result: Vec<(ArcStr, QoS)> = Vec::new();
		for subscription in self.all().iter() {
			let filter = subscription.pattern().mqtt_pattern();
			let qos = subscription.options().qos.unwrap_or(default_qos);
			match result.iter_mut().find(|(f, _)| *f == filter) {
				| Some((_, existing_qos)) => {
					if qos as u8 > *existing_qos as u8 {
						*existing_qos = qos;
					}
				}
				| None => result.push((filter, qos)),
			}
		}
		result
	}
}

fn max_filter_qos(
	entries: &[Arc<Subscription>],
	filter: &str,
	default_qos: QoS,
) -> Option<QoS> {
	entries
		.iter()
		.filter(|s| s.pattern().mqtt_pattern().as_str() == filter)
		.map(|s| s.options().qos.unwrap_or(default_qos))
		.max_by_key(|qos| *qos as u8)
}
