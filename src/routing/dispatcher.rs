//! Matches incoming messages against the registry and runs the selected
//! handlers as independent tasks.

use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arcstr::ArcStr;
use bytes::Bytes;
use futures::FutureExt;
use lru::LruCache;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::error::{HandlerError, panic_message};
use super::handler::MessageHandler;
use super::payload::Payload;
use super::subscription::{Subscription, SubscriptionId};
use super::subscription_registry::{RegistrySnapshot, SubscriptionRegistry};
use crate::topic::{TopicParams, TopicPath, validation};

/// A subscription selected for a message, with the parameters its pattern
/// extracted from the topic.
#[derive(Debug, Clone)]
pub struct MatchResult {
	pub subscription: Arc<Subscription>,
	pub params: TopicParams,
}

/// Cached selection for one topic: registry indices plus bindings.
type CachedSelection = Arc<[(usize, TopicParams)]>;

/// LRU of topic -> selection, valid for one registry size.
///
/// The registry is append-only, so its length identifies its contents.
struct MatchCache {
	registry_len: usize,
	entries: LruCache<ArcStr, CachedSelection>,
}

/// Running handler tasks. Once closed, nothing new is spawned.
#[derive(Default)]
struct InFlight {
	tasks: JoinSet<()>,
	closed: bool,
}

/// The dispatch engine.
///
/// Stateless per message apart from the match cache and the set of
/// handler tasks still running, which shutdown drains.
pub struct Dispatcher {
	registry: Arc<SubscriptionRegistry>,
	in_flight: Mutex<InFlight>,
	match_cache: Option<Mutex<MatchCache>>,
}

impl Dispatcher {
	/// Creates a dispatcher over `registry`. A `topic_cache_size` of zero
	/// disables match caching.
	pub fn new(
		registry: Arc<SubscriptionRegistry>,
		topic_cache_size: usize,
	) -> Self {
		let match_cache = NonZeroUsize::new(topic_cache_size).map(|cap| {
			Mutex::new(MatchCache {
				registry_len: 0,
				entries: LruCache::new(cap),
			})
		});
		Self {
			registry,
			in_flight: Mutex::new(InFlight::default()),
			match_cache,
		}
	}

	pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
		&self.registry
	}

	/// Subscriptions to invoke for `topic`, in registration order.
	///
	/// Non-fallback matches win; fallback subscriptions are selected only
	/// when nothing else matched, and then all of them are.
	pub fn select(&self, topic: &TopicPath) -> Vec<MatchResult> {
		let snapshot = self.registry.all();

		let Some(cache) = &self.match_cache else {
			return Self::resolve(&snapshot, &Self::compute(&snapshot, topic));
		};

		let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
		if cache.registry_len != snapshot.len() {
			cache.entries.clear();
			cache.registry_len = snapshot.len();
		}
		let selection = match cache.entries.get(&topic.path) {
			| Some(hit) => Arc::clone(hit),
			| None => {
				let computed: CachedSelection =
					Self::compute(&snapshot, topic).into();
				cache.entries.put(topic.path(), Arc::clone(&computed));
				computed
			}
		};
		drop(cache);
		Self::resolve(&snapshot, &selection)
	}

	fn compute(
		snapshot: &RegistrySnapshot,
		topic: &TopicPath,
	) -> Vec<(usize, TopicParams)> {
		let candidates: Vec<(usize, TopicParams)> = snapshot
			.iter()
			.enumerate()
			.filter_map(|(index, subscription)| {
				subscription
					.pattern()
					.matches(topic)
					.map(|params| (index, params))
			})
			.collect();

		let (secondary, primary): (Vec<_>, Vec<_>) = candidates
			.into_iter()
			.partition(|(index, _)| snapshot[*index].is_fallback());

		if primary.is_empty() { secondary } else { primary }
	}

	fn resolve(
		snapshot: &RegistrySnapshot,
		selection: &[(usize, TopicParams)],
	) -> Vec<MatchResult> {
		selection
			.iter()
			.map(|(index, params)| MatchResult {
				subscription: Arc::clone(&snapshot[*index]),
				params: params.clone(),
			})
			.collect()
	}

	/// Dispatches one message and returns how many handlers were scheduled.
	///
	/// Never fails: invalid topics, unmatched messages and messages arriving
	/// after [`close`](Self::close) are dropped. Conversion errors fall back
	/// to the raw payload, and handler failures are logged from inside the
	/// handler task. Must be called from within a Tokio runtime.
	pub fn dispatch(&self, topic: impl Into<ArcStr>, payload: Bytes) -> usize {
		let topic = topic.into();
		if let Err(err) = validation::validate_topic_path(&topic) {
			debug!(error = %err, "Dropping message with invalid topic");
			return 0;
		}

		let topic_path = TopicPath::new(topic.clone());
		let selected = self.select(&topic_path);
		if selected.is_empty() {
			debug!(
				topic = %topic,
				"No subscription matches topic, message dropped"
			);
			return 0;
		}

		let mut in_flight = self.lock_in_flight();
		if in_flight.closed {
			debug!(topic = %topic, "Dispatcher closed, message dropped");
			return 0;
		}
		Self::reap_finished(&mut in_flight.tasks);

		let scheduled = selected.len();
		for MatchResult {
			subscription,
			params,
		} in selected
		{
			let (converted, conversion_error) =
				Payload::convert(&payload, subscription.raw_payload());
			if let Some(err) = conversion_error {
				warn!(
					subscription_id = %subscription.id(),
					topic = %topic,
					pattern = %subscription.raw_pattern(),
					error = %err,
					"Payload is not valid JSON, delivering raw payload"
				);
			}
			debug!(
				subscription_id = %subscription.id(),
				topic = %topic,
				pattern = %subscription.raw_pattern(),
				params = %params,
				"Scheduling handler"
			);
			in_flight.tasks.spawn(invoke(
				subscription.id(),
				subscription.handler(),
				topic.clone(),
				subscription.raw_pattern(),
				converted,
				params,
			));
		}
		scheduled
	}

	/// Number of handler tasks not yet collected.
	pub fn in_flight(&self) -> usize {
		let mut in_flight = self.lock_in_flight();
		Self::reap_finished(&mut in_flight.tasks);
		in_flight.tasks.len()
	}

	/// Stops scheduling handlers; later dispatches drop their message.
	///
	/// Takes the same lock as [`dispatch`](Self::dispatch), so once this
	/// returns no dispatch can add a task that a following
	/// [`drain`](Self::drain) would miss.
	pub fn close(&self) {
		self.lock_in_flight().closed = true;
	}

	pub fn is_closed(&self) -> bool {
		self.lock_in_flight().closed
	}

	/// Waits for running handlers for at most `grace`, then aborts the rest.
	///
	/// Returns the number of handlers that were aborted. Handlers scheduled
	/// while this runs are left for the next call unless the dispatcher was
	/// closed first.
	pub async fn drain(&self, grace: Duration) -> usize {
		let mut tasks = std::mem::take(&mut self.lock_in_flight().tasks);
		if tasks.is_empty() {
			return 0;
		}
		debug!(pending = tasks.len(), "Waiting for running handlers");

		let finished = tokio::time::timeout(grace, async {
			while tasks.join_next().await.is_some() {}
		})
		.await;
		if finished.is_ok() {
			return 0;
		}

		let aborted = tasks.len();
		warn!(
			aborted = aborted,
			grace_ms = grace.as_millis() as u64,
			"Handlers still running after grace period, aborting"
		);
		tasks.shutdown().await;
		aborted
	}

	fn lock_in_flight(&self) -> MutexGuard<'_, InFlight> {
		self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn reap_finished(in_flight: &mut JoinSet<()>) {
		while let Some(res) = in_flight.try_join_next() {
			if let Err(err) = res {
				debug!(error = %err, "Handler task ended abnormally");
			}
		}
	}
}

impl std::fmt::Debug for Dispatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Dispatcher")
			.field("subscriptions", &self.registry.len())
			.field("match_cache", &self.match_cache.is_some())
			.field("closed", &self.is_closed())
			.finish_non_exhaustive()
	}
}

/// Runs one handler, containing its error or panic.
async fn invoke(
	id: SubscriptionId,
	handler: Arc<dyn MessageHandler>,
	topic: ArcStr,
	pattern: ArcStr,
	payload: Payload,
	params: TopicParams,
) {
	let call = {
		let topic = topic.clone();
		AssertUnwindSafe(async move {
			handler.call(topic, payload, params).await
		})
		.catch_unwind()
	};
	let failure = match call.await {
		| Ok(Ok(())) => return,
		| Ok(Err(source)) => HandlerError::Failed {
			topic,
			pattern,
			source,
		},
		| Err(panic) => HandlerError::Panicked {
			topic,
			pattern,
			details: panic_message(panic.as_ref()),
		},
	};
	error!(
		subscription_id = %id,
		topic = %failure.topic(),
		pattern = %failure.pattern(),
		error = %failure,
		"Handler failed"
	);
}

#[cfg(test)]
mod tests {
	use tokio::sync::mpsc;

	use super::*;
	use crate::routing::handler::{HandlerResult, sync_handler};
	use crate::routing::subscription::SubscriptionOptions;
	use crate::topic::TopicPatternPath;

	const PATTERNS: &[(&str, bool)] = &[
		("home/+room+/temp", false),
		("home/#", true),
		("home/kitchen/temp", false),
		("home/+/+", false),
		("/home/+room+", false),
	];

	fn noop() -> Arc<dyn MessageHandler> {
		Arc::new(sync_handler(|_, _, _| HandlerResult::Ok(())))
	}

	fn registry(patterns: &[(&str, bool)]) -> Arc<SubscriptionRegistry> {
		let registry = Arc::new(SubscriptionRegistry::new());
		for (pattern, fallback) in patterns {
			registry.register(
				TopicPatternPath::new_from_string(*pattern).unwrap(),
				SubscriptionOptions::new().fallback(*fallback),
				noop(),
			);
		}
		registry
	}

	fn summary(selected: &[MatchResult]) -> Vec<(usize, TopicParams)> {
		selected
			.iter()
			.map(|m| (m.subscription.id().index(), m.params.clone()))
			.collect()
	}

	fn indices(selected: &[(usize, TopicParams)]) -> Vec<usize> {
		selected.iter().map(|(index, _)| *index).collect()
	}

	#[test]
	fn test_repeated_topic_is_served_from_cache() {
		let dispatcher = Dispatcher::new(registry(PATTERNS), 100);
		let topic = TopicPath::new("home/kitchen/temp");

		let first = summary(&dispatcher.select(&topic));
		let second = summary(&dispatcher.select(&topic));
		assert_eq!(first, second);
		assert_eq!(indices(&first), [0, 2, 3]);
		assert_eq!(first[0].1.get("room"), Some("kitchen"));
		assert_eq!(first[2].1.values(), ["kitchen", "temp"]);

		let cache = dispatcher.match_cache.as_ref().unwrap();
		let cache = cache.lock().unwrap();
		assert_eq!(cache.entries.len(), 1);
		assert!(cache.entries.contains(&topic.path));
	}

	#[test]
	fn test_registration_invalidates_cached_selection() {
		let registry = registry(PATTERNS);
		let dispatcher = Dispatcher::new(Arc::clone(&registry), 100);
		let topic = TopicPath::new("home/garage/door");

		assert_eq!(indices(&summary(&dispatcher.select(&topic))), [1]);
		registry.register(
			TopicPatternPath::new_from_string("home/garage/+").unwrap(),
			SubscriptionOptions::new(),
			noop(),
		);
		assert_eq!(indices(&summary(&dispatcher.select(&topic))), [5]);
	}

	#[test]
	fn test_cache_does_not_change_selection() {
		let registry = registry(PATTERNS);
		let cached = Dispatcher::new(Arc::clone(&registry), 2);
		let uncached = Dispatcher::new(registry, 0);
		assert!(uncached.match_cache.is_none());

		let topics = [
			"home/kitchen/temp",
			"home/garage/door/open",
			"/home/attic",
			"office",
			"home/kitchen/temp",
			"/home/attic",
		];
		for topic in topics {
			let topic = TopicPath::new(topic);
			for _ in 0 .. 2 {
				assert_eq!(
					summary(&cached.select(&topic)),
					summary(&uncached.select(&topic)),
					"selection for {topic}"
				);
			}
		}
		assert_eq!(
			indices(&summary(&uncached.select(&TopicPath::new("/home/attic")))),
			[4]
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_slow_handler_does_not_delay_others() {
		let registry = Arc::new(SubscriptionRegistry::new());
		let (tx, mut rx) = mpsc::unbounded_channel();

		let slow_tx = tx.clone();
		let slow = move |_: ArcStr, _: Payload, _: TopicParams| {
			let tx = slow_tx.clone();
			async move {
				tokio::time::sleep(Duration::from_secs(60)).await;
				tx.send("slow").map_err(|_| "receiver dropped")
			}
		};
		let fast = sync_handler(move |_, _, _| {
			tx.send("fast").map_err(|_| "receiver dropped")
		});
		let handlers: [Arc<dyn MessageHandler>; 2] =
			[Arc::new(slow), Arc::new(fast)];
		for handler in handlers {
			registry.register(
				TopicPatternPath::new_from_string("jobs/+id+").unwrap(),
				SubscriptionOptions::new().raw_payload(true),
				handler,
			);
		}
		let dispatcher = Dispatcher::new(registry, 16);

		assert_eq!(dispatcher.dispatch("jobs/1", Bytes::new()), 2);
		let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
			.await
			.unwrap();
		assert_eq!(first, Some("fast"));
		assert_eq!(dispatcher.in_flight(), 1);

		assert_eq!(dispatcher.drain(Duration::from_millis(100)).await, 1);
		assert!(rx.try_recv().is_err());
		assert_eq!(dispatcher.in_flight(), 0);
	}

	#[tokio::test]
	async fn test_closed_dispatcher_drops_messages() {
		let dispatcher = Dispatcher::new(registry(PATTERNS), 0);
		assert_eq!(dispatcher.dispatch("home/kitchen/temp", Bytes::new()), 3);

		dispatcher.close();
		assert!(dispatcher.is_closed());
		assert_eq!(dispatcher.dispatch("home/kitchen/temp", Bytes::new()), 0);
		assert_eq!(dispatcher.drain(Duration::from_secs(1)).await, 0);
		assert_eq!(dispatcher.in_flight(), 0);
	}
}
