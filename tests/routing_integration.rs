//! Routing tests driving `MqttRouter` without a broker.
//!
//! Messages are fed through `MqttRouter::dispatch`, handlers report through
//! an unbounded channel and `trigger_shutdown` waits for them to finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use mqtt_router::prelude::*;
use mqtt_router::{MessageHandler, sync_handler};
use serde::Deserialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug)]
struct Delivery {
	label: &'static str,
	topic: ArcStr,
	payload: Payload,
	params: TopicParams,
}

fn recorder(
	tx: &UnboundedSender<Delivery>,
	label: &'static str,
) -> impl MessageHandler {
	let tx = tx.clone();
	sync_handler(move |topic, payload, params| {
		tx.send(Delivery {
			label,
			topic,
			payload,
			params,
		})
		.map_err(|_| "receiver dropped")
	})
}

fn channel() -> (UnboundedSender<Delivery>, UnboundedReceiver<Delivery>) {
	mpsc::unbounded_channel()
}

/// Waits for every scheduled handler, then returns what they reported.
async fn settle(
	router: &MqttRouter,
	rx: &mut UnboundedReceiver<Delivery>,
) -> Vec<Delivery> {
	router.dispatcher().drain(Duration::from_secs(5)).await;
	let mut delivered = Vec::new();
	while let Ok(delivery) = rx.try_recv() {
		delivered.push(delivery);
	}
	delivered
}

fn labels(deliveries: &[Delivery]) -> Vec<&'static str> {
	let mut labels: Vec<_> = deliveries.iter().map(|d| d.label).collect();
	labels.sort_unstable();
	labels
}

#[tokio::test]
async fn test_non_fallback_match_suppresses_fallbacks() {
	let router = MqttRouter::new();
	let (tx, mut rx) = channel();
	router
		.route("weather/+channel+/data")
		.handle(recorder(&tx, "primary"))
		.unwrap();
	router
		.route("weather/#")
		.fallback(true)
		.handle(recorder(&tx, "fallback-1"))
		.unwrap();
	router
		.route("weather/+/+")
		.fallback(true)
		.handle(recorder(&tx, "fallback-2"))
		.unwrap();

	assert_eq!(router.dispatch("weather/oslo/data", Bytes::from("1")), 1);
	let delivered = settle(&router, &mut rx).await;

	assert_eq!(labels(&delivered), ["primary"]);
	assert_eq!(delivered[0].params.get("channel"), Some("oslo"));
}

#[tokio::test]
async fn test_all_fallbacks_run_when_nothing_else_matches() {
	let router = MqttRouter::new();
	let (tx, mut rx) = channel();
	router
		.route("weather/+channel+/data")
		.handle(recorder(&tx, "primary"))
		.unwrap();
	router
		.route("weather/#")
		.fallback(true)
		.handle(recorder(&tx, "fallback-1"))
		.unwrap();
	router
		.route("weather/+/+")
		.fallback(true)
		.handle(recorder(&tx, "fallback-2"))
		.unwrap();

	assert_eq!(router.dispatch("weather/oslo/forecast", Bytes::new()), 2);
	let delivered = settle(&router, &mut rx).await;

	assert_eq!(labels(&delivered), ["fallback-1", "fallback-2"]);
	let positional = delivered
		.iter()
		.find(|d| d.label == "fallback-2")
		.unwrap();
	assert_eq!(positional.params.values(), ["oslo", "forecast"]);
}

#[tokio::test]
async fn test_unmatched_topic_is_dropped() {
	let router = MqttRouter::new();
	let (tx, mut rx) = channel();
	router.subscribe("a/#", recorder(&tx, "a")).unwrap();

	assert_eq!(router.dispatch("b/a", Bytes::from("{}")), 0);
	assert!(settle(&router, &mut rx).await.is_empty());
}

#[tokio::test]
async fn test_multi_wildcard_matches_parent_level() {
	let router = MqttRouter::new();
	let (tx, mut rx) = channel();
	router.subscribe("a/#", recorder(&tx, "a")).unwrap();

	assert_eq!(router.dispatch("a", Bytes::new()), 1);
	assert_eq!(router.dispatch("a/b/c", Bytes::new()), 1);
	let delivered = settle(&router, &mut rx).await;
	let mut topics: Vec<_> =
		delivered.iter().map(|d| d.topic.to_string()).collect();
	topics.sort();
	assert_eq!(topics, ["a", "a/b/c"]);
}

#[tokio::test]
async fn test_invalid_topics_are_dropped() {
	let router = MqttRouter::new();
	let (tx, mut rx) = channel();
	router.subscribe("#", recorder(&tx, "all")).unwrap();

	assert_eq!(router.dispatch("", Bytes::new()), 0);
	assert_eq!(router.dispatch("a/+/b", Bytes::new()), 0);
	assert_eq!(router.dispatch("a/#", Bytes::new()), 0);
	assert_eq!(router.dispatch("a\0b", Bytes::new()), 0);
	assert!(settle(&router, &mut rx).await.is_empty());
}

#[tokio::test]
async fn test_failing_handlers_do_not_affect_siblings() {
	let router = MqttRouter::new();
	let (tx, mut rx) = channel();
	router
		.subscribe(
			"jobs/+",
			sync_handler(|_, _, _| Err::<(), _>("handler failed")),
		)
		.unwrap();
	router
		.subscribe(
			"jobs/+",
			|_topic: ArcStr, _payload: Payload, _params: TopicParams| async {
				let fail = true;
				if fail {
					panic!("handler panicked");
				}
				Ok::<_, BoxError>(())
			},
		)
		.unwrap();
	router.subscribe("jobs/+", recorder(&tx, "healthy")).unwrap();

	assert_eq!(router.dispatch("jobs/1", Bytes::new()), 3);
	assert_eq!(router.dispatch("jobs/2", Bytes::new()), 3);
	let delivered = settle(&router, &mut rx).await;

	assert_eq!(labels(&delivered), ["healthy", "healthy"]);
}

#[tokio::test]
async fn test_payload_conversion() {
	let router = MqttRouter::new();
	let (tx, mut rx) = channel();
	router.subscribe("json/+", recorder(&tx, "json")).unwrap();
	router
		.route("raw/+")
		.raw_payload(true)
		.handle(recorder(&tx, "raw"))
		.unwrap();

	router.dispatch("json/valid", Bytes::from(r#"{"t": 21.5}"#));
	router.dispatch("json/invalid", Bytes::from_static(b"\xff not json"));
	router.dispatch("raw/valid", Bytes::from(r#"{"t": 21.5}"#));
	let delivered = settle(&router, &mut rx).await;
	assert_eq!(delivered.len(), 3);

	let by_topic = |topic: &str| {
		delivered
			.iter()
			.find(|d| d.topic.as_str() == topic)
			.map(|d| &d.payload)
			.unwrap()
	};
	assert_eq!(
		by_topic("json/valid"),
		&Payload::Json(serde_json::json!({"t": 21.5}))
	);
	assert_eq!(
		by_topic("json/invalid"),
		&Payload::Raw(Bytes::from_static(b"\xff not json"))
	);
	assert_eq!(
		by_topic("raw/valid"),
		&Payload::Raw(Bytes::from(r#"{"t": 21.5}"#))
	);
}

#[tokio::test]
async fn test_typed_json_access_in_async_handler() {
	#[derive(Debug, Deserialize, PartialEq)]
	struct Reading {
		temperature: f64,
	}

	let router = MqttRouter::new();
	let (tx, mut rx) = mpsc::unbounded_channel();
	router
		.route("sensors/+id+/reading")
		.handle(
			move |_topic: ArcStr, payload: Payload, params: TopicParams| {
				let tx = tx.clone();
				async move {
					tokio::task::yield_now().await;
					let reading: Reading = payload.json_as()?;
					let id = params.get("id").unwrap_or_default().to_string();
					tx.send((id, reading))?;
					Ok::<_, BoxError>(())
				}
			},
		)
		.unwrap();

	router.dispatch(
		"sensors/s1/reading",
		Bytes::from(r#"{"temperature": 3.5}"#),
	);
	router.dispatch("sensors/s2/reading", Bytes::from("not json"));
	router.dispatcher().drain(Duration::from_secs(5)).await;

	let (id, reading) = rx.try_recv().unwrap();
	assert_eq!(id, "s1");
	assert_eq!(reading, Reading { temperature: 3.5 });
	assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_identical_patterns_are_both_invoked() {
	let router = MqttRouter::new();
	let (tx, mut rx) = channel();
	router.subscribe("x/y", recorder(&tx, "first")).unwrap();
	router.subscribe("x/y", recorder(&tx, "second")).unwrap();

	assert_eq!(router.dispatch("x/y", Bytes::new()), 2);
	let delivered = settle(&router, &mut rx).await;
	assert_eq!(labels(&delivered), ["first", "second"]);
	assert_eq!(router.subscription_filters().len(), 1);
}

#[tokio::test]
async fn test_parameter_bindings() {
	let router = MqttRouter::new();
	let (tx, mut rx) = channel();
	router.subscribe("devices/+/status", recorder(&tx, "bare")).unwrap();
	router
		.subscribe("devices/+id+/status", recorder(&tx, "named"))
		.unwrap();
	router
		.subscribe("sensors/+/data/+/type/#", recorder(&tx, "positional"))
		.unwrap();

	router.dispatch("devices/42/status", Bytes::new());
	router.dispatch("sensors/light/data/x/type/temp", Bytes::new());
	let delivered = settle(&router, &mut rx).await;
	let find = |label| delivered.iter().find(|d| d.label == label).unwrap();

	let bare = &find("bare").params;
	assert!(!bare.is_named());
	assert_eq!(bare.get("id"), None);

	let named = &find("named").params;
	assert_eq!(named.get("id"), Some("42"));
	assert_eq!(named.len(), 1);

	let positional = &find("positional").params;
	assert_eq!(positional.values(), ["light", "x"]);
}

#[tokio::test]
async fn test_registration_after_dispatch_is_seen() {
	let router = MqttRouter::new();
	let (tx, mut rx) = channel();
	router.subscribe("a/+", recorder(&tx, "wildcard")).unwrap();
	assert_eq!(router.dispatch("a/b", Bytes::new()), 1);

	router.subscribe("a/b", recorder(&tx, "exact")).unwrap();
	assert_eq!(router.dispatch("a/b", Bytes::new()), 2);

	let delivered = settle(&router, &mut rx).await;
	assert_eq!(labels(&delivered), ["exact", "wildcard", "wildcard"]);
}

#[tokio::test]
async fn test_invalid_pattern_leaves_other_routes_working() {
	let router = MqttRouter::new();
	let (tx, mut rx) = channel();
	router.subscribe("ok/+", recorder(&tx, "ok")).unwrap();

	for pattern in ["a/#/b", "a/+x+/+", "a//b", "", "a/b+/c", "+x+/+x+"] {
		let err = router.subscribe(pattern, recorder(&tx, "bad"));
		assert!(
			matches!(err, Err(MqttRouterError::TopicPattern(_))),
			"{pattern:?} should be rejected"
		);
	}

	assert_eq!(router.registry().len(), 1);
	assert_eq!(router.dispatch("ok/1", Bytes::new()), 1);
	assert_eq!(labels(&settle(&router, &mut rx).await), ["ok"]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_slow_handlers_then_runs_hooks() {
	let router = MqttRouter::with_settings(RouterSettings {
		handler_grace_millis: 50,
		hook_timeout_millis: 1000,
		..RouterSettings::default()
	});
	let finished = Arc::new(AtomicUsize::new(0));

	let slow = Arc::clone(&finished);
	router
		.subscribe(
			"slow",
			move |_topic: ArcStr, _payload: Payload, _params: TopicParams| {
				let slow = Arc::clone(&slow);
				async move {
					tokio::time::sleep(Duration::from_secs(60)).await;
					slow.fetch_add(1, Ordering::SeqCst);
					Ok::<_, BoxError>(())
				}
			},
		)
		.unwrap();

	let hooks_run = Arc::new(AtomicUsize::new(0));
	for _ in 0 .. 2 {
		let hooks_run = Arc::clone(&hooks_run);
		router.on_shutdown(move || async move {
			hooks_run.fetch_add(1, Ordering::SeqCst);
			Ok::<_, BoxError>(())
		});
	}
	router.on_shutdown(|| async { Err::<(), _>("hook failed") });

	assert_eq!(router.dispatch("slow", Bytes::new()), 1);
	let report = router.trigger_shutdown().await;

	assert_eq!(report.aborted_handlers, 1);
	assert_eq!(report.completed, 2);
	assert_eq!(report.errors.len(), 1);
	assert_eq!(finished.load(Ordering::SeqCst), 0);
	assert_eq!(hooks_run.load(Ordering::SeqCst), 2);

	let again = router.trigger_shutdown().await;
	assert_eq!(again.completed, 0);
	assert_eq!(hooks_run.load(Ordering::SeqCst), 2);

	assert_eq!(router.dispatch("slow", Bytes::new()), 0);
	assert_eq!(router.dispatcher().in_flight(), 0);
}

#[tokio::test]
async fn test_routers_are_independent() {
	let first = MqttRouter::new();
	let second = MqttRouter::new();
	let (tx, mut rx) = channel();
	first.subscribe("t", recorder(&tx, "first")).unwrap();

	assert_eq!(second.dispatch("t", Bytes::new()), 0);
	assert_eq!(first.dispatch("t", Bytes::new()), 1);
	assert_eq!(labels(&settle(&first, &mut rx).await), ["first"]);
}
