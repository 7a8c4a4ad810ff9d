use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arcstr::ArcStr;
use bytes::Bytes;
use rumqttc::Packet::{self, Disconnect, Publish};
use rumqttc::{AsyncClient, ConnAck, ConnectReturnCode, EventLoop, QoS};
use rumqttc::{Event::Incoming, Event::Outgoing, SubscribeFilter};
use tokio::time;
use tracing::{debug, error, info, warn};

use super::config::{MqttRouterConfig, RouterSettings};
use super::error::{ConnectionEstablishmentError, MqttRouterError};
use super::subscription_builder::SubscriptionBuilder;
use super::termination::{ShutdownReport, TerminationHook, TerminationHooks};
use crate::connection::RouterConnection;
use crate::routing::{
	Dispatcher, MessageHandler, SubscriptionId, SubscriptionOptions,
	SubscriptionRegistry,
};
use crate::topic::TopicPatternPath;

/// Topic router over an MQTT connection.
///
/// Owns its subscription registry, dispatcher and termination hooks, so
/// several routers can live in one process. Cloning is cheap and every clone
/// shares the same state.
///
/// ```rust,no_run
/// # use mqtt_router::prelude::*;
/// # async fn run() -> Result<()> {
/// let router = MqttRouter::new();
/// router.route("devices/+id+/status").handle(
/// 	|_topic: ArcStr, payload: Payload, params: TopicParams| async move {
/// 		println!("{:?} reported {payload}", params.get("id"));
/// 		Ok::<_, BoxError>(())
/// 	},
/// )?;
///
/// let connection = router.connect("mqtt://localhost:1883").await?;
/// tokio::signal::ctrl_c().await.ok();
/// connection.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MqttRouter {
	inner: Arc<RouterInner>,
}

struct RouterInner {
	settings: RouterSettings,
	registry: Arc<SubscriptionRegistry>,
	dispatcher: Arc<Dispatcher>,
	hooks: TerminationHooks,
	client: Mutex<Option<AsyncClient>>,
	running: AtomicBool,
}

impl Default for MqttRouter {
	fn default() -> Self {
		Self::new()
	}
}

impl MqttRouter {
	/// Create a router with default settings.
	pub fn new() -> Self {
		Self::with_settings(RouterSettings::default())
	}

	pub fn with_settings(settings: RouterSettings) -> Self {
		let registry = Arc::new(SubscriptionRegistry::new());
		let dispatcher = Arc::new(Dispatcher::new(
			Arc::clone(&registry),
			settings.topic_cache_size,
		));
		Self {
			inner: Arc::new(RouterInner {
				settings,
				registry,
				dispatcher,
				hooks: TerminationHooks::new(),
				client: Mutex::new(None),
				running: AtomicBool::new(false),
			}),
		}
	}

	pub fn settings(&self) -> &RouterSettings {
		&self.inner.settings
	}

	pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
		&self.inner.registry
	}

	pub fn dispatcher(&self) -> &Arc<Dispatcher> {
		&self.inner.dispatcher
	}

	pub fn termination_hooks(&self) -> &TerminationHooks {
		&self.inner.hooks
	}

	/// Start a fluent registration for `pattern`.
	pub fn route(&self, pattern: impl Into<ArcStr>) -> SubscriptionBuilder {
		SubscriptionBuilder::new(self.clone(), pattern.into())
	}

	/// Register `handler` for `pattern` with default options.
	pub fn subscribe<H: MessageHandler>(
		&self,
		pattern: impl TryInto<TopicPatternPath, Error: Into<MqttRouterError>>,
		handler: H,
	) -> Result<SubscriptionId, MqttRouterError> {
		self.subscribe_with_options(
			pattern,
			SubscriptionOptions::default(),
			handler,
		)
	}

	/// Register `handler` for `pattern`.
	///
	/// Malformed patterns are rejected here and leave the registry untouched.
	/// When the router is connected, the broker is asked right away for the
	/// pattern's filter unless it is already subscribed at a sufficient QoS.
	pub fn subscribe_with_options<H: MessageHandler>(
		&self,
		pattern: impl TryInto<TopicPatternPath, Error: Into<MqttRouterError>>,
		options: SubscriptionOptions,
		handler: H,
	) -> Result<SubscriptionId, MqttRouterError> {
		let pattern = pattern.try_into().map_err(Into::into)?;
		let subscription = self.inner.registry.register_with_filter(
			pattern,
			options,
			Arc::new(handler),
			self.inner.settings.default_qos,
			|filter, qos| self.subscribe_live(filter, qos),
		);
		debug!(
			subscription_id = %subscription.id(),
			pattern = %subscription.raw_pattern(),
			filter = %subscription.pattern().mqtt_pattern(),
			fallback = subscription.is_fallback(),
			raw_payload = subscription.raw_payload(),
			"Subscription registered"
		);
		Ok(subscription.id())
	}

	/// Asks a live connection for `filter`; queued without waiting.
	fn subscribe_live(&self, filter: &ArcStr, qos: QoS) {
		let Some(client) = self.client() else {
			return;
		};
		if let Err(err) = client.try_subscribe(filter.as_str(), qos) {
			error!(
				filter = %filter,
				error = %err,
				"Failed to subscribe filter on live connection"
			);
		}
	}

	/// Register a hook run once when the router shuts down.
	pub fn on_shutdown<H: TerminationHook>(&self, hook: H) {
		self.inner.hooks.register(hook);
	}

	/// Route one message, as the event loop does for every publish.
	///
	/// Returns the number of handlers scheduled. Must be called from within
	/// a Tokio runtime.
	pub fn dispatch(&self, topic: impl Into<ArcStr>, payload: Bytes) -> usize {
		self.inner.dispatcher.dispatch(topic, payload)
	}

	/// Unique broker filters with the QoS each is subscribed at.
	pub fn subscription_filters(&self) -> Vec<(ArcStr, QoS)> {
		self.inner.registry.filters(self.inner.settings.default_qos)
	}

	/// True between a successful connect and the end of shutdown.
	pub fn is_running(&self) -> bool {
		self.inner.running.load(Ordering::Acquire)
	}

	/// Stops dispatching, drains running handlers, then runs the
	/// termination hooks.
	///
	/// Both waits are bounded by the configured grace period and hook
	/// timeout. Hooks run only on the first call.
	pub async fn trigger_shutdown(&self) -> ShutdownReport {
		self.inner.dispatcher.close();
		let aborted = self
			.inner
			.dispatcher
			.drain(self.inner.settings.handler_grace())
			.await;
		let mut report =
			self.inner.hooks.trigger(self.inner.settings.hook_timeout()).await;
		report.aborted_handlers = aborted;
		report
	}

	/// Connect to the broker at `url` and start routing.
	///
	/// Keep the returned connection alive for the session and call
	/// `connection.shutdown()` when done.
	pub async fn connect(
		&self,
		url: &str,
	) -> Result<RouterConnection, MqttRouterError> {
		let config = MqttRouterConfig::from_url(url)?;
		self.connect_with_config(config).await
	}

	/// Connect with custom configuration
	pub async fn connect_with_config(
		&self,
		config: MqttRouterConfig,
	) -> Result<RouterConnection, MqttRouterError> {
		if config.settings.event_loop_capacity == 0 {
			return Err(MqttRouterError::configuration_value(
				"event_loop_capacity must be greater than 0",
			));
		}
		if self.inner.running.swap(true, Ordering::AcqRel) {
			return Err(MqttRouterError::AlreadyRunning);
		}

		let connected = self.open(config).await;
		if connected.is_err() {
			self.inner.running.store(false, Ordering::Release);
		}
		connected
	}

	async fn open(
		&self,
		config: MqttRouterConfig,
	) -> Result<RouterConnection, MqttRouterError> {
		let timeout_millis = config.settings.connection_timeout_millis;
		let (client, new_event_loop) = AsyncClient::new(
			config.connection,
			config.settings.event_loop_capacity,
		);

		let connected_event_loop = time::timeout(
			Duration::from_millis(timeout_millis),
			Self::establish_connection(new_event_loop),
		)
		.await
		.map_err(|_| ConnectionEstablishmentError::Timeout { timeout_millis })?
		.map_err(MqttRouterError::ConnectionEstablishment)?;

		*self.lock_client() = Some(client.clone());

		let accepting = Arc::new(AtomicBool::new(true));
		let event_loop_handle = tokio::spawn(Self::run(
			connected_event_loop,
			self.clone(),
			client.clone(),
			Arc::clone(&accepting),
		));

		// The loop must already be polling, or a full request channel blocks.
		if let Err(err) =
			Self::subscribe_all(&client, self.subscription_filters()).await
		{
			error!(error = %err, "Failed to subscribe registered filters");
		}

		Ok(RouterConnection::new(
			self.clone(),
			client,
			accepting,
			event_loop_handle,
		))
	}

	async fn subscribe_all(
		client: &AsyncClient,
		filters: Vec<(ArcStr, QoS)>,
	) -> Result<(), rumqttc::ClientError> {
		if filters.is_empty() {
			warn!("No subscriptions registered, nothing will be routed");
			return Ok(());
		}
		debug!(filters = filters.len(), "Subscribing registered filters");
		client
			.subscribe_many(
				filters.into_iter().map(|(filter, qos)| {
					SubscribeFilter::new(filter.to_string(), qos)
				}),
			)
			.await
	}

	async fn establish_connection(
		mut event_loop: EventLoop,
	) -> Result<EventLoop, ConnectionEstablishmentError> {
		loop {
			match event_loop.poll().await {
				| Ok(Incoming(Packet::ConnAck(ConnAck { code, .. }))) => {
					if code == ConnectReturnCode::Success {
						debug!("MQTT connection established successfully");
						return Ok(event_loop);
					} else {
						debug!(
						code = ?code,
						"MQTT connection rejected by broker"
					);
						return Err(
							ConnectionEstablishmentError::BrokerRejected {
								code,
							},
						);
					}
				}
				| Ok(notification) => {
					debug!(
					notification = ?notification,
					"Bootstrap phase notification"
				);
				}
				| Err(connection_err) => {
					debug!(
					error = %connection_err,
					"MQTT connection error during bootstrap phase"
				);
					return Err(ConnectionEstablishmentError::Network(
						connection_err,
					));
				}
			}
		}
	}

	/// Receive loop: dispatches publishes in arrival order until a
	/// Disconnect packet is seen in either direction.
	async fn run(
		mut event_loop: EventLoop,
		router: MqttRouter,
		client: AsyncClient,
		accepting: Arc<AtomicBool>,
	) {
		let mut error_count = 0;
		const MAX_CONSECUTIVE_ERRORS: u32 = 10;
		const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);
		const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

		loop {
			match event_loop.poll().await {
				| Ok(Incoming(Packet::ConnAck(ConnAck {
					session_present: false,
					code: ConnectReturnCode::Success,
				}))) => {
					error_count = 0;
					info!(
						"MQTT reconnected without session, resubscribing to \
						 all topics"
					);
					let client = client.clone();
					let filters = router.subscription_filters();
					tokio::spawn(async move {
						let _ = Self::subscribe_all(&client, filters)
							.await
							.inspect_err(|err| {
								error!(
								error = %err,
								"Failed to resubscribe to topics"
							);
							});
					});
				}
				| Ok(Incoming(Packet::ConnAck(ConnAck {
					session_present: true,
					code: ConnectReturnCode::Success,
				}))) => {
					error_count = 0;
					info!(
						"MQTT reconnected with session preserved, \
						 subscriptions maintained by broker"
					);
				}
				| Ok(Incoming(Publish(p))) => {
					error_count = 0;
					debug!(
					topic = %p.topic,
					payload_size = p.payload.len(),
					"Received MQTT message"
				);

					if accepting.load(Ordering::Acquire) {
						router.dispatch(p.topic, p.payload);
					} else {
						debug!(
						topic = %p.topic,
						"Shutting down, message dropped"
					);
					}
				}
				| Ok(Incoming(Disconnect)) => {
					info!("Received MQTT Disconnect packet from server");
					break;
				}
				| Ok(Outgoing(rumqttc::Outgoing::Disconnect)) => {
					info!("Sent MQTT Disconnect packet to server");
					break;
				}
				| Ok(notification) => {
					error_count = 0;
					debug!(
					notification = ?notification,
					"Received OTHER MQTT notification"
				);
				}
				| Err(err) => {
					error_count += 1;
					error!(
					error_count = error_count,
					error = %err,
					"MQTT event loop error"
				);

					if error_count >= MAX_CONSECUTIVE_ERRORS {
						error!(
							error_count = error_count,
							max_errors = MAX_CONSECUTIVE_ERRORS,
							"Too many consecutive errors, terminating event \
							 loop"
						);
						break;
					}

					let delay = INITIAL_RETRY_DELAY
						* 2_u32.pow((error_count - 1).min(10));
					let delay = delay.min(MAX_RETRY_DELAY);

					warn!(
					delay = ?delay,
					error_count = error_count,
					"Retrying MQTT connection"
				);
					time::sleep(delay).await;
				}
			}
		}
		info!("MQTT event loop terminated");
	}

	pub(crate) fn mark_stopped(&self) {
		*self.lock_client() = None;
		self.inner.running.store(false, Ordering::Release);
	}

	fn client(&self) -> Option<AsyncClient> {
		self.lock_client().clone()
	}

	fn lock_client(&self) -> std::sync::MutexGuard<'_, Option<AsyncClient>> {
		self.inner.client.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

impl std::fmt::Debug for MqttRouter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MqttRouter")
			.field("settings", &self.inner.settings)
			.field("subscriptions", &self.inner.registry.len())
			.field("hooks", &self.inner.hooks)
			.field("running", &self.is_running())
			.finish()
	}
}
