use arcstr::ArcStr;
use rumqttc::QoS;

use super::error::MqttRouterError;
use super::router::MqttRouter;
use crate::routing::{
	BoxError, MessageHandler, Payload, SubscriptionId, SubscriptionOptions,
	sync_handler,
};
use crate::topic::TopicParams;

/// Immutable builder for one handler registration.
///
/// The pattern is compiled when a handler is attached, so an invalid
/// pattern is reported by [`handle`](Self::handle).
#[derive(Debug, Clone)]
#[must_use = "a route does nothing until a handler is attached"]
pub struct SubscriptionBuilder {
	router: MqttRouter,
	pattern: ArcStr,
	options: SubscriptionOptions,
}

impl SubscriptionBuilder {
	pub(crate) fn new(router: MqttRouter, pattern: ArcStr) -> Self {
		Self {
			router,
			pattern,
			options: SubscriptionOptions::default(),
		}
	}

	pub fn pattern(&self) -> &ArcStr {
		&self.pattern
	}

	/// Deliver payloads as received, skipping JSON decoding
	pub fn raw_payload(self, raw_payload: bool) -> Self {
		Self {
			options: self.options.raw_payload(raw_payload),
			..self
		}
	}

	/// Only run when no non-fallback route matches
	pub fn fallback(self, fallback: bool) -> Self {
		Self {
			options: self.options.fallback(fallback),
			..self
		}
	}

	/// Set QoS level
	pub fn with_qos(self, qos: QoS) -> Self {
		Self {
			options: self.options.qos(qos),
			..self
		}
	}

	/// Replace all options at once
	pub fn with_options(self, options: SubscriptionOptions) -> Self {
		Self { options, ..self }
	}

	/// Register an async handler.
	pub fn handle<H: MessageHandler>(
		self,
		handler: H,
	) -> Result<SubscriptionId, MqttRouterError> {
		self.router.subscribe_with_options(
			self.pattern.as_str(),
			self.options,
			handler,
		)
	}

	/// Register a handler that completes without awaiting.
	pub fn handle_sync<F, E>(
		self,
		handler: F,
	) -> Result<SubscriptionId, MqttRouterError>
	where
		F: Fn(ArcStr, Payload, TopicParams) -> Result<(), E>
			+ Send
			+ Sync
			+ 'static,
		E: Into<BoxError>,
	{
		self.handle(sync_handler(handler))
	}
}
