//! Configuration for router and connection setup

use std::time::Duration;

use rumqttc::{MqttOptions, OptionError, QoS};
use uuid::Uuid;

/// Router-level behavior settings
#[derive(Debug, Clone)]
pub struct RouterSettings {
	/// Size of the per-topic match cache (0 disables it)
	pub topic_cache_size: usize,
	/// How long shutdown waits for running handlers
	pub handler_grace_millis: u64,
	/// How long shutdown waits for termination hooks
	pub hook_timeout_millis: u64,
	/// QoS for subscriptions that do not request one
	pub default_qos: QoS,
}

impl Default for RouterSettings {
	fn default() -> Self {
		Self {
			topic_cache_size: 100,
			handler_grace_millis: 2000,
			hook_timeout_millis: 5000,
			default_qos: QoS::AtMostOnce,
		}
	}
}

impl RouterSettings {
	pub fn handler_grace(&self) -> Duration {
		Duration::from_millis(self.handler_grace_millis)
	}

	pub fn hook_timeout(&self) -> Duration {
		Duration::from_millis(self.hook_timeout_millis)
	}
}

/// Transport-level settings
#[derive(Debug, Clone)]
pub struct ClientSettings {
	/// Capacity of the event loop request channel
	pub event_loop_capacity: usize,
	/// Upper bound on the wait for the first CONNACK
	pub connection_timeout_millis: u64,
}

impl Default for ClientSettings {
	fn default() -> Self {
		Self {
			event_loop_capacity: 10,
			connection_timeout_millis: 5000,
		}
	}
}

/// Configuration for connecting a router to a broker
#[derive(Debug, Clone)]
pub struct MqttRouterConfig {
	/// Underlying MQTT connection options (from rumqttc)
	pub connection: MqttOptions,
	/// Transport settings
	pub settings: ClientSettings,
}

impl MqttRouterConfig {
	/// Create config with default settings
	pub fn new(client_id: &str, host: &str, port: u16) -> Self {
		Self {
			connection: MqttOptions::new(client_id, host, port),
			settings: ClientSettings::default(),
		}
	}

	/// Parse configuration from MQTT URL
	///
	/// Supports: tcp://, mqtt://, ssl://, mqtts://, ws://, wss://
	/// A client id is generated when the URL has no `client_id` query.
	pub fn from_url(url: &str) -> Result<Self, OptionError> {
		let connection = if url.contains("client_id=") {
			MqttOptions::parse_url(url)?
		} else {
			let separator = if url.contains('?') { '&' } else { '?' };
			MqttOptions::parse_url(format!(
				"{url}{separator}client_id={}",
				generate_client_id("mqtt-router")
			))?
		};
		Ok(Self {
			connection,
			settings: ClientSettings::default(),
		})
	}

	/// Create config for localhost:1883
	pub fn localhost(client_id: &str) -> Self {
		Self::new(client_id, "localhost", 1883)
	}

	pub fn connection_timeout(&self) -> Duration {
		Duration::from_millis(self.settings.connection_timeout_millis)
	}
}

/// Client id of the form `<prefix>-<8 hex digits>`.
pub fn generate_client_id(prefix: &str) -> String {
	let id = Uuid::new_v4().simple().to_string();
	format!("{prefix}-{}", &id[.. 8])
}
